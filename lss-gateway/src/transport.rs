//! Radio transport seam for the base station.
//!
//! The teacher's gateway service treats its radio as an external
//! subprocess whose stdout it parses; here the equivalent boundary is a
//! small trait so the dispatcher, receive loop, and enrolment logic never
//! depend on a concrete serial/SPI driver. A deployed binary backs this
//! with whatever LoRa gateway hardware it has; tests back it with an
//! in-memory fake.

/// A cloned handle shares the same underlying radio (mirrors how a real
/// serial port exposes independent read/write halves over one device).
pub trait GatewayRadio: Clone + Send + 'static {
    fn send_frame(&mut self, frame: &[u8]);

    /// Blocks the calling (blocking-pool) thread until a frame arrives, or
    /// returns `None` once the radio is closed/shut down.
    fn recv_frame(&mut self) -> Option<Vec<u8>>;
}
