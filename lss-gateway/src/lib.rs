pub mod dispatch;
pub mod enrollment;
pub mod queue;
pub mod telemetry;
pub mod transport;

pub use dispatch::GatewayService;
pub use queue::{CommandHandle, CommandStatus};
pub use telemetry::{LoggingSink, TelemetryReading, TelemetrySink};
pub use transport::GatewayRadio;
