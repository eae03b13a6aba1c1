//! Reduced-AODV mesh router: header framing, route table, forwarding
//! decisions, and neighbour beacons for a tree-shaped mesh rooted at node 0.
//!
//! The router takes every timestamp as an explicit `now_ms: u64` rather than
//! reading a clock itself, so tests can drive it deterministically (the
//! real clock is one of the `HardwareClock`/async-timer seams described in
//! the client runtime and base-station layers). Elapsed time is always
//! computed with wrapping/unsigned subtraction so a millisecond counter
//! wraparound never panics or corrupts route ages.

use thiserror::Error;

pub const BROADCAST_ID: u8 = 255;
pub const COORDINATOR_ID: u8 = 0;

pub const ROUTE_TABLE_CAPACITY: usize = 20;
pub const ROUTE_TIMEOUT_MS: u64 = 10 * 60 * 1000;
pub const MAX_HOPS: u8 = 5;
pub const BEACON_INTERVAL_MS: u64 = 30 * 1000;

pub const MESH_HEADER_SIZE: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeshPacketType {
    Data = 0,
    Rreq = 1,
    Rrep = 2,
    Rerr = 3,
    Beacon = 4,
}

impl MeshPacketType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Data,
            1 => Self::Rreq,
            2 => Self::Rrep,
            3 => Self::Rerr,
            4 => Self::Beacon,
            _ => return None,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("frame shorter than mesh header ({0} bytes)")]
    ShortFrame(usize),
    #[error("unknown mesh packet type {0}")]
    UnknownPacketType(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshHeader {
    pub packet_type: MeshPacketType,
    pub source_id: u8,
    pub dest_id: u8,
    pub next_hop: u8,
    pub prev_hop: u8,
    pub hop_count: u8,
    pub ttl: u8,
    pub sequence_number: u16,
}

impl MeshHeader {
    pub fn write_to(&self, buf: &mut [u8; MESH_HEADER_SIZE]) {
        buf[0] = self.packet_type as u8;
        buf[1] = self.source_id;
        buf[2] = self.dest_id;
        buf[3] = self.next_hop;
        buf[4] = self.prev_hop;
        buf[5] = self.hop_count;
        buf[6] = self.ttl;
        buf[7..9].copy_from_slice(&self.sequence_number.to_le_bytes());
    }

    pub fn parse(buf: &[u8]) -> Result<Self, MeshError> {
        if buf.len() < MESH_HEADER_SIZE {
            return Err(MeshError::ShortFrame(buf.len()));
        }
        let packet_type =
            MeshPacketType::from_u8(buf[0]).ok_or(MeshError::UnknownPacketType(buf[0]))?;
        Ok(Self {
            packet_type,
            source_id: buf[1],
            dest_id: buf[2],
            next_hop: buf[3],
            prev_hop: buf[4],
            hop_count: buf[5],
            ttl: buf[6],
            sequence_number: u16::from_le_bytes([buf[7], buf[8]]),
        })
    }
}

/// One route-table row: how to reach `dest_id` and how fresh that knowledge is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub dest_id: u8,
    pub next_hop: u8,
    pub hop_count: u8,
    pub last_updated_ms: u64,
    pub valid: bool,
}

/// Outcome of feeding a raw inbound frame to [`MeshRouter::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Payload (the bytes after the mesh header) is for the upper layer.
    Deliver(Vec<u8>),
    /// Caller should retransmit `frame` with hop accounting already applied.
    Forward { frame: Vec<u8> },
    /// Nothing further to do: beacon processed, hop budget exceeded, or a
    /// malformed frame.
    Dropped,
}

pub struct MeshRouter {
    self_id: u8,
    routes: Vec<RouteEntry>,
    next_seq: u16,
    last_beacon_ms: Option<u64>,
}

impl MeshRouter {
    pub fn new(self_id: u8) -> Self {
        Self {
            self_id,
            routes: Vec::with_capacity(ROUTE_TABLE_CAPACITY),
            next_seq: 0,
            last_beacon_ms: None,
        }
    }

    pub fn self_id(&self) -> u8 {
        self.self_id
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Returns the stored next hop for `dest_id`, or `BROADCAST_ID` if no
    /// valid route exists (broadcast fallback).
    pub fn next_hop_for(&self, dest_id: u8) -> u8 {
        self.routes
            .iter()
            .find(|r| r.valid && r.dest_id == dest_id)
            .map(|r| r.next_hop)
            .unwrap_or(BROADCAST_ID)
    }

    /// Inserts or refreshes a route. Last-writer-wins: a fresher update
    /// always overwrites the stored next hop/hop count, even if the new
    /// path is longer than the one already known. This mirrors the source
    /// firmware's behaviour (spec §4.2 Open Question) rather than preferring
    /// the lowest hop count.
    pub fn update_route(&mut self, dest_id: u8, next_hop: u8, hop_count: u8, now_ms: u64) {
        if let Some(r) = self.routes.iter_mut().find(|r| r.dest_id == dest_id) {
            r.next_hop = next_hop;
            r.hop_count = hop_count;
            r.last_updated_ms = now_ms;
            r.valid = true;
            return;
        }

        let entry = RouteEntry {
            dest_id,
            next_hop,
            hop_count,
            last_updated_ms: now_ms,
            valid: true,
        };

        if self.routes.len() < ROUTE_TABLE_CAPACITY {
            self.routes.push(entry);
            return;
        }

        let oldest_idx = self
            .routes
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.last_updated_ms)
            .map(|(i, _)| i)
            .expect("capacity is non-zero");
        self.routes[oldest_idx] = entry;
    }

    /// Drops route entries whose age exceeds `ROUTE_TIMEOUT_MS`, using
    /// unsigned subtraction so a wrapped millisecond counter never panics.
    pub fn evict_stale_routes(&mut self, now_ms: u64) {
        self.routes
            .retain(|r| now_ms.wrapping_sub(r.last_updated_ms) <= ROUTE_TIMEOUT_MS);
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Prepends a mesh header to `payload`. Does not consult any "mesh
    /// enabled" flag — callers decide whether to wrap at all.
    pub fn wrap(&mut self, dest_id: u8, payload: &[u8]) -> Vec<u8> {
        let next_hop = if dest_id == BROADCAST_ID {
            BROADCAST_ID
        } else {
            self.next_hop_for(dest_id)
        };
        let header = MeshHeader {
            packet_type: MeshPacketType::Data,
            source_id: self.self_id,
            dest_id,
            next_hop,
            prev_hop: self.self_id,
            hop_count: 0,
            ttl: MAX_HOPS,
            sequence_number: self.next_sequence(),
        };
        let mut out = vec![0u8; MESH_HEADER_SIZE + payload.len()];
        let mut hdr_bytes = [0u8; MESH_HEADER_SIZE];
        header.write_to(&mut hdr_bytes);
        out[..MESH_HEADER_SIZE].copy_from_slice(&hdr_bytes);
        out[MESH_HEADER_SIZE..].copy_from_slice(payload);
        out
    }

    /// Received-frame state machine: validate length, hop check, record
    /// neighbour, classify type, then deliver/forward/drop.
    pub fn receive(&mut self, frame: &[u8], now_ms: u64) -> ReceiveOutcome {
        let header = match MeshHeader::parse(frame) {
            Ok(h) => h,
            Err(_) => return ReceiveOutcome::Dropped,
        };

        if header.hop_count >= MAX_HOPS {
            return ReceiveOutcome::Dropped;
        }

        if header.prev_hop != COORDINATOR_ID && header.prev_hop != BROADCAST_ID {
            self.update_route(header.source_id, header.prev_hop, header.hop_count, now_ms);
        }

        if header.packet_type == MeshPacketType::Beacon {
            self.update_route(header.source_id, header.source_id, 1, now_ms);
            return ReceiveOutcome::Dropped;
        }

        let payload = frame[MESH_HEADER_SIZE..].to_vec();

        if header.packet_type == MeshPacketType::Rreq && header.dest_id == self.self_id {
            return ReceiveOutcome::Deliver(payload);
        }

        if header.dest_id == self.self_id || header.dest_id == BROADCAST_ID {
            return ReceiveOutcome::Deliver(payload);
        }

        let forwarded = MeshHeader {
            packet_type: header.packet_type,
            source_id: header.source_id,
            dest_id: header.dest_id,
            next_hop: self.next_hop_for(header.dest_id),
            prev_hop: self.self_id,
            hop_count: header.hop_count + 1,
            ttl: header.ttl.saturating_sub(1),
            sequence_number: header.sequence_number,
        };
        let mut out = vec![0u8; MESH_HEADER_SIZE + payload.len()];
        let mut hdr_bytes = [0u8; MESH_HEADER_SIZE];
        forwarded.write_to(&mut hdr_bytes);
        out[..MESH_HEADER_SIZE].copy_from_slice(&hdr_bytes);
        out[MESH_HEADER_SIZE..].copy_from_slice(&payload);
        ReceiveOutcome::Forward { frame: out }
    }

    /// Emits a neighbour beacon at most once per `BEACON_INTERVAL_MS`, and
    /// evicts stale routes on every call regardless of whether a beacon
    /// fires.
    pub fn tick(&mut self, now_ms: u64) -> Option<Vec<u8>> {
        self.evict_stale_routes(now_ms);

        let due = match self.last_beacon_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= BEACON_INTERVAL_MS,
        };
        if !due {
            return None;
        }
        self.last_beacon_ms = Some(now_ms);

        let header = MeshHeader {
            packet_type: MeshPacketType::Beacon,
            source_id: self.self_id,
            dest_id: BROADCAST_ID,
            next_hop: BROADCAST_ID,
            prev_hop: self.self_id,
            hop_count: 0,
            ttl: 1,
            sequence_number: self.next_sequence(),
        };
        let mut hdr_bytes = [0u8; MESH_HEADER_SIZE];
        header.write_to(&mut hdr_bytes);
        Some(hdr_bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(source: u8, dest: u8, hop_count: u8, ttl: u8, prev_hop: u8) -> Vec<u8> {
        let header = MeshHeader {
            packet_type: MeshPacketType::Data,
            source_id: source,
            dest_id: dest,
            next_hop: 0,
            prev_hop,
            hop_count,
            ttl,
            sequence_number: 1,
        };
        let mut buf = [0u8; MESH_HEADER_SIZE];
        header.write_to(&mut buf);
        let mut out = buf.to_vec();
        out.push(0xAA);
        out
    }

    #[test]
    fn delivers_frame_addressed_to_self() {
        let mut router = MeshRouter::new(5);
        let frame = data_frame(1, 5, 0, 5, 1);
        assert_eq!(
            router.receive(&frame, 0),
            ReceiveOutcome::Deliver(vec![0xAA])
        );
    }

    #[test]
    fn forwards_frame_addressed_elsewhere() {
        let mut router = MeshRouter::new(5);
        let frame = data_frame(1, 3, 0, 5, 1);
        match router.receive(&frame, 0) {
            ReceiveOutcome::Forward { frame } => {
                let header = MeshHeader::parse(&frame).unwrap();
                assert_eq!(header.hop_count, 1);
                assert_eq!(header.prev_hop, 5);
                assert_eq!(header.ttl, 4);
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn drops_frame_at_hop_budget() {
        let mut router = MeshRouter::new(5);
        let frame = data_frame(1, 5, 5, 1, 1);
        assert_eq!(router.receive(&frame, 0), ReceiveOutcome::Dropped);
    }

    #[test]
    fn delivers_broadcast_frame() {
        let mut router = MeshRouter::new(5);
        let frame = data_frame(1, BROADCAST_ID, 0, 5, 1);
        assert_eq!(
            router.receive(&frame, 0),
            ReceiveOutcome::Deliver(vec![0xAA])
        );
    }

    #[test]
    fn beacon_learns_neighbour_without_delivery() {
        let mut router = MeshRouter::new(5);
        let header = MeshHeader {
            packet_type: MeshPacketType::Beacon,
            source_id: 2,
            dest_id: BROADCAST_ID,
            next_hop: BROADCAST_ID,
            prev_hop: 2,
            hop_count: 0,
            ttl: 1,
            sequence_number: 1,
        };
        let mut buf = [0u8; MESH_HEADER_SIZE];
        header.write_to(&mut buf);
        assert_eq!(router.receive(&buf, 0), ReceiveOutcome::Dropped);
        assert_eq!(router.next_hop_for(2), 2);
    }

    #[test]
    fn next_hop_reflects_last_update() {
        let mut router = MeshRouter::new(5);
        router.update_route(9, 2, 1, 0);
        router.update_route(9, 3, 4, 100);
        assert_eq!(router.next_hop_for(9), 3);
    }

    #[test]
    fn eviction_drops_routes_older_than_timeout() {
        let mut router = MeshRouter::new(5);
        router.update_route(9, 2, 1, 0);
        router.evict_stale_routes(ROUTE_TIMEOUT_MS + 1);
        assert_eq!(router.next_hop_for(9), BROADCAST_ID);
    }

    #[test]
    fn beacon_fires_at_most_once_per_interval() {
        let mut router = MeshRouter::new(5);
        assert!(router.tick(0).is_some());
        assert!(router.tick(1_000).is_none());
        assert!(router.tick(BEACON_INTERVAL_MS).is_some());
    }

    #[test]
    fn route_table_evicts_oldest_when_full() {
        let mut router = MeshRouter::new(5);
        for dest in 0..ROUTE_TABLE_CAPACITY as u8 {
            router.update_route(dest + 10, 1, 1, dest as u64);
        }
        assert_eq!(router.routes().len(), ROUTE_TABLE_CAPACITY);
        // One more distinct destination should evict the oldest (dest 10, ts 0).
        router.update_route(200, 1, 1, 1000);
        assert_eq!(router.next_hop_for(10), BROADCAST_ID);
        assert_eq!(router.next_hop_for(200), 1);
    }
}
