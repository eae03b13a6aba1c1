//! Node enrolment and liveness tracking (§4.6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(300);
pub const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(3 * 3600);

struct NodeRecord {
    last_seen: Instant,
    last_time_sync_sent: Option<Instant>,
}

/// Tracks which nodes the base station has heard from, when, and when each
/// one last received a time-sync command.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<u8, NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a frame (of any kind) was heard from `node` at `now`.
    pub fn mark_seen(&mut self, node: u8, now: Instant) {
        self.nodes
            .entry(node)
            .or_insert_with(|| NodeRecord {
                last_seen: now,
                last_time_sync_sent: None,
            })
            .last_seen = now;
    }

    pub fn is_online(&self, node: u8, now: Instant) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|r| now.saturating_duration_since(r.last_seen) < LIVENESS_TIMEOUT)
    }

    pub fn known_nodes(&self) -> Vec<u8> {
        self.nodes.keys().copied().collect()
    }

    /// Processes a `CMD_SENSOR_ANNOUNCE`. Returns `true` the first time a
    /// node is seen (the caller should enqueue `CMD_BASE_WELCOME`); returns
    /// `false` for a re-announce from an already-known node.
    pub fn handle_announce(&mut self, node: u8, now: Instant) -> bool {
        let is_new = !self.nodes.contains_key(&node);
        self.mark_seen(node, now);
        is_new
    }

    /// Nodes that have gone `TIME_SYNC_INTERVAL` without a time-sync
    /// command, or have never received one. Marks them as just sent.
    pub fn nodes_due_for_time_sync(&mut self, now: Instant) -> Vec<u8> {
        let mut due = Vec::new();
        for (&node, record) in self.nodes.iter_mut() {
            let is_due = match record.last_time_sync_sent {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= TIME_SYNC_INTERVAL,
            };
            if is_due {
                record.last_time_sync_sent = Some(now);
                due.push(node);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_announce_is_new_enrollment() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();
        assert!(registry.handle_announce(3, now));
        assert!(!registry.handle_announce(3, now));
    }

    #[test]
    fn node_goes_offline_after_liveness_timeout() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();
        registry.mark_seen(3, now);
        assert!(registry.is_online(3, now));

        let later = now + LIVENESS_TIMEOUT + Duration::from_secs(1);
        assert!(!registry.is_online(3, later));
    }

    #[test]
    fn time_sync_is_due_once_per_interval() {
        let mut registry = NodeRegistry::new();
        let now = Instant::now();
        registry.mark_seen(5, now);

        assert_eq!(registry.nodes_due_for_time_sync(now), vec![5]);
        assert!(registry.nodes_due_for_time_sync(now).is_empty());

        let later = now + TIME_SYNC_INTERVAL + Duration::from_secs(1);
        assert_eq!(registry.nodes_due_for_time_sync(later), vec![5]);
    }
}
