//! Outbound command queue and retry bookkeeping (§4.6, §3, §5).
//!
//! Pure, synchronous, and clock-injected (every operation takes an explicit
//! `Instant`) so the retry/timeout/ACK-matching logic can be unit tested
//! without a Tokio runtime. [`crate::dispatch`] wraps this behind an async
//! task.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per spec §4.6: three attempts total, twelve seconds apart.
pub const MAX_ATTEMPTS: u8 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(12);

/// Disposition observable through [`CommandHandle::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    InFlight,
    Acked(u8),
    Nacked(u8),
    Timeout,
}

/// A handle returned by [`CommandQueue::submit`]; polling is the only
/// contract spec §6 requires ("status(handle) -> {...}").
#[derive(Clone)]
pub struct CommandHandle {
    status: Arc<Mutex<CommandStatus>>,
}

impl CommandHandle {
    pub fn status(&self) -> CommandStatus {
        *self.status.lock().expect("status mutex poisoned")
    }
}

struct Entry {
    target_node: u8,
    command_type: u8,
    payload: Vec<u8>,
    sequence_number: Option<u8>,
    attempts_remaining: u8,
    next_attempt_at: Option<Instant>,
    status: Arc<Mutex<CommandStatus>>,
}

/// A command ready for (re)transmission, as handed back by
/// [`CommandQueue::poll_dispatch`]/[`CommandQueue::poll_timeouts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub target_node: u8,
    pub command_type: u8,
    pub payload: Vec<u8>,
    pub sequence_number: u8,
}

#[derive(Default)]
pub struct CommandQueue {
    pending: VecDeque<Entry>,
    in_flight: HashMap<u8, Entry>,
    per_node_seq: HashMap<u8, u8>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// FIFO enqueue; returns a pollable handle.
    pub fn submit(&mut self, target_node: u8, command_type: u8, payload: Vec<u8>) -> CommandHandle {
        let status = Arc::new(Mutex::new(CommandStatus::Pending));
        self.pending.push_back(Entry {
            target_node,
            command_type,
            payload,
            sequence_number: None,
            attempts_remaining: MAX_ATTEMPTS,
            next_attempt_at: None,
            status: status.clone(),
        });
        CommandHandle { status }
    }

    fn next_sequence(&mut self, node: u8) -> u8 {
        let seq = self.per_node_seq.entry(node).or_insert(0);
        let out = *seq;
        *seq = seq.wrapping_add(1);
        out
    }

    /// Pops and dispatches the oldest pending entry whose target node has
    /// no command already in flight. Commands to distinct nodes progress
    /// independently; commands to the same node serialise (spec §5).
    pub fn poll_dispatch(&mut self, now: Instant) -> Option<OutboundCommand> {
        let idx = self
            .pending
            .iter()
            .position(|e| !self.in_flight.contains_key(&e.target_node))?;
        let mut entry = self.pending.remove(idx)?;

        let seq = self.next_sequence(entry.target_node);
        entry.sequence_number = Some(seq);
        entry.next_attempt_at = Some(now + RETRY_INTERVAL);
        *entry.status.lock().expect("status mutex poisoned") = CommandStatus::InFlight;

        let outbound = OutboundCommand {
            target_node: entry.target_node,
            command_type: entry.command_type,
            payload: entry.payload.clone(),
            sequence_number: seq,
        };
        self.in_flight.insert(entry.target_node, entry);
        Some(outbound)
    }

    /// Entries whose retry deadline has passed: either retransmitted (same
    /// sequence number, attempts decremented) or, on exhaustion, failed with
    /// `Timeout` and removed.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<OutboundCommand> {
        let mut retransmits = Vec::new();
        let mut exhausted = Vec::new();

        for (&node, entry) in self.in_flight.iter_mut() {
            let due = matches!(entry.next_attempt_at, Some(t) if now >= t);
            if !due {
                continue;
            }
            entry.attempts_remaining = entry.attempts_remaining.saturating_sub(1);
            if entry.attempts_remaining == 0 {
                exhausted.push(node);
            } else {
                entry.next_attempt_at = Some(now + RETRY_INTERVAL);
                retransmits.push(OutboundCommand {
                    target_node: entry.target_node,
                    command_type: entry.command_type,
                    payload: entry.payload.clone(),
                    sequence_number: entry.sequence_number.expect("in-flight entries are stamped"),
                });
            }
        }

        for node in exhausted {
            if let Some(entry) = self.in_flight.remove(&node) {
                *entry.status.lock().expect("status mutex poisoned") = CommandStatus::Timeout;
            }
        }

        retransmits
    }

    /// Matches an explicit ACK/NACK or a piggybacked telemetry
    /// acknowledgement against the in-flight entry for `node`. Returns
    /// `true` if a match completed and removed the entry.
    pub fn complete(&mut self, node: u8, sequence_number: u8, ack: bool, status_code: u8) -> bool {
        let matches_seq = self
            .in_flight
            .get(&node)
            .and_then(|e| e.sequence_number)
            .is_some_and(|seq| seq == sequence_number);
        if !matches_seq {
            return false;
        }
        let entry = self.in_flight.remove(&node).expect("checked above");
        let status = if ack {
            CommandStatus::Acked(status_code)
        } else {
            CommandStatus::Nacked(status_code)
        };
        *entry.status.lock().expect("status mutex poisoned") = status;
        true
    }

    /// Explicit cancel from the API surface (spec §5 "Cancellation").
    pub fn cancel(&mut self, node: u8) -> bool {
        if let Some(entry) = self.in_flight.remove(&node) {
            *entry.status.lock().expect("status mutex poisoned") = CommandStatus::Timeout;
            return true;
        }
        false
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_dispatch_transitions_to_in_flight() {
        let mut queue = CommandQueue::new();
        let handle = queue.submit(3, 0x02, vec![1, 2, 3]);
        assert_eq!(handle.status(), CommandStatus::Pending);

        let now = Instant::now();
        let outbound = queue.poll_dispatch(now).unwrap();
        assert_eq!(outbound.target_node, 3);
        assert_eq!(outbound.sequence_number, 0);
        assert_eq!(handle.status(), CommandStatus::InFlight);
    }

    #[test]
    fn distinct_nodes_dispatch_independently() {
        let mut queue = CommandQueue::new();
        queue.submit(1, 0x00, vec![]);
        queue.submit(2, 0x00, vec![]);

        let now = Instant::now();
        let a = queue.poll_dispatch(now).unwrap();
        let b = queue.poll_dispatch(now).unwrap();
        assert_ne!(a.target_node, b.target_node);
        assert_eq!(queue.poll_dispatch(now), None);
    }

    #[test]
    fn same_node_commands_serialise() {
        let mut queue = CommandQueue::new();
        let first = queue.submit(5, 0x00, vec![]);
        let _second = queue.submit(5, 0x00, vec![]);

        let now = Instant::now();
        assert!(queue.poll_dispatch(now).is_some());
        assert_eq!(queue.poll_dispatch(now), None); // node 5 already in flight

        queue.complete(5, 0, true, 0);
        assert_eq!(first.status(), CommandStatus::Acked(0));
        assert!(queue.poll_dispatch(now).is_some()); // second entry now eligible
    }

    #[test]
    fn ack_cancels_further_delivery() {
        let mut queue = CommandQueue::new();
        let handle = queue.submit(3, 0x02, vec![]);
        let now = Instant::now();
        let outbound = queue.poll_dispatch(now).unwrap();

        assert!(queue.complete(3, outbound.sequence_number, true, 0));
        assert_eq!(handle.status(), CommandStatus::Acked(0));
        assert_eq!(queue.in_flight_len(), 0);

        let later = now + RETRY_INTERVAL + Duration::from_secs(1);
        assert!(queue.poll_timeouts(later).is_empty());
    }

    #[test]
    fn timeout_retries_up_to_three_attempts_then_fails() {
        let mut queue = CommandQueue::new();
        let handle = queue.submit(3, 0x02, vec![]);
        let mut now = Instant::now();
        let first = queue.poll_dispatch(now).unwrap();

        now += RETRY_INTERVAL;
        let retry1 = queue.poll_timeouts(now);
        assert_eq!(retry1.len(), 1);
        assert_eq!(retry1[0].sequence_number, first.sequence_number);
        assert_eq!(handle.status(), CommandStatus::InFlight);

        now += RETRY_INTERVAL;
        let retry2 = queue.poll_timeouts(now);
        assert_eq!(retry2.len(), 1);
        assert_eq!(handle.status(), CommandStatus::InFlight);

        now += RETRY_INTERVAL;
        let retry3 = queue.poll_timeouts(now);
        assert!(retry3.is_empty());
        assert_eq!(handle.status(), CommandStatus::Timeout);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[test]
    fn mismatched_sequence_does_not_complete() {
        let mut queue = CommandQueue::new();
        let handle = queue.submit(3, 0x00, vec![]);
        let now = Instant::now();
        queue.poll_dispatch(now).unwrap();

        assert!(!queue.complete(3, 99, true, 0));
        assert_eq!(handle.status(), CommandStatus::InFlight);
    }

    #[test]
    fn sequence_numbers_wrap_at_256_per_node() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        for i in 0..300u32 {
            let handle = queue.submit(7, 0x00, vec![]);
            let out = queue.poll_dispatch(now).unwrap();
            assert_eq!(out.sequence_number, (i % 256) as u8);
            queue.complete(7, out.sequence_number, true, 0);
            let _ = handle.status();
        }
    }
}
