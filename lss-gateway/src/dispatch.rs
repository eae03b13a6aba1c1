//! Async glue between the [`CommandQueue`], the [`NodeRegistry`], and a
//! [`GatewayRadio`]. Follows the teacher's channel-pipeline shape
//! (`gateway-service/src/main.rs`: a reader task feeds an mpsc channel, a
//! processor task drains it) but adds the retry/timeout ticker the
//! original telemetry-only pipeline didn't need.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use lss_protocol::apply::CMD_BASE_WELCOME;
use lss_protocol::codec::{
    deserialize_ack, deserialize_command, deserialize_multi_sensor, detect_packet, CommandPacket,
    PacketFamily, CMD_ACK,
};

use crate::enrollment::NodeRegistry;
use crate::queue::{CommandHandle, CommandQueue, OutboundCommand};
use crate::telemetry::{TelemetryReading, TelemetrySink};
use crate::transport::GatewayRadio;

/// How often the dispatch/timeout ticker runs. Finer than the 12s retry
/// interval so a retry or a freshly-eligible pending command goes out
/// promptly rather than waiting for the next coarse tick.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct GatewayService<R: GatewayRadio> {
    queue: Arc<Mutex<CommandQueue>>,
    registry: Arc<Mutex<NodeRegistry>>,
    sink: Arc<Mutex<dyn TelemetrySink>>,
    radio: R,
}

impl<R: GatewayRadio> GatewayService<R> {
    pub fn new(radio: R, sink: impl TelemetrySink) -> Self {
        Self {
            queue: Arc::new(Mutex::new(CommandQueue::new())),
            registry: Arc::new(Mutex::new(NodeRegistry::new())),
            sink: Arc::new(Mutex::new(sink)),
            radio,
        }
    }

    /// Submission surface from spec §6: `submit(target, command_type,
    /// payload) -> handle`.
    pub fn submit(&self, target_node: u8, command_type: u8, payload: Vec<u8>) -> CommandHandle {
        self.queue
            .lock()
            .expect("command queue mutex poisoned")
            .submit(target_node, command_type, payload)
    }

    pub fn is_online(&self, node: u8) -> bool {
        self.registry
            .lock()
            .expect("node registry mutex poisoned")
            .is_online(node, Instant::now())
    }

    pub fn known_nodes(&self) -> Vec<u8> {
        self.registry
            .lock()
            .expect("node registry mutex poisoned")
            .known_nodes()
    }

    fn send_outbound(&mut self, outbound: &OutboundCommand) {
        let packet = CommandPacket {
            command_type: outbound.command_type,
            target_sensor_id: outbound.target_node,
            sequence_number: outbound.sequence_number,
            data: outbound.payload.clone(),
        };
        match lss_protocol::codec::serialize_command(&packet) {
            Ok(bytes) => self.radio.send_frame(&bytes),
            Err(e) => warn!(error = %e, "failed to serialise outbound command"),
        }
    }

    fn dispatch_and_retry_tick(&mut self) {
        let now = Instant::now();
        loop {
            let next = self.queue.lock().expect("command queue mutex poisoned").poll_dispatch(now);
            match next {
                Some(outbound) => {
                    info!(
                        node = outbound.target_node,
                        seq = outbound.sequence_number,
                        command = outbound.command_type,
                        "dispatching command"
                    );
                    self.send_outbound(&outbound);
                }
                None => break,
            }
        }

        let retries = self
            .queue
            .lock()
            .expect("command queue mutex poisoned")
            .poll_timeouts(now);
        for outbound in &retries {
            warn!(
                node = outbound.target_node,
                seq = outbound.sequence_number,
                "retrying command after timeout"
            );
            self.send_outbound(outbound);
        }

        let due_for_sync = self
            .registry
            .lock()
            .expect("node registry mutex poisoned")
            .nodes_due_for_time_sync(now);
        for node in due_for_sync {
            info!(node, "re-issuing time sync");
            let payload = time_sync_payload(current_epoch_secs(), 0);
            self.submit(node, CMD_BASE_WELCOME, payload);
        }
    }

    /// Processes one raw inbound frame: liveness tracking, ACK/NACK
    /// matching (explicit and piggybacked), and enrolment.
    fn handle_frame(&mut self, frame: &[u8]) {
        let Some(family) = detect_packet(frame) else {
            return; // frame fault: silently discarded
        };

        match family {
            PacketFamily::Ack => {
                let Ok(ack) = deserialize_ack(frame) else {
                    return;
                };
                self.registry
                    .lock()
                    .expect("node registry mutex poisoned")
                    .mark_seen(ack.sensor_id, Instant::now());
                self.queue.lock().expect("command queue mutex poisoned").complete(
                    ack.sensor_id,
                    ack.sequence_number,
                    ack.command_type == CMD_ACK,
                    ack.status_code,
                );
            }
            PacketFamily::MultiSensor => {
                let Ok(telemetry) = deserialize_multi_sensor(frame) else {
                    return;
                };
                let now = Instant::now();
                self.registry
                    .lock()
                    .expect("node registry mutex poisoned")
                    .mark_seen(telemetry.header.sensor_id, now);
                self.queue.lock().expect("command queue mutex poisoned").complete(
                    telemetry.header.sensor_id,
                    telemetry.header.last_command_seq,
                    telemetry.header.ack_status == 0,
                    telemetry.header.ack_status,
                );
                self.sink.lock().expect("telemetry sink mutex poisoned").record(TelemetryReading {
                    node_id: telemetry.header.sensor_id,
                    network_id: telemetry.header.network_id,
                    battery_percent: telemetry.header.battery_percent,
                    charging: telemetry.header.power_charging,
                    location: telemetry.header.location_str(),
                    zone: telemetry.header.zone_str(),
                    values: telemetry.values,
                });
            }
            PacketFamily::Command => {
                let Ok(command) = deserialize_command(frame) else {
                    return;
                };
                if command.command_type != lss_protocol::apply::CMD_SENSOR_ANNOUNCE {
                    return;
                }
                let Some(&node_id) = command.data.first() else {
                    return;
                };
                let is_new = self
                    .registry
                    .lock()
                    .expect("node registry mutex poisoned")
                    .handle_announce(node_id, Instant::now());
                if is_new {
                    info!(node = node_id, "enrolling new node");
                    let payload = time_sync_payload(current_epoch_secs(), 0);
                    self.submit(node_id, CMD_BASE_WELCOME, payload);
                }
            }
            PacketFamily::Legacy => {}
        }
    }
}

fn current_epoch_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn time_sync_payload(epoch_secs: u32, tz_offset_minutes: i16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&epoch_secs.to_le_bytes());
    payload.extend_from_slice(&tz_offset_minutes.to_le_bytes());
    payload
}

/// Spawns the reader task and the dispatch/retry ticker. Runs until the
/// radio's read side closes.
pub async fn run<R: GatewayRadio>(mut service: GatewayService<R>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let mut reader_radio = service.radio.clone();

    let reader = tokio::task::spawn_blocking(move || {
        while let Some(frame) = reader_radio.recv_frame() {
            if tx.blocking_send(frame).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => service.handle_frame(&frame),
                    None => break,
                }
            }
            _ = ticker.tick() => {
                service.dispatch_and_retry_tick();
            }
        }
    }

    reader.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use lss_protocol::codec::{build_ack, MultiSensorHeader, MultiSensorPacket};
    use std::collections::VecDeque;

    #[derive(Clone, Default)]
    struct FakeRadio {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl GatewayRadio for FakeRadio {
        fn send_frame(&mut self, frame: &[u8]) {
            self.sent.lock().unwrap().push(frame.to_vec());
        }
        fn recv_frame(&mut self) -> Option<Vec<u8>> {
            self.inbox.lock().unwrap().pop_front()
        }
    }

    #[test]
    fn explicit_ack_completes_matching_entry() {
        let radio = FakeRadio::default();
        let mut service = GatewayService::new(radio, crate::telemetry::LoggingSink::default());
        let handle = service.submit(3, 0x02, vec![1, 2, 3, 4]);
        service.dispatch_and_retry_tick();

        let ack_bytes = build_ack(CMD_ACK, 3, 0, 0);
        service.handle_frame(&ack_bytes);

        assert_eq!(handle.status(), crate::queue::CommandStatus::Acked(0));
    }

    #[test]
    fn piggyback_ack_completes_matching_entry() {
        let radio = FakeRadio::default();
        let mut service = GatewayService::new(radio, crate::telemetry::LoggingSink::default());
        let handle = service.submit(3, 0x02, vec![]);
        service.dispatch_and_retry_tick();

        let header = MultiSensorHeader::with_strings(1, 3, 90, false, 0, 0, "", "");
        let telemetry = MultiSensorPacket {
            header,
            values: vec![],
        };
        let mut buf = [0u8; 128];
        let n = lss_protocol::codec::serialize_multi_sensor(&telemetry, &mut buf).unwrap();

        service.handle_frame(&buf[..n]);

        assert_eq!(handle.status(), crate::queue::CommandStatus::Acked(0));
    }

    #[test]
    fn sensor_announce_enrols_and_queues_welcome() {
        let radio = FakeRadio::default();
        let mut service = GatewayService::new(radio, crate::telemetry::LoggingSink::default());

        let announce = CommandPacket {
            command_type: lss_protocol::apply::CMD_SENSOR_ANNOUNCE,
            target_sensor_id: 0,
            sequence_number: 0,
            data: vec![9],
        };
        let frame = lss_protocol::codec::serialize_command(&announce).unwrap();
        service.handle_frame(&frame);

        assert!(service.known_nodes().contains(&9));
        assert_eq!(
            service
                .queue
                .lock()
                .unwrap()
                .pending_len(),
            1
        );
    }
}
