//! Client runtime scheduling loop (§4.5, §5).
//!
//! `NodeRuntime` is the "single node runtime value" spec §9 calls for: it
//! owns the mesh router, configuration, sensor array, and last-tx timestamp
//! that the original firmware kept as globals. The loop itself
//! (`NodeRuntime::step`) is cooperative and single-threaded — no locks, no
//! preemption — matching §5.

use crate::traits::{HardwareClock, RadioLink, RadioProfile, SensorDriver};
use lss_protocol::apply::{apply_command, PostAction, CMD_SENSOR_ANNOUNCE};
use lss_protocol::codec::{
    deserialize_command, detect_packet, serialize_multi_sensor, CommandPacket, MultiSensorHeader,
    MultiSensorPacket, PacketFamily,
};
use lss_protocol::config::{InMemoryKv, KvStore, NodeConfig};
use lss_protocol::mesh::{MeshRouter, ReceiveOutcome, BROADCAST_ID, COORDINATOR_ID};
use tracing::{info, warn};

/// Guard delay between an inbound command's ACK being queued and actually
/// transmitted (spec §5: "≈50 ms").
pub const ACK_TX_DELAY_MS: u32 = 50;
/// Settle time before a Restart/FactoryReset "reboot" (spec §5: "≈200 ms").
pub const POST_ACTION_DELAY_MS: u32 = 200;

/// A RadioHead-style 4-byte header prepended by some base-station radio
/// drivers; client parsers must tolerate it by retrying detection here
/// (spec §6).
const RADIOHEAD_HEADER_LEN: usize = 4;

pub struct NodeRuntime<R: RadioLink, C: HardwareClock, K: KvStore = InMemoryKv> {
    config: NodeConfig,
    router: MeshRouter,
    sensors: Vec<Box<dyn SensorDriver>>,
    radio: R,
    clock: C,
    kv: K,
    last_tx_ms: u64,
    last_command_seq: u8,
    last_ack_status: u8,
    battery_percent: u8,
    charging: bool,
    restart_requested: bool,
}

impl<R: RadioLink, C: HardwareClock, K: KvStore> NodeRuntime<R, C, K> {
    /// Loads configuration, configures the radio, initialises sensors, and
    /// broadcasts the boot announcement. Mirrors the firmware's `init`.
    pub fn boot(
        mut radio: R,
        clock: C,
        mut kv: K,
        mut sensors: Vec<Box<dyn SensorDriver>>,
    ) -> Self {
        let config = NodeConfig::load(&mut kv).expect("config store is infallible for in-memory/demo backends");
        let router = MeshRouter::new(config.node_id);

        let profile = RadioProfile::derive(
            config.network_id,
            config.lora_freq_mhz,
            config.lora_sf,
            config.lora_tx_power_dbm,
        );
        info!(
            node_id = config.node_id,
            network_id = config.network_id,
            freq = config.lora_freq_mhz,
            sf = config.lora_sf,
            "booting node runtime"
        );
        radio.configure(profile);

        for sensor in sensors.iter_mut() {
            sensor.begin();
        }

        let mut runtime = Self {
            config,
            router,
            sensors,
            radio,
            clock,
            kv,
            last_tx_ms: 0,
            last_command_seq: 0,
            last_ack_status: 0,
            battery_percent: 100,
            charging: false,
            restart_requested: false,
        };

        runtime.announce();
        runtime
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// Reported by an external battery-monitoring collaborator; sensor
    /// physics (voltage dividers etc.) are out of scope (spec §1).
    pub fn set_power_status(&mut self, battery_percent: u8, charging: bool) {
        self.battery_percent = battery_percent;
        self.charging = charging;
    }

    fn announce(&mut self) {
        let announce = CommandPacket {
            command_type: CMD_SENSOR_ANNOUNCE,
            target_sensor_id: COORDINATOR_ID,
            sequence_number: 0,
            data: vec![self.config.node_id],
        };
        self.transmit_command_frame(&announce, COORDINATOR_ID);
    }

    fn transmit_command_frame(&mut self, pkt: &CommandPacket, mesh_dest: u8) {
        let bytes = lss_protocol::codec::serialize_command(pkt)
            .expect("command data area never exceeds capacity")
            .to_vec();
        let frame = if self.config.mesh_enabled {
            self.router.wrap(mesh_dest, &bytes)
        } else {
            bytes
        };
        self.radio.send(&frame);
    }

    /// One iteration of the main loop: receive-dispatch, telemetry-on-
    /// interval, beacon-if-due — in that order, per spec §4.5.
    pub fn step(&mut self) {
        let now_ms = self.clock.now_ms();

        if let Some(raw) = self.radio.poll_received() {
            self.handle_incoming(&raw, now_ms);
        }

        if now_ms.wrapping_sub(self.last_tx_ms) >= self.config.tx_interval_ms as u64 {
            self.transmit_telemetry();
            self.last_tx_ms = now_ms;
        }

        if let Some(beacon) = self.router.tick(now_ms) {
            self.radio.send(&beacon);
        }
    }

    /// A base station never mesh-wraps the commands it sends — only frames
    /// actually relayed between mesh peers carry a mesh header, and spec
    /// §4.5's command-dispatch path names no mesh-unwrap step at all. So a
    /// directly-recognisable application frame is dispatched as-is; only
    /// when the bytes don't classify as one is the mesh router given a
    /// chance to unwrap/forward/drop it.
    fn handle_incoming(&mut self, raw: &[u8], now_ms: u64) {
        if let Some((family, frame)) = Self::classify_frame(raw) {
            self.apply_application_frame(family, frame);
            return;
        }

        if self.config.mesh_enabled {
            match self.router.receive(raw, now_ms) {
                ReceiveOutcome::Deliver(payload) => {
                    if let Some((family, frame)) = Self::classify_frame(&payload) {
                        self.apply_application_frame(family, frame);
                    }
                }
                ReceiveOutcome::Forward { frame } => self.radio.send(&frame),
                ReceiveOutcome::Dropped => {}
            }
        }
    }

    /// Detects a frame's family, tolerating a leading 4-byte RadioHead
    /// header by retrying detection at offset 4 (spec §6).
    fn classify_frame(payload: &[u8]) -> Option<(PacketFamily, &[u8])> {
        if let Some(family) = detect_packet(payload) {
            return Some((family, payload));
        }
        if payload.len() > RADIOHEAD_HEADER_LEN {
            if let Some(family) = detect_packet(&payload[RADIOHEAD_HEADER_LEN..]) {
                return Some((family, &payload[RADIOHEAD_HEADER_LEN..]));
            }
        }
        None
    }

    /// Applies an inbound Command frame (other families are not actionable
    /// here and are silently discarded, per §7's frame-fault handling).
    fn apply_application_frame(&mut self, family: PacketFamily, frame: &[u8]) {
        if family != PacketFamily::Command {
            return; // frame fault / not actionable here: silently discarded
        }

        let Ok(command) = deserialize_command(frame) else {
            return;
        };

        if command.target_sensor_id != self.config.node_id
            && command.target_sensor_id != BROADCAST_ID
        {
            return; // addressing fault: silently ignored
        }

        let (post_action, ack_bytes) = apply_command(&command, &mut self.config, &mut self.kv);
        self.last_command_seq = command.sequence_number;
        self.last_ack_status = ack_bytes
            .get(5)
            .copied()
            .unwrap_or(0 /* ack status offset, see codec::deserialize_ack */);

        self.clock.delay_ms(ACK_TX_DELAY_MS);
        let ack_frame = if self.config.mesh_enabled {
            self.router.wrap(COORDINATOR_ID, &ack_bytes)
        } else {
            ack_bytes
        };
        self.radio.send(&ack_frame);

        match post_action {
            PostAction::None => {}
            PostAction::Restart => {
                info!(seq = command.sequence_number, "restart requested, ACK already on the wire");
                self.clock.delay_ms(POST_ACTION_DELAY_MS);
                self.restart_requested = true;
            }
            PostAction::FactoryReset => {
                warn!(seq = command.sequence_number, "factory reset requested, ACK already on the wire");
                self.clock.delay_ms(POST_ACTION_DELAY_MS);
                self.config = NodeConfig::factory_reset(&mut self.kv)
                    .expect("config store is infallible for in-memory/demo backends");
                self.restart_requested = true;
            }
        }
    }

    fn transmit_telemetry(&mut self) {
        const MAX_VALUES: usize = lss_protocol::codec::MAX_VALUES;
        let mut values = Vec::with_capacity(MAX_VALUES);
        for sensor in &self.sensors {
            if values.len() >= MAX_VALUES {
                break;
            }
            let remaining = MAX_VALUES - values.len();
            sensor.values(&mut values, remaining);
        }

        let header = MultiSensorHeader::with_strings(
            self.config.network_id,
            self.config.node_id,
            self.battery_percent,
            self.charging,
            self.last_command_seq,
            self.last_ack_status,
            &self.config.location,
            &self.config.zone,
        );
        let pkt = MultiSensorPacket { header, values };

        let mut buf = vec![0u8; 512];
        let n = match serialize_multi_sensor(&pkt, &mut buf) {
            Ok(n) => n,
            Err(_) => return, // can only happen if a buggy sensor yields >16 values
        };
        let telemetry = &buf[..n];

        let frame = if self.config.mesh_enabled {
            self.router.wrap(COORDINATOR_ID, telemetry)
        } else {
            telemetry.to_vec()
        };
        self.radio.send(&frame);
    }
}
