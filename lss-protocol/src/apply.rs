//! Command applier (§4.4): a pure-ish function from a parsed command and a
//! mutable configuration to a configuration update plus a serialised
//! ACK/NACK. "Mesh handle" mutation is limited to the `mesh_enabled` flag
//! living on `NodeConfig` itself — the router has no enabled/disabled state
//! of its own (per §4.2, wrapping never consults an enabled flag; the
//! caller decides whether to wrap at all), so `SET_MESH_CONFIG` only ever
//! touches the stored configuration.

use crate::codec::{build_ack, CommandPacket, CMD_ACK, CMD_NACK};
use crate::config::{KvStore, NodeConfig, MAX_TX_INTERVAL_MS, MIN_TX_INTERVAL_MS};

pub const CMD_PING: u8 = 0x00;
pub const CMD_GET_CONFIG: u8 = 0x01;
pub const CMD_SET_INTERVAL: u8 = 0x02;
pub const CMD_SET_LOCATION: u8 = 0x03;
pub const CMD_SET_TEMP_THRESH: u8 = 0x04;
pub const CMD_SET_BATTERY_THRESH: u8 = 0x05;
pub const CMD_SET_MESH_CONFIG: u8 = 0x06;
pub const CMD_RESTART: u8 = 0x07;
pub const CMD_FACTORY_RESET: u8 = 0x08;
pub const CMD_SET_LORA_PARAMS: u8 = 0x09;
pub const CMD_TIME_SYNC: u8 = 0x0A;
/// Not listed in the command table but referenced by the client runtime
/// (boot announcement) and base-station enrolment flow; 0x0B is the one
/// code left free between `SET_LORA_PARAMS` and `TIME_SYNC`/`BASE_WELCOME`.
pub const CMD_SENSOR_ANNOUNCE: u8 = 0x0B;
pub const CMD_BASE_WELCOME: u8 = 0x0C;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

const LOCATION_CAPACITY: usize = crate::codec::LOCATION_LEN;
const ZONE_CAPACITY: usize = crate::codec::ZONE_LEN;

/// Action the caller must perform after the ACK/NACK is confirmed on the
/// wire. `apply_command` never performs the destructive side of Restart or
/// FactoryReset itself — it only reports the intent, so the caller can
/// guarantee the ACK transmits first (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    None,
    Restart,
    FactoryReset,
}

fn truncate_to(s: &str, capacity: usize) -> String {
    let max = capacity.saturating_sub(1); // leave room for the NUL terminator
    s.chars().take(max).collect()
}

fn split_nul_terminated_pair(data: &[u8]) -> (String, String) {
    match data.iter().position(|&b| b == 0) {
        Some(nul) => {
            let location = String::from_utf8_lossy(&data[..nul]).into_owned();
            let rest = &data[nul + 1..];
            let zone_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            let zone = String::from_utf8_lossy(&rest[..zone_end]).into_owned();
            (location, zone)
        }
        None => (String::from_utf8_lossy(data).into_owned(), String::new()),
    }
}

/// Applies one parsed command to `config`, persisting accepted mutations
/// via `kv`. Returns the action the caller must perform post-ACK and the
/// serialised ACK/NACK bytes, with the sequence number always echoing the
/// command's.
pub fn apply_command(
    cmd: &CommandPacket,
    config: &mut NodeConfig,
    kv: &mut impl KvStore,
) -> (PostAction, Vec<u8>) {
    let mut post = PostAction::None;
    let mut mutated = false;
    let mut ok = true;

    match cmd.command_type {
        CMD_PING | CMD_GET_CONFIG => {}
        CMD_SET_INTERVAL => {
            if cmd.data.len() < 4 {
                ok = false;
            } else {
                let v = u32::from_le_bytes(cmd.data[..4].try_into().unwrap());
                if (MIN_TX_INTERVAL_MS..=MAX_TX_INTERVAL_MS).contains(&v) {
                    config.tx_interval_ms = v;
                    mutated = true;
                } else {
                    ok = false;
                }
            }
        }
        CMD_SET_LOCATION => {
            let (location, zone) = split_nul_terminated_pair(&cmd.data);
            config.location = truncate_to(&location, LOCATION_CAPACITY);
            config.zone = truncate_to(&zone, ZONE_CAPACITY);
            mutated = true;
        }
        CMD_SET_TEMP_THRESH => {
            if cmd.data.len() < 8 {
                ok = false;
            } else {
                config.temp_lo = f32::from_le_bytes(cmd.data[0..4].try_into().unwrap());
                config.temp_hi = f32::from_le_bytes(cmd.data[4..8].try_into().unwrap());
                mutated = true;
            }
        }
        CMD_SET_BATTERY_THRESH => {
            if cmd.data.len() < 8 {
                ok = false;
            } else {
                config.batt_lo = f32::from_le_bytes(cmd.data[0..4].try_into().unwrap());
                config.batt_crit = f32::from_le_bytes(cmd.data[4..8].try_into().unwrap());
                mutated = true;
            }
        }
        CMD_SET_MESH_CONFIG => {
            if cmd.data.is_empty() {
                ok = false;
            } else {
                config.mesh_enabled = cmd.data[0] != 0;
                mutated = true;
            }
        }
        CMD_RESTART => {
            post = PostAction::Restart;
        }
        CMD_FACTORY_RESET => {
            post = PostAction::FactoryReset;
        }
        CMD_SET_LORA_PARAMS => {
            if cmd.data.len() < 8 {
                ok = false;
            } else {
                config.lora_freq_mhz = f32::from_le_bytes(cmd.data[0..4].try_into().unwrap());
                config.lora_sf = cmd.data[5];
                config.lora_tx_power_dbm = cmd.data[7];
                mutated = true;
            }
        }
        CMD_TIME_SYNC | CMD_BASE_WELCOME => {
            if cmd.data.len() < 6 {
                ok = false;
            } else {
                config.last_time_sync_epoch = u32::from_le_bytes(cmd.data[0..4].try_into().unwrap());
                let tz_offset_minutes = i16::from_le_bytes(cmd.data[4..6].try_into().unwrap());
                config.tz_offset_minutes = tz_offset_minutes as i32;
                mutated = true;
            }
        }
        _ => {
            ok = false;
        }
    }

    if ok && mutated && config.save(kv).is_err() {
        ok = false;
    }

    let status = if ok { STATUS_OK } else { STATUS_ERR };
    let kind = if ok { CMD_ACK } else { CMD_NACK };
    let ack_bytes = build_ack(kind, config.node_id, cmd.sequence_number, status);

    (post, ack_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CommandPacket;
    use crate::config::InMemoryKv;

    fn cmd(command_type: u8, sequence_number: u8, data: Vec<u8>) -> CommandPacket {
        CommandPacket {
            command_type,
            target_sensor_id: 1,
            sequence_number,
            data,
        }
    }

    #[test]
    fn set_interval_within_range_acks_and_persists() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();
        let command = cmd(CMD_SET_INTERVAL, 9, 15_000u32.to_le_bytes().to_vec());

        let (post, ack) = apply_command(&command, &mut config, &mut kv);

        assert_eq!(post, PostAction::None);
        assert_eq!(config.tx_interval_ms, 15_000);
        let parsed = crate::codec::deserialize_ack(&ack).unwrap();
        assert_eq!(parsed.status_code, 0);
        assert_eq!(parsed.sequence_number, 9);

        let reloaded = NodeConfig::load(&mut kv).unwrap();
        assert_eq!(reloaded.tx_interval_ms, 15_000);
    }

    #[test]
    fn set_interval_out_of_range_nacks_and_leaves_config_unchanged() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();
        let original = config.tx_interval_ms;
        let command = cmd(CMD_SET_INTERVAL, 1, 500u32.to_le_bytes().to_vec());

        let (_, ack) = apply_command(&command, &mut config, &mut kv);

        assert_eq!(config.tx_interval_ms, original);
        let parsed = crate::codec::deserialize_ack(&ack).unwrap();
        assert_eq!(parsed.status_code, 1);
    }

    #[test]
    fn set_interval_short_payload_nacks() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();
        let command = cmd(CMD_SET_INTERVAL, 1, vec![0, 1]);
        let (_, ack) = apply_command(&command, &mut config, &mut kv);
        assert_eq!(crate::codec::deserialize_ack(&ack).unwrap().status_code, 1);
    }

    #[test]
    fn set_location_truncates_to_capacity() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();
        let long_location = "x".repeat(64);
        let mut data = long_location.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(b"Zone\0");
        let command = cmd(CMD_SET_LOCATION, 1, data);

        let (_, ack) = apply_command(&command, &mut config, &mut kv);

        assert!(config.location.len() < LOCATION_CAPACITY);
        assert_eq!(config.zone, "Zone");
        assert_eq!(crate::codec::deserialize_ack(&ack).unwrap().status_code, 0);
    }

    #[test]
    fn unknown_command_always_nacks() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();
        let command = cmd(0x7F, 3, Vec::new());
        let (post, ack) = apply_command(&command, &mut config, &mut kv);
        assert_eq!(post, PostAction::None);
        assert_eq!(crate::codec::deserialize_ack(&ack).unwrap().status_code, 1);
    }

    #[test]
    fn restart_and_factory_reset_report_post_action_without_wiping() {
        let mut kv = InMemoryKv::default();
        let mut config = NodeConfig::load(&mut kv).unwrap();

        let (post, ack) = apply_command(&cmd(CMD_RESTART, 1, Vec::new()), &mut config, &mut kv);
        assert_eq!(post, PostAction::Restart);
        assert_eq!(crate::codec::deserialize_ack(&ack).unwrap().status_code, 0);
        assert!(kv.namespace_exists(crate::config::NAMESPACE));

        let (post, ack) =
            apply_command(&cmd(CMD_FACTORY_RESET, 2, Vec::new()), &mut config, &mut kv);
        assert_eq!(post, PostAction::FactoryReset);
        assert_eq!(crate::codec::deserialize_ack(&ack).unwrap().status_code, 0);
        // apply_command itself never wipes storage; the caller does, after TX.
        assert!(kv.namespace_exists(crate::config::NAMESPACE));
    }
}
