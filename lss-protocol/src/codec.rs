//! Frame serialisation, CRC, and family detection.
//!
//! All frames are little-endian and packed; this module never panics and
//! never mutates caller state on failure — callers get back a typed error
//! and the input buffer is left untouched.

use crate::value::{ValueEntry, ValueType};
use crc::{Crc, CRC_16_IBM_3740};
use thiserror::Error;

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xorout.
/// `CRC_16_IBM_3740` in the `crc` catalog is this exact algorithm (check
/// value 0x29B1, matching the spec's known vector for "123456789").
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

pub const SYNC_LEGACY: u16 = 0x1234;
pub const SYNC_MULTI_SENSOR: u16 = 0xABCD;
pub const SYNC_COMMAND_OR_ACK: u16 = 0xCDEF;

pub const MULTI_SENSOR_PACKET_TYPE: u8 = 1;

pub const CMD_ACK: u8 = 0xA0;
pub const CMD_NACK: u8 = 0xA1;

pub const MAX_VALUES: usize = 16;
pub const LOCATION_LEN: usize = 32;
pub const ZONE_LEN: usize = 16;
pub const COMMAND_DATA_CAPACITY: usize = 192;

/// Header size of a multi-sensor frame, before values and trailing CRC.
pub const MULTI_SENSOR_HEADER_SIZE: usize =
    2 + 2 + 1 + 1 + 1 + 1 + 1 + 1 + 1 + 1 + LOCATION_LEN + ZONE_LEN;
const VALUE_ENTRY_SIZE: usize = 1 + 4;

/// Fixed total size of a Command frame (data area is 192 bytes regardless of
/// `data_length`).
pub const COMMAND_FRAME_SIZE: usize = 2 + 1 + 1 + 1 + 1 + 1 + COMMAND_DATA_CAPACITY + 2;
/// Fixed total size of an Acknowledgement frame — one byte longer than a
/// Command frame because it carries both `status_code` and `data_length`
/// where Command only carries `data_length` (see spec §3).
pub const ACK_FRAME_SIZE: usize = 2 + 1 + 1 + 1 + 1 + 1 + 1 + COMMAND_DATA_CAPACITY + 2;

pub const LEGACY_FRAME_SIZE: usize = 2 + 2 + 1 + 4 + 1 + 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too short: need at least {need} bytes, got {got}")]
    ShortBuffer { need: usize, got: usize },
    #[error("sync word mismatch: expected {expected:#06x}, got {got:#06x}")]
    SyncMismatch { expected: u16, got: u16 },
    #[error("value count {0} exceeds maximum of {MAX_VALUES}")]
    TooManyValues(u8),
    #[error("crc mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },
    #[error("unknown value type tag {0}")]
    UnknownValueType(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Which family a raw buffer belongs to, as determined by `detect_packet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFamily {
    Legacy,
    MultiSensor,
    Command,
    Ack,
}

/// Inspects the sync word (and, for the shared 0xCDEF family, the
/// discriminant byte) to classify a buffer without fully parsing it.
/// Mirrors spec §4.1 `detect_packet`.
pub fn detect_packet(buf: &[u8]) -> Option<PacketFamily> {
    if buf.len() < 2 {
        return None;
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    match sync {
        SYNC_LEGACY if buf.len() >= LEGACY_FRAME_SIZE => Some(PacketFamily::Legacy),
        SYNC_MULTI_SENSOR => Some(PacketFamily::MultiSensor),
        SYNC_COMMAND_OR_ACK => {
            let discriminant = *buf.get(2)?;
            if discriminant == CMD_ACK || discriminant == CMD_NACK {
                Some(PacketFamily::Ack)
            } else {
                Some(PacketFamily::Command)
            }
        }
        _ => None,
    }
}

/// A legacy single-sensor telemetry frame (sync `0x1234`), predating the
/// multi-sensor format. Kept to `detect_packet`'s legacy branch and a fixed
/// small layout since the distilled spec leaves its body otherwise
/// unspecified beyond the sync word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyPacket {
    pub network_id: u16,
    pub sensor_id: u8,
    pub temperature_c: f32,
    pub battery_percent: u8,
}

pub fn serialize_legacy(pkt: &LegacyPacket) -> [u8; LEGACY_FRAME_SIZE] {
    let mut buf = [0u8; LEGACY_FRAME_SIZE];
    buf[0..2].copy_from_slice(&SYNC_LEGACY.to_le_bytes());
    buf[2..4].copy_from_slice(&pkt.network_id.to_le_bytes());
    buf[4] = pkt.sensor_id;
    buf[5..9].copy_from_slice(&pkt.temperature_c.to_le_bytes());
    buf[9] = pkt.battery_percent;
    let crc = crc16(&buf[0..10]);
    buf[10..12].copy_from_slice(&crc.to_le_bytes());
    buf
}

pub fn deserialize_legacy(buf: &[u8]) -> CodecResult<LegacyPacket> {
    if buf.len() < LEGACY_FRAME_SIZE {
        return Err(CodecError::ShortBuffer {
            need: LEGACY_FRAME_SIZE,
            got: buf.len(),
        });
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_LEGACY {
        return Err(CodecError::SyncMismatch {
            expected: SYNC_LEGACY,
            got: sync,
        });
    }
    let computed = crc16(&buf[0..10]);
    let expected = u16::from_le_bytes([buf[10], buf[11]]);
    if computed != expected {
        return Err(CodecError::CrcMismatch { expected, computed });
    }
    Ok(LegacyPacket {
        network_id: u16::from_le_bytes([buf[2], buf[3]]),
        sensor_id: buf[4],
        temperature_c: f32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
        battery_percent: buf[9],
    })
}

/// Header of a multi-sensor telemetry frame (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct MultiSensorHeader {
    pub network_id: u16,
    pub sensor_id: u8,
    pub battery_percent: u8,
    pub power_charging: bool,
    pub last_command_seq: u8,
    pub ack_status: u8,
    pub location: [u8; LOCATION_LEN],
    pub zone: [u8; ZONE_LEN],
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiSensorPacket {
    pub header: MultiSensorHeader,
    pub values: Vec<ValueEntry>,
}

fn write_nul_padded(dst: &mut [u8], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in &mut dst[n..] {
        *b = 0;
    }
}

fn read_nul_terminated(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

impl MultiSensorHeader {
    pub fn location_str(&self) -> String {
        read_nul_terminated(&self.location)
    }

    pub fn zone_str(&self) -> String {
        read_nul_terminated(&self.zone)
    }

    pub fn with_strings(
        network_id: u16,
        sensor_id: u8,
        battery_percent: u8,
        power_charging: bool,
        last_command_seq: u8,
        ack_status: u8,
        location: &str,
        zone: &str,
    ) -> Self {
        let mut loc = [0u8; LOCATION_LEN];
        let mut zn = [0u8; ZONE_LEN];
        write_nul_padded(&mut loc, location);
        write_nul_padded(&mut zn, zone);
        Self {
            network_id,
            sensor_id,
            battery_percent,
            power_charging,
            last_command_seq,
            ack_status,
            location: loc,
            zone: zn,
        }
    }
}

pub fn serialize_multi_sensor(pkt: &MultiSensorPacket, buf: &mut [u8]) -> CodecResult<usize> {
    let value_count = pkt.values.len();
    if value_count > MAX_VALUES {
        return Err(CodecError::TooManyValues(value_count as u8));
    }
    let total = MULTI_SENSOR_HEADER_SIZE + value_count * VALUE_ENTRY_SIZE + 2;
    if buf.len() < total {
        return Err(CodecError::ShortBuffer {
            need: total,
            got: buf.len(),
        });
    }

    let h = &pkt.header;
    let mut off = 0usize;
    buf[off..off + 2].copy_from_slice(&SYNC_MULTI_SENSOR.to_le_bytes());
    off += 2;
    buf[off..off + 2].copy_from_slice(&h.network_id.to_le_bytes());
    off += 2;
    buf[off] = MULTI_SENSOR_PACKET_TYPE;
    off += 1;
    buf[off] = h.sensor_id;
    off += 1;
    buf[off] = value_count as u8;
    off += 1;
    buf[off] = h.battery_percent;
    off += 1;
    buf[off] = h.power_charging as u8;
    off += 1;
    buf[off] = h.last_command_seq;
    off += 1;
    buf[off] = h.ack_status;
    off += 1;
    buf[off] = 0; // pad
    off += 1;
    buf[off..off + LOCATION_LEN].copy_from_slice(&h.location);
    off += LOCATION_LEN;
    buf[off..off + ZONE_LEN].copy_from_slice(&h.zone);
    off += ZONE_LEN;

    for v in &pkt.values {
        buf[off] = v.value_type.tag();
        off += 1;
        buf[off..off + 4].copy_from_slice(&v.value.to_le_bytes());
        off += 4;
    }

    let crc = crc16(&buf[..off]);
    buf[off..off + 2].copy_from_slice(&crc.to_le_bytes());
    off += 2;

    Ok(off)
}

pub fn deserialize_multi_sensor(buf: &[u8]) -> CodecResult<MultiSensorPacket> {
    if buf.len() < MULTI_SENSOR_HEADER_SIZE + 2 {
        return Err(CodecError::ShortBuffer {
            need: MULTI_SENSOR_HEADER_SIZE + 2,
            got: buf.len(),
        });
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_MULTI_SENSOR {
        return Err(CodecError::SyncMismatch {
            expected: SYNC_MULTI_SENSOR,
            got: sync,
        });
    }
    let network_id = u16::from_le_bytes([buf[2], buf[3]]);
    // buf[4] is packet_type, implied by sync+family, not re-validated here.
    let sensor_id = buf[5];
    let value_count = buf[6];
    if value_count as usize > MAX_VALUES {
        return Err(CodecError::TooManyValues(value_count));
    }
    let battery_percent = buf[7];
    let power_charging = buf[8] != 0;
    let last_command_seq = buf[9];
    let ack_status = buf[10];
    // buf[11] is pad
    let mut location = [0u8; LOCATION_LEN];
    location.copy_from_slice(&buf[12..12 + LOCATION_LEN]);
    let zone_off = 12 + LOCATION_LEN;
    let mut zone = [0u8; ZONE_LEN];
    zone.copy_from_slice(&buf[zone_off..zone_off + ZONE_LEN]);

    let total = MULTI_SENSOR_HEADER_SIZE + value_count as usize * VALUE_ENTRY_SIZE + 2;
    if buf.len() < total {
        return Err(CodecError::ShortBuffer {
            need: total,
            got: buf.len(),
        });
    }

    let crc_region_end = MULTI_SENSOR_HEADER_SIZE + value_count as usize * VALUE_ENTRY_SIZE;
    let expected_crc = crc16(&buf[..crc_region_end]);
    let got_crc = u16::from_le_bytes([buf[crc_region_end], buf[crc_region_end + 1]]);
    if expected_crc != got_crc {
        return Err(CodecError::CrcMismatch {
            expected: got_crc,
            computed: expected_crc,
        });
    }

    let mut values = Vec::with_capacity(value_count as usize);
    let mut off = MULTI_SENSOR_HEADER_SIZE;
    for _ in 0..value_count {
        let tag = buf[off];
        let value_type =
            ValueType::from_tag(tag).ok_or(CodecError::UnknownValueType(tag))?;
        let value = f32::from_le_bytes([buf[off + 1], buf[off + 2], buf[off + 3], buf[off + 4]]);
        values.push(ValueEntry::new(value_type, value));
        off += VALUE_ENTRY_SIZE;
    }

    Ok(MultiSensorPacket {
        header: MultiSensorHeader {
            network_id,
            sensor_id,
            battery_percent,
            power_charging,
            last_command_seq,
            ack_status,
            location,
            zone,
        },
        values,
    })
}

/// A Command frame (§3). `data` holds exactly `data_length` meaningful
/// bytes; the remainder of the 192-byte wire data area is padding.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket {
    pub command_type: u8,
    pub target_sensor_id: u8,
    pub sequence_number: u8,
    pub data: Vec<u8>,
}

pub fn serialize_command(pkt: &CommandPacket) -> CodecResult<[u8; COMMAND_FRAME_SIZE]> {
    if pkt.data.len() > COMMAND_DATA_CAPACITY {
        return Err(CodecError::ShortBuffer {
            need: pkt.data.len(),
            got: COMMAND_DATA_CAPACITY,
        });
    }
    let mut buf = [0u8; COMMAND_FRAME_SIZE];
    let mut off = 0;
    buf[off..off + 2].copy_from_slice(&SYNC_COMMAND_OR_ACK.to_le_bytes());
    off += 2;
    buf[off] = pkt.command_type;
    off += 1;
    buf[off] = pkt.target_sensor_id;
    off += 1;
    buf[off] = pkt.sequence_number;
    off += 1;
    buf[off] = pkt.data.len() as u8;
    off += 1;
    buf[off] = 0; // pad
    off += 1;
    buf[off..off + pkt.data.len()].copy_from_slice(&pkt.data);
    off += COMMAND_DATA_CAPACITY;

    let crc = crc16(&buf[..off]);
    buf[off..off + 2].copy_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

pub fn deserialize_command(buf: &[u8]) -> CodecResult<CommandPacket> {
    if buf.len() < COMMAND_FRAME_SIZE {
        return Err(CodecError::ShortBuffer {
            need: COMMAND_FRAME_SIZE,
            got: buf.len(),
        });
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_COMMAND_OR_ACK {
        return Err(CodecError::SyncMismatch {
            expected: SYNC_COMMAND_OR_ACK,
            got: sync,
        });
    }
    let command_type = buf[2];
    let target_sensor_id = buf[3];
    let sequence_number = buf[4];
    let data_length = buf[5] as usize;
    // buf[6] is pad
    let data_start = 7;
    let crc_off = data_start + COMMAND_DATA_CAPACITY;

    let expected_crc = crc16(&buf[..crc_off]);
    let got_crc = u16::from_le_bytes([buf[crc_off], buf[crc_off + 1]]);
    if expected_crc != got_crc {
        return Err(CodecError::CrcMismatch {
            expected: got_crc,
            computed: expected_crc,
        });
    }

    let data_length = data_length.min(COMMAND_DATA_CAPACITY);
    let data = buf[data_start..data_start + data_length].to_vec();

    Ok(CommandPacket {
        command_type,
        target_sensor_id,
        sequence_number,
        data,
    })
}

/// An Acknowledgement or Negative-Acknowledgement frame (§3). One byte
/// longer on the wire than `CommandPacket` (see `ACK_FRAME_SIZE`).
#[derive(Debug, Clone, PartialEq)]
pub struct AckPacket {
    pub command_type: u8,
    pub sensor_id: u8,
    pub sequence_number: u8,
    pub status_code: u8,
    pub data: Vec<u8>,
}

pub fn serialize_ack(pkt: &AckPacket) -> CodecResult<[u8; ACK_FRAME_SIZE]> {
    if pkt.data.len() > COMMAND_DATA_CAPACITY {
        return Err(CodecError::ShortBuffer {
            need: pkt.data.len(),
            got: COMMAND_DATA_CAPACITY,
        });
    }
    let mut buf = [0u8; ACK_FRAME_SIZE];
    let mut off = 0;
    buf[off..off + 2].copy_from_slice(&SYNC_COMMAND_OR_ACK.to_le_bytes());
    off += 2;
    buf[off] = pkt.command_type;
    off += 1;
    buf[off] = pkt.sensor_id;
    off += 1;
    buf[off] = pkt.sequence_number;
    off += 1;
    buf[off] = pkt.status_code;
    off += 1;
    buf[off] = pkt.data.len() as u8;
    off += 1;
    buf[off] = 0; // pad
    off += 1;
    buf[off..off + pkt.data.len()].copy_from_slice(&pkt.data);
    off += COMMAND_DATA_CAPACITY;

    let crc = crc16(&buf[..off]);
    buf[off..off + 2].copy_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

pub fn deserialize_ack(buf: &[u8]) -> CodecResult<AckPacket> {
    if buf.len() < ACK_FRAME_SIZE {
        return Err(CodecError::ShortBuffer {
            need: ACK_FRAME_SIZE,
            got: buf.len(),
        });
    }
    let sync = u16::from_le_bytes([buf[0], buf[1]]);
    if sync != SYNC_COMMAND_OR_ACK {
        return Err(CodecError::SyncMismatch {
            expected: SYNC_COMMAND_OR_ACK,
            got: sync,
        });
    }
    let command_type = buf[2];
    let sensor_id = buf[3];
    let sequence_number = buf[4];
    let status_code = buf[5];
    let data_length = (buf[6] as usize).min(COMMAND_DATA_CAPACITY);
    // buf[7] is pad
    let data_start = 8;
    let crc_off = data_start + COMMAND_DATA_CAPACITY;

    let expected_crc = crc16(&buf[..crc_off]);
    let got_crc = u16::from_le_bytes([buf[crc_off], buf[crc_off + 1]]);
    if expected_crc != got_crc {
        return Err(CodecError::CrcMismatch {
            expected: got_crc,
            computed: expected_crc,
        });
    }

    let data = buf[data_start..data_start + data_length].to_vec();

    Ok(AckPacket {
        command_type,
        sensor_id,
        sequence_number,
        status_code,
        data,
    })
}

/// Builds a serialised ACK/NACK frame with a zero-length data area, as used
/// by the command applier to answer every inbound command.
pub fn build_ack(kind: u8, sensor_id: u8, seq: u8, status_code: u8) -> Vec<u8> {
    let pkt = AckPacket {
        command_type: kind,
        sensor_id,
        sequence_number: seq,
        status_code,
        data: Vec::new(),
    };
    serialize_ack(&pkt).expect("zero-length ack data never exceeds capacity").to_vec()
}
