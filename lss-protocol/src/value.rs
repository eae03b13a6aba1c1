//! Sensor value tags shared by every multi-sensor telemetry frame.

use serde::{Deserialize, Serialize};

/// Tag byte preceding each `f32` measurement in a multi-sensor frame.
///
/// Values mirror the wire-level Value-Type table; the discriminants are load
/// bearing (they travel on the wire) and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    TemperatureC = 0,
    HumidityPct = 1,
    PressureHpa = 2,
    LightLux = 3,
    VoltageV = 4,
    CurrentMa = 5,
    PowerMw = 6,
    EnergyWh = 7,
    GasResistanceOhm = 8,
    BatteryPct = 9,
    SignalStrengthDbm = 10,
    MoisturePct = 11,
    Generic = 12,
    ThermistorTemperatureC = 13,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::TemperatureC,
            1 => Self::HumidityPct,
            2 => Self::PressureHpa,
            3 => Self::LightLux,
            4 => Self::VoltageV,
            5 => Self::CurrentMa,
            6 => Self::PowerMw,
            7 => Self::EnergyWh,
            8 => Self::GasResistanceOhm,
            9 => Self::BatteryPct,
            10 => Self::SignalStrengthDbm,
            11 => Self::MoisturePct,
            12 => Self::Generic,
            13 => Self::ThermistorTemperatureC,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// A single typed measurement carried in a multi-sensor telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub value_type: ValueType,
    pub value: f32,
}

impl ValueEntry {
    pub fn new(value_type: ValueType, value: f32) -> Self {
        Self { value_type, value }
    }
}
