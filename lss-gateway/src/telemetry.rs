//! Telemetry sink seam (§9 ambient concern: "dashboard/REST, MQTT,
//! alerting, SQLite persistence... remain external collaborators"). The
//! dispatcher hands every decoded multi-sensor reading to a `TelemetrySink`
//! rather than doing anything with it itself — the same shape as the
//! teacher's `process_telemetry`, whose MQTT/InfluxDB `TODO`s mark exactly
//! this boundary.

use lss_protocol::value::ValueEntry;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReading {
    pub node_id: u8,
    pub network_id: u16,
    pub battery_percent: u8,
    pub charging: bool,
    pub location: String,
    pub zone: String,
    pub values: Vec<ValueEntry>,
}

pub trait TelemetrySink: Send + 'static {
    fn record(&mut self, reading: TelemetryReading);
}

/// Default sink: structured-logs every reading. Stands in for the
/// MQTT/InfluxDB/dashboard integrations the spec scopes out as external
/// collaborators.
#[derive(Default)]
pub struct LoggingSink;

impl TelemetrySink for LoggingSink {
    fn record(&mut self, reading: TelemetryReading) {
        info!(
            node = reading.node_id,
            network = reading.network_id,
            battery_pct = reading.battery_percent,
            charging = reading.charging,
            location = %reading.location,
            zone = %reading.zone,
            value_count = reading.values.len(),
            "telemetry received"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        readings: Vec<TelemetryReading>,
    }

    impl TelemetrySink for RecordingSink {
        fn record(&mut self, reading: TelemetryReading) {
            self.readings.push(reading);
        }
    }

    #[test]
    fn recording_sink_collects_readings() {
        let mut sink = RecordingSink::default();
        sink.record(TelemetryReading {
            node_id: 5,
            network_id: 1,
            battery_percent: 85,
            charging: false,
            location: "Shed".into(),
            zone: "Outdoor".into(),
            values: vec![],
        });
        assert_eq!(sink.readings.len(), 1);
        assert_eq!(sink.readings[0].node_id, 5);
    }
}
