//! Manual demo run of the client runtime against fake sensors and a radio
//! that logs every frame instead of keying an antenna. Useful for poking at
//! the scheduling loop without hardware; not a substitute for the unit
//! tests in `runtime.rs`.

use lss_node::{HardwareClock, NodeRuntime, RadioLink, RadioProfile, SensorDriver};
use lss_protocol::config::InMemoryKv;
use lss_protocol::value::{ValueEntry, ValueType};
use std::time::Instant;
use tracing::info;

struct DemoTemperatureSensor {
    base_c: f32,
}

impl SensorDriver for DemoTemperatureSensor {
    fn begin(&mut self) {
        info!("temperature sensor online");
    }

    fn read(&mut self) {}

    fn values(&self, out: &mut Vec<ValueEntry>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        out.push(ValueEntry::new(ValueType::TemperatureC, self.base_c));
        1
    }
}

struct LoggingRadio;

impl RadioLink for LoggingRadio {
    fn configure(&mut self, profile: RadioProfile) {
        info!(
            freq = profile.frequency_mhz,
            sf = profile.spreading_factor,
            sync_word = format!("{:#04x}", profile.sync_word),
            "radio configured"
        );
    }

    fn send(&mut self, frame: &[u8]) {
        info!(bytes = frame.len(), "TX");
    }

    fn poll_received(&mut self) -> Option<Vec<u8>> {
        None
    }
}

struct WallClock {
    start: Instant,
}

impl HardwareClock for WallClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    info!("LSS node demo starting");

    let sensors: Vec<Box<dyn SensorDriver>> =
        vec![Box::new(DemoTemperatureSensor { base_c: 21.5 })];

    let mut runtime = NodeRuntime::boot(
        LoggingRadio,
        WallClock {
            start: Instant::now(),
        },
        InMemoryKv::default(),
        sensors,
    );

    for _ in 0..5 {
        runtime.step();
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    info!("LSS node demo stopping");
    Ok(())
}
