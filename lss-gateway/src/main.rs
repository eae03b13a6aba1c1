//! Base-station gateway service.
//!
//! Bridges a LoRa radio concentrator reachable over TCP (length-prefixed
//! framing: a little-endian `u16` byte count followed by the frame) to the
//! [`lss_gateway::GatewayService`] dispatcher: inbound telemetry/ACK/announce
//! frames update node liveness and retire in-flight commands; outbound
//! commands are drained from the queue and retried on schedule.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::info;

use lss_gateway::{dispatch, GatewayRadio, GatewayService};

/// A cloneable radio handle backed by two independent halves of the same
/// TCP connection, so a blocking read on one clone never holds up a write
/// issued through another.
#[derive(Clone)]
struct TcpRadio {
    write_half: Arc<Mutex<TcpStream>>,
    read_half: Arc<Mutex<TcpStream>>,
}

impl TcpRadio {
    fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("failed to connect to radio concentrator at {addr}"))?;
        let read_half = stream
            .try_clone()
            .context("failed to clone radio connection for reading")?;
        Ok(Self {
            write_half: Arc::new(Mutex::new(stream)),
            read_half: Arc::new(Mutex::new(read_half)),
        })
    }
}

impl GatewayRadio for TcpRadio {
    fn send_frame(&mut self, frame: &[u8]) {
        let mut stream = self.write_half.lock().expect("radio write mutex poisoned");
        let len = frame.len() as u16;
        if stream.write_all(&len.to_le_bytes()).is_err() {
            return;
        }
        let _ = stream.write_all(frame);
    }

    fn recv_frame(&mut self) -> Option<Vec<u8>> {
        let mut stream = self.read_half.lock().expect("radio read mutex poisoned");
        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).ok()?;
        let len = u16::from_le_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        stream.read_exact(&mut frame).ok()?;
        Some(frame)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("LSS base-station gateway starting");

    let radio_addr =
        std::env::var("LSS_RADIO_ADDR").unwrap_or_else(|_| "127.0.0.1:9000".to_string());
    info!(addr = %radio_addr, "connecting to radio concentrator");

    let radio = TcpRadio::connect(&radio_addr)?;
    let service = GatewayService::new(radio, lss_gateway::LoggingSink::default());

    let dispatcher = tokio::spawn(dispatch::run(service));

    info!("Service running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
        _ = dispatcher => {
            info!("dispatcher task ended");
        }
    }

    info!("LSS base-station gateway stopped");
    Ok(())
}
