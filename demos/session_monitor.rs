//! Session monitor
//!
//! Connects to the simulated Kinect v2, follows both streams for a few
//! seconds and prints per-stream statistics.
//!
//! ```text
//! cargo run --example session_monitor [config.yaml]
//! RUST_LOG=depthcam=debug cargo run --example session_monitor
//! ```

use anyhow::{Context, Result};
use depthcam::{DepthCam, SessionConfig, SimulatedBackend, StreamKind, UpdateRate};
use futures::StreamExt;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const MONITOR_FOR: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::from_path(&path).with_context(|| format!("loading {}", path))?,
        None => SessionConfig::default(),
    };
    let registry = DepthCam::with_config(SimulatedBackend::new(), config)?;

    println!("Discovering devices...");
    let mut devices = Box::pin(registry.list_devices());
    let mut found = Vec::new();
    while let Some(device) = devices.next().await {
        let device = device.context("device discovery failed")?;
        println!("  {}", device);
        found.push(device);
    }
    let device = found.into_iter().next().context("no depth camera attached")?;

    let session = registry.session(device);
    let mut states = Box::pin(session.state_updates());
    let state_printer = tokio::spawn(async move {
        while let Some(state) = states.next().await {
            println!("[state] {}", state);
        }
    });

    session.connect().await.context("connecting")?;
    for kind in StreamKind::ALL {
        if let Some(profile) = session.negotiated(kind) {
            println!(
                "[{}] {}x{} {:?} @ {} fps",
                kind, profile.width, profile.height, profile.pixel_format, profile.fps
            );
        }
    }

    // Depth at display rate, color sampled once a second
    let depth = session
        .subscribe_with_rate(StreamKind::Depth, UpdateRate::Max(10))
        .take_until(tokio::time::sleep(MONITOR_FOR))
        .for_each(|frame| async move {
            let center = frame.payload.len() / 2 / 4 * 4;
            let millimetres = frame
                .payload
                .get(center..center + 4)
                .and_then(|bytes| bytes.try_into().ok())
                .map(f32::from_le_bytes)
                .unwrap_or_default();
            println!("[depth] #{} center {:.0} mm", frame.sequence, millimetres);
        });
    let color = session
        .subscribe_with_rate(StreamKind::Color, UpdateRate::Max(1))
        .take_until(tokio::time::sleep(MONITOR_FOR))
        .for_each(|frame| async move {
            println!("[color] #{} at {:?}", frame.sequence, frame.timestamp);
        });
    tokio::join!(depth, color);

    for kind in StreamKind::ALL {
        let stats = session.stats(kind);
        println!(
            "[{}] published {} dropped {} rejected {}",
            kind, stats.published, stats.dropped, stats.rejected
        );
    }

    session.disconnect().await;
    drop(session);
    let _ = state_printer.await;
    Ok(())
}
