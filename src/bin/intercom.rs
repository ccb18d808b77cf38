//! Intercom Endpoint Application
//!
//! Plays audio received over UDP and streams the microphone to the
//! configured remote endpoints.
//!
//! Usage: `intercom [--config <path>] [--record] [--list-devices]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intercom_audio::{
    audio::{
        device::list_devices, CpalCaptureChannel, CpalPlaybackChannel, MonotonicClock,
        PassthroughProcessor,
    },
    config::AppConfig,
    device::{DeviceState, Intercom},
};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

struct Args {
    config: Option<PathBuf>,
    record: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        record: false,
        list_devices: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--record" => args.record = true,
            "--list-devices" => args.list_devices = true,
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(args)
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let config_path = args.config.or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    tracing::info!("Starting intercom");

    let capture_channel = CpalCaptureChannel::new(config.devices.input_device.clone())?;
    let playback_channel = CpalPlaybackChannel::new(config.devices.output_device.clone())?;

    let mut intercom = Intercom::new(
        &config,
        capture_channel,
        playback_channel,
        Arc::new(PassthroughProcessor::default()),
        Arc::new(MonotonicClock::new()),
    )?;

    intercom.on_state_changed(|state: &DeviceState| match serde_json::to_string(state) {
        Ok(json) => tracing::info!("State: {}", json),
        Err(e) => tracing::warn!("Failed to serialize state: {}", e),
    });

    intercom.begin()?;
    tracing::info!("Listening on UDP port {}", intercom.port());

    if args.record {
        intercom.start_recording();
    }

    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let stats = intercom.stats();
                tracing::info!(
                    "Received {} packets, mixed {}, dropped {} late / {} overflow; sent {} packets ({} errors)",
                    stats.udp.packets_received,
                    stats.mixer.packets_mixed,
                    stats.mixer.packets_dropped_late,
                    stats.mixer.packets_dropped_overflow,
                    stats.sender.packets_sent,
                    stats.sender.send_errors,
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    intercom.shutdown();
    Ok(())
}
