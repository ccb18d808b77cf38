//! Test Tone Sender
//!
//! Streams a sine tone to an intercom endpoint in the endpoint's packet
//! format, paced in real time.
//!
//! Usage: `sender [target_addr] [frequency_hz]`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intercom_audio::{
    audio::capture::to_bytes,
    constants::{AUDIO_CHUNK_MS, DEFAULT_UDP_PORT, SAMPLE_RATE},
    network::packet::encode_packet,
    timing::ms_to_samples,
};

/// Tone amplitude, about -12 dBFS
const AMPLITUDE: f32 = 8192.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let target_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_UDP_PORT))
        .parse()
        .context("Invalid target address")?;
    let frequency: f32 = args
        .next()
        .unwrap_or_else(|| "440".to_string())
        .parse()
        .context("Invalid frequency")?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    tracing::info!("Sending {} Hz tone to {}", frequency, target_addr);

    let block_samples = ms_to_samples(AUDIO_CHUNK_MS);
    let phase_step = std::f32::consts::TAU * frequency / SAMPLE_RATE as f32;
    let mut phase = 0.0f32;
    let mut block = vec![0i16; block_samples];
    let mut sequence: i32 = 0;

    let mut interval = tokio::time::interval(Duration::from_millis(AUDIO_CHUNK_MS as u64));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for sample in block.iter_mut() {
                    *sample = (phase.sin() * AMPLITUDE) as i16;
                    phase = (phase + phase_step) % std::f32::consts::TAU;
                }

                let packet = encode_packet(sequence, &to_bytes(&block))?;
                sequence = sequence.wrapping_add(1);

                if let Err(e) = socket.send_to(&packet, target_addr).await {
                    tracing::warn!("Send error: {}", e);
                }

                if sequence % 500 == 0 {
                    tracing::info!("Sent {} packets", sequence);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}
