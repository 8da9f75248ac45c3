//! Speaker Application
//!
//! Answers sync probes, reassembles the stream and releases frames at their
//! local deadline. Rendering to a device is left to the host; this binary
//! only reports what it would play.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_speaker_sync::{
    clock::{MonotonicClock, ReferenceClock},
    config::AppConfig,
    endpoint::{EndpointSink, PlayoutQueue, SpeakerEndpoint},
    network::{bind_socket, run_inbound, InboundStats, UdpTransport},
};

/// Answer sync probes and play the stream at its deadlines
#[derive(Parser)]
#[command(name = "speaker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on, overriding the configured one
    #[arg(short, long)]
    port: Option<u16>,
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

    let args = Args::parse();
    tracing::info!("Starting speaker endpoint");

    let config = AppConfig::load_or_default(args.config.as_deref()).context("loading configuration")?;
    let bind: SocketAddr = format!(
        "{}:{}",
        config.network.bind_address,
        args.port.unwrap_or(config.network.speaker_port)
    )
    .parse()
    .context("invalid bind address")?;

    let socket = Arc::new(
        bind_socket(bind, &config.network)
            .await
            .context("binding speaker socket")?,
    );
    tracing::info!("Listening on {}", socket.local_addr()?);

    let clock = Arc::new(MonotonicClock::new());
    let transport = Arc::new(UdpTransport::new(socket.clone()));
    let (endpoint, frames) = SpeakerEndpoint::new(&config.endpoint, transport);
    let sink = Arc::new(EndpointSink::new(endpoint, clock.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let inbound_stats = Arc::new(InboundStats::new());
    let inbound = tokio::spawn(run_inbound(socket, sink.clone(), inbound_stats.clone(), shutdown_rx));

    let mut playout = PlayoutQueue::new(
        config.endpoint.playout_capacity,
        config.endpoint.playout_tolerance_us(),
    );
    let mut rendered: u64 = 0;
    let mut recovered: u64 = 0;

    let mut pump = tokio::time::interval(Duration::from_millis(1));
    let mut report = tokio::time::interval(Duration::from_secs(5));

    tracing::info!("Waiting for a controller - press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = pump.tick() => {
                sink.poll();
                let now = clock.now_us();
                for frame in frames.try_iter() {
                    playout.insert(frame, now);
                }
                for frame in playout.pop_due(now) {
                    rendered += 1;
                    if frame.recovered {
                        recovered += 1;
                    }
                    tracing::trace!(
                        "Render group {} ({} samples) at {}us, {}us after deadline",
                        frame.group_id,
                        frame.samples.len(),
                        now,
                        now.saturating_sub(frame.deadline)
                    );
                }
            }
            _ = report.tick() => {
                let endpoint = sink.stats();
                let queue = playout.stats();
                tracing::info!(
                    "Rendered {} frames ({} recovered), {} groups lost, {} late units; playout {}/{} ({:.1}% late)",
                    rendered,
                    recovered,
                    endpoint.groups_lost,
                    endpoint.units_late,
                    queue.level,
                    queue.capacity,
                    queue.late_rate() * 100.0
                );
            }
        }
    }

    tracing::info!("Shutting down");
    sink.shutdown();
    let _ = shutdown_tx.send(true);
    let _ = inbound.await;

    tracing::info!(
        "Received {} packets ({} bytes), {} invalid",
        inbound_stats.packets_received(),
        inbound_stats.bytes_received(),
        inbound_stats.invalid_packets()
    );
    Ok(())
}
