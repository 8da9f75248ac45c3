//! Controller Application
//!
//! Streams a test tone to every speaker given on the command line, keeping
//! them sample-synchronized.
//!
//! ```text
//! controller [--config PATH] SPEAKER_ADDR[@CH,CH...]...
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_speaker_sync::{
    audio::ToneGenerator,
    clock::MonotonicClock,
    config::AppConfig,
    constants::*,
    network::{bind_socket, run_inbound, InboundStats, UdpTransport},
    scheduler::FleetScheduler,
    session::Endpoint,
};

/// Stream a synchronized test tone to a fleet of speakers
#[derive(Parser)]
#[command(name = "controller")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Speakers as ADDR or ADDR@CH,CH...
    #[arg(required = true, value_parser = parse_speaker)]
    speakers: Vec<SpeakerTarget>,
}

#[derive(Debug, Clone)]
struct SpeakerTarget {
    addr: SocketAddr,
    channel_map: Vec<u16>,
}

fn parse_speaker(s: &str) -> Result<SpeakerTarget, String> {
    let (addr, map) = match s.split_once('@') {
        Some((addr, map)) => (addr, Some(map)),
        None => (s, None),
    };
    let addr = addr
        .parse()
        .map_err(|e| format!("invalid speaker address '{}': {}", addr, e))?;
    let channel_map = match map {
        Some(map) => map
            .split(',')
            .map(|ch| ch.trim().parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid channel map '{}': {}", map, e))?,
        None => Vec::new(),
    };
    Ok(SpeakerTarget { addr, channel_map })
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
    tracing::info!("Starting speaker sync controller");

    let config = AppConfig::load_or_default(args.config.as_deref()).context("loading configuration")?;

    let bind: SocketAddr = format!("{}:{}", config.network.bind_address, config.network.controller_port)
        .parse()
        .context("invalid bind address")?;
    let socket = Arc::new(
        bind_socket(bind, &config.network)
            .await
            .context("binding controller socket")?,
    );
    tracing::info!("Listening on {}", socket.local_addr()?);

    let clock = MonotonicClock::shared();
    let transport = Arc::new(UdpTransport::new(socket.clone()));
    let scheduler = Arc::new(FleetScheduler::new(config.clone(), clock, transport.clone()));

    for target in args.speakers {
        let endpoint = Endpoint::new(target.addr, target.channel_map);
        let id = scheduler.register(endpoint)?;
        scheduler.admit(id)?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let inbound_stats = Arc::new(InboundStats::new());
    let inbound = tokio::spawn(run_inbound(
        socket.clone(),
        scheduler.clone(),
        inbound_stats.clone(),
        shutdown_rx.clone(),
    ));

    let mut tone = ToneGenerator::new(
        440.0,
        config.endpoint.channels,
        config.endpoint.sample_rate,
        DEFAULT_FRAME_SIZE_MS,
    );
    let frame_period = tone.frame_period_us();
    let ticker = tokio::spawn(scheduler.clone().run_ticker(frame_period, shutdown_rx));

    let mut frames = tokio::time::interval(Duration::from_micros(frame_period));
    let mut report = tokio::time::interval(Duration::from_secs(5));

    tracing::info!("Streaming {}us frames - press Ctrl+C to stop", frame_period);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = frames.tick() => {
                if let Err(e) = scheduler.submit_frame(tone.next_frame()) {
                    tracing::warn!("Frame rejected: {}", e);
                }
            }
            _ = report.tick() => {
                let status = serde_json::to_string(&scheduler.status())?;
                tracing::info!("Status: {}", status);
            }
        }
    }

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    scheduler.shutdown().await;
    let _ = tokio::join!(inbound, ticker);

    let sent = transport.stats();
    tracing::info!(
        "Sent {} datagrams ({} bytes), {} dropped; received {} ({} invalid)",
        sent.datagrams_sent,
        sent.bytes_sent,
        sent.dropped,
        inbound_stats.packets_received(),
        inbound_stats.invalid_packets()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speaker_targets() {
        let plain = parse_speaker("192.168.1.20:5001").unwrap();
        assert_eq!(plain.addr, "192.168.1.20:5001".parse().unwrap());
        assert!(plain.channel_map.is_empty());

        let mapped = parse_speaker("192.168.1.21:5001@1, 0").unwrap();
        assert_eq!(mapped.channel_map, vec![1, 0]);

        assert!(parse_speaker("not-an-address").is_err());
        assert!(parse_speaker("192.168.1.21:5001@left").is_err());
    }

    #[test]
    fn test_cli_requires_a_speaker() {
        assert!(Args::try_parse_from(["controller"]).is_err());
        let args = Args::try_parse_from(["controller", "-c", "fleet.toml", "10.0.0.2:5001", "10.0.0.3:5001@0"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("fleet.toml")));
        assert_eq!(args.speakers.len(), 2);
    }
}
