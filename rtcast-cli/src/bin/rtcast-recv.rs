//! rtcast receiver
//!
//! Accepts one incoming session, runs received frames through the jitter
//! buffer, and writes de-jittered payloads to a file or stdout.

use anyhow::Context;
use clap::Parser;
use rtcast::{Identity, NetworkOptimizer, Transport, TransportConfig, TransportEvent};
use rtcast_cli::stats::{format_bytes, format_rtt};
use rtcast_cli::Config;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtcast-recv")]
#[command(about = "rtcast stream receiver", long_about = None)]
struct Args {
    /// Output file (use '-' for stdout)
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:9500")]
    listen: SocketAddr,

    /// Optional TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disable payload encryption
    #[arg(long)]
    plaintext: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.bind = args.listen;
    if args.plaintext {
        config.encrypt = false;
    }

    let mut writer: Box<dyn Write> = if args.output == "-" {
        tracing::info!("Writing to stdout");
        Box::new(io::stdout())
    } else {
        tracing::info!("Writing to file: {}", args.output);
        let file =
            File::create(&args.output).with_context(|| format!("create '{}'", args.output))?;
        Box::new(BufWriter::new(file))
    };

    let (mut optimizer, _opt_events) = NetworkOptimizer::new(config.profile_ladder())?;
    let jitter = optimizer.jitter_buffer();

    let mut transport_config = TransportConfig::new(config.bind);
    transport_config.encrypt = config.encrypt;
    transport_config.low_latency = config.low_latency;
    let (transport, events) =
        Transport::new(transport_config, Identity::generate(), optimizer.monitor())?;
    tracing::info!("Listening on {}", transport.local_addr()?);

    let start = Instant::now();
    let mut next_tick = Instant::now();
    let mut next_stats = Instant::now();
    let mut frame_seq = 0u32;
    let mut total_bytes = 0u64;
    let mut total_frames = 0u64;

    loop {
        let now_ms = start.elapsed().as_millis() as u64;

        match events.recv_timeout(Duration::from_millis(20)) {
            Ok(TransportEvent::Connected { peer_id }) => {
                tracing::info!("Peer connected, id {peer_id:#x}");
            }
            Ok(TransportEvent::FrameReady {
                payload,
                timestamp_us,
                keyframe,
                ..
            }) => {
                jitter.insert(frame_seq, payload, timestamp_us, keyframe, now_ms);
                frame_seq = frame_seq.wrapping_add(1);
            }
            Ok(TransportEvent::AudioReady { payload, .. }) => {
                writer.write_all(&payload)?;
                total_bytes += payload.len() as u64;
            }
            Ok(TransportEvent::PeerUnresponsive) => {
                tracing::warn!("Peer unresponsive, waiting for it to return");
            }
            Ok(TransportEvent::Error(e)) => tracing::debug!("transport: {e}"),
            Err(_) => {}
        }

        // Drain whatever the jitter buffer has aged past its target delay.
        while let Some(packet) = jitter.extract(now_ms) {
            writer.write_all(&packet.payload)?;
            total_bytes += packet.payload.len() as u64;
            total_frames += 1;
        }

        if next_tick.elapsed() > Duration::ZERO {
            optimizer.optimize(now_ms);
            next_tick = Instant::now() + Duration::from_secs(1);
        }

        if config.stats_interval_secs > 0 && next_stats.elapsed() > Duration::ZERO {
            let conditions = optimizer.monitor().conditions();
            let stats = jitter.stats();
            tracing::info!(
                "Received {} in {} frames, rtt {}, buffered {}, evicted {}",
                format_bytes(total_bytes),
                total_frames,
                format_rtt(conditions.rtt_ms),
                jitter.depth(),
                stats.evicted
            );
            writer.flush()?;
            next_stats = Instant::now() + Duration::from_secs(config.stats_interval_secs);
        }
    }
}
