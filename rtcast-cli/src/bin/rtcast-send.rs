//! rtcast sender
//!
//! Reads raw media from a file or stdin, paces it out as video frames sized
//! to the current profile's bitrate, and lets the optimizer adapt the rate to
//! observed network conditions.

use anyhow::Context;
use clap::Parser;
use rtcast::{Identity, NetworkOptimizer, OptimizerEvent, Transport, TransportConfig, TransportEvent};
use rtcast_cli::stats::{format_bandwidth, format_bytes};
use rtcast_cli::Config;
use std::fs::File;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtcast-send")]
#[command(about = "rtcast stream sender", long_about = None)]
struct Args {
    /// Input file (use '-' for stdin)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Remote peer address
    #[arg(short, long)]
    peer: SocketAddr,

    /// Local bind address
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Optional TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames per second to pace at
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Every Nth frame is marked as a keyframe
    #[arg(long, default_value = "30")]
    keyframe_interval: u32,

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
    config.bind = args.bind;
    config.peer = Some(args.peer);
    if args.plaintext {
        config.encrypt = false;
    }

    let mut input: Box<dyn Read> = if args.input == "-" {
        tracing::info!("Reading from stdin");
        Box::new(io::stdin())
    } else {
        tracing::info!("Reading from file: {}", args.input);
        Box::new(File::open(&args.input).with_context(|| format!("open '{}'", args.input))?)
    };

    let (mut optimizer, opt_events) = NetworkOptimizer::new(config.profile_ladder())?;
    if let Some(target) = config.target_bitrate_kbps {
        optimizer.set_target_bitrate(target, 0);
    }

    let mut transport_config = TransportConfig::new(config.bind);
    transport_config.encrypt = config.encrypt;
    transport_config.low_latency = config.low_latency;
    let (mut transport, events) =
        Transport::new(transport_config, Identity::generate(), optimizer.monitor())?;

    tracing::info!("Connecting to {}", args.peer);
    transport.connect(args.peer)?;

    // Wait for the handshake to complete before streaming.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(TransportEvent::Connected { peer_id }) => {
                tracing::info!("Connected, peer id {peer_id:#x}");
                break;
            }
            Ok(TransportEvent::Error(e)) => tracing::warn!("handshake: {e}"),
            Ok(_) => {}
            Err(_) if Instant::now() < deadline => {}
            Err(_) => anyhow::bail!("handshake timed out"),
        }
    }

    let fps = args.fps.max(1);
    let frame_interval = Duration::from_secs(1) / fps;
    let mut bytes_per_frame = frame_bytes(optimizer.current_profile().bitrate_kbps, fps);

    let start = Instant::now();
    let mut next_tick = Instant::now();
    let mut next_stats = Instant::now();
    let mut frame_index = 0u32;
    let mut total_bytes = 0u64;
    let mut buffer = vec![0u8; bytes_per_frame];

    loop {
        buffer.resize(bytes_per_frame, 0);
        let n = read_frame(&mut input, &mut buffer)?;
        if n == 0 {
            tracing::info!("End of input after {} frames", frame_index);
            break;
        }

        let keyframe = frame_index % args.keyframe_interval.max(1) == 0;
        let timestamp_us = start.elapsed().as_micros() as u64;
        transport.send_video(&buffer[..n], timestamp_us, keyframe)?;
        total_bytes += n as u64;
        frame_index += 1;

        if next_tick.elapsed() > Duration::ZERO {
            optimizer.optimize(start.elapsed().as_millis() as u64);
            next_tick = Instant::now() + Duration::from_secs(1);
        }
        for event in opt_events.try_iter() {
            match event {
                OptimizerEvent::BitrateChanged(kbps) => {
                    bytes_per_frame = frame_bytes(kbps, fps);
                    tracing::info!("Bitrate now {}", format_bandwidth(kbps as f64));
                }
                OptimizerEvent::CongestionDetected => tracing::warn!("Congestion detected"),
                OptimizerEvent::NetworkDegraded => tracing::warn!("Network degraded"),
                OptimizerEvent::NetworkRecovered => tracing::info!("Network recovered"),
            }
        }
        for event in events.try_iter() {
            if let TransportEvent::PeerUnresponsive = event {
                tracing::warn!("Peer unresponsive");
            }
        }

        if config.stats_interval_secs > 0 && next_stats.elapsed() > Duration::ZERO {
            tracing::info!(
                "Sent {} in {} frames\n{}",
                format_bytes(total_bytes),
                frame_index,
                optimizer.diagnostics()
            );
            next_stats = Instant::now() + Duration::from_secs(config.stats_interval_secs);
        }

        std::thread::sleep(frame_interval);
    }

    transport.shutdown();
    Ok(())
}

/// Frame payload size for a bitrate at a frame rate
fn frame_bytes(bitrate_kbps: u32, fps: u32) -> usize {
    ((bitrate_kbps as usize * 1000 / 8) / fps as usize).max(1)
}

/// Fill as much of `buf` as the input still has; 0 means EOF
fn read_frame(input: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
