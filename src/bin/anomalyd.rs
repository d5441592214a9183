//! anomalyd - replays recorded track streams through the rule engine
//!
//! This daemon:
//! 1. Loads the engine configuration (file named by ANOMALY_CONFIG + env)
//! 2. Reads JSON-lines frame records from a file or stdin
//! 3. Evaluates every frame and writes alerts as JSON lines
//! 4. Optionally mirrors alerts to the log
//! 5. Stops cleanly after the current frame on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anomaly_kernel::{
    AlertSink, EngineConfig, JsonLinesSink, LogSink, ReplaySource, RuleEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Recorded track stream (JSON lines). Reads stdin when omitted or "-".
    #[arg(long, env = "ANOMALY_INPUT")]
    input: Option<PathBuf>,
    /// Alert output file (JSON lines). Writes stdout when omitted.
    #[arg(long, env = "ANOMALY_OUTPUT")]
    output: Option<PathBuf>,
    /// Also log each alert at info/warn level.
    #[arg(long, env = "ANOMALY_LOG_ALERTS")]
    log_alerts: bool,
    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = EngineConfig::load()?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    log::info!(
        "anomalyd {} crowd_threshold={} bag_seconds={} weapon_frames={} policy={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.crowd_threshold,
        cfg.bag_stationary_seconds,
        cfg.weapon_persist_frames,
        cfg.weapon_policy
    );

    let reader: Box<dyn BufRead> = match args.input.as_deref() {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(path)
                .map_err(|e| anyhow!("failed to open input {}: {}", path.display(), e))?;
            log::info!("replaying {}", path.display());
            Box::new(BufReader::new(file))
        }
        _ => {
            log::info!("replaying stdin");
            Box::new(BufReader::new(io::stdin()))
        }
    };
    let writer: Box<dyn Write> = match args.output.as_deref() {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| anyhow!("failed to create output {}: {}", path.display(), e))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut engine = RuleEngine::new(cfg)?;
    let mut out = JsonLinesSink::new(writer);
    let mut log_sink = LogSink;
    if args.log_alerts {
        log::info!("alert sinks: {}, {}", out.name(), log_sink.name());
    } else {
        log::info!("alert sink: {}", out.name());
    }

    let mut source = ReplaySource::new(reader);
    while let Some(frame) = source.next_frame()? {
        if stop.load(Ordering::SeqCst) {
            log::info!(
                "shutdown signal received, stopping replay at line {}",
                source.line_no()
            );
            break;
        }
        let alerts = engine.process(&frame.tracks, frame.frame_index, frame.timestamp);
        for alert in &alerts {
            out.deliver(alert)?;
            if args.log_alerts {
                log_sink.deliver(alert)?;
            }
        }
    }
    out.flush()?;

    let stats = engine.stats();
    log::info!(
        "replay finished: lines={} frames={} alerts={} (crowd={} bag={} weapon={}) evicted={} duplicates={} written={}",
        source.line_no(),
        stats.frames_processed,
        stats.total_alerts(),
        stats.crowd_alerts,
        stats.bag_alerts,
        stats.weapon_alerts,
        stats.tracks_evicted,
        stats.duplicate_observations,
        out.written()
    );
    Ok(())
}
