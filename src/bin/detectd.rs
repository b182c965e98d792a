//! detectd - background classifier detection over a frame source
//!
//! This daemon:
//! 1. Loads configuration (file named by DETECT_CONFIG or --config, env overrides)
//! 2. Registers classifiers and freezes the registry
//! 3. Starts the detection worker thread
//! 4. Ticks the frame producer at the configured fps, scheduling detection passes
//! 5. Applies results on the producer thread and logs them
//! 6. Stops the worker on Ctrl-C or after --seconds

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use frame_detect::config::{parse_classifier_spec, DetectdConfig};
use frame_detect::{build_pipeline, FramePolicy, PixelFormat};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "DETECT_CONFIG")]
    config: Option<PathBuf>,
    /// Classifier as name=source; repeatable. Replaces configured classifiers.
    #[arg(long = "classifier", value_name = "NAME=SOURCE")]
    classifiers: Vec<String>,
    /// Frame source URL (stub://...).
    #[arg(long)]
    source: Option<String>,
    /// Pixel format to register (gray8, rgb8, rgba8).
    #[arg(long)]
    format: Option<String>,
    /// Producer ticks per second.
    #[arg(long)]
    fps: Option<u32>,
    /// Frame policy: every or latest.
    #[arg(long)]
    policy: Option<String>,
    /// Run for this many seconds; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    seconds: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = resolve_config(&args)?;

    let (worker, mut producer) = build_pipeline(&cfg)?;
    if let Err(err) = producer.setup() {
        // Keep ticking so callbacks still drain; nothing is scheduled while unregistered.
        log::error!("{:#}", err);
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let coordinator = producer.coordinator();
    let params = coordinator.params();
    log::info!(
        "detectd running. source={} {}x{} {:?} fps={} policy={:?}",
        cfg.source.url,
        cfg.source.width,
        cfg.source.height,
        cfg.source.format,
        cfg.source.fps,
        coordinator.policy()
    );
    log::info!(
        "classifiers: [{}] scale_factor={} min_neighbors={} min_size={}x{}",
        coordinator.classifier_names()?.join(", "),
        params.scale_factor,
        params.min_neighbors,
        params.min_size.0,
        params.min_size.1
    );

    let frame_interval = Duration::from_secs_f64(1.0 / cfg.source.fps as f64);
    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut last_summary = Instant::now();
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let started = Instant::now();
        let report = producer.tick()?;

        if report.applied > 0 && last_summary.elapsed() >= Duration::from_secs(1) {
            let state = producer.state();
            for name in state.classifiers() {
                if let Some(entry) = state.get(&name) {
                    log::info!(
                        "tick {} classifier={} frame=#{} regions={:?}",
                        report.tick,
                        name,
                        entry.result.frame_seq,
                        entry.result.regions
                    );
                }
            }
            last_summary = Instant::now();
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = worker.stats();
            let source = producer.source_stats();
            let coordinator = producer.coordinator().stats();
            log::info!(
                "worker enqueued={} completed={} failed={} panicked={} dropped={} pending={} passes={} coalesced={} frames={} url={}",
                stats.enqueued,
                stats.completed,
                stats.failed,
                stats.panicked,
                stats.dropped,
                stats.pending,
                coordinator.passes,
                coordinator.coalesced,
                source.frames_captured,
                source.url
            );
            last_health_log = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    log::info!("shutting down detection worker...");
    worker.stop()?;
    Ok(())
}

fn resolve_config(args: &Args) -> Result<DetectdConfig> {
    let mut cfg = DetectdConfig::load_from(args.config.as_deref())?;
    if !args.classifiers.is_empty() {
        cfg.classifiers = args
            .classifiers
            .iter()
            .map(|entry| parse_classifier_spec(entry))
            .collect::<Result<_>>()?;
    }
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(format) = &args.format {
        cfg.source.format = PixelFormat::parse(format)?;
    }
    if let Some(fps) = args.fps {
        cfg.source.fps = fps;
    }
    if let Some(policy) = &args.policy {
        cfg.worker.frame_policy = FramePolicy::parse(policy)?;
    }
    cfg.validate()?;
    Ok(cfg)
}
