//! burst-fusion CLI: align, fuse and report a burst of still images.

use burst_fusion::{
    BurstAccumulator, BurstOutput, BurstPipeline, BurstStats, CaptureMetadata, DetectionResult,
    Frame, PipelineConfig, PipelineCounters, Submitted,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "burst-fusion")]
#[command(about = "Align a burst of frames to its first frame and fuse it with a temporal median")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON log lines (needs the `tracing` feature; `RUST_LOG` sets the filter).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse frames read from image files, in the order given.
    Fuse(FuseArgs),

    /// Write the default pipeline configuration as JSON.
    DefaultConfig {
        /// Output path.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct FuseArgs {
    /// Input frames. The first one becomes the burst reference.
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    /// Path of the fused image. Later bursts get a `-<n>` suffix.
    #[arg(long)]
    out: PathBuf,

    /// Pipeline configuration (JSON). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write a JSON report with per-burst statistics.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Override the number of aligned frames fused with the reference.
    #[arg(long)]
    target_count: Option<usize>,

    /// Split warp and fusion rows across threads.
    #[arg(long)]
    parallel: bool,
}

#[derive(Serialize)]
struct BurstReport {
    image: PathBuf,
    stats: BurstStats,
    payloads: Option<DetectionResult>,
    detector_error: Option<String>,
}

#[derive(Serialize)]
struct Report {
    config: PipelineConfig,
    counters: PipelineCounters,
    bursts: Vec<BurstReport>,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Fuse(args) => run_fuse(&args),
        Commands::DefaultConfig { out } => {
            PipelineConfig::default().write_json(&out)?;
            println!("wrote default config to {}", out.display());
            Ok(())
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        // Ignore errors if a logger was already installed.
        let _ = LogTracer::init();
        burst_fusion::core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = match verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        let _ = burst_fusion::core::init_with_level(level);
        if json {
            log::warn!("--log-json needs the `tracing` feature");
        }
    }
}

fn run_fuse(args: &FuseArgs) -> CliResult<()> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(n) = args.target_count {
        cfg.target_count = n;
    }
    cfg.parallel |= args.parallel;
    // Offline input: size the queues so that no frame is ever discarded.
    cfg.queue_depth = cfg.queue_depth.max(args.frames.len());
    cfg.output_depth = cfg.output_depth.max(args.frames.len());
    cfg.validate()?;

    if args.frames.len() < cfg.target_count + 1 {
        return Err(format!(
            "need at least {} frames for target_count {}, got {}",
            cfg.target_count + 1,
            cfg.target_count,
            args.frames.len()
        )
        .into());
    }

    let pipeline = BurstPipeline::spawn(BurstAccumulator::new(&cfg)?, &cfg)?;
    let outputs = pipeline.outputs().clone();

    for (seq, path) in args.frames.iter().enumerate() {
        let img = image::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
        let frame = Frame::from_dynamic_image(&img)?;
        log::debug!(
            "frame {seq}: {} ({}x{} {:?})",
            path.display(),
            frame.width(),
            frame.height(),
            frame.format()
        );
        if pipeline.submit(frame, CaptureMetadata::new(seq as u64))? != Submitted::Queued {
            log::warn!("frame {seq} was not queued");
        }
    }

    let counters = pipeline.shutdown();
    let bursts: Vec<BurstOutput> = outputs.try_iter().collect();
    log::info!(
        "{} frames processed, {} bursts fused, {} aborted",
        counters.frames_processed,
        counters.bursts_completed,
        counters.bursts_aborted
    );
    if bursts.is_empty() {
        return Err("no burst completed".into());
    }

    let mut reports = Vec::with_capacity(bursts.len());
    for (k, burst) in bursts.into_iter().enumerate() {
        let path = numbered_path(&args.out, k);
        let img = burst
            .fused
            .to_dynamic_image()
            .ok_or("fused image does not fit an image buffer")?;
        img.save(&path)?;
        log::info!(
            "burst {k}: frames {}..={} -> {} ({:.1}% defined)",
            burst.stats.reference_sequence,
            burst.stats.trigger_sequence,
            path.display(),
            burst.stats.defined_ratio * 100.0
        );
        let (payloads, detector_error) = match burst.payloads {
            Ok(found) => (Some(found), None),
            Err(e) => (None, Some(e.to_string())),
        };
        reports.push(BurstReport {
            image: path,
            stats: burst.stats,
            payloads,
            detector_error,
        });
    }

    if let Some(report_path) = &args.report {
        let report = Report {
            config: cfg,
            counters,
            bursts: reports,
        };
        fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        log::info!("report written to {}", report_path.display());
    }
    Ok(())
}

/// `out.png`, `out-1.png`, `out-2.png`, ...
fn numbered_path(out: &Path, k: usize) -> PathBuf {
    if k == 0 {
        return out.to_path_buf();
    }
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match out.extension() {
        Some(ext) => format!("{stem}-{k}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{k}"),
    };
    out.with_file_name(name)
}
