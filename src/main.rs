use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use carpetcam::capture::CaptureStage;
use carpetcam::storage::{FileKvStore, LocalAssetStore};
use carpetcam::sync::{CloudSyncCoordinator, FsBlobArchive, JsonVenueRegistry};
use carpetcam::{
    CaptureOrchestratorBuilder, CarpetcamConfig, EventBus, EventFilter, FrameAnalyzer, FrameData,
    FrameSourceBuilder, GateEvaluator, HeuristicDetector, Orientation, SyncOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "carpetcam")]
#[command(about = "Venue check-in capture pipeline: carpet analysis, gating, versioning and storage")]
#[command(version)]
#[command(long_about = "Developer tool for the carpetcam check-in pipeline. Analyses floor \
images, runs complete check-ins against a still image or a V4L2 camera, and inspects the \
local asset store.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "carpetcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Signed-in user for store operations
    #[arg(short, long, default_value = "local-user")]
    user: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse one image and print its metrics and gates
    Analyze {
        image: PathBuf,

        /// Device tilt in degrees; omitted means no orientation reading
        #[arg(long)]
        beta: Option<f64>,

        /// Times the image is fed to the analyzer, to build up a motion history
        #[arg(long, default_value_t = 3)]
        frames: u32,
    },

    /// Run a full check-in and print the outcome
    Checkin {
        /// Venue id
        venue: String,

        /// Display name of the venue
        #[arg(long)]
        name: Option<String>,

        /// Serve this image as the camera feed instead of a real device
        #[arg(long)]
        image: Option<PathBuf>,

        /// Device tilt in degrees reported to the gates
        #[arg(long, default_value_t = 0.0)]
        beta: f64,

        /// Skip the carpet verdict
        #[arg(long)]
        no_detection: bool,

        /// Fire the shutter if the gates have not passed in time
        #[arg(long)]
        force: bool,

        /// Seconds to wait for the gates
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },

    /// Print store statistics for the user
    Stats,

    /// List the user's stored check-ins
    List {
        /// Only records for this venue
        #[arg(long)]
        venue: Option<String>,
    },

    /// Delete stored check-ins
    Clear {
        /// Delete every user's records
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting carpetcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CarpetcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    match args.command {
        Some(Command::Analyze { image, beta, frames }) => analyze(&config, &image, beta, frames),
        Some(Command::Checkin {
            venue,
            name,
            image,
            beta,
            no_detection,
            force,
            timeout,
        }) => {
            let name = name.unwrap_or_else(|| venue.clone());
            let options = CheckinOptions {
                image,
                beta,
                detection: !no_detection,
                force,
                gate_timeout: Duration::from_secs(timeout),
                trace_events: args.debug,
            };
            checkin(config, &args.user, &venue, &name, options).await
        }
        Some(Command::Stats) => stats(&config, &args.user).await,
        Some(Command::List { venue }) => list(&config, &args.user, venue.as_deref()).await,
        Some(Command::Clear { all }) => clear(&config, &args.user, all).await,
        None => {
            println!("No command given; see --help");
            Ok(())
        }
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("carpetcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "carpetcam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn print_default_config() -> Result<()> {
    println!("# Carpetcam Configuration File");
    println!("# This is the default configuration with all available options");
    println!();
    println!("{}", CarpetcamConfig::default().to_toml()?);
    Ok(())
}

fn analyze(config: &CarpetcamConfig, image: &Path, beta: Option<f64>, frames: u32) -> Result<()> {
    let decoded = image::open(image)
        .with_context(|| format!("opening {}", image.display()))?
        .to_rgb8();
    let frame = FrameData::from_rgb_image(0, SystemTime::now(), decoded);

    let mut analyzer = FrameAnalyzer::new(config.analyzer.clone());
    let mut metrics = None;
    for _ in 0..frames.max(1) {
        metrics = Some(analyzer.analyze(&frame)?);
    }
    let Some(metrics) = metrics else {
        bail!("no analysis was run");
    };

    let gates = GateEvaluator::new(config.gates.clone())
        .evaluate(&metrics, beta.map(|beta| Orientation::new(beta, 0.0)));

    let report = serde_json::json!({
        "image": image.display().to_string(),
        "metrics": metrics,
        "gates": gates,
        "all_gates_passed": gates.all_gates_passed(),
        "failing_gates": gates.failing_gates(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Upper bound for verdict, encoding and the local save after the shutter
const FINISH_TIMEOUT: Duration = Duration::from_secs(60);

struct CheckinOptions {
    image: Option<PathBuf>,
    beta: f64,
    detection: bool,
    force: bool,
    gate_timeout: Duration,
    trace_events: bool,
}

async fn open_store(config: &CarpetcamConfig, user: &str) -> Result<Arc<LocalAssetStore>> {
    let backend = Arc::new(FileKvStore::new(
        &config.storage.path,
        config.storage.quota_bytes,
    ));
    let store = Arc::new(LocalAssetStore::new(
        backend,
        config.storage.baseline_bytes_per_pixel,
    ));
    store
        .initialize()
        .await
        .with_context(|| format!("opening asset store at {}", config.storage.path))?;
    store.set_current_user(Some(user.to_string())).await;
    Ok(store)
}

async fn checkin(
    mut config: CarpetcamConfig,
    user: &str,
    venue: &str,
    name: &str,
    options: CheckinOptions,
) -> Result<()> {
    config.capture.auto_confirm = true;
    config.capture.auto_retry = false;
    config.capture.detection_enabled = options.detection;

    let mut sources = FrameSourceBuilder::new().config(config.camera.clone());
    if let Some(image) = &options.image {
        sources = sources.still_image(image);
    }
    let source = sources.build()?;

    let event_bus = Arc::new(
        EventBus::new(config.system.event_bus_capacity).debug_logging(options.trace_events),
    );
    let store = open_store(&config, user).await?;

    let sync = Arc::new(
        CloudSyncCoordinator::new(
            Arc::new(FsBlobArchive::new(&config.sync.archive_path)),
            Arc::new(JsonVenueRegistry::new(&config.sync.registry_path)),
        )
        .with_event_bus(Arc::clone(&event_bus))
        .enabled(config.sync.enabled),
    );
    let detector = Arc::new(HeuristicDetector::new(
        config.analyzer.clone(),
        config.gates.confidence_thresholds(),
    ));

    let orchestrator = CaptureOrchestratorBuilder::new()
        .config(&config)
        .frame_source(source)
        .store(Arc::clone(&store))
        .detector(detector)
        .cloud_sync(sync)
        .event_bus(Arc::clone(&event_bus))
        .build()?;

    let mut events = event_bus.subscribe_filtered(EventFilter::All, "cli");
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("{}", event.description());
        }
    });

    orchestrator.update_orientation(Orientation::new(options.beta, 0.0));
    orchestrator.start_checkin(venue, name).await?;

    let past_gates = tokio::time::timeout(
        options.gate_timeout,
        orchestrator.wait_for_stage(|stage| {
            !matches!(
                stage,
                CaptureStage::CameraStarting
                    | CaptureStage::WaitingForGates
                    | CaptureStage::ConditionsMet
            )
        }),
    )
    .await;

    if past_gates.is_err() {
        let gates = orchestrator.gate_result();
        if !options.force {
            orchestrator.cleanup().await;
            bail!(
                "gates did not pass within {:?}; failing: {}",
                options.gate_timeout,
                gates.failing_gates().join(", ")
            );
        }
        warn!(
            "Gates still failing ({}); capturing anyway",
            gates.failing_gates().join(", ")
        );
        orchestrator.trigger_capture().await?;
    }

    let outcome = tokio::time::timeout(
        FINISH_TIMEOUT,
        orchestrator.wait_for_stage(|stage| stage.is_terminal()),
    )
    .await
    .context("check-in did not finish")?;
    let session = orchestrator.session();

    match outcome {
        CaptureStage::Success => {
            let key = session
                .and_then(|session| session.saved_key)
                .map(|key| key.to_string())
                .unwrap_or_default();
            println!("✓ Checked in at {} ({})", name, key);

            match orchestrator.wait_for_sync().await {
                Some(SyncOutcome::Uploaded { reference, .. }) => {
                    println!("  archived as {}", reference)
                }
                Some(SyncOutcome::Skipped(reason)) => println!("  archive skipped: {:?}", reason),
                Some(SyncOutcome::Failed(e)) => println!("  archive failed: {}", e),
                None => {}
            }
            orchestrator.cleanup().await;
            Ok(())
        }
        _ => {
            let reason = session
                .and_then(|session| session.error)
                .unwrap_or_else(|| "unknown error".to_string());
            orchestrator.cleanup().await;
            bail!("check-in failed: {}", reason)
        }
    }
}

async fn stats(config: &CarpetcamConfig, user: &str) -> Result<()> {
    let store = open_store(config, user).await?;
    let stats = store.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn list(config: &CarpetcamConfig, user: &str, venue: Option<&str>) -> Result<()> {
    let store = open_store(config, user).await?;
    let records = match venue {
        Some(venue) => store.assets_for_pub(venue).await?,
        None => store.assets_for_current_user().await?,
    };

    if records.is_empty() {
        println!("No check-ins stored for {}", user);
        return Ok(());
    }

    for record in records {
        let captured_at = DateTime::<Utc>::from_timestamp_millis(record.captured_at_ms)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.captured_at_ms.to_string());
        println!(
            "{}  {:<24} {}  {}x{} {} ({} bytes)",
            captured_at,
            record.pub_name,
            record.key(),
            record.width,
            record.height,
            record.mime_type,
            record.byte_size
        );
    }
    Ok(())
}

async fn clear(config: &CarpetcamConfig, user: &str, all: bool) -> Result<()> {
    let store = open_store(config, user).await?;
    let removed = if all {
        store.clear_all().await?
    } else {
        store.clear_for_current_user().await?
    };
    println!("Removed {} record(s)", removed);
    Ok(())
}
