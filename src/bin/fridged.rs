//! fridged - fridge inventory daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera
//! 2. Runs the selected detector backend on each frame
//! 3. Deduplicates detections into the SQLite item catalog
//! 4. Streams item and status events to stdout (JSON lines) or MQTT
//!
//! Exit codes: 0 after a clean shutdown, 1 if initialisation failed, 2 if a
//! stage failed while running.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use fridge_watch::{
    config::{FridgeConfig, TransportKind},
    open_camera, BackendRegistry, EventTransport, JsonLinesTransport, MqttTransport, Pipeline,
    ShutdownSignal, SqliteItemStore,
};

const EXIT_INIT_FAILED: i32 = 1;

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch a fridge camera and keep an item inventory")]
struct Args {
    /// TOML config file.
    #[arg(long, env = "FRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config).
    #[arg(long)]
    db_path: Option<String>,

    /// Camera URL, e.g. stub://fridge or /dev/video0 (overrides config).
    #[arg(long)]
    camera_url: Option<String>,

    /// Event transport: stdout or mqtt (overrides config).
    #[arg(long)]
    transport: Option<String>,

    /// Detector backend name (overrides config).
    #[arg(long)]
    detector: Option<String>,

    /// Print the available detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let code = match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("fridged failed to start: {:#}", err);
            EXIT_INIT_FAILED
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let registry = BackendRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(0);
    }

    let config = load_config(&args)?;
    log::info!(
        "fridged {} starting (camera {}, detector {}, db {})",
        env!("CARGO_PKG_VERSION"),
        config.camera.url,
        config.detector.backend,
        config.db_path
    );

    let store = SqliteItemStore::open(&config.db_path)
        .with_context(|| format!("open item store {}", config.db_path))?;
    let camera = open_camera(&config.camera)?;
    let detector = registry.create(&config.detector)?;
    let transport: Box<dyn EventTransport> = match config.transport.kind {
        TransportKind::Stdout => Box::new(JsonLinesTransport::stdout()),
        TransportKind::Mqtt => Box::new(MqttTransport::connect(&config.transport.mqtt)?),
    };

    let shutdown = ShutdownSignal::new();
    let handler_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_shutdown.trigger();
    })
    .context("install signal handler")?;

    let report = Pipeline::new(
        config.pipeline.clone(),
        camera,
        detector,
        Box::new(store),
        transport,
    )
    .with_min_confidence(config.detector.min_confidence)
    .with_retry_backoff(config.camera.retry_backoff)
    .run(shutdown)?;

    for outcome in &report.stages {
        log::info!("{} stage: {:?}", outcome.stage, outcome.status);
    }
    if let Some(stage) = report.failed_stage {
        log::error!("{} stage stopped the pipeline", stage);
    }
    Ok(report.exit_code())
}

fn load_config(args: &Args) -> Result<FridgeConfig> {
    let mut config = FridgeConfig::load_from(args.config.as_deref())?;
    if let Some(db_path) = &args.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(url) = &args.camera_url {
        config.camera.url = url.clone();
    }
    if let Some(kind) = &args.transport {
        config.transport.kind = TransportKind::parse(kind)?;
    }
    if let Some(detector) = &args.detector {
        config.detector.backend = detector.clone();
    }
    config.validate()?;
    Ok(config)
}
