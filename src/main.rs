use anyhow::Context;
use clap::{Parser, Subcommand};
use hud_telemetry::logging::init_logging;
use hud_telemetry::models::config::AppConfig;
use hud_telemetry::models::signal::SignalKind;
use hud_telemetry::services::ocr::{OcrEngine, PreprocessingService, Recognizer, TesseractCli};
use hud_telemetry::services::{ConfigManager, FrameCapture, OcrTracker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hud-telemetry", version, about = "Read HUD telemetry from game captures")]
struct Cli {
    /// Config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize one signal from a PNG capture and print the result as JSON
    Recognize {
        /// level, exp, remaining_exp, character_name, enemy_name, enemy_hp or free_text
        #[arg(long, short)]
        kind: SignalKind,

        /// PNG capture of the signal region
        image: PathBuf,
    },

    /// Track a profile against a saved screenshot, printing events as JSON lines
    Track {
        /// Full-surface PNG screenshot
        frame: PathBuf,

        /// Profile whose saved timers and regions are used
        #[arg(long, short, default_value = "default")]
        profile: String,

        /// Stop after this many seconds
        #[arg(long, default_value_t = 10)]
        duration_secs: u64,
    },

    /// Print the Tesseract version in use
    EngineCheck,

    /// Print the config and profile file locations
    ConfigPath,
}

fn config_manager(dir: Option<PathBuf>) -> anyhow::Result<ConfigManager> {
    match dir {
        Some(dir) => Ok(ConfigManager::with_dir(dir)),
        None => ConfigManager::new().context("Failed to open config directory"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let manager = config_manager(cli.config_dir)?;
    let config = manager.load().context("Failed to load config")?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Recognize { kind, image } => recognize(&config, kind, image).await?,
        Commands::Track {
            frame,
            profile,
            duration_secs,
        } => track(&config, &manager, frame, profile, duration_secs).await?,
        Commands::EngineCheck => {
            let engine = TesseractCli::new(config.engine.clone());
            let version = engine.version().await.context("Tesseract is not usable")?;
            println!("{}", version);
        }
        Commands::ConfigPath => {
            println!("{}", manager.config_file_path().display());
            println!("{}", manager.profiles_file_path().display());
        }
    }
    Ok(())
}

async fn recognize(config: &AppConfig, kind: SignalKind, image: PathBuf) -> anyhow::Result<()> {
    let png = tokio::fs::read(&image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;
    let recognizer = Recognizer::new(
        Arc::new(TesseractCli::new(config.engine.clone())),
        Arc::new(PreprocessingService::new(config.preprocessing.clone())),
        config.recognition.clone(),
        config.engine.clone(),
    );
    let result = recognizer.recognize_png(kind, &png).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn track(
    config: &AppConfig,
    manager: &ConfigManager,
    frame: PathBuf,
    profile: String,
    duration_secs: u64,
) -> anyhow::Result<()> {
    let profiles = manager.load_profiles()?;
    if !profiles.contains_key(&profile) {
        anyhow::bail!(
            "No saved settings for profile {:?} in {}",
            profile,
            manager.profiles_file_path().display()
        );
    }

    let capture = Arc::new(FrameCapture::new());
    capture.load_png(&profile, &frame)?;
    let engine = Arc::new(TesseractCli::new(config.engine.clone()));
    if !engine.is_available().await {
        warn!("Tesseract not available at {:?}", config.engine.tesseract_path);
    }

    let (tracker, ticks) = OcrTracker::new(config, capture, engine);
    let mut events = tracker.subscribe();
    let handle = tracker.start(ticks);
    tracker.import_settings(profiles);
    info!("Tracking {} for {}s", profile, duration_secs);

    let deadline = tokio::time::sleep(Duration::from_secs(duration_secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tracker.stop();
    handle.await?;
    manager.save_profiles(&tracker.export_settings())?;
    Ok(())
}
