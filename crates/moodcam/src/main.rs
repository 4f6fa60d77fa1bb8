use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod analyzer;
mod config;
mod overlay;
mod session;
mod snapshot;
mod window;

use analyzer::OnnxAnalyzer;
use config::Config;
use moodcam_core::{FaceDetector, FaceRecognizer};
use moodcam_hw::Camera;
use overlay::Overlay;
use session::{Session, SystemClock};
use snapshot::SnapshotStore;
use window::{PreviewWindow, WINDOW_TITLE};

const DEFAULT_LOG_FILTER: &str = "info,ort=warn";

#[derive(Parser)]
#[command(name = "moodcam", about = "Live webcam emotion overlay with automatic snapshots")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the camera and start emotion detection (default)
    Run,
    /// List V4L2 capture devices
    Devices,
    /// Build the known-face gallery and list its identities
    Gallery {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::Devices => {
            list_devices();
            Ok(())
        }
        Commands::Gallery { json } => show_gallery(&config, json),
    }
}

fn run(config: &Config) -> Result<()> {
    tracing::info!(
        device = %config.camera_device,
        model_dir = %config.model_dir.display(),
        snapshots = %config.snapshot_dir.display(),
        "moodcam starting"
    );

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("could not open camera {}", config.camera_device))?;
    let analyzer = OnnxAnalyzer::load(config).context("failed to load models")?;
    let snapshots = SnapshotStore::create(&config.snapshot_dir)?;
    let overlay = Overlay::load(config.font_path.as_deref());
    tracing::info!(
        dir = %snapshots.dir().display(),
        overlay_text = overlay.has_text(),
        "snapshot directory ready"
    );
    let window = PreviewWindow::open(WINDOW_TITLE, camera.width, camera.height)?;

    let session = Session::new(
        camera,
        analyzer,
        window,
        snapshots,
        overlay,
        SystemClock,
        config.session_options(),
    );
    let outcome = session.run()?;
    tracing::info!(?outcome, "emotion detection stopped");
    Ok(())
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn show_gallery(config: &Config, json: bool) -> Result<()> {
    let mut detector = FaceDetector::load(&config.detector_model_path())?;
    let mut recognizer = FaceRecognizer::load(&config.recognizer_model_path())?;
    let gallery = analyzer::build_gallery(config, &mut detector, &mut recognizer)?;

    if json {
        let faces: Vec<_> = gallery
            .faces()
            .iter()
            .map(|f| serde_json::json!({ "identity": f.identity, "source": f.source }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&faces)?);
        return Ok(());
    }

    if gallery.is_empty() {
        println!("No known faces in {}", config.known_faces_dir.display());
        return Ok(());
    }
    for identity in gallery.identities() {
        let count = gallery.faces().iter().filter(|f| f.identity == identity).count();
        println!("{identity}  ({count} reference image{})", if count == 1 { "" } else { "s" });
    }
    Ok(())
}
