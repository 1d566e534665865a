mod display;
mod input;
mod media;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use visual_hive_core::{
    assets::normalize_key, frame_queue, run_presenter, AppConfig, AssetCatalog, BeatClock, ControlLoop, EventQueue, Layer,
    LocalSession, NetworkSync, Resolution, RunFlag, SharedClockState, TempoSource,
    TempoSourceKind, TransitionManager, VisualHiveError,
};

fn main() -> visual_hive_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Live(args) => run_live(args),
        Commands::Devices => list_devices(),
        Commands::CheckConfig { path } => check_config(&path),
    }
}

fn run_live(args: LiveArgs) -> visual_hive_core::Result<()> {
    let mut config = AppConfig::load(&args.config)?;
    if let Some(tempo) = args.tempo {
        config.tempo.source = tempo.into();
    }
    if let Some(bpm) = args.bpm {
        config.tempo.default_bpm = bpm;
    }
    if config.assets.is_empty() {
        tracing::info!("no assets configured, using the procedural demo set");
        config.assets = media::demo_assets();
    }
    tracing::info!(source = ?config.tempo.source, assets = config.assets.len(), "starting live mode");

    let running = RunFlag::new();
    let shared = Arc::new(SharedClockState::default());
    let tempo = start_tempo(&config, args.device.as_deref(), shared, &running).map_err(fatal)?;

    let preview = preview_resolution(&config);
    let backend = Arc::new(media::ProceduralBackend::new(preview));
    let catalog = AssetCatalog::new(config.assets.clone())?;
    let transitions = TransitionManager::new(catalog, backend, preview).map_err(fatal)?;
    let status = transitions.status();

    let clock = BeatClock::from_config(Arc::clone(&tempo.source), &config.tempo);
    let events = Arc::new(EventQueue::unbounded());
    let frames = Arc::new(frame_queue());
    let mut control = ControlLoop::new(
        &config,
        clock,
        transitions,
        Arc::clone(&events),
        frames.clone(),
        running.clone(),
    );

    let guard = input::RawModeGuard::new()?;
    let input = input::spawn(
        events,
        running.clone(),
        config.keys.strobe,
        guard.reports_release(),
    )?;
    let render = thread::Builder::new()
        .name("render-loop".into())
        .spawn(move || control.run())?;

    let mut display = display::stdout_display(&config.display.window_name, status);
    let presented = run_presenter(&frames, &mut display, &running);

    running.stop();
    let rendered = render
        .join()
        .unwrap_or_else(|_| Err(VisualHiveError::msg("render loop panicked")));
    if input.join().is_err() {
        tracing::warn!("input thread panicked");
    }
    drop(display);
    drop(guard);
    drop(tempo);

    let presented = presented?;
    tracing::info!(presented, "live mode finished");
    rendered
}

/// Keeps the active tempo source, and any capture stream feeding it, alive.
struct TempoBackend {
    source: Arc<dyn TempoSource>,
    #[cfg(feature = "capture")]
    _capture: Option<visual_hive_core::audio::AudioCapture>,
}

fn start_tempo(
    config: &AppConfig,
    device: Option<&str>,
    shared: Arc<SharedClockState>,
    running: &RunFlag,
) -> visual_hive_core::Result<TempoBackend> {
    match config.tempo.source {
        TempoSourceKind::Network => {
            let session = Arc::new(LocalSession::new(config.tempo.default_bpm));
            let sync = NetworkSync::new(session, shared);
            tracing::info!(bpm = sync.tempo(), peers = sync.peer_count(), "sync session ready");
            Ok(TempoBackend {
                source: Arc::new(sync),
                #[cfg(feature = "capture")]
                _capture: None,
            })
        }
        TempoSourceKind::Audio => start_audio(config, device, shared, running),
    }
}

#[cfg(feature = "capture")]
fn start_audio(
    config: &AppConfig,
    device: Option<&str>,
    shared: Arc<SharedClockState>,
    running: &RunFlag,
) -> visual_hive_core::Result<TempoBackend> {
    use visual_hive_core::audio::AudioCapture;

    let detector = Arc::new(visual_hive_core::AudioDetector::new(config.tempo.default_bpm, shared));
    let capture = AudioCapture::start(
        device,
        &config.detection,
        &config.smoothing,
        Arc::clone(&detector),
        running.clone(),
    )?;
    Ok(TempoBackend {
        source: detector,
        _capture: Some(capture),
    })
}

#[cfg(not(feature = "capture"))]
fn start_audio(
    _config: &AppConfig,
    _device: Option<&str>,
    _shared: Arc<SharedClockState>,
    _running: &RunFlag,
) -> visual_hive_core::Result<TempoBackend> {
    Err(VisualHiveError::NoTempoSource(
        "audio detection needs a build with the `capture` feature".into(),
    ))
}

fn fatal(err: VisualHiveError) -> VisualHiveError {
    if err.is_fatal() {
        tracing::error!(%err, "cannot start");
    }
    err
}

/// Procedural frames are rendered well below output size; the status display
/// never looks at individual pixels.
fn preview_resolution(config: &AppConfig) -> Resolution {
    Resolution::new(
        (config.display.width / 16).max(1),
        (config.display.height / 16).max(1),
    )
}

#[cfg(feature = "capture")]
fn list_devices() -> visual_hive_core::Result<()> {
    let devices = visual_hive_core::audio::list_input_devices()?;
    println!("Input devices:");
    for name in devices {
        println!("  - {name}");
    }
    Ok(())
}

#[cfg(not(feature = "capture"))]
fn list_devices() -> visual_hive_core::Result<()> {
    println!("audio capture is not compiled in; rebuild with `--features capture`");
    Ok(())
}

fn check_config(path: &Path) -> visual_hive_core::Result<()> {
    let config = AppConfig::load(path)?;
    let catalog = AssetCatalog::new(config.assets.clone())?;

    let mut warnings = Vec::new();
    if catalog.default_background().is_none() {
        warnings.push("no background assets; live mode will use the demo set".to_string());
    }
    warnings.extend(reserved_key_warnings(&config));
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let names = |layer: Layer| -> Vec<String> {
        catalog.layer(layer).map(|asset| asset.name.clone()).collect()
    };
    let report = serde_json::json!({
        "config": config,
        "backgrounds": names(Layer::Background),
        "foregrounds": names(Layer::Foreground),
        "warnings": warnings,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Asset keys that shadow a control binding, compared the way input arrives.
fn reserved_key_warnings(config: &AppConfig) -> Vec<String> {
    let reserved = |key: &char| config.keys.is_reserved(normalize_key(*key));
    config
        .assets
        .iter()
        .filter_map(|asset| {
            let key = asset.key.filter(reserved)?;
            Some(format!("asset `{}` uses control key {key:?}", asset.name))
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised live visuals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the visual engine against a tempo source.
    Live(LiveArgs),
    /// List audio input devices usable for tempo detection.
    Devices,
    /// Print the resolved configuration and catalog as JSON.
    CheckConfig {
        /// Configuration file to validate.
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// JSON configuration file.
    #[arg(short, long, default_value = "visual-hive.json")]
    config: PathBuf,
    /// Overrides the configured tempo source.
    #[arg(short, long, value_enum)]
    tempo: Option<TempoArg>,
    /// Audio input device, matched case-insensitively by name.
    #[arg(short, long)]
    device: Option<String>,
    /// Starting tempo before any peer or detection update.
    #[arg(long)]
    bpm: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TempoArg {
    Network,
    Audio,
}

impl From<TempoArg> for TempoSourceKind {
    fn from(value: TempoArg) -> Self {
        match value {
            TempoArg::Network => TempoSourceKind::Network,
            TempoArg::Audio => TempoSourceKind::Audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_live_overrides() {
        let cli = Cli::parse_from(["visual-hive", "live", "--tempo", "audio", "--device", "usb"]);
        let Commands::Live(args) = cli.command else {
            panic!("expected live");
        };
        assert!(matches!(args.tempo, Some(TempoArg::Audio)));
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert_eq!(args.config, PathBuf::from("visual-hive.json"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn audio_without_capture_is_fatal() {
        if cfg!(feature = "capture") {
            return;
        }
        let config = AppConfig {
            tempo: visual_hive_core::config::TempoConfig {
                source: TempoSourceKind::Audio,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = start_tempo(&config, None, Arc::default(), &RunFlag::new());
        assert!(matches!(result, Err(err) if err.is_fatal()));
    }

    #[test]
    fn uppercase_asset_keys_collide_with_controls() {
        let bounce = AppConfig::default().keys.bounce.to_ascii_uppercase();
        let config = AppConfig {
            assets: vec![visual_hive_core::AssetDescriptor::new(
                "loud",
                Layer::Foreground,
                visual_hive_core::AssetSource::Solid {
                    color: visual_hive_core::Rgb::WHITE,
                },
            )
            .with_key(bounce)],
            ..Default::default()
        };
        assert_eq!(reserved_key_warnings(&config).len(), 1);
    }

    #[test]
    fn preview_is_a_sixteenth() {
        let resolution = preview_resolution(&AppConfig::default());
        assert_eq!(resolution, Resolution::new(120, 67));
    }
}
