use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use storybox_playback::audio::CpalOutput;
use storybox_playback::cli::{CliApp, Commands, InteractiveCommand, StatusDisplay};
use storybox_playback::collaborators::{
    Catalog, FolderCatalog, FsContentResolver, LogTrackingSink, NoCompletionHook, NoWirelessLink,
};
use storybox_playback::config::ConfigManager;
use storybox_playback::logging::PlaybackLogger;
use storybox_playback::recovery::{RecoveryManager, RecoveryResult};
use storybox_playback::{
    Direction, EffectOutcome, EngineDeps, ErrorSeverity, PlaybackEngine, PlayerError, PlaylistError, PollOutcome,
    SinkPreference,
};

/// Completion poll and prompt refresh period
const TICK: Duration = Duration::from_millis(100);

/// Coordinates the engine, the album catalog and error recovery for the host
struct AppController {
    engine: PlaybackEngine,
    catalog: Arc<FolderCatalog>,
    recovery: RecoveryManager,
    preference: SinkPreference,
}

impl AppController {
    fn new(cli: &CliApp, library: &Path) -> Result<Self, PlayerError> {
        let config_manager = match &cli.config {
            Some(path) => ConfigManager::with_path(path.clone())?,
            None => ConfigManager::new()?,
        };
        let config = config_manager.get_config().clone();
        info!("Configuration loaded from {}", config_manager.config_path().display());

        let catalog = Arc::new(FolderCatalog::scan(
            library,
            &config.playlist.supported_extensions,
            cli.encryption_hint(),
        )?);
        let output = CpalOutput::open(config.sink.preferred_device.as_deref())?;
        let preference = cli.sink.unwrap_or(config.sink.default_preference);

        let deps = EngineDeps {
            link: Arc::new(NoWirelessLink),
            catalog: catalog.clone(),
            resolver: Arc::new(FsContentResolver::new(Some(library.to_path_buf()))),
            tracking: Arc::new(LogTrackingSink),
            completion: Arc::new(NoCompletionHook),
        };
        let engine = PlaybackEngine::new(config, Box::new(output), deps)?;

        if let Some(mode) = cli.playback_mode() {
            engine.set_playback_mode(mode)?;
        }
        if let Some(mode) = cli.auto_play {
            engine.set_auto_play_mode(mode);
        }

        Ok(Self {
            engine,
            catalog,
            recovery: RecoveryManager::new(),
            preference,
        })
    }

    /// Load the catalog's first album and start its first track
    fn play_library(&mut self) -> Result<(), PlayerError> {
        let album = self.catalog.current_album().ok_or(PlaylistError::NoAlbum)?;
        let count = self.engine.load_album(album.clone())?;
        println!("Album '{}' ({} tracks)", album.sku, count);
        self.play_current();
        Ok(())
    }

    fn play_current(&mut self) {
        match self.engine.play_current(self.preference) {
            Ok(track) => self.announce(&track),
            Err(e) => self.recover(e.into()),
        }
    }

    fn announce(&mut self, track: &Path) {
        self.recovery.reset();
        StatusDisplay::display_now_playing(track, self.engine.current_track_display_position());
    }

    /// Apply the recovery manager's advice, skipping forward until a track starts
    /// or the attempts for an error kind run out
    fn recover(&mut self, mut error: PlayerError) {
        loop {
            match error.severity() {
                ErrorSeverity::Info => info!("{}", error),
                ErrorSeverity::Warning => warn!("{}", error),
                ErrorSeverity::Error | ErrorSeverity::Critical => error!("{}", error),
            }

            let skipped = match self.recovery.attempt_recovery(&error) {
                RecoveryResult::Success(msg) => {
                    println!("✓ {}", msg);
                    return;
                }
                RecoveryResult::Retry(msg) => {
                    println!("🔄 {}", msg);
                    return;
                }
                RecoveryResult::SkipTrack(msg) => {
                    println!("⏭ {}", msg);
                    self.engine.advance(Direction::Forward)
                }
                RecoveryResult::Failed(_) => {
                    StatusDisplay::display_error(&error);
                    return;
                }
            };

            match skipped {
                Ok(track) => {
                    self.announce(&track);
                    return;
                }
                Err(e) => error = e.into(),
            }
        }
    }

    fn execute(&mut self, command: InteractiveCommand) -> Result<bool, PlayerError> {
        match command {
            InteractiveCommand::Pause => self.engine.pause()?,
            InteractiveCommand::Resume => {
                if self.engine.is_stopped() {
                    self.play_current();
                } else {
                    self.engine.resume()?;
                }
            }
            InteractiveCommand::Stop => self.engine.stop()?,
            InteractiveCommand::Next | InteractiveCommand::Prev => {
                let direction = if command == InteractiveCommand::Next {
                    Direction::Forward
                } else {
                    Direction::Backward
                };
                match self.engine.advance(direction) {
                    Ok(track) => self.announce(&track),
                    Err(e) => self.recover(e.into()),
                }
            }
            InteractiveCommand::Effect(path) => self.engine.play_effect(&path)?,
            InteractiveCommand::Mode(mode) => self.engine.set_playback_mode(mode)?,
            InteractiveCommand::AutoPlay(mode) => self.engine.set_auto_play_mode(mode),
            InteractiveCommand::Reshuffle => self.engine.reshuffle()?,
            InteractiveCommand::Status => {
                let status = self.engine.status()?;
                StatusDisplay::display_full_status(&status, self.engine.current_track_display_position());
            }
            InteractiveCommand::Help => CliApp::display_help(),
            InteractiveCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Act on one poller tick. Returns false once an effect-only session is over.
    fn tick(&mut self) -> bool {
        match self.engine.periodic_check() {
            PollOutcome::Idle | PollOutcome::Busy => true,
            PollOutcome::TrackCompleted { next: Some(track), .. } => {
                self.announce(&track);
                true
            }
            PollOutcome::TrackCompleted { next: None, .. } => {
                if self.engine.is_stopped() {
                    println!("Album finished");
                }
                true
            }
            PollOutcome::Effect(EffectOutcome::LinkLost) => {
                println!("Headphones disconnected, playback stopped");
                true
            }
            PollOutcome::Effect(EffectOutcome::Finished) => false,
            PollOutcome::Effect(_) => true,
            PollOutcome::Failed(e) => {
                self.recover(e.into());
                true
            }
        }
    }

    async fn run_interactive_mode(&mut self, shutdown: Arc<AtomicBool>) -> Result<(), PlayerError> {
        println!("Storybox v0.1.0");
        println!("Type 'h' for available commands, 'q' to quit.");

        let mut interval = tokio::time::interval(TICK);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line.trim().to_string()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                biased;

                line = rx.recv() => {
                    let Some(line) = line else {
                        break;
                    };
                    if line.is_empty() {
                        continue;
                    }
                    match CliApp::parse_command(&line) {
                        Ok(command) => match self.execute(command) {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(e) => self.recover(e),
                        },
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            println!("Type 'h' for available commands.");
                        }
                    }
                }

                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.shutdown()
    }

    /// Play one effect and wait for it to finish
    async fn run_effect(&mut self, file: &Path, shutdown: Arc<AtomicBool>) -> Result<(), PlayerError> {
        self.engine.play_effect_while_stopped(file)?;
        let mut interval = tokio::time::interval(TICK);
        while !shutdown.load(Ordering::Relaxed) && self.engine.is_playing() {
            interval.tick().await;
            if !self.tick() {
                break;
            }
        }
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), PlayerError> {
        println!("Shutting down...");
        if let Err(e) = self.engine.stop() {
            eprintln!("Warning: Error stopping playback: {}", e);
        }
        Ok(())
    }
}

fn library_root(command: &Commands) -> PathBuf {
    match command {
        Commands::Play { album } => album.clone(),
        Commands::Effect { file } => file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

#[tokio::main]
async fn main() -> Result<(), PlayerError> {
    if std::env::var("STORYBOX_LOG_LEVEL").is_err() {
        std::env::set_var("STORYBOX_LOG_LEVEL", "warn");
    }
    if let Err(e) = PlaybackLogger::init() {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let cli = CliApp::parse();
    let library = library_root(&cli.command);

    let mut app = match AppController::new(&cli, &library) {
        Ok(app) => app,
        Err(e) => {
            StatusDisplay::display_simple_error(&e);
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived interrupt signal. Shutting down gracefully...");
        flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let result = match &cli.command {
        Commands::Play { .. } => match app.play_library() {
            Ok(()) => app.run_interactive_mode(shutdown).await,
            Err(e) => Err(e),
        },
        Commands::Effect { file } => app.run_effect(file, shutdown).await,
    };

    if let Err(e) = result {
        StatusDisplay::display_simple_error(&e);
        std::process::exit(1);
    }

    info!("Application shutdown complete");
    Ok(())
}
