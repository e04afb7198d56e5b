use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error for the host binary
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),
}

impl PlayerError {
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Playback(err) => err.user_message(),
            PlayerError::Pipeline(err) => format!("Audio output problem: {}", err),
            PlayerError::Playlist(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::File(err) => format!("File system error: {}", err),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlayerError::Playback(err) => err.recovery_suggestions(),
            PlayerError::Pipeline(_) => vec!["Skip to the next track".to_string()],
            PlayerError::Playlist(err) => err.recovery_suggestions(),
            PlayerError::Config(_) => vec!["Delete the configuration file to restore defaults".to_string()],
            PlayerError::File(_) => vec!["Check that the SD card is inserted".to_string()],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Playback(err) => err.is_recoverable(),
            PlayerError::Pipeline(_) => true,
            PlayerError::Playlist(err) => err.is_recoverable(),
            PlayerError::Config(_) => true,
            PlayerError::File(_) => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Playback(err) => err.severity(),
            PlayerError::Pipeline(_) => ErrorSeverity::Error,
            PlayerError::Playlist(PlaylistError::Empty) => ErrorSeverity::Info,
            PlayerError::Playlist(_) => ErrorSeverity::Warning,
            PlayerError::Config(_) => ErrorSeverity::Warning,
            PlayerError::File(_) => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error | ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// The two coordinating locks of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Playback,
    Playlist,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Playback => f.write_str("playback"),
            LockKind::Playlist => f.write_str("playlist"),
        }
    }
}

/// Errors surfaced by the playback state machine
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Timed out after {waited:?} waiting for the {lock} lock")]
    LockTimeout { lock: LockKind, waited: Duration },

    #[error("File not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Pipeline initialization failed: {0}")]
    PipelineInitFailed(#[from] PipelineError),

    #[error("Wireless sink is no longer connected")]
    SinkUnavailable,

    #[error("Buffer pre-fill reached {:.0}% of the {:.0}% target before timing out", .reached * 100.0, .target * 100.0)]
    BufferPrefillTimeout { reached: f32, target: f32 },

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),
}

impl PlaybackError {
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::LockTimeout { .. } => "The player is busy, please try again".to_string(),
            PlaybackError::FileNotFound { path } => {
                format!("Track '{}' is missing from the card", path.display())
            }
            PlaybackError::PipelineInitFailed(err) => format!("Could not start playback: {}", err),
            PlaybackError::SinkUnavailable => {
                "The headphones disconnected, playback was stopped".to_string()
            }
            PlaybackError::BufferPrefillTimeout { .. } => {
                "Playback started before the audio buffer was full".to_string()
            }
            PlaybackError::Playlist(err) => err.user_message(),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlaybackError::LockTimeout { .. } => vec![
                "Press the button again".to_string(),
            ],
            PlaybackError::FileNotFound { .. } => vec![
                "Re-sync the album to restore missing files".to_string(),
                "Skip to the next track".to_string(),
            ],
            PlaybackError::PipelineInitFailed(_) => vec![
                "Skip to the next track".to_string(),
                "Check that the file is a supported audio format".to_string(),
            ],
            PlaybackError::SinkUnavailable => vec![
                "Reconnect the headphones and press play".to_string(),
                "Play through the built-in speaker instead".to_string(),
            ],
            PlaybackError::BufferPrefillTimeout { .. } => vec![
                "No action needed".to_string(),
            ],
            PlaybackError::Playlist(err) => err.recovery_suggestions(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            PlaybackError::LockTimeout { .. } => true,
            PlaybackError::FileNotFound { .. } => false,
            PlaybackError::PipelineInitFailed(_) => true,
            PlaybackError::SinkUnavailable => true,
            PlaybackError::BufferPrefillTimeout { .. } => true,
            PlaybackError::Playlist(err) => err.is_recoverable(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlaybackError::LockTimeout { .. } => ErrorSeverity::Info,
            PlaybackError::BufferPrefillTimeout { .. } => ErrorSeverity::Warning,
            PlaybackError::SinkUnavailable => ErrorSeverity::Warning,
            PlaybackError::FileNotFound { .. } => ErrorSeverity::Error,
            PlaybackError::PipelineInitFailed(_) => ErrorSeverity::Error,
            PlaybackError::Playlist(_) => ErrorSeverity::Warning,
        }
    }
}

/// Failures while constructing, linking or running pipeline elements
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot open {}: {source}", .path.display())]
    ReaderOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported stream: {0}")]
    UnsupportedFormat(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Element task could not be spawned: {0}")]
    TaskSpawn(String),

    #[error("Pipeline is running, stop it before relinking")]
    StillRunning,

    #[error("Output device error: {0}")]
    Output(String),
}

/// Playlist construction and navigation errors
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("No album is selected")]
    NoAlbum,

    #[error("Playlist is empty")]
    Empty,

    #[error("Album {} contains no playable tracks", .path.display())]
    EmptyAlbum { path: PathBuf },

    #[error("Cannot scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid track index: {index}")]
    InvalidIndex { index: usize },
}

impl PlaylistError {
    pub fn user_message(&self) -> String {
        match self {
            PlaylistError::NoAlbum => "No album is selected".to_string(),
            PlaylistError::Empty => "There is nothing to play".to_string(),
            PlaylistError::EmptyAlbum { .. } => "This album has no tracks".to_string(),
            PlaylistError::Scan { path, .. } => format!("Cannot read album folder '{}'", path.display()),
            PlaylistError::InvalidIndex { index } => format!("There is no track number {}", index + 1),
        }
    }

    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            PlaylistError::NoAlbum | PlaylistError::Empty => vec![
                "Select an album first".to_string(),
            ],
            PlaylistError::EmptyAlbum { .. } | PlaylistError::Scan { .. } => vec![
                "Re-sync the album".to_string(),
                "Choose a different album".to_string(),
            ],
            PlaylistError::InvalidIndex { .. } => vec![
                "Pick a track from the album list".to_string(),
            ],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PlaylistError::Scan { .. })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Failed to write configuration: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => "Could not locate the configuration directory".to_string(),
            ConfigError::IoError(err) => format!("Could not access the configuration file: {}", err),
            ConfigError::DeserializationError(_) => "The configuration file is malformed".to_string(),
            ConfigError::SerializationError(_) => "The configuration could not be saved".to_string(),
            ConfigError::Invalid(msg) => format!("Invalid setting: {}", msg),
        }
    }
}
