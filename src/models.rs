use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Playback state of the engine.
///
/// Only `Stopped`, `Playing` and `Paused` are stable. `Pausing` and `Resuming`
/// exist while a pause/resume command is in flight on the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Pausing,
    Paused,
    Resuming,
}

impl PlaybackState {
    /// Stable states are the only ones a caller may build further transitions on
    pub fn is_stable(self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Playing | PlaybackState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Pausing => "pausing",
            PlaybackState::Paused => "paused",
            PlaybackState::Resuming => "resuming",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Pausing => 2,
            PlaybackState::Paused => 3,
            PlaybackState::Resuming => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Pausing,
            3 => PlaybackState::Paused,
            4 => PlaybackState::Resuming,
            _ => PlaybackState::Stopped,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output path a pipeline writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Local,
    Wireless,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Local => "local",
            SinkKind::Wireless => "wireless",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink requested by a caller. `Auto` is resolved once, at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkPreference {
    #[default]
    Auto,
    Local,
    Wireless,
}

impl FromStr for SinkPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SinkPreference::Auto),
            "local" | "speaker" => Ok(SinkPreference::Local),
            "wireless" | "bt" | "bluetooth" => Ok(SinkPreference::Wireless),
            other => Err(format!("unknown sink '{}', expected auto, local or wireless", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    #[default]
    Sequential,
    Shuffle,
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(PlaybackMode::Sequential),
            "shuffle" | "random" => Ok(PlaybackMode::Shuffle),
            other => Err(format!("unknown playback mode '{}'", other)),
        }
    }
}

/// What happens when a track completes and the album sequence wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPlayMode {
    /// Play through the album once, then stop
    #[default]
    Off,
    /// Loop the current album
    RepeatFolder,
    /// Move on to the next album when this one wraps
    CycleAll,
}

impl AutoPlayMode {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            AutoPlayMode::Off => 0,
            AutoPlayMode::RepeatFolder => 1,
            AutoPlayMode::CycleAll => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => AutoPlayMode::RepeatFolder,
            2 => AutoPlayMode::CycleAll,
            _ => AutoPlayMode::Off,
        }
    }
}

impl FromStr for AutoPlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "off" => Ok(AutoPlayMode::Off),
            "repeat_folder" | "repeat" => Ok(AutoPlayMode::RepeatFolder),
            "cycle_all" | "cycle" => Ok(AutoPlayMode::CycleAll),
            other => Err(format!("unknown auto-play mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Encryption policy hint the catalog attaches to an album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionHint {
    Encrypted,
    Plain,
    #[default]
    Unknown,
}

/// How an album's track list is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumKind {
    /// Track list comes from scanning the album directory
    Folder,
    /// Track list comes from the catalog's filename ordering
    Catalog,
}

/// Album descriptor supplied by the catalog collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumDescriptor {
    pub path: PathBuf,
    pub sku: String,
    pub encryption: EncryptionHint,
    pub kind: AlbumKind,
}

impl AlbumDescriptor {
    pub fn folder(path: impl Into<PathBuf>, sku: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sku: sku.into(),
            encryption: EncryptionHint::Unknown,
            kind: AlbumKind::Folder,
        }
    }

    pub fn with_encryption(mut self, encryption: EncryptionHint) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_kind(mut self, kind: AlbumKind) -> Self {
        self.kind = kind;
        self
    }
}

/// One-based position of the current track, as shown on the display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackPosition {
    pub index: usize,
    pub total: usize,
}

impl fmt::Display for TrackPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}
