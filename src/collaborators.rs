//! Interfaces to the systems around the playback engine, with the default
//! implementations the host binary uses.

use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::AudioOutput;
use crate::error::{PipelineError, PlaylistError};
use crate::models::{AlbumDescriptor, EncryptionHint};
use crate::playback::tracking::PlaybackTrackingRecord;

/// Wireless headset/speaker link. Its connection state machine lives elsewhere;
/// the engine only queries it and drives media flow.
pub trait WirelessLink: Send + Sync {
    fn is_audio_connected(&self) -> bool;

    fn start_media_flow(&self);

    fn stop_media_flow(&self);

    /// Create the transient backend a wireless sink writes to
    fn open_stream(&self) -> Result<Box<dyn AudioOutput>, PipelineError>;

    /// Deliver a connection event the link held back while audio was playing
    fn release_deferred_event(&self);
}

/// Album catalog and its persistence
pub trait Catalog: Send + Sync {
    fn current_album(&self) -> Option<AlbumDescriptor>;

    /// Filename ordering for catalog albums
    fn track_order(&self, album: &AlbumDescriptor) -> Vec<String>;

    /// Album following `current` when cycling through all albums
    fn next_album(&self, current: &AlbumDescriptor) -> Option<AlbumDescriptor>;
}

pub trait ContentResolver: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Analytics identifier of a track
    fn content_id(&self, path: &Path) -> String;
}

pub trait TrackingSink: Send + Sync {
    fn record(&self, record: PlaybackTrackingRecord);
}

/// Alarm/repeat policy consulted before the auto-play mode on natural completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDirective {
    /// Apply the auto-play mode
    Continue,
    /// Play the finished track again
    RepeatTrack,
    /// Stay stopped
    Halt,
}

pub trait CompletionHook: Send + Sync {
    fn on_track_completed(&self, track: &Path) -> CompletionDirective;
}

/// Link for devices without wireless audio
pub struct NoWirelessLink;

impl WirelessLink for NoWirelessLink {
    fn is_audio_connected(&self) -> bool {
        false
    }

    fn start_media_flow(&self) {}

    fn stop_media_flow(&self) {}

    fn open_stream(&self) -> Result<Box<dyn AudioOutput>, PipelineError> {
        Err(PipelineError::SinkUnavailable("no wireless link on this device".to_string()))
    }

    fn release_deferred_event(&self) {}
}

/// Resolves content on the local filesystem. The content id is the path
/// relative to the content root.
pub struct FsContentResolver {
    root: Option<PathBuf>,
}

impl FsContentResolver {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl ContentResolver for FsContentResolver {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn content_id(&self, path: &Path) -> String {
        let relative = self
            .root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        relative.to_string_lossy().into_owned()
    }
}

/// Writes tracking records to the log
pub struct LogTrackingSink;

impl TrackingSink for LogTrackingSink {
    fn record(&self, record: PlaybackTrackingRecord) {
        info!(
            "Tracking: '{}' played {:.1}s (paused {:.1}s){}",
            record.content_id,
            record.played().as_secs_f64(),
            record.paused_total.as_secs_f64(),
            if record.completed { ", completed" } else { "" }
        );
    }
}

pub struct NoCompletionHook;

impl CompletionHook for NoCompletionHook {
    fn on_track_completed(&self, _track: &Path) -> CompletionDirective {
        CompletionDirective::Continue
    }
}

/// Catalog over a library directory: every sub-directory holding audio is a
/// folder album, visited in name order.
pub struct FolderCatalog {
    albums: Vec<AlbumDescriptor>,
    current: usize,
}

impl FolderCatalog {
    pub fn scan(library: &Path, extensions: &[String], encryption: EncryptionHint) -> Result<Self, PlaylistError> {
        let entries = fs::read_dir(library).map_err(|source| PlaylistError::Scan {
            path: library.to_path_buf(),
            source,
        })?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && holds_audio(path, extensions))
            .collect();
        dirs.sort();

        let albums: Vec<AlbumDescriptor> = if dirs.is_empty() {
            vec![album_for(library, encryption)]
        } else {
            dirs.iter().map(|dir| album_for(dir, encryption)).collect()
        };
        debug!("Catalog found {} album(s) under {}", albums.len(), library.display());

        Ok(Self { albums, current: 0 })
    }

    pub fn albums(&self) -> &[AlbumDescriptor] {
        &self.albums
    }
}

fn album_for(dir: &Path, encryption: EncryptionHint) -> AlbumDescriptor {
    let sku = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    AlbumDescriptor::folder(dir, sku).with_encryption(encryption)
}

fn holds_audio(dir: &Path, extensions: &[String]) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
    })
}

impl Catalog for FolderCatalog {
    fn current_album(&self) -> Option<AlbumDescriptor> {
        self.albums.get(self.current).cloned()
    }

    fn track_order(&self, _album: &AlbumDescriptor) -> Vec<String> {
        Vec::new()
    }

    fn next_album(&self, current: &AlbumDescriptor) -> Option<AlbumDescriptor> {
        let position = self.albums.iter().position(|album| album.path == current.path)?;
        self.albums.get((position + 1) % self.albums.len()).cloned()
    }
}
