//! Track sequence of the loaded album, in folder order or shuffled.

pub mod shuffle;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};

use crate::collaborators::Catalog;
use crate::error::PlaylistError;
use crate::models::{AlbumDescriptor, AlbumKind, Direction, PlaybackMode, TrackPosition};

pub use shuffle::ShuffleOrder;
use shuffle::step_index;

/// Result of moving through the sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    pub index: usize,
    pub track: PathBuf,
    /// The move crossed the end (or start) of the sequence
    pub wrapped: bool,
}

/// Ordered track list of one album with a current index and an optional
/// shuffle order. While an order is present, `index == order[cursor]`.
pub struct PlaylistContext {
    album: Option<AlbumDescriptor>,
    tracks: Vec<PathBuf>,
    index: usize,
    mode: PlaybackMode,
    shuffle: Option<ShuffleOrder>,
    rng: StdRng,
    extensions: Vec<String>,
}

impl PlaylistContext {
    pub fn new(extensions: Vec<String>) -> Self {
        Self::with_rng(extensions, StdRng::from_entropy())
    }

    /// Deterministic shuffles
    pub fn with_seed(extensions: Vec<String>, seed: u64) -> Self {
        Self::with_rng(extensions, StdRng::seed_from_u64(seed))
    }

    fn with_rng(extensions: Vec<String>, rng: StdRng) -> Self {
        Self {
            album: None,
            tracks: Vec::new(),
            index: 0,
            mode: PlaybackMode::Sequential,
            shuffle: None,
            rng,
            extensions: extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    /// Replace the sequence with the tracks of `album` and make the first track current
    pub fn load_album(&mut self, album: AlbumDescriptor, catalog: &dyn Catalog) -> Result<usize, PlaylistError> {
        let tracks = match album.kind {
            AlbumKind::Folder => self.scan_folder(&album.path)?,
            AlbumKind::Catalog => self.catalog_tracks(&album, catalog),
        };
        if tracks.is_empty() {
            return Err(PlaylistError::EmptyAlbum { path: album.path });
        }

        info!("Loaded album '{}' with {} tracks", album.sku, tracks.len());
        self.tracks = tracks;
        self.album = Some(album);
        self.index = 0;
        self.shuffle = None;
        if self.mode == PlaybackMode::Shuffle {
            self.shuffle = Some(ShuffleOrder::generate(self.tracks.len(), None, &mut self.rng));
            self.index = self.shuffle.as_ref().and_then(ShuffleOrder::current).unwrap_or(0);
        }
        Ok(self.tracks.len())
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Supported files directly inside `dir`, sorted by path
    fn scan_folder(&self, dir: &Path) -> Result<Vec<PathBuf>, PlaylistError> {
        let entries = fs::read_dir(dir).map_err(|source| PlaylistError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut tracks = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PlaylistError::Scan {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && self.is_supported(&path) {
                tracks.push(path);
            }
        }

        tracks.sort();
        Ok(tracks)
    }

    /// Tracks named by the catalog, in catalog order. Missing files are skipped.
    fn catalog_tracks(&self, album: &AlbumDescriptor, catalog: &dyn Catalog) -> Vec<PathBuf> {
        catalog
            .track_order(album)
            .into_iter()
            .map(|name| album.path.join(name))
            .filter(|path| {
                let keep = path.is_file() && self.is_supported(path);
                if !keep {
                    warn!("Skipping catalog entry {}", path.display());
                }
                keep
            })
            .collect()
    }

    pub fn album(&self) -> Option<&AlbumDescriptor> {
        self.album.as_ref()
    }

    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_track(&self) -> Option<&Path> {
        self.tracks.get(self.index).map(PathBuf::as_path)
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn shuffle_order(&self) -> Option<&ShuffleOrder> {
        self.shuffle.as_ref()
    }

    /// Move one track in `direction`, wrapping at either end
    pub fn advance(&mut self, direction: Direction) -> Result<AdvanceOutcome, PlaylistError> {
        if self.tracks.is_empty() {
            return Err(PlaylistError::Empty);
        }

        let (index, wrapped) = match self.shuffle.as_mut() {
            Some(order) => order.step(direction).ok_or(PlaylistError::Empty)?,
            None => step_index(self.index, self.tracks.len(), direction),
        };
        self.index = index;

        debug!("Advanced {:?} to track {} (wrapped: {})", direction, index, wrapped);
        Ok(AdvanceOutcome {
            index,
            track: self.tracks[index].clone(),
            wrapped,
        })
    }

    pub fn jump_to(&mut self, index: usize) -> Result<&Path, PlaylistError> {
        if index >= self.tracks.len() {
            return Err(PlaylistError::InvalidIndex { index });
        }
        self.index = index;
        if let Some(order) = self.shuffle.as_mut() {
            order.seek(index);
        }
        Ok(&self.tracks[index])
    }

    /// New permutation with the current track kept current
    pub fn reshuffle(&mut self) {
        if self.mode != PlaybackMode::Shuffle {
            return;
        }
        self.shuffle = Some(ShuffleOrder::generate(self.tracks.len(), Some(self.index), &mut self.rng));
    }

    pub fn set_mode(&mut self, mode: PlaybackMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.shuffle = match mode {
            PlaybackMode::Shuffle => Some(ShuffleOrder::generate(self.tracks.len(), Some(self.index), &mut self.rng)),
            PlaybackMode::Sequential => None,
        };
        info!("Playback mode set to {:?}", mode);
    }

    /// One-based position in listening order
    pub fn display_position(&self) -> Option<TrackPosition> {
        if self.tracks.is_empty() {
            return None;
        }
        let index = match &self.shuffle {
            Some(order) => order.cursor(),
            None => self.index,
        };
        Some(TrackPosition {
            index: index + 1,
            total: self.tracks.len(),
        })
    }
}
