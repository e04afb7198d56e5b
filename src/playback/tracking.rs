use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Listening record handed to the analytics collaborator when a track stops or completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackTrackingRecord {
    pub content_id: String,
    pub track: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Wall-clock time from start to finalization
    pub elapsed: Duration,
    pub paused_total: Duration,
    /// Set while paused
    pub pause_started_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl PlaybackTrackingRecord {
    /// Time audio was actually playing
    pub fn played(&self) -> Duration {
        self.elapsed.saturating_sub(self.paused_total)
    }
}

/// Accumulates the record for the current track
pub(crate) struct TrackingRecorder {
    record: PlaybackTrackingRecord,
    started: Instant,
    paused_since: Option<Instant>,
}

impl TrackingRecorder {
    pub fn begin(content_id: String, track: &Path) -> Self {
        Self {
            record: PlaybackTrackingRecord {
                content_id,
                track: track.to_path_buf(),
                started_at: Utc::now(),
                elapsed: Duration::ZERO,
                paused_total: Duration::ZERO,
                pause_started_at: None,
                completed: false,
            },
            started: Instant::now(),
            paused_since: None,
        }
    }

    pub fn pause_started(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
            self.record.pause_started_at = Some(Utc::now());
        }
    }

    pub fn resumed(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.record.paused_total += since.elapsed();
            self.record.pause_started_at = None;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_since.is_some()
    }

    /// Current view of the record, with elapsed time up to now
    pub fn snapshot(&self) -> PlaybackTrackingRecord {
        let mut record = self.record.clone();
        record.elapsed = self.started.elapsed();
        if let Some(since) = self.paused_since {
            record.paused_total += since.elapsed();
        }
        record
    }

    pub fn finish(mut self, completed: bool) -> PlaybackTrackingRecord {
        self.resumed();
        self.record.elapsed = self.started.elapsed();
        self.record.completed = completed;
        self.record
    }
}
