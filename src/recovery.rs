use log::{info, warn};
use std::collections::HashMap;

use crate::error::{PipelineError, PlaybackError, PlayerError, PlaylistError};

/// What the host should do after a failed playback command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult {
    /// Nothing to do, playback can continue as is
    Success(String),
    /// Repeat the same command
    Retry(String),
    /// Move on to the next track
    SkipTrack(String),
    Failed(String),
}

/// Maps playback errors to recovery actions, bounding repeated attempts per error kind
pub struct RecoveryManager {
    recovery_attempts: HashMap<&'static str, u32>,
    max_recovery_attempts: u32,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self {
            recovery_attempts: HashMap::new(),
            max_recovery_attempts: 3,
        }
    }

    pub fn attempt_recovery(&mut self, error: &PlayerError) -> RecoveryResult {
        let error_key = error_key(error);
        let attempts = self.recovery_attempts.get(error_key).copied().unwrap_or(0) + 1;

        if attempts > self.max_recovery_attempts {
            warn!(
                "Maximum recovery attempts ({}) exceeded for error: {}",
                self.max_recovery_attempts, error
            );
            return RecoveryResult::Failed("Maximum recovery attempts exceeded".to_string());
        }

        self.recovery_attempts.insert(error_key, attempts);
        info!("Attempting recovery for error (attempt {}): {}", attempts, error);

        let result = match error {
            PlayerError::Playback(err) => recover_playback_error(err),
            PlayerError::Pipeline(err) => recover_pipeline_error(err),
            PlayerError::Playlist(err) => recover_playlist_error(err),
            PlayerError::Config(_) => RecoveryResult::Success("Using default configuration settings".to_string()),
            PlayerError::File(_) => RecoveryResult::Failed("File errors require manual intervention".to_string()),
        };

        match &result {
            RecoveryResult::Success(msg) => {
                info!("Recovery successful: {}", msg);
                self.recovery_attempts.remove(error_key);
            }
            RecoveryResult::Retry(msg) | RecoveryResult::SkipTrack(msg) => {
                info!("Recovery action: {}", msg);
            }
            RecoveryResult::Failed(msg) => {
                warn!("Recovery failed: {}", msg);
            }
        }

        result
    }

    /// Forget previous attempts, called once playback is healthy again
    pub fn reset(&mut self) {
        self.recovery_attempts.clear();
    }

    pub fn attempts_for(&self, error: &PlayerError) -> u32 {
        self.recovery_attempts.get(error_key(error)).copied().unwrap_or(0)
    }
}

fn recover_playback_error(error: &PlaybackError) -> RecoveryResult {
    match error {
        PlaybackError::LockTimeout { .. } => RecoveryResult::Retry("Engine was busy, retrying".to_string()),
        PlaybackError::FileNotFound { path } => {
            RecoveryResult::SkipTrack(format!("'{}' is missing, skipping to the next track", path.display()))
        }
        PlaybackError::PipelineInitFailed(err) => recover_pipeline_error(err),
        PlaybackError::SinkUnavailable => {
            RecoveryResult::Failed("Wireless sink disconnected, waiting for user action".to_string())
        }
        PlaybackError::BufferPrefillTimeout { .. } => {
            RecoveryResult::Success("Playback started with a partially filled buffer".to_string())
        }
        PlaybackError::Playlist(err) => recover_playlist_error(err),
    }
}

fn recover_pipeline_error(error: &PipelineError) -> RecoveryResult {
    match error {
        PipelineError::ReaderOpen { .. } | PipelineError::UnsupportedFormat(_) | PipelineError::DecoderInit(_) => {
            RecoveryResult::SkipTrack("Track cannot be decoded, skipping to the next track".to_string())
        }
        PipelineError::SinkUnavailable(_) | PipelineError::Output(_) | PipelineError::TaskSpawn(_) => {
            RecoveryResult::Retry("Audio output failed, retrying".to_string())
        }
        PipelineError::StillRunning => RecoveryResult::Retry("Pipeline was busy, retrying".to_string()),
    }
}

fn recover_playlist_error(error: &PlaylistError) -> RecoveryResult {
    match error {
        PlaylistError::NoAlbum | PlaylistError::Empty | PlaylistError::EmptyAlbum { .. } => {
            RecoveryResult::Failed(error.user_message())
        }
        PlaylistError::Scan { .. } => RecoveryResult::Failed("Album folder is unreadable".to_string()),
        PlaylistError::InvalidIndex { .. } => {
            RecoveryResult::Retry("Invalid track index, resetting to the first track".to_string())
        }
    }
}

fn error_key(error: &PlayerError) -> &'static str {
    match error {
        PlayerError::Playback(PlaybackError::LockTimeout { .. }) => "playback_lock_timeout",
        PlayerError::Playback(PlaybackError::FileNotFound { .. }) => "playback_file_not_found",
        PlayerError::Playback(PlaybackError::PipelineInitFailed(_)) => "playback_pipeline_init",
        PlayerError::Playback(PlaybackError::SinkUnavailable) => "playback_sink_unavailable",
        PlayerError::Playback(PlaybackError::BufferPrefillTimeout { .. }) => "playback_prefill_timeout",
        PlayerError::Playback(PlaybackError::Playlist(_)) | PlayerError::Playlist(_) => "playlist",
        PlayerError::Pipeline(_) => "pipeline",
        PlayerError::Config(_) => "config",
        PlayerError::File(_) => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockKind;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_missing_file_skips_track() {
        let mut manager = RecoveryManager::new();
        let error = PlayerError::from(PlaybackError::FileNotFound {
            path: PathBuf::from("/sdcard/albums/a/02.mp3"),
        });

        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::SkipTrack(_)));
        assert_eq!(manager.attempts_for(&error), 1);
    }

    #[test]
    fn test_prefill_timeout_is_success_and_clears_attempts() {
        let mut manager = RecoveryManager::new();
        let error = PlayerError::from(PlaybackError::BufferPrefillTimeout { reached: 0.3, target: 0.75 });

        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::Success(_)));
        assert_eq!(manager.attempts_for(&error), 0);
    }

    #[test]
    fn test_max_recovery_attempts() {
        let mut manager = RecoveryManager::new();
        let error = PlayerError::from(PlaybackError::LockTimeout {
            lock: LockKind::Playback,
            waited: Duration::from_millis(300),
        });

        for _ in 0..3 {
            assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::Retry(_)));
        }
        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::Failed(_)));

        manager.reset();
        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::Retry(_)));
    }

    #[test]
    fn test_decoder_failure_skips_track() {
        let mut manager = RecoveryManager::new();
        let error = PlayerError::from(PlaybackError::PipelineInitFailed(PipelineError::UnsupportedFormat(
            "no audio track".to_string(),
        )));
        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::SkipTrack(_)));
    }

    #[test]
    fn test_empty_playlist_fails() {
        let mut manager = RecoveryManager::new();
        let error = PlayerError::from(PlaylistError::Empty);
        assert!(matches!(manager.attempt_recovery(&error), RecoveryResult::Failed(_)));
    }
}
