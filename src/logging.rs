use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::LockKind;
use crate::models::{PlaybackState, SinkKind};

/// Playback event kept in the in-memory history
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: PlaybackEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEventType {
    StateChanged,
    TrackStarted,
    TrackCompleted,
    SinkSelected,
    EffectStarted,
    EffectRestored,
    PrefillTimeout,
    LockContention,
    PipelineError,
    TeardownFinished,
}

impl PlaybackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackEventType::StateChanged => "STATE_CHANGED",
            PlaybackEventType::TrackStarted => "TRACK_STARTED",
            PlaybackEventType::TrackCompleted => "TRACK_COMPLETED",
            PlaybackEventType::SinkSelected => "SINK_SELECTED",
            PlaybackEventType::EffectStarted => "EFFECT_STARTED",
            PlaybackEventType::EffectRestored => "EFFECT_RESTORED",
            PlaybackEventType::PrefillTimeout => "PREFILL_TIMEOUT",
            PlaybackEventType::LockContention => "LOCK_CONTENTION",
            PlaybackEventType::PipelineError => "PIPELINE_ERROR",
            PlaybackEventType::TeardownFinished => "TEARDOWN_FINISHED",
        }
    }
}

/// Structured logger for the playback engine with a bounded event history
#[derive(Clone)]
pub struct PlaybackLogger {
    events: Arc<Mutex<VecDeque<PlaybackEvent>>>,
    max_events: usize,
}

impl Default for PlaybackLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackLogger {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: 1000,
        }
    }

    /// Initialize the global logger. Level comes from `STORYBOX_LOG_LEVEL`, default info.
    pub fn init() -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var("STORYBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut builder = env_logger::Builder::new();

        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });

        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Storybox playback logging initialized with level: {}", log_level);
        Ok(())
    }

    pub fn log_event(&self, event_type: PlaybackEventType, details: String, duration: Option<Duration>) {
        match event_type {
            PlaybackEventType::StateChanged | PlaybackEventType::SinkSelected => {
                debug!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::TrackStarted
            | PlaybackEventType::TrackCompleted
            | PlaybackEventType::EffectStarted
            | PlaybackEventType::EffectRestored => {
                info!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::TeardownFinished => {
                debug!("[{}] {} (took: {:?})", event_type.as_str(), details, duration);
            }
            PlaybackEventType::PrefillTimeout | PlaybackEventType::LockContention => {
                warn!("[{}] {}", event_type.as_str(), details);
            }
            PlaybackEventType::PipelineError => {
                error!("[{}] {}", event_type.as_str(), details);
            }
        }

        let mut events = self.events.lock();
        events.push_back(PlaybackEvent {
            timestamp: Utc::now(),
            event_type,
            duration,
            details,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    pub fn log_state_changed(&self, from: PlaybackState, to: PlaybackState) {
        self.log_event(PlaybackEventType::StateChanged, format!("{} -> {}", from, to), None);
    }

    pub fn log_track_started(&self, track: &Path, sink: SinkKind, encrypted: bool, start_time: Duration) {
        self.log_event(
            PlaybackEventType::TrackStarted,
            format!(
                "Playing '{}' on {} sink{}",
                track.display(),
                sink,
                if encrypted { " (encrypted)" } else { "" }
            ),
            Some(start_time),
        );
    }

    pub fn log_track_completed(&self, track: &Path) {
        self.log_event(PlaybackEventType::TrackCompleted, format!("Finished '{}'", track.display()), None);
    }

    pub fn log_sink_selected(&self, sink: SinkKind, reason: &str) {
        self.log_event(PlaybackEventType::SinkSelected, format!("{} sink ({})", sink, reason), None);
    }

    pub fn log_effect_started(&self, effect: &Path, interrupted: Option<&Path>) {
        let details = match interrupted {
            Some(track) => format!("Effect '{}' interrupting '{}'", effect.display(), track.display()),
            None => format!("Effect '{}' while stopped", effect.display()),
        };
        self.log_event(PlaybackEventType::EffectStarted, details, None);
    }

    pub fn log_effect_restored(&self, track: &Path, position: Duration, paused: bool) {
        self.log_event(
            PlaybackEventType::EffectRestored,
            format!(
                "Restored '{}' at {:.2}s{}",
                track.display(),
                position.as_secs_f64(),
                if paused { " (paused)" } else { "" }
            ),
            None,
        );
    }

    pub fn log_prefill_timeout(&self, reached: f32, target: f32, waited: Duration) {
        self.log_event(
            PlaybackEventType::PrefillTimeout,
            format!(
                "Buffer reached {:.1}% of {:.1}% target, starting anyway",
                reached * 100.0,
                target * 100.0
            ),
            Some(waited),
        );
    }

    pub fn log_lock_contention(&self, lock: LockKind, operation: &str, waited: Duration) {
        self.log_event(
            PlaybackEventType::LockContention,
            format!("{} gave up on the {} lock", operation, lock),
            Some(waited),
        );
    }

    pub fn log_pipeline_error(&self, context: &str, error: &dyn std::error::Error) {
        self.log_event(PlaybackEventType::PipelineError, format!("{}: {}", context, error), None);
    }

    pub fn log_teardown_finished(&self, reason: &str, took: Duration) {
        self.log_event(PlaybackEventType::TeardownFinished, format!("Teardown ({})", reason), Some(took));
    }

    pub fn get_recent_events(&self, count: usize) -> Vec<PlaybackEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn count_events(&self, event_type: PlaybackEventType) -> usize {
        self.events.lock().iter().filter(|e| e.event_type == event_type).count()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation_name: &'static str,
}

impl OperationTimer {
    pub fn new(operation_name: &'static str) -> Self {
        trace!("Starting operation: {}", operation_name);
        Self {
            start_time: Instant::now(),
            operation_name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            warn!(
                "Operation '{}' took {}ms (threshold: {}ms)",
                self.operation_name,
                duration.as_millis(),
                threshold.as_millis()
            );
        } else {
            trace!("Completed operation '{}' in {}ms", self.operation_name, duration.as_millis());
        }
        duration
    }
}
