//! Playback state machine and pipeline lifecycle manager.
//!
//! `PlaybackEngine` owns at most one pipeline. Two locks guard it: the
//! playback lock (session, pipeline, local sink, overlay, tracking) and the
//! playlist lock. When both are needed the playback lock is taken first, and
//! every acquisition is bounded by a timeout from `LockTimeouts`.

pub mod effect;
pub mod poller;
pub mod selector;
mod state;
pub mod tracking;

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::AudioOutput;
use crate::collaborators::{Catalog, CompletionHook, ContentResolver, TrackingSink, WirelessLink};
use crate::config::EngineConfig;
use crate::error::{ConfigError, LockKind, PipelineError, PlaybackError, PlaylistError};
use crate::logging::{OperationTimer, PlaybackLogger};
use crate::models::{
    AlbumDescriptor, AutoPlayMode, Direction, EncryptionHint, PlaybackMode, PlaybackState, SinkKind,
    SinkPreference, TrackPosition,
};
use crate::pipeline::{
    wait_for_prefill, BorrowedSink, CipherKey, LocalSinkResource, OwnedSink, Pipeline, PipelineParams,
    PipelineProbe, PipelineSnapshot, SinkBinding,
};
use crate::queue::PlaylistContext;

pub use effect::EffectOutcome;
pub use poller::PollOutcome;
pub use selector::SinkSelector;
pub use tracking::PlaybackTrackingRecord;

use effect::SoundEffectContext;
use state::{ActiveSession, Session, StateCell};
use tracking::TrackingRecorder;

/// Collaborators the engine consumes
pub struct EngineDeps {
    pub link: Arc<dyn WirelessLink>,
    pub catalog: Arc<dyn Catalog>,
    pub resolver: Arc<dyn ContentResolver>,
    pub tracking: Arc<dyn TrackingSink>,
    pub completion: Arc<dyn CompletionHook>,
}

/// Everything behind the playback lock
pub(crate) struct PlaybackCore {
    session: Session,
    /// The persistent local sink while no pipeline has it registered
    local_sink: Option<LocalSinkResource>,
    effect: Option<SoundEffectContext>,
    tracking: Option<TrackingRecorder>,
}

/// Point-in-time view of the engine for the host UI
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub track: Option<PathBuf>,
    pub sink: Option<SinkKind>,
    pub pipeline: Option<PipelineSnapshot>,
    pub position: Option<Duration>,
    pub effect: Option<PathBuf>,
    pub tracking: Option<PlaybackTrackingRecord>,
}

pub struct PlaybackEngine {
    config: EngineConfig,
    key: CipherKey,
    deps: EngineDeps,
    selector: SinkSelector,
    playback: Mutex<PlaybackCore>,
    playlist: Mutex<PlaylistContext>,
    state: Arc<StateCell>,
    /// Completion view of the installed pipeline, read by the poller without the playback lock
    probe: RwLock<Option<PipelineProbe>>,
    auto_play: AtomicU8,
    skip_auto_advance_once: AtomicBool,
    deferred_link_event: AtomicBool,
    logger: PlaybackLogger,
}

impl PlaybackEngine {
    /// Create the engine around the persistent local output. The output starts muted.
    pub fn new(config: EngineConfig, local_output: Box<dyn AudioOutput>, deps: EngineDeps) -> Result<Self, ConfigError> {
        config.validate()?;
        let key = config.cipher.key()?;
        let logger = PlaybackLogger::new();

        let local_sink = LocalSinkResource::new(local_output);
        local_sink.set_muted(true);
        info!("Playback engine ready, local sink '{}'", local_sink.name());

        let mut playlist = PlaylistContext::new(config.playlist.supported_extensions.clone());
        playlist.set_mode(config.playlist.default_mode);

        Ok(Self {
            selector: SinkSelector::new(Arc::clone(&deps.link)),
            state: Arc::new(StateCell::new(logger.clone())),
            auto_play: AtomicU8::new(config.playlist.auto_play.to_u8()),
            key,
            deps,
            playback: Mutex::new(PlaybackCore {
                session: Session::Stopped,
                local_sink: Some(local_sink),
                effect: None,
                tracking: None,
            }),
            playlist: Mutex::new(playlist),
            probe: RwLock::new(None),
            skip_auto_advance_once: AtomicBool::new(false),
            deferred_link_event: AtomicBool::new(false),
            logger,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &PlaybackLogger {
        &self.logger
    }

    pub fn state(&self) -> PlaybackState {
        self.state.get()
    }

    pub fn is_playing(&self) -> bool {
        self.state.get() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.get() == PlaybackState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state.get() == PlaybackState::Stopped
    }

    pub fn is_stable(&self) -> bool {
        self.state.get().is_stable()
    }

    fn lock_playback(&self, timeout: Duration, operation: &str) -> Result<MutexGuard<'_, PlaybackCore>, PlaybackError> {
        self.playback.try_lock_for(timeout).ok_or_else(|| {
            self.logger.log_lock_contention(LockKind::Playback, operation, timeout);
            PlaybackError::LockTimeout {
                lock: LockKind::Playback,
                waited: timeout,
            }
        })
    }

    fn lock_playlist(&self, timeout: Duration, operation: &str) -> Result<MutexGuard<'_, PlaylistContext>, PlaybackError> {
        self.playlist.try_lock_for(timeout).ok_or_else(|| {
            self.logger.log_lock_contention(LockKind::Playlist, operation, timeout);
            PlaybackError::LockTimeout {
                lock: LockKind::Playlist,
                waited: timeout,
            }
        })
    }

    fn pipeline_params(&self) -> PipelineParams {
        PipelineParams {
            ring_samples: self.config.sink.ring_buffer_samples,
            ack_timeout: self.config.sink.element_ack(),
            key: self.key,
        }
    }

    /// Tear down whatever is playing, then build, run and pre-fill a pipeline for `path`
    pub fn start(&self, path: &Path, preference: SinkPreference) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "start")?;
        self.start_locked(&mut core, path, preference)
    }

    fn start_locked(&self, core: &mut PlaybackCore, path: &Path, preference: SinkPreference) -> Result<(), PlaybackError> {
        let timer = OperationTimer::new("start");
        self.teardown(core, false, "superseded by start");
        self.skip_auto_advance_once.store(false, Ordering::SeqCst);

        if !self.deps.resolver.exists(path) {
            warn!("Cannot start missing track {}", path.display());
            return Err(PlaybackError::FileNotFound { path: path.to_path_buf() });
        }

        let (kind, reason) = self.selector.resolve(preference);
        self.logger.log_sink_selected(kind, reason);
        let encrypted = self.is_encrypted(path)?;

        let binding = self.bind_sink(core, kind)?;
        let mut pipeline = Pipeline::build(path.to_path_buf(), encrypted, binding, &self.pipeline_params());
        if let Err(e) = pipeline.run(Duration::ZERO) {
            self.logger.log_pipeline_error("start", &e);
            self.dismantle(core, pipeline, false);
            return Err(e.into());
        }

        self.prefill(&pipeline, kind);
        match kind {
            SinkKind::Local => {
                thread::sleep(self.config.prefill.local_settle());
                pipeline.set_output_muted(false);
            }
            SinkKind::Wireless => {
                self.deps.link.start_media_flow();
                thread::sleep(self.config.sink.wireless_start_settle());
            }
        }

        *self.probe.write() = Some(pipeline.probe());
        core.tracking = Some(TrackingRecorder::begin(self.deps.resolver.content_id(path), path));
        core.session = Session::Playing(ActiveSession::launch(
            pipeline,
            path.to_path_buf(),
            preference,
            Arc::clone(&self.state),
        ));

        self.logger.log_track_started(path, kind, encrypted, timer.elapsed());
        timer.finish_with_threshold(self.config.prefill.timeout() * 2);
        Ok(())
    }

    /// Content is encrypted unless it lives in a plaintext location or its album says otherwise
    fn is_encrypted(&self, path: &Path) -> Result<bool, PlaybackError> {
        if self.config.cipher.is_plaintext_location(path) {
            return Ok(false);
        }
        let playlist = self.lock_playlist(self.config.locks.playlist(), "start")?;
        Ok(match playlist.album() {
            Some(album) if path.starts_with(&album.path) => album.encryption != EncryptionHint::Plain,
            _ => true,
        })
    }

    fn bind_sink(&self, core: &mut PlaybackCore, kind: SinkKind) -> Result<SinkBinding, PlaybackError> {
        match kind {
            SinkKind::Local => {
                let resource = core.local_sink.take().ok_or_else(|| {
                    PlaybackError::PipelineInitFailed(PipelineError::SinkUnavailable(
                        "local sink is still registered".to_string(),
                    ))
                })?;
                resource.set_muted(true);
                Ok(SinkBinding::Local(BorrowedSink::register(resource)))
            }
            SinkKind::Wireless => {
                let output = self.deps.link.open_stream().map_err(|e| {
                    self.logger.log_pipeline_error("open wireless stream", &e);
                    PlaybackError::PipelineInitFailed(e)
                })?;
                Ok(SinkBinding::Wireless(OwnedSink::new(output)))
            }
        }
    }

    /// Wait for the buffer target. A timeout is logged and otherwise ignored.
    fn prefill(&self, pipeline: &Pipeline, kind: SinkKind) {
        let started = Instant::now();
        match wait_for_prefill(pipeline, kind, &self.config.prefill) {
            Ok(outcome) => debug!("Pre-fill finished: {:?}", outcome),
            Err(PlaybackError::BufferPrefillTimeout { reached, target }) => {
                self.logger.log_prefill_timeout(reached, target, started.elapsed());
            }
            Err(e) => warn!("Pre-fill failed: {}", e),
        }
    }

    /// Teardown steps 1-6 for a pipeline that is no longer installed in a session
    fn dismantle(&self, core: &mut PlaybackCore, mut pipeline: Pipeline, stop_media_flow: bool) {
        if stop_media_flow && pipeline.sink_kind() == SinkKind::Wireless {
            self.deps.link.stop_media_flow();
            thread::sleep(self.config.sink.wireless_stop_settle());
        }

        if !pipeline.stop() {
            debug!("Pipeline {} forced down", pipeline.id());
        }
        pipeline.terminate();

        let (detached, local) = pipeline.unregister_persistent_sink();
        if let Some(local) = local {
            local.set_muted(true);
            core.local_sink = Some(local);
        }
        detached.destroy();

        *self.probe.write() = None;
    }

    /// Stop the session, if any, and publish `Stopped`. Returns the track that was playing.
    fn teardown(&self, core: &mut PlaybackCore, completed: bool, reason: &str) -> Option<PathBuf> {
        let session = core.session.take();
        let track = session.track().map(Path::to_path_buf);
        let pipeline = session.close()?;

        let started = Instant::now();
        self.dismantle(core, pipeline, true);
        core.effect = None;
        if let Some(recorder) = core.tracking.take() {
            self.deps.tracking.record(recorder.finish(completed));
        }

        self.state.set(PlaybackState::Stopped);
        self.release_deferred_link_event();
        self.logger.log_teardown_finished(reason, started.elapsed());
        track
    }

    /// Idempotent. Tears down from any non-stopped state.
    pub fn stop(&self) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "stop")?;
        if matches!(core.session, Session::Stopped) {
            debug!("Stop ignored, already stopped");
            return Ok(());
        }
        self.skip_auto_advance_once.store(true, Ordering::SeqCst);
        self.teardown(&mut core, false, "stop requested");
        Ok(())
    }

    /// Only acts on `Playing`; from any other state it is a no-op
    pub fn pause(&self) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.control(), "pause")?;
        let session = match core.session.take() {
            Session::Playing(session) => session,
            other => {
                debug!("Pause ignored in state {}", other.state());
                core.session = other;
                return Ok(());
            }
        };

        let pausing = session.begin_pause();
        pausing.pipeline().pause();
        if let Some(recorder) = core.tracking.as_mut() {
            recorder.pause_started();
        }
        core.session = Session::Paused(pausing.finish_pause());

        self.release_deferred_link_event();
        Ok(())
    }

    /// Only acts on `Paused`. A wireless session whose link dropped is stopped instead.
    pub fn resume(&self) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.control(), "resume")?;
        let session = match core.session.take() {
            Session::Paused(session) => session,
            other => {
                debug!("Resume ignored in state {}", other.state());
                core.session = other;
                return Ok(());
            }
        };

        if session.sink_kind() == SinkKind::Wireless && !self.deps.link.is_audio_connected() {
            warn!("Wireless link dropped while paused, stopping instead of resuming");
            core.session = Session::Paused(session);
            self.skip_auto_advance_once.store(true, Ordering::SeqCst);
            self.teardown(&mut core, false, "wireless link lost");
            return Err(PlaybackError::SinkUnavailable);
        }

        let resuming = session.begin_resume();
        resuming.pipeline().resume();
        if core.effect.is_none() {
            if let Some(recorder) = core.tracking.as_mut() {
                recorder.resumed();
            }
        }
        core.session = Session::Playing(resuming.finish_resume());
        Ok(())
    }

    /// Move through the playlist and play the track reached. If the start fails
    /// the playlist stays on the new track and the engine is left stopped.
    pub fn advance(&self, direction: Direction) -> Result<PathBuf, PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "advance")?;
        let preference = core
            .session
            .preference()
            .unwrap_or(self.config.sink.default_preference);

        let outcome = {
            let mut playlist = self.lock_playlist(self.config.locks.playlist(), "advance")?;
            playlist.advance(direction)?
        };

        self.start_locked(&mut core, &outcome.track, preference)?;
        Ok(outcome.track)
    }

    /// Replace the playlist with `album`. Playback is not touched.
    pub fn load_album(&self, album: AlbumDescriptor) -> Result<usize, PlaybackError> {
        let mut playlist = self.lock_playlist(self.config.locks.album(), "load_album")?;
        Ok(playlist.load_album(album, self.deps.catalog.as_ref())?)
    }

    /// Start the playlist's current track
    pub fn play_current(&self, preference: SinkPreference) -> Result<PathBuf, PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "play_current")?;
        let track = {
            let playlist = self.lock_playlist(self.config.locks.playlist(), "play_current")?;
            playlist
                .current_track()
                .map(Path::to_path_buf)
                .ok_or(PlaylistError::Empty)?
        };
        self.start_locked(&mut core, &track, preference)?;
        Ok(track)
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) -> Result<(), PlaybackError> {
        let mut playlist = self.lock_playlist(self.config.locks.playlist(), "set_playback_mode")?;
        playlist.set_mode(mode);
        Ok(())
    }

    pub fn reshuffle(&self) -> Result<(), PlaybackError> {
        let mut playlist = self.lock_playlist(self.config.locks.playlist(), "reshuffle")?;
        playlist.reshuffle();
        Ok(())
    }

    pub fn set_auto_play_mode(&self, mode: AutoPlayMode) {
        info!("Auto-play mode set to {:?}", mode);
        self.auto_play.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn auto_play_mode(&self) -> AutoPlayMode {
        AutoPlayMode::from_u8(self.auto_play.load(Ordering::SeqCst))
    }

    /// 1-based position in the playlist, `None` without an album or on lock contention
    pub fn current_track_display_position(&self) -> Option<TrackPosition> {
        let playlist = self.playlist.try_lock_for(self.config.locks.playlist())?;
        playlist.display_position()
    }

    /// Called by the wireless link when it held back a connection event
    /// because audio was playing. Released at the next pause, stop or completion.
    pub fn notify_deferred_link_event(&self) -> Result<(), PlaybackError> {
        let core = self.lock_playback(self.config.locks.control(), "notify_deferred_link_event")?;
        if matches!(core.session, Session::Playing(_)) {
            debug!("Deferring wireless link event until playback pauses");
            self.deferred_link_event.store(true, Ordering::SeqCst);
        } else {
            self.deps.link.release_deferred_event();
        }
        Ok(())
    }

    fn release_deferred_link_event(&self) {
        if self.deferred_link_event.swap(false, Ordering::SeqCst) {
            debug!("Releasing deferred wireless link event");
            self.deps.link.release_deferred_event();
        }
    }

    pub fn status(&self) -> Result<EngineStatus, PlaybackError> {
        let core = self.lock_playback(self.config.locks.control(), "status")?;
        let pipeline = core.session.pipeline();
        Ok(EngineStatus {
            state: core.session.state(),
            track: core.session.track().map(Path::to_path_buf),
            sink: pipeline.map(Pipeline::sink_kind),
            pipeline: pipeline.map(Pipeline::snapshot),
            position: pipeline.map(Pipeline::position),
            effect: core.effect.as_ref().map(|effect| effect.effect_path().to_path_buf()),
            tracking: core.tracking.as_ref().map(TrackingRecorder::snapshot),
        })
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if let Some(mut pipeline) = self.playback.get_mut().session.take().close() {
            pipeline.terminate();
            let (detached, _) = pipeline.unregister_persistent_sink();
            detached.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::PlaybackEventType;
    use crate::testing::{MemoryOutput, SimulatedLink, StaticCatalog, TestRig};
    use std::sync::Barrier;

    fn blocked_rig() -> TestRig {
        TestRig::build(
            MemoryOutput::with_capacity(1024),
            SimulatedLink::with_stream_capacity(false, 1024),
            StaticCatalog::default(),
            None,
        )
    }

    #[test]
    fn test_start_with_wireless_down_plays_locally() {
        let rig = TestRig::new();
        let track = rig.track("track1.wav", 16_000);

        rig.engine.start(&track, SinkPreference::Auto).unwrap();

        assert!(rig.engine.is_playing());
        let status = rig.engine.status().unwrap();
        assert_eq!(status.sink, Some(SinkKind::Local));
        assert_eq!(status.track.as_deref(), Some(track.as_path()));
        let record = status.tracking.unwrap();
        assert!(!record.completed);
        assert_eq!(record.content_id, "plain/track1.wav");
        assert!(!rig.local.muted());
        assert_eq!(rig.local.mute_history().last(), Some(&false));
        assert_eq!(rig.local.mute_history().first(), Some(&true));
        assert_eq!(rig.link.count("open_stream"), 0);

        rig.engine.stop().unwrap();
    }

    #[test]
    fn test_start_missing_file_leaves_stopped() {
        let rig = TestRig::new();
        let track = rig.track("ok.wav", 16_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();

        let missing = rig.dir.path().join("plain/missing.wav");
        let result = rig.engine.start(&missing, SinkPreference::Local);
        assert!(matches!(result, Err(PlaybackError::FileNotFound { .. })));
        assert!(rig.engine.is_stopped());
        assert!(rig.engine.status().unwrap().pipeline.is_none());
        assert_eq!(rig.tracking.records().len(), 1);
    }

    #[test]
    fn test_undecodable_file_fails_init_and_returns_local_sink() {
        let rig = TestRig::new();
        let bogus = rig.dir.path().join("plain/bogus.wav");
        std::fs::write(&bogus, b"not audio at all").unwrap();

        let result = rig.engine.start(&bogus, SinkPreference::Local);
        assert!(matches!(result, Err(PlaybackError::PipelineInitFailed(_))));
        assert!(rig.engine.is_stopped());
        assert!(rig.local.muted());

        let track = rig.track("good.wav", 16_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        assert!(rig.engine.is_playing());
        assert_eq!(rig.engine.logger().count_events(PlaybackEventType::PipelineError), 1);
    }

    #[test]
    fn test_encrypted_content_uses_cipher() {
        let rig = TestRig::new();
        let locked = crate::testing::write_wav(&rig.dir.path().join("locked"), "story.wav", 8000, 8000, Some(&rig.key()));

        rig.engine.start(&locked, SinkPreference::Local).unwrap();
        let snapshot = rig.engine.status().unwrap().pipeline.unwrap();
        assert!(snapshot.cipher.is_some());
        rig.engine.stop().unwrap();

        let plain = rig.track("plain.wav", 8000);
        rig.engine.start(&plain, SinkPreference::Local).unwrap();
        assert!(rig.engine.status().unwrap().pipeline.unwrap().cipher.is_none());
    }

    fn plain_album(rig: &TestRig) -> (AlbumDescriptor, PathBuf) {
        let dir = rig.dir.path().join("stories");
        std::fs::create_dir(&dir).unwrap();
        let track = crate::testing::write_wav(&dir, "01.wav", 8000, 8000, None);
        let album = AlbumDescriptor::folder(&dir, "sku-plain").with_encryption(EncryptionHint::Plain);
        (album, track)
    }

    #[test]
    fn test_plain_album_skips_cipher() {
        let rig = TestRig::new();
        let (album, track) = plain_album(&rig);
        rig.engine.load_album(album).unwrap();

        rig.engine.start(&track, SinkPreference::Local).unwrap();
        assert!(rig.engine.status().unwrap().pipeline.unwrap().cipher.is_none());
        rig.engine.stop().unwrap();

        let locked = crate::testing::write_wav(&rig.dir.path().join("locked"), "other.wav", 8000, 8000, Some(&rig.key()));
        rig.engine.start(&locked, SinkPreference::Local).unwrap();
        assert!(rig.engine.status().unwrap().pipeline.unwrap().cipher.is_some());
    }

    #[test]
    fn test_start_fails_closed_when_playlist_lock_held() {
        let rig = TestRig::new();
        let (album, track) = plain_album(&rig);
        rig.engine.load_album(album).unwrap();

        let guard = rig.engine.playlist.lock();
        let result = rig.engine.start(&track, SinkPreference::Local);
        drop(guard);

        assert!(matches!(
            result,
            Err(PlaybackError::LockTimeout {
                lock: LockKind::Playlist,
                ..
            })
        ));
        assert!(rig.engine.is_stopped());
        assert!(rig.engine.status().unwrap().pipeline.is_none());
        assert!(rig.local.muted());

        rig.engine.start(&track, SinkPreference::Local).unwrap();
        assert!(rig.engine.is_playing());
    }

    #[test]
    fn test_stop_is_idempotent_and_clears_pipeline() {
        let rig = TestRig::new();
        rig.engine.stop().unwrap();
        assert!(rig.engine.is_stopped());
        assert!(rig.tracking.records().is_empty());

        let track = rig.track("a.wav", 16_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        rig.engine.stop().unwrap();
        rig.engine.stop().unwrap();

        assert!(rig.engine.is_stopped());
        let status = rig.engine.status().unwrap();
        assert!(status.pipeline.is_none());
        assert!(status.tracking.is_none());
        assert_eq!(rig.tracking.records().len(), 1);
        assert!(!rig.tracking.records()[0].completed);
        assert!(rig.local.muted());
    }

    #[test]
    fn test_pause_while_stopped_is_noop() {
        let rig = TestRig::new();
        assert!(rig.engine.pause().is_ok());
        assert!(rig.engine.is_stopped());
        assert!(rig.engine.resume().is_ok());
        assert!(rig.engine.is_stopped());
    }

    #[test]
    fn test_pause_resume_keeps_pipeline_identity() {
        let rig = blocked_rig();
        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        let before = rig.engine.status().unwrap().pipeline.unwrap();

        rig.engine.pause().unwrap();
        assert!(rig.engine.is_paused());
        assert!(rig.engine.status().unwrap().tracking.unwrap().pause_started_at.is_some());

        rig.engine.resume().unwrap();
        assert!(rig.engine.is_playing());
        assert_eq!(rig.engine.status().unwrap().pipeline.unwrap(), before);

        let records = rig.engine.logger().get_recent_events(1000);
        let transitions: Vec<_> = records
            .iter()
            .filter(|e| e.event_type == PlaybackEventType::StateChanged)
            .map(|e| e.details.clone())
            .collect();
        assert_eq!(
            transitions,
            vec![
                "stopped -> playing",
                "playing -> pausing",
                "pausing -> paused",
                "paused -> resuming",
                "resuming -> playing",
            ]
        );
    }

    #[test]
    fn test_resume_onto_dropped_wireless_link_stops() {
        let rig = TestRig::build(
            MemoryOutput::new(),
            SimulatedLink::with_stream_capacity(true, 1024),
            StaticCatalog::default(),
            None,
        );
        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Auto).unwrap();
        assert_eq!(rig.engine.status().unwrap().sink, Some(SinkKind::Wireless));
        assert_eq!(rig.link.count("start_media_flow"), 1);

        rig.engine.pause().unwrap();
        rig.link.set_connected(false);

        let result = rig.engine.resume();
        assert!(matches!(result, Err(PlaybackError::SinkUnavailable)));
        assert!(rig.engine.is_stopped());
        assert!(rig.engine.status().unwrap().pipeline.is_none());
    }

    #[test]
    fn test_wireless_teardown_stops_media_flow_first() {
        let rig = TestRig::build(
            MemoryOutput::new(),
            SimulatedLink::with_stream_capacity(true, 1024),
            StaticCatalog::default(),
            None,
        );
        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Wireless).unwrap();
        assert_eq!(rig.link.streams().len(), 1);
        assert!(rig.local.muted());

        rig.link.set_connected(false);
        assert_eq!(rig.engine.status().unwrap().sink, Some(SinkKind::Wireless));

        rig.engine.stop().unwrap();
        assert_eq!(rig.link.calls(), vec!["open_stream", "start_media_flow", "stop_media_flow"]);

        let local_track = rig.track("local.wav", 16_000);
        rig.engine.start(&local_track, SinkPreference::Local).unwrap();
        assert_eq!(rig.engine.status().unwrap().sink, Some(SinkKind::Local));
    }

    #[test]
    fn test_wireless_start_without_link_fails_init() {
        let rig = TestRig::new();
        let track = rig.track("a.wav", 8000);
        let result = rig.engine.start(&track, SinkPreference::Wireless);
        assert!(matches!(result, Err(PlaybackError::PipelineInitFailed(_))));
        assert!(rig.engine.is_stopped());
    }

    #[test]
    fn test_concurrent_starts_last_request_wins() {
        let rig = Arc::new(blocked_rig());
        let first = rig.track("first.wav", 80_000);
        let second = rig.track("second.wav", 80_000);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|track| {
                let rig = Arc::clone(&rig);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    rig.engine.start(&track, SinkPreference::Local)
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert!(rig.engine.is_playing());
        let status = rig.engine.status().unwrap();
        let current = status.track.unwrap();
        assert!(current == first || current == second);
        assert_eq!(rig.tracking.records().len(), 1);
        assert_ne!(rig.tracking.records()[0].track, current);
    }

    #[test]
    fn test_lock_timeout_when_playback_lock_held() {
        let rig = TestRig::new();
        let _guard = rig.engine.playback.lock();

        let result = rig.engine.pause();
        assert!(matches!(
            result,
            Err(PlaybackError::LockTimeout {
                lock: LockKind::Playback,
                ..
            })
        ));
        assert_eq!(rig.engine.logger().count_events(PlaybackEventType::LockContention), 1);
    }

    #[test]
    fn test_state_is_stable_after_every_call() {
        let rig = blocked_rig();
        let track = rig.track("long.wav", 80_000);

        rig.engine.start(&track, SinkPreference::Local).unwrap();
        assert!(rig.engine.is_stable());
        rig.engine.pause().unwrap();
        assert!(rig.engine.is_stable());
        rig.engine.pause().unwrap();
        assert!(rig.engine.is_paused());
        rig.engine.resume().unwrap();
        assert!(rig.engine.is_stable());
        rig.engine.stop().unwrap();
        assert!(rig.engine.is_stable());
    }

    #[test]
    fn test_advance_plays_next_track() {
        let rig = blocked_rig();
        let album = rig.dir.path().join("plain");
        let first = rig.track("01.wav", 80_000);
        let second = rig.track("02.wav", 80_000);

        assert_eq!(rig.engine.load_album(AlbumDescriptor::folder(&album, "sku")).unwrap(), 2);
        assert_eq!(rig.engine.play_current(SinkPreference::Local).unwrap(), first);
        assert_eq!(rig.engine.current_track_display_position().unwrap().to_string(), "1/2");

        assert_eq!(rig.engine.advance(Direction::Forward).unwrap(), second);
        assert!(rig.engine.is_playing());
        assert_eq!(rig.engine.current_track_display_position().unwrap().to_string(), "2/2");

        assert_eq!(rig.engine.advance(Direction::Forward).unwrap(), first);
    }

    #[test]
    fn test_deferred_link_event_released_on_pause() {
        let rig = blocked_rig();
        rig.engine.notify_deferred_link_event().unwrap();
        assert_eq!(rig.link.released_events(), 1);

        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        rig.engine.notify_deferred_link_event().unwrap();
        assert_eq!(rig.link.released_events(), 1);

        rig.engine.pause().unwrap();
        assert_eq!(rig.link.released_events(), 2);
        rig.engine.stop().unwrap();
        assert_eq!(rig.link.released_events(), 2);
    }

    #[test]
    fn test_deferred_link_event_checked_under_playback_lock() {
        let rig = blocked_rig();
        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();

        let guard = rig.engine.playback.lock();
        assert!(matches!(
            rig.engine.notify_deferred_link_event(),
            Err(PlaybackError::LockTimeout {
                lock: LockKind::Playback,
                ..
            })
        ));
        drop(guard);

        rig.engine.pause().unwrap();
        assert_eq!(rig.link.released_events(), 0);
        rig.engine.notify_deferred_link_event().unwrap();
        assert_eq!(rig.link.released_events(), 1);
        rig.engine.stop().unwrap();
        assert_eq!(rig.link.released_events(), 1);
    }

    #[test]
    fn test_auto_play_mode_roundtrip() {
        let rig = TestRig::new();
        assert_eq!(rig.engine.auto_play_mode(), AutoPlayMode::Off);
        rig.engine.set_auto_play_mode(AutoPlayMode::CycleAll);
        assert_eq!(rig.engine.auto_play_mode(), AutoPlayMode::CycleAll);
    }
}
