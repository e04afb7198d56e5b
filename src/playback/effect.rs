//! Sound-effect overlay. A short system sound borrows the installed pipeline
//! and the interrupted track is restored when it finishes.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::state::{ActiveSession, Playing, Session};
use super::{PlaybackCore, PlaybackEngine};
use crate::error::PlaybackError;
use crate::models::{SinkKind, SinkPreference};
use crate::pipeline::Pipeline;

/// Where the interrupted track was when the effect took over
#[derive(Debug, Clone)]
pub(crate) struct SavedTrack {
    pub path: PathBuf,
    pub encrypted: bool,
    pub position: Duration,
}

pub(crate) struct SoundEffectContext {
    effect: PathBuf,
    /// None for a standalone effect played from `Stopped`
    saved: Option<SavedTrack>,
    was_playing_before_effect: bool,
}

impl SoundEffectContext {
    pub fn effect_path(&self) -> &Path {
        &self.effect
    }
}

/// How an overlay ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    /// The interrupted track is back, playing or paused as before
    Restored { track: PathBuf, paused: bool },
    /// A standalone effect finished and the engine is stopped
    Finished,
    /// The wireless link dropped during the effect; playback was stopped instead
    LinkLost,
    NotActive,
}

impl PlaybackEngine {
    /// Play `path` over whatever the engine is doing
    pub fn play_effect(&self, path: &Path) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "play_effect")?;
        if matches!(core.session, Session::Stopped) {
            self.effect_while_stopped(&mut core, path)
        } else {
            self.effect_while_playing(&mut core, path)
        }
    }

    /// Standalone effect on the local sink. Tears down any current session first.
    pub fn play_effect_while_stopped(&self, path: &Path) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "play_effect_while_stopped")?;
        self.effect_while_stopped(&mut core, path)
    }

    /// Interrupt the current track with `path`; falls back to a standalone effect when stopped
    pub fn play_effect_while_playing(&self, path: &Path) -> Result<(), PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "play_effect_while_playing")?;
        self.effect_while_playing(&mut core, path)
    }

    pub fn restore_previous_playback_state(&self) -> Result<EffectOutcome, PlaybackError> {
        let mut core = self.lock_playback(self.config.locks.start(), "restore_previous_playback_state")?;
        self.restore_locked(&mut core)
    }

    pub(super) fn effect_while_stopped(&self, core: &mut PlaybackCore, path: &Path) -> Result<(), PlaybackError> {
        self.teardown(core, false, "standalone effect");
        if !self.deps.resolver.exists(path) {
            return Err(PlaybackError::FileNotFound { path: path.to_path_buf() });
        }

        let binding = self.bind_sink(core, SinkKind::Local)?;
        let mut pipeline = Pipeline::build(path.to_path_buf(), true, binding, &self.pipeline_params());
        pipeline.set_output_muted(false);
        if let Err(e) = pipeline.run(Duration::ZERO) {
            self.logger.log_pipeline_error("effect", &e);
            self.dismantle(core, pipeline, false);
            return Err(e.into());
        }
        thread::sleep(self.config.prefill.effect_prebuffer());

        *self.probe.write() = Some(pipeline.probe());
        core.effect = Some(SoundEffectContext {
            effect: path.to_path_buf(),
            saved: None,
            was_playing_before_effect: false,
        });
        core.session = Session::Playing(ActiveSession::launch(
            pipeline,
            path.to_path_buf(),
            SinkPreference::Local,
            Arc::clone(&self.state),
        ));
        self.skip_auto_advance_once.store(true, Ordering::SeqCst);
        self.logger.log_effect_started(path, None);
        Ok(())
    }

    pub(super) fn effect_while_playing(&self, core: &mut PlaybackCore, path: &Path) -> Result<(), PlaybackError> {
        if !self.deps.resolver.exists(path) {
            return Err(PlaybackError::FileNotFound { path: path.to_path_buf() });
        }

        let (mut session, was_playing) = match core.session.take() {
            Session::Playing(session) => (session, true),
            Session::Paused(session) => (session.begin_resume().finish_resume(), false),
            Session::Stopped => return self.effect_while_stopped(core, path),
        };

        // A second effect keeps the context of the first
        let context = match core.effect.take() {
            Some(mut context) => {
                context.effect = path.to_path_buf();
                context
            }
            None => SoundEffectContext {
                effect: path.to_path_buf(),
                saved: Some(SavedTrack {
                    path: session.track().to_path_buf(),
                    encrypted: session.pipeline().is_encrypted(),
                    position: session.pipeline().position(),
                }),
                was_playing_before_effect: was_playing,
            },
        };

        if let Err(e) = self.redirect(&mut session, path, true, Duration::ZERO) {
            self.logger.log_pipeline_error("effect", &e);
            core.session = Session::Playing(session);
            self.teardown(core, false, "effect failed");
            return Err(e);
        }
        thread::sleep(self.config.prefill.effect_prebuffer());
        if session.sink_kind() == SinkKind::Wireless && self.deps.link.is_audio_connected() {
            self.deps.link.start_media_flow();
        }

        if let Some(recorder) = core.tracking.as_mut() {
            recorder.pause_started();
        }
        let interrupted = context.saved.as_ref().map(|saved| saved.path.clone());
        core.effect = Some(context);
        core.session = Session::Playing(session);
        self.skip_auto_advance_once.store(true, Ordering::SeqCst);
        self.logger.log_effect_started(path, interrupted.as_deref());
        Ok(())
    }

    /// Stop the session's pipeline without destroying it, point the reader at
    /// `uri` and run again from `start_at`
    fn redirect(
        &self,
        session: &mut ActiveSession<Playing>,
        uri: &Path,
        encrypted: bool,
        start_at: Duration,
    ) -> Result<(), PlaybackError> {
        if session.sink_kind() == SinkKind::Wireless {
            self.deps.link.stop_media_flow();
            thread::sleep(self.config.sink.wireless_stop_settle());
        }

        let pipeline = session.pipeline_mut();
        if !pipeline.stop() {
            pipeline.terminate();
        }
        pipeline.reset();
        pipeline.set_uri(uri.to_path_buf(), encrypted)?;
        pipeline.run(start_at)?;
        Ok(())
    }

    pub(super) fn restore_locked(&self, core: &mut PlaybackCore) -> Result<EffectOutcome, PlaybackError> {
        let Some(context) = core.effect.take() else {
            return Ok(EffectOutcome::NotActive);
        };
        self.skip_auto_advance_once.store(false, Ordering::SeqCst);
        let Some(saved) = context.saved else {
            debug!("Standalone effect '{}' finished", context.effect.display());
            self.teardown(core, false, "effect finished");
            return Ok(EffectOutcome::Finished);
        };

        let mut session = match core.session.take() {
            Session::Playing(session) => session,
            Session::Paused(session) => session.begin_resume().finish_resume(),
            Session::Stopped => return Ok(EffectOutcome::NotActive),
        };

        let kind = session.sink_kind();
        if kind == SinkKind::Wireless && !self.deps.link.is_audio_connected() {
            warn!("Wireless link dropped during effect, stopping instead of restoring");
            core.session = Session::Playing(session);
            self.teardown(core, false, "wireless link lost during effect");
            return Ok(EffectOutcome::LinkLost);
        }

        if let Err(e) = self.redirect(&mut session, &saved.path, saved.encrypted, saved.position) {
            self.logger.log_pipeline_error("restore", &e);
            core.session = Session::Playing(session);
            self.teardown(core, false, "restore failed");
            return Err(e);
        }
        self.prefill(session.pipeline(), kind);
        if kind == SinkKind::Wireless {
            self.deps.link.start_media_flow();
            thread::sleep(self.config.sink.wireless_start_settle());
        }

        let paused = !context.was_playing_before_effect;
        if paused {
            let pausing = session.begin_pause();
            pausing.pipeline().pause();
            core.session = Session::Paused(pausing.finish_pause());
        } else {
            if let Some(recorder) = core.tracking.as_mut() {
                recorder.resumed();
            }
            core.session = Session::Playing(session);
        }

        self.logger.log_effect_restored(&saved.path, saved.position, paused);
        Ok(EffectOutcome::Restored {
            track: saved.path,
            paused,
        })
    }
}
