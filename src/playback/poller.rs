//! Completion detection. The host calls `periodic_check` on a timer; a finished
//! pipeline is torn down and the next track chosen from the completion hook,
//! the auto-play mode and the playlist.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use super::effect::EffectOutcome;
use super::state::Session;
use super::{PlaybackCore, PlaybackEngine};
use crate::collaborators::CompletionDirective;
use crate::error::{LockKind, PlaybackError};
use crate::models::{AutoPlayMode, Direction, PlaybackState, SinkPreference};

#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing finished
    Idle,
    /// The playback lock was contended; try again next tick
    Busy,
    Effect(EffectOutcome),
    /// A track finished; `next` is what auto-advance started, if anything
    TrackCompleted { track: PathBuf, next: Option<PathBuf> },
    Failed(PlaybackError),
}

impl PlaybackEngine {
    /// Check whether the installed pipeline has finished and act on it
    pub fn periodic_check(&self) -> PollOutcome {
        if self.state.get() != PlaybackState::Playing || !self.pipeline_done() {
            return PollOutcome::Idle;
        }

        let timeout = self.config.locks.poll();
        let Some(mut core) = self.playback.try_lock_for(timeout) else {
            self.logger.log_lock_contention(LockKind::Playback, "periodic_check", timeout);
            return PollOutcome::Busy;
        };

        // Someone else may have stopped or restarted playback while we waited
        if !matches!(core.session, Session::Playing(_)) || !self.pipeline_done() {
            return PollOutcome::Idle;
        }

        let failure = self.probe.read().as_ref().and_then(|probe| probe.failure());
        if let Some(reason) = &failure {
            warn!("Pipeline finished with an error: {}", reason);
        }

        if core.effect.is_some() {
            return match self.restore_locked(&mut core) {
                Ok(outcome) => PollOutcome::Effect(outcome),
                Err(e) => PollOutcome::Failed(e),
            };
        }

        let preference = core
            .session
            .preference()
            .unwrap_or(self.config.sink.default_preference);
        let Some(track) = self.teardown(&mut core, failure.is_none(), "track completed") else {
            return PollOutcome::Idle;
        };
        self.logger.log_track_completed(&track);

        if self.skip_auto_advance_once.swap(false, Ordering::SeqCst) {
            debug!("Auto-advance skipped once");
            return PollOutcome::TrackCompleted { track, next: None };
        }

        match self.auto_advance(&mut core, &track, preference) {
            Ok(next) => PollOutcome::TrackCompleted { track, next },
            Err(e) => {
                warn!("Auto-advance after '{}' failed: {}", track.display(), e);
                PollOutcome::Failed(e)
            }
        }
    }

    fn pipeline_done(&self) -> bool {
        self.probe.read().as_ref().is_some_and(|probe| probe.is_done())
    }

    fn auto_advance(
        &self,
        core: &mut PlaybackCore,
        finished: &Path,
        preference: SinkPreference,
    ) -> Result<Option<PathBuf>, PlaybackError> {
        match self.deps.completion.on_track_completed(finished) {
            CompletionDirective::Halt => {
                debug!("Completion hook halted playback");
                return Ok(None);
            }
            CompletionDirective::RepeatTrack => {
                self.start_locked(core, finished, preference)?;
                return Ok(Some(finished.to_path_buf()));
            }
            CompletionDirective::Continue => {}
        }

        let next = {
            let mut playlist = self.lock_playlist(self.config.locks.playlist(), "auto_advance")?;
            if playlist.current_track() != Some(finished) {
                debug!("Finished track is not the playlist's current track, not advancing");
                return Ok(None);
            }

            let outcome = playlist.advance(Direction::Forward)?;
            if !outcome.wrapped {
                outcome.track
            } else {
                match self.auto_play_mode() {
                    AutoPlayMode::Off => {
                        info!("End of album reached");
                        return Ok(None);
                    }
                    AutoPlayMode::RepeatFolder => outcome.track,
                    AutoPlayMode::CycleAll => {
                        let current = playlist.album().cloned();
                        let next_album = current
                            .as_ref()
                            .and_then(|album| self.deps.catalog.next_album(album))
                            .or(current);
                        match next_album {
                            Some(album) => {
                                info!("Cycling to album '{}'", album.sku);
                                playlist.load_album(album, self.deps.catalog.as_ref())?;
                                playlist
                                    .current_track()
                                    .map(Path::to_path_buf)
                                    .unwrap_or(outcome.track)
                            }
                            None => outcome.track,
                        }
                    }
                }
            }
        };

        self.start_locked(core, &next, preference)?;
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlbumDescriptor;
    use crate::testing::{write_wav, MemoryOutput, SimulatedLink, StaticCatalog, TestRig};
    use std::fs;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn album_rig(completion: Option<CompletionDirective>) -> (TestRig, Vec<PathBuf>) {
        let rig = TestRig::build(MemoryOutput::new(), SimulatedLink::new(false), StaticCatalog::default(), completion);
        let tracks = vec![rig.track("01.wav", 800), rig.track("02.wav", 800)];
        let album = AlbumDescriptor::folder(rig.dir.path().join("plain"), "sku-a");
        rig.engine.load_album(album).unwrap();
        (rig, tracks)
    }

    fn expect_completion(outcome: PollOutcome) -> (PathBuf, Option<PathBuf>) {
        match outcome {
            PollOutcome::TrackCompleted { track, next } => (track, next),
            other => panic!("expected a completed track, got {:?}", other),
        }
    }

    #[test]
    fn test_completion_records_and_advances() {
        let (rig, tracks) = album_rig(None);
        rig.engine.play_current(SinkPreference::Local).unwrap();

        let (track, next) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(track, tracks[0]);
        assert_eq!(next.as_ref(), Some(&tracks[1]));
        assert!(rig.engine.is_playing());

        let records = rig.tracking.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].completed);
        assert_eq!(records[0].track, tracks[0]);
    }

    #[test]
    fn test_auto_play_off_stops_at_album_end() {
        let (rig, tracks) = album_rig(None);
        rig.engine.play_current(SinkPreference::Local).unwrap();
        expect_completion(rig.poll_until_event(WAIT));

        let (track, next) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(track, tracks[1]);
        assert!(next.is_none());
        assert!(rig.engine.is_stopped());
        assert_eq!(rig.tracking.records().len(), 2);
    }

    #[test]
    fn test_repeat_folder_wraps() {
        let (rig, tracks) = album_rig(None);
        rig.engine.set_auto_play_mode(AutoPlayMode::RepeatFolder);
        rig.engine.play_current(SinkPreference::Local).unwrap();
        expect_completion(rig.poll_until_event(WAIT));

        let (_, next) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(next.as_ref(), Some(&tracks[0]));
        assert!(rig.engine.is_playing());
        rig.engine.stop().unwrap();
    }

    #[test]
    fn test_cycle_all_moves_to_next_album() {
        let rig = TestRig::new();
        let first_dir = rig.dir.path().join("plain/a");
        let second_dir = rig.dir.path().join("plain/b");
        fs::create_dir(&first_dir).unwrap();
        fs::create_dir(&second_dir).unwrap();
        let only = write_wav(&first_dir, "01.wav", 8000, 800, None);
        let next_album_track = write_wav(&second_dir, "01.wav", 8000, 800, None);

        let first = AlbumDescriptor::folder(&first_dir, "a");
        rig.catalog
            .set_albums(vec![first.clone(), AlbumDescriptor::folder(&second_dir, "b")]);
        rig.engine.load_album(first).unwrap();
        rig.engine.set_auto_play_mode(AutoPlayMode::CycleAll);
        rig.engine.play_current(SinkPreference::Local).unwrap();

        let (track, next) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(track, only);
        assert_eq!(next, Some(next_album_track));
        assert_eq!(rig.engine.current_track_display_position().unwrap().to_string(), "1/1");
        rig.engine.stop().unwrap();
    }

    #[test]
    fn test_halt_hook_keeps_engine_stopped() {
        let (rig, _) = album_rig(Some(CompletionDirective::Halt));
        rig.engine.play_current(SinkPreference::Local).unwrap();

        let (_, next) = expect_completion(rig.poll_until_event(WAIT));
        assert!(next.is_none());
        assert!(rig.engine.is_stopped());
    }

    #[test]
    fn test_repeat_track_hook_replays() {
        let (rig, tracks) = album_rig(Some(CompletionDirective::RepeatTrack));
        rig.engine.play_current(SinkPreference::Local).unwrap();

        let (track, next) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(track, tracks[0]);
        assert_eq!(next.as_ref(), Some(&tracks[0]));
        assert_eq!(rig.engine.current_track_display_position().unwrap().to_string(), "1/2");
        rig.engine.stop().unwrap();
    }

    #[test]
    fn test_stopped_track_does_not_auto_advance() {
        let (rig, _) = album_rig(None);
        rig.engine.play_current(SinkPreference::Local).unwrap();
        rig.engine.stop().unwrap();

        assert!(matches!(rig.engine.periodic_check(), PollOutcome::Idle));
        assert!(rig.engine.is_stopped());
        assert_eq!(rig.engine.current_track_display_position().unwrap().to_string(), "1/2");
    }

    #[test]
    fn test_idle_while_paused() {
        let rig = TestRig::build(
            MemoryOutput::with_capacity(1024),
            SimulatedLink::new(false),
            StaticCatalog::default(),
            None,
        );
        let track = rig.track("long.wav", 80_000);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        rig.engine.pause().unwrap();

        assert!(matches!(rig.engine.periodic_check(), PollOutcome::Idle));
        assert!(rig.engine.is_paused());
    }

    #[test]
    fn test_busy_when_playback_lock_held() {
        let rig = TestRig::new();
        let track = rig.track("short.wav", 400);
        rig.engine.start(&track, SinkPreference::Local).unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        while !rig.engine.pipeline_done() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let guard = rig.engine.playback.lock();
        assert!(matches!(rig.engine.periodic_check(), PollOutcome::Busy));
        drop(guard);

        let (track_done, _) = expect_completion(rig.poll_until_event(WAIT));
        assert_eq!(track_done, track);
    }

    #[test]
    fn test_effect_completion_restores_track() {
        let rig = TestRig::build(
            MemoryOutput::with_capacity(1024),
            SimulatedLink::new(false),
            StaticCatalog::default(),
            None,
        );
        let track = rig.track("long.wav", 400_000);
        let chime = rig.effect("chime.wav", 400);
        rig.engine.start(&track, SinkPreference::Local).unwrap();
        rig.engine.play_effect(&chime).unwrap();

        let stream = rig.local.clone();
        let drainer = std::thread::spawn(move || {
            for _ in 0..200 {
                stream.drain();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        match rig.poll_until_event(WAIT) {
            PollOutcome::Effect(EffectOutcome::Restored { track: restored, paused }) => {
                assert_eq!(restored, track);
                assert!(!paused);
            }
            other => panic!("expected restore, got {:?}", other),
        }
        assert!(rig.engine.is_playing());
        assert!(rig.tracking.records().is_empty());
        rig.engine.stop().unwrap();
        drainer.join().unwrap();
    }

    #[test]
    fn test_standalone_effect_completion_stops() {
        let rig = TestRig::new();
        let chime = rig.effect("chime.wav", 400);
        rig.engine.play_effect(&chime).unwrap();

        assert!(matches!(
            rig.poll_until_event(WAIT),
            PollOutcome::Effect(EffectOutcome::Finished)
        ));
        assert!(rig.engine.is_stopped());
        assert!(rig.tracking.records().is_empty());
    }
}
