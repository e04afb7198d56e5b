//! Type-state session transitions.
//!
//! An `ActiveSession<S>` owns the installed pipeline. Only legal edges have a
//! transition function, and each one publishes the new state to the lock-free
//! `StateCell` mirror.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::logging::PlaybackLogger;
use crate::models::{PlaybackState, SinkKind, SinkPreference};
use crate::pipeline::Pipeline;

/// Atomic mirror of the playback state, readable without the playback lock
pub(crate) struct StateCell {
    value: AtomicU8,
    logger: PlaybackLogger,
}

impl StateCell {
    pub fn new(logger: PlaybackLogger) -> Self {
        Self {
            value: AtomicU8::new(PlaybackState::Stopped.to_u8()),
            logger,
        }
    }

    pub fn get(&self) -> PlaybackState {
        PlaybackState::from_u8(self.value.load(Ordering::Acquire))
    }

    pub fn set(&self, to: PlaybackState) {
        let from = PlaybackState::from_u8(self.value.swap(to.to_u8(), Ordering::AcqRel));
        if from != to {
            self.logger.log_state_changed(from, to);
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

pub trait SessionState: sealed::Sealed {
    const STATE: PlaybackState;
}

macro_rules! session_state {
    ($name:ident, $state:expr) => {
        pub struct $name;
        impl sealed::Sealed for $name {}
        impl SessionState for $name {
            const STATE: PlaybackState = $state;
        }
    };
}

session_state!(Playing, PlaybackState::Playing);
session_state!(Pausing, PlaybackState::Pausing);
session_state!(Paused, PlaybackState::Paused);
session_state!(Resuming, PlaybackState::Resuming);

pub(crate) struct ActiveSession<S: SessionState> {
    pipeline: Pipeline,
    track: PathBuf,
    preference: SinkPreference,
    cell: Arc<StateCell>,
    _state: PhantomData<S>,
}

impl<S: SessionState> ActiveSession<S> {
    fn transition<T: SessionState>(self) -> ActiveSession<T> {
        self.cell.set(T::STATE);
        ActiveSession {
            pipeline: self.pipeline,
            track: self.track,
            preference: self.preference,
            cell: self.cell,
            _state: PhantomData,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// The track this session was started for
    pub fn track(&self) -> &Path {
        &self.track
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.pipeline.sink_kind()
    }

    pub fn preference(&self) -> SinkPreference {
        self.preference
    }

    /// Give up the pipeline for teardown. The caller publishes `Stopped` once
    /// teardown is complete.
    pub fn close(self) -> Pipeline {
        self.pipeline
    }
}

impl ActiveSession<Playing> {
    /// `Stopped → Playing` for a freshly built and pre-filled pipeline
    pub fn launch(pipeline: Pipeline, track: PathBuf, preference: SinkPreference, cell: Arc<StateCell>) -> Self {
        cell.set(PlaybackState::Playing);
        Self {
            pipeline,
            track,
            preference,
            cell,
            _state: PhantomData,
        }
    }

    pub fn begin_pause(self) -> ActiveSession<Pausing> {
        self.transition()
    }
}

impl ActiveSession<Pausing> {
    pub fn finish_pause(self) -> ActiveSession<Paused> {
        self.transition()
    }
}

impl ActiveSession<Paused> {
    pub fn begin_resume(self) -> ActiveSession<Resuming> {
        self.transition()
    }
}

impl ActiveSession<Resuming> {
    pub fn finish_resume(self) -> ActiveSession<Playing> {
        self.transition()
    }
}

/// What the playback lock guards: no session, or a session in a stable state
pub(crate) enum Session {
    Stopped,
    Playing(ActiveSession<Playing>),
    Paused(ActiveSession<Paused>),
}

impl Session {
    pub fn state(&self) -> PlaybackState {
        match self {
            Session::Stopped => PlaybackState::Stopped,
            Session::Playing(_) => PlaybackState::Playing,
            Session::Paused(_) => PlaybackState::Paused,
        }
    }

    pub fn take(&mut self) -> Session {
        std::mem::replace(self, Session::Stopped)
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        match self {
            Session::Stopped => None,
            Session::Playing(session) => Some(session.pipeline()),
            Session::Paused(session) => Some(session.pipeline()),
        }
    }

    pub fn track(&self) -> Option<&Path> {
        match self {
            Session::Stopped => None,
            Session::Playing(session) => Some(session.track()),
            Session::Paused(session) => Some(session.track()),
        }
    }

    pub fn preference(&self) -> Option<SinkPreference> {
        match self {
            Session::Stopped => None,
            Session::Playing(session) => Some(session.preference()),
            Session::Paused(session) => Some(session.preference()),
        }
    }

    pub fn close(self) -> Option<Pipeline> {
        match self {
            Session::Stopped => None,
            Session::Playing(session) => Some(session.close()),
            Session::Paused(session) => Some(session.close()),
        }
    }
}
