pub mod audio;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod recovery;

#[cfg(test)]
mod testing;

pub use error::*;
pub use models::*;
pub use playback::{EffectOutcome, EngineDeps, EngineStatus, PlaybackEngine, PollOutcome};
