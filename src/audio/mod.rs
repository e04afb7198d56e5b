pub mod buffer;
pub mod device;
pub mod resample;

pub use buffer::SampleRing;
pub use device::CpalOutput;
pub use resample::FormatConverter;

use crate::error::PipelineError;

/// Sample rate and channel layout of an interleaved f32 stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Backend a sink writer hands decoded PCM to.
///
/// The local speaker path and the transient wireless stream both implement
/// this. `write` may accept only part of the input when the backend is full;
/// the caller retries with the remainder.
pub trait AudioOutput: Send {
    fn name(&self) -> &str;

    fn write(&mut self, samples: &[f32], format: StreamFormat) -> Result<usize, PipelineError>;

    /// Gate the amplifier. A muted output still consumes samples.
    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;

    /// Drop anything queued but not yet played
    fn flush(&mut self);

    /// Samples accepted but not yet played
    fn pending_samples(&self) -> usize {
        0
    }
}
