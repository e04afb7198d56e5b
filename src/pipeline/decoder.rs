use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::element::{next_element_id, ElementControl, ElementId, ElementState, ElementTask};
use crate::audio::{SampleRing, StreamFormat};
use crate::error::PipelineError;

const RING_FULL_BACKOFF: Duration = Duration::from_millis(2);
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Decode progress shared with the engine for position reporting
#[derive(Default)]
struct DecodeProgress {
    frames: AtomicU64,
    sample_rate: AtomicU32,
    start_offset_us: AtomicU64,
}

impl DecodeProgress {
    fn reset(&self, start_at: Duration, sample_rate: u32) {
        self.frames.store(0, Ordering::Release);
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.start_offset_us.store(start_at.as_micros() as u64, Ordering::Release);
    }

    fn decoded_until(&self) -> Duration {
        let start = Duration::from_micros(self.start_offset_us.load(Ordering::Acquire));
        let rate = self.sample_rate.load(Ordering::Acquire);
        if rate == 0 {
            return start;
        }
        let frames = self.frames.load(Ordering::Acquire);
        start + Duration::from_secs_f64(frames as f64 / rate as f64)
    }
}

/// Audio decoder element. Runs on its own "pipeline-decoder" thread and
/// pushes interleaved f32 PCM into the pipeline ring.
pub struct DecoderElement {
    id: ElementId,
    control: Arc<ElementControl>,
    progress: Arc<DecodeProgress>,
    task: Option<ElementTask>,
}

impl DecoderElement {
    pub fn new() -> Self {
        Self {
            id: next_element_id(),
            control: Arc::new(ElementControl::new("pipeline-decoder")),
            progress: Arc::new(DecodeProgress::default()),
            task: None,
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn control(&self) -> &Arc<ElementControl> {
        &self.control
    }

    pub fn state(&self) -> ElementState {
        self.control.state()
    }

    /// A task generation exists that has not been joined yet
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Position of the next sample the sink will take from the ring
    pub fn position(&self, ring: &SampleRing) -> Duration {
        self.progress.decoded_until().saturating_sub(ring.buffered_duration())
    }

    /// Probe `source` and start decoding from `start_at`.
    ///
    /// Probing happens on the caller's thread so format errors surface from
    /// `run`. The decoder reports `Finished` only after end of stream and once
    /// `downstream_drained` confirms the sink has emptied the ring.
    pub fn start(
        &mut self,
        source: Box<dyn MediaSource>,
        extension: Option<&str>,
        start_at: Duration,
        ring: Arc<SampleRing>,
        downstream_drained: Arc<AtomicBool>,
    ) -> Result<(), PipelineError> {
        if self.task.is_some() {
            return Err(PipelineError::StillRunning);
        }

        let stream = MediaSourceStream::new(source, Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| PipelineError::UnsupportedFormat(format!("probe failed: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PipelineError::UnsupportedFormat("no audio track".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| PipelineError::DecoderInit("unknown sample rate".to_string()))?;
        let channels = track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| PipelineError::DecoderInit(e.to_string()))?;

        let mut effective_start = Duration::ZERO;
        if !start_at.is_zero() {
            let time = Time::new(start_at.as_secs(), start_at.subsec_nanos() as f64 / 1e9);
            match format.seek(SeekMode::Accurate, SeekTo::Time { time, track_id: Some(track_id) }) {
                Ok(_) => {
                    decoder.reset();
                    effective_start = start_at;
                }
                Err(e) => warn!("Seek to {:.2}s failed, starting from the beginning: {}", start_at.as_secs_f64(), e),
            }
        }

        self.control.reset();
        self.control.set_state(ElementState::Running);
        self.progress.reset(effective_start, sample_rate);
        ring.set_format(StreamFormat { sample_rate, channels });

        let control = Arc::clone(&self.control);
        let progress = Arc::clone(&self.progress);
        let handle = thread::Builder::new()
            .name("pipeline-decoder".to_string())
            .spawn(move || {
                decode_loop(format, decoder, track_id, &control, &ring, &progress, &downstream_drained);
            })
            .map_err(|e| PipelineError::TaskSpawn(format!("pipeline-decoder: {}", e)))?;

        self.task = Some(ElementTask::new(Arc::clone(&self.control), handle));
        debug!("Decoder {} started at {} Hz, {} channels", self.id, sample_rate, channels);
        Ok(())
    }

    pub fn request_pause(&self) {
        self.control.request_pause();
    }

    pub fn request_run(&self) {
        self.control.request_run();
    }

    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    /// Join the task if it has acknowledged the stop. Returns false if still running.
    pub fn reap(&mut self) -> bool {
        if !self.control.state().is_idle() {
            return false;
        }
        if let Some(task) = self.task.take() {
            task.join();
        }
        true
    }

    /// Stop and join unconditionally
    pub fn terminate(&mut self) {
        self.control.request_stop();
        self.task = None;
    }

    pub fn reset(&mut self) {
        if self.task.is_none() {
            self.control.reset();
        }
        self.progress.reset(Duration::ZERO, 0);
    }
}

impl Default for DecoderElement {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_loop(
    mut format: Box<dyn FormatReader>,
    mut decoder: Box<dyn Decoder>,
    track_id: u32,
    control: &ElementControl,
    ring: &SampleRing,
    progress: &DecodeProgress,
    downstream_drained: &AtomicBool,
) {
    let mut sample_buf: Option<(SampleBuffer<f32>, SignalSpec, usize)> = None;

    loop {
        if !control.checkpoint() {
            control.set_state(ElementState::Stopped);
            return;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                control.fail(format!("read failed: {}", e));
                ring.finish_writing();
                return;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => {
                control.fail(format!("decode failed: {}", e));
                ring.finish_writing();
                return;
            }
        };

        let spec = *decoded.spec();
        let frames = decoded.capacity();
        let needs_new = match &sample_buf {
            Some((_, buf_spec, buf_frames)) => *buf_spec != spec || *buf_frames < frames,
            None => true,
        };
        if needs_new {
            sample_buf = Some((SampleBuffer::new(frames as u64, spec), spec, frames));
        }
        let Some((buf, _, _)) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        if !push_samples(buf.samples(), control, ring) {
            control.set_state(ElementState::Stopped);
            return;
        }
        let channels = spec.channels.count().max(1);
        progress
            .frames
            .fetch_add((buf.samples().len() / channels) as u64, Ordering::AcqRel);
    }

    ring.finish_writing();
    debug!("Decoder reached end of stream, waiting for downstream drain");

    loop {
        if !control.checkpoint() {
            control.set_state(ElementState::Stopped);
            return;
        }
        if downstream_drained.load(Ordering::Acquire) {
            control.set_state(ElementState::Finished);
            return;
        }
        thread::sleep(DRAIN_POLL);
    }
}

/// Push all of `samples` into the ring, backing off while it is full.
/// Returns false if a stop was requested meanwhile.
fn push_samples(samples: &[f32], control: &ElementControl, ring: &SampleRing) -> bool {
    let mut offset = 0;
    while offset < samples.len() {
        if !control.checkpoint() {
            return false;
        }
        let written = ring.write(&samples[offset..]);
        offset += written;
        if written == 0 {
            thread::sleep(RING_FULL_BACKOFF);
        }
    }
    true
}
