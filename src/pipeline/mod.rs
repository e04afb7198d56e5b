//! Linear decode pipeline: file reader, optional cipher filter, decoder and sink writer.
//!
//! A pipeline moves through `build → run → (pause/resume) → stop → terminate →
//! unregister_persistent_sink → destroy`. Only a `DetachedPipeline`, which no
//! longer holds the persistent local sink, can be destroyed.

pub mod cipher;
pub mod decoder;
pub mod element;
pub mod prefill;
pub mod reader;
pub mod sink;

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::SampleRing;
use crate::error::PipelineError;
use crate::models::SinkKind;

pub use cipher::CipherKey;
pub use decoder::DecoderElement;
pub use element::{ElementControl, ElementId, ElementState};
pub use prefill::{wait_for_prefill, PrefillOutcome};
pub use reader::ReaderElement;
pub use sink::{BorrowedSink, LocalSinkResource, OwnedSink, SinkBinding, SinkWriter};

/// Element ids of an installed pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub pipeline: ElementId,
    pub reader: ElementId,
    pub cipher: Option<ElementId>,
    pub decoder: ElementId,
    pub sink: ElementId,
    pub sink_kind: SinkKind,
}

/// Lock-free view of a pipeline's completion state
#[derive(Clone)]
pub struct PipelineProbe {
    decoder: Arc<ElementControl>,
    sink: Arc<ElementControl>,
}

impl PipelineProbe {
    pub fn decoder_state(&self) -> ElementState {
        self.decoder.state()
    }

    /// Nothing more will reach the output: the decoder finished or either task failed
    pub fn is_done(&self) -> bool {
        matches!(self.decoder.state(), ElementState::Finished | ElementState::Error)
            || self.sink.state() == ElementState::Error
    }

    pub fn failure(&self) -> Option<String> {
        self.decoder.last_error().or_else(|| self.sink.last_error())
    }
}

pub struct PipelineParams {
    pub ring_samples: usize,
    pub ack_timeout: Duration,
    pub key: CipherKey,
}

pub struct Pipeline {
    id: ElementId,
    reader: ReaderElement,
    decoder: DecoderElement,
    sink: SinkWriter,
    ring: Arc<SampleRing>,
    drained: Arc<AtomicBool>,
    key: CipherKey,
    ack_timeout: Duration,
}

impl Pipeline {
    /// Create and link the elements. Nothing runs until `run`.
    pub fn build(uri: PathBuf, encrypted: bool, sink: SinkBinding, params: &PipelineParams) -> Self {
        let pipeline = Self {
            id: element::next_element_id(),
            reader: ReaderElement::new(uri, encrypted),
            decoder: DecoderElement::new(),
            sink: SinkWriter::new(sink),
            ring: Arc::new(SampleRing::new(params.ring_samples)),
            drained: Arc::new(AtomicBool::new(false)),
            key: params.key,
            ack_timeout: params.ack_timeout,
        };
        debug!(
            "Pipeline {} built for {} ({} sink{})",
            pipeline.id,
            pipeline.reader.uri().display(),
            pipeline.sink.kind(),
            if encrypted { ", cipher linked" } else { "" }
        );
        pipeline
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn uri(&self) -> &Path {
        self.reader.uri()
    }

    pub fn is_encrypted(&self) -> bool {
        self.reader.is_encrypted()
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.sink.kind()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            pipeline: self.id,
            reader: self.reader.id(),
            cipher: self.reader.cipher_id(),
            decoder: self.decoder.id(),
            sink: self.sink.id(),
            sink_kind: self.sink.kind(),
        }
    }

    pub fn probe(&self) -> PipelineProbe {
        PipelineProbe {
            decoder: Arc::clone(self.decoder.control()),
            sink: Arc::clone(self.sink.control()),
        }
    }

    pub fn decoder_state(&self) -> ElementState {
        self.decoder.state()
    }

    /// True while any task generation has not been joined
    pub fn is_running(&self) -> bool {
        self.decoder.is_active() || self.sink.is_active()
    }

    /// Open the source, start decoding from `start_at` and start the sink task
    pub fn run(&mut self, start_at: Duration) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::StillRunning);
        }

        self.ring.clear();
        self.drained.store(false, Ordering::Release);

        let source = self.reader.open(&self.key)?;
        self.decoder.start(
            source,
            self.reader.extension(),
            start_at,
            Arc::clone(&self.ring),
            Arc::clone(&self.drained),
        )?;

        if let Err(e) = self.sink.start(Arc::clone(&self.ring), Arc::clone(&self.drained)) {
            self.decoder.terminate();
            return Err(e);
        }

        debug!("Pipeline {} running from {:.2}s", self.id, start_at.as_secs_f64());
        Ok(())
    }

    /// Request a pause and wait for both tasks to acknowledge. Returns false on timeout.
    pub fn pause(&self) -> bool {
        self.decoder.request_pause();
        self.sink.request_pause();
        let settled = |s: ElementState| s == ElementState::Paused || s.is_idle();
        let acked = self.decoder.control().wait_for(settled, self.ack_timeout)
            && self.sink.control().wait_for(settled, self.ack_timeout);
        if !acked {
            warn!("Pipeline {} did not acknowledge pause within {:?}", self.id, self.ack_timeout);
        }
        acked
    }

    pub fn resume(&self) -> bool {
        self.decoder.request_run();
        self.sink.request_run();
        let settled = |s: ElementState| s == ElementState::Running || s.is_idle();
        let acked = self.decoder.control().wait_for(settled, self.ack_timeout)
            && self.sink.control().wait_for(settled, self.ack_timeout);
        if !acked {
            warn!("Pipeline {} did not acknowledge resume within {:?}", self.id, self.ack_timeout);
        }
        acked
    }

    /// Request a stop and wait for acknowledgement; acknowledged tasks are joined.
    /// Returns false if a task did not stop in time, in which case `terminate` reaps it.
    pub fn stop(&mut self) -> bool {
        self.decoder.request_stop();
        self.sink.request_stop();
        self.decoder.control().wait_for(ElementState::is_idle, self.ack_timeout);
        self.sink.control().wait_for(ElementState::is_idle, self.ack_timeout);

        let decoder_stopped = self.decoder.reap();
        let sink_stopped = self.sink.reap();
        if !(decoder_stopped && sink_stopped) {
            warn!("Pipeline {} did not acknowledge stop within {:?}", self.id, self.ack_timeout);
        }
        decoder_stopped && sink_stopped
    }

    /// Discard buffered audio on a stopped pipeline so it can rerun from scratch
    pub fn reset(&mut self) {
        self.ring.clear();
        self.drained.store(false, Ordering::Release);
        self.sink.flush_output();
        self.decoder.reset();
    }

    /// Redirect the reader. Only allowed while the pipeline is stopped but linked.
    pub fn set_uri(&mut self, uri: PathBuf, encrypted: bool) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::StillRunning);
        }
        debug!("Pipeline {} redirected to {}", self.id, uri.display());
        self.reader.redirect(uri, encrypted);
        Ok(())
    }

    /// Stop and join every task, whether or not it acknowledged
    pub fn terminate(&mut self) {
        self.decoder.terminate();
        self.sink.terminate();
    }

    pub fn buffer_fill(&self) -> Option<f32> {
        match self.decoder.state() {
            ElementState::Init | ElementState::Error => None,
            _ => Some(self.ring.fill_level()),
        }
    }

    /// The decoder has produced its last sample
    pub fn input_exhausted(&self) -> bool {
        self.ring.is_write_finished()
    }

    pub fn position(&self) -> Duration {
        self.decoder.position(&self.ring)
    }

    pub fn set_output_muted(&self, muted: bool) {
        self.sink.set_muted(muted);
    }

    /// Detach the sink. The persistent local resource is handed back; a wireless
    /// sink stays with the detached pipeline and is destroyed with it.
    pub fn unregister_persistent_sink(self) -> (DetachedPipeline, Option<LocalSinkResource>) {
        let Pipeline {
            id,
            reader,
            decoder,
            sink,
            ..
        } = self;

        let (wireless, local) = match sink.into_binding() {
            SinkBinding::Local(borrowed) => (None, Some(borrowed.unregister())),
            SinkBinding::Wireless(owned) => (Some(owned), None),
        };

        (
            DetachedPipeline {
                id,
                reader,
                decoder,
                wireless,
            },
            local,
        )
    }
}

/// A pipeline with no persistent sink registered; the only form that can be destroyed
pub struct DetachedPipeline {
    id: ElementId,
    reader: ReaderElement,
    decoder: DecoderElement,
    wireless: Option<OwnedSink>,
}

impl DetachedPipeline {
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn destroy(self) {
        let DetachedPipeline {
            id,
            reader,
            mut decoder,
            wireless,
        } = self;
        decoder.terminate();
        drop(wireless);
        debug!("Pipeline {} destroyed (reader {})", id, reader.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_wav, MemoryOutput};
    use std::time::Instant;
    use tempfile::TempDir;

    fn params() -> PipelineParams {
        PipelineParams {
            ring_samples: 2048,
            ack_timeout: Duration::from_millis(500),
            key: CipherKey::new([1; 16], [2; 8]),
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_run_to_completion_drains_into_output() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "tone.wav", 8000, 800, None);
        let output = MemoryOutput::new();
        let resource = LocalSinkResource::new(Box::new(output.clone()));

        let mut pipeline = Pipeline::build(path, false, SinkBinding::Local(BorrowedSink::register(resource)), &params());
        pipeline.run(Duration::ZERO).unwrap();

        let probe = pipeline.probe();
        assert!(wait_until(Duration::from_secs(3), || probe.is_done()));
        assert_eq!(probe.decoder_state(), ElementState::Finished);
        assert_eq!(output.samples_written(), 800);
        assert!(pipeline.input_exhausted());

        assert!(pipeline.stop());
        pipeline.terminate();
        let (detached, local) = pipeline.unregister_persistent_sink();
        assert!(local.is_some());
        detached.destroy();
    }

    #[test]
    fn test_encrypted_source_decodes() {
        let temp_dir = TempDir::new().unwrap();
        let key = params().key;
        let path = write_wav(temp_dir.path(), "locked.wav", 8000, 400, Some(&key));
        let output = MemoryOutput::new();

        let mut pipeline = Pipeline::build(
            path,
            true,
            SinkBinding::Wireless(OwnedSink::new(Box::new(output.clone()))),
            &params(),
        );
        pipeline.run(Duration::ZERO).unwrap();
        let probe = pipeline.probe();
        assert!(wait_until(Duration::from_secs(3), || probe.is_done()));
        assert_eq!(output.samples_written(), 400);

        let (detached, local) = pipeline.unregister_persistent_sink();
        assert!(local.is_none());
        detached.destroy();
    }

    #[test]
    fn test_pause_holds_output_and_keeps_identity() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "long.wav", 8000, 80_000, None);
        let output = MemoryOutput::with_capacity(1024);
        let resource = LocalSinkResource::new(Box::new(output.clone()));

        let mut pipeline = Pipeline::build(path, false, SinkBinding::Local(BorrowedSink::register(resource)), &params());
        pipeline.run(Duration::ZERO).unwrap();
        let before = pipeline.snapshot();

        assert!(wait_until(Duration::from_secs(2), || pipeline.buffer_fill().unwrap_or(0.0) > 0.5));
        assert!(pipeline.pause());
        let written = output.samples_written();
        output.drain();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(output.samples_written(), written);

        assert!(pipeline.resume());
        assert!(wait_until(Duration::from_secs(2), || output.samples_written() > written));
        assert_eq!(pipeline.snapshot(), before);

        assert!(pipeline.stop());
    }

    #[test]
    fn test_set_uri_requires_stopped_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let track = write_wav(temp_dir.path(), "track.wav", 8000, 80_000, None);
        let effect = write_wav(temp_dir.path(), "effect.wav", 8000, 400, None);
        let output = MemoryOutput::with_capacity(1024);
        let resource = LocalSinkResource::new(Box::new(output.clone()));

        let mut pipeline = Pipeline::build(track, true, SinkBinding::Local(BorrowedSink::register(resource)), &params());
        let before = pipeline.snapshot();
        pipeline.set_uri(effect.clone(), false).unwrap();
        pipeline.run(Duration::ZERO).unwrap();

        assert!(matches!(
            pipeline.set_uri(effect.clone(), false),
            Err(PipelineError::StillRunning)
        ));

        assert!(pipeline.stop());
        pipeline.reset();
        pipeline.set_uri(effect, true).unwrap();

        let after = pipeline.snapshot();
        assert_eq!(after.pipeline, before.pipeline);
        assert_eq!(after.decoder, before.decoder);
        assert_eq!(after.sink, before.sink);
        assert!(after.cipher.is_some());
        assert_ne!(after.cipher, before.cipher);
    }

    #[test]
    fn test_run_from_offset_reports_position() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "long.wav", 8000, 80_000, None);
        let output = MemoryOutput::with_capacity(256);
        let resource = LocalSinkResource::new(Box::new(output.clone()));

        let mut pipeline = Pipeline::build(path, false, SinkBinding::Local(BorrowedSink::register(resource)), &params());
        pipeline.run(Duration::from_secs(5)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pipeline.position() >= Duration::from_secs(5)));
        assert!(pipeline.position() < Duration::from_secs(10));
        pipeline.terminate();
    }

    #[test]
    fn test_buffer_fill_unavailable_before_run() {
        let output = MemoryOutput::new();
        let pipeline = Pipeline::build(
            PathBuf::from("/missing.wav"),
            false,
            SinkBinding::Wireless(OwnedSink::new(Box::new(output))),
            &params(),
        );
        assert_eq!(pipeline.buffer_fill(), None);
        assert!(!pipeline.is_running());
    }
}
