use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::element::{next_element_id, ElementControl, ElementId, ElementState, ElementTask};
use crate::audio::{AudioOutput, SampleRing};
use crate::error::PipelineError;
use crate::models::SinkKind;

/// Samples moved from the ring to the output per write
const SINK_CHUNK_SAMPLES: usize = 2048;
const IDLE_BACKOFF: Duration = Duration::from_millis(2);

pub type SharedOutput = Arc<Mutex<Box<dyn AudioOutput>>>;

/// The local speaker output. Created once by the engine and handed from
/// pipeline to pipeline; it is never destroyed with a pipeline.
pub struct LocalSinkResource {
    id: ElementId,
    output: SharedOutput,
}

impl LocalSinkResource {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            id: next_element_id(),
            output: Arc::new(Mutex::new(output)),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> String {
        self.output.lock().name().to_string()
    }

    pub fn set_muted(&self, muted: bool) {
        self.output.lock().set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.output.lock().is_muted()
    }
}

/// The persistent local resource while it is registered with a pipeline.
/// Unregistering hands the resource back instead of destroying it.
pub struct BorrowedSink {
    resource: LocalSinkResource,
}

impl BorrowedSink {
    pub fn register(resource: LocalSinkResource) -> Self {
        debug!("Local sink {} registered", resource.id);
        Self { resource }
    }

    pub fn unregister(self) -> LocalSinkResource {
        debug!("Local sink {} unregistered", self.resource.id);
        self.resource
    }
}

/// Transient wireless stream, created for one pipeline and destroyed with it
pub struct OwnedSink {
    id: ElementId,
    output: SharedOutput,
}

impl OwnedSink {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            id: next_element_id(),
            output: Arc::new(Mutex::new(output)),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }
}

impl Drop for OwnedSink {
    fn drop(&mut self) {
        debug!("Wireless sink {} destroyed", self.id);
    }
}

pub enum SinkBinding {
    Local(BorrowedSink),
    Wireless(OwnedSink),
}

impl SinkBinding {
    pub fn id(&self) -> ElementId {
        match self {
            SinkBinding::Local(sink) => sink.resource.id,
            SinkBinding::Wireless(sink) => sink.id,
        }
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            SinkBinding::Local(_) => SinkKind::Local,
            SinkBinding::Wireless(_) => SinkKind::Wireless,
        }
    }

    fn output(&self) -> &SharedOutput {
        match self {
            SinkBinding::Local(sink) => &sink.resource.output,
            SinkBinding::Wireless(sink) => &sink.output,
        }
    }
}

/// Sink writer element: a "pipeline-sink" task moving PCM from the ring to the bound output
pub struct SinkWriter {
    binding: SinkBinding,
    control: Arc<ElementControl>,
    task: Option<ElementTask>,
}

impl SinkWriter {
    pub fn new(binding: SinkBinding) -> Self {
        Self {
            binding,
            control: Arc::new(ElementControl::new("pipeline-sink")),
            task: None,
        }
    }

    pub fn id(&self) -> ElementId {
        self.binding.id()
    }

    pub fn kind(&self) -> SinkKind {
        self.binding.kind()
    }

    pub fn control(&self) -> &Arc<ElementControl> {
        &self.control
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(&mut self, ring: Arc<SampleRing>, drained: Arc<AtomicBool>) -> Result<(), PipelineError> {
        if self.task.is_some() {
            return Err(PipelineError::StillRunning);
        }
        self.control.reset();

        let control = Arc::clone(&self.control);
        let output = Arc::clone(self.binding.output());
        let handle = thread::Builder::new()
            .name("pipeline-sink".to_string())
            .spawn(move || sink_loop(&control, &ring, &output, &drained))
            .map_err(|e| PipelineError::TaskSpawn(format!("pipeline-sink: {}", e)))?;

        self.task = Some(ElementTask::new(Arc::clone(&self.control), handle));
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

    pub fn reap(&mut self) -> bool {
        if !self.control.state().is_idle() {
            return false;
        }
        if let Some(task) = self.task.take() {
            task.join();
        }
        true
    }

    pub fn terminate(&mut self) {
        self.control.request_stop();
        self.task = None;
    }

    pub fn set_muted(&self, muted: bool) {
        self.binding.output().lock().set_muted(muted);
    }

    pub fn flush_output(&self) {
        self.binding.output().lock().flush();
    }

    /// Stop the task and release the binding
    pub fn into_binding(mut self) -> SinkBinding {
        self.terminate();
        self.binding
    }
}

fn sink_loop(control: &ElementControl, ring: &SampleRing, output: &SharedOutput, drained: &AtomicBool) {
    let mut scratch = vec![0.0f32; SINK_CHUNK_SAMPLES];

    while control.checkpoint() {
        let Some(format) = ring.format() else {
            thread::sleep(IDLE_BACKOFF);
            continue;
        };
        let channels = format.channels.max(1) as usize;
        let available = ring.peek(&mut scratch);
        let whole = available - available % channels;

        if whole == 0 {
            if ring.is_write_finished() && !drained.load(Ordering::Acquire) && output.lock().pending_samples() == 0 {
                drained.store(true, Ordering::Release);
            }
            thread::sleep(IDLE_BACKOFF);
            continue;
        }

        let result = output.lock().write(&scratch[..whole], format);
        match result {
            Ok(0) => thread::sleep(IDLE_BACKOFF),
            Ok(written) => {
                ring.consume(written);
            }
            Err(e) => {
                warn!("Sink write failed: {}", e);
                control.fail(e.to_string());
                return;
            }
        }
    }

    control.set_state(ElementState::Stopped);
}
