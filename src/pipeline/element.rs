use log::warn;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type ElementId = u64;

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique element id
pub fn next_element_id() -> ElementId {
    NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state reported by a pipeline task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Linked but never run, or reset after a stop
    Init,
    Running,
    Paused,
    Stopped,
    /// Input exhausted and output handed downstream
    Finished,
    Error,
}

impl ElementState {
    /// The task has exited or never started
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            ElementState::Init | ElementState::Stopped | ElementState::Finished | ElementState::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Run,
    Pause,
    Stop,
}

struct ControlState {
    state: ElementState,
    request: Request,
    error: Option<String>,
}

/// Command/acknowledge channel between the engine and one pipeline task.
///
/// The engine posts requests; the task polls `checkpoint()` between units of
/// work and publishes its state, which the engine can wait on.
pub struct ElementControl {
    name: &'static str,
    inner: Mutex<ControlState>,
    cond: Condvar,
}

impl ElementControl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(ControlState {
                state: ElementState::Init,
                request: Request::Run,
                error: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ElementState {
        self.inner.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn request_run(&self) {
        self.post(Request::Run);
    }

    pub fn request_pause(&self) {
        self.post(Request::Pause);
    }

    pub fn request_stop(&self) {
        self.post(Request::Stop);
    }

    fn post(&self, request: Request) {
        let mut inner = self.inner.lock();
        inner.request = request;
        self.cond.notify_all();
    }

    pub fn set_state(&self, state: ElementState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        self.cond.notify_all();
    }

    pub fn fail(&self, error: String) {
        let mut inner = self.inner.lock();
        inner.state = ElementState::Error;
        inner.error = Some(error);
        self.cond.notify_all();
    }

    /// Called by the task between units of work.
    ///
    /// Blocks while a pause is requested, acknowledging with `Paused`.
    /// Returns false once a stop is requested.
    pub fn checkpoint(&self) -> bool {
        let mut inner = self.inner.lock();
        loop {
            match inner.request {
                Request::Run => {
                    if inner.state != ElementState::Running {
                        inner.state = ElementState::Running;
                        self.cond.notify_all();
                    }
                    return true;
                }
                Request::Pause => {
                    if inner.state != ElementState::Paused {
                        inner.state = ElementState::Paused;
                        self.cond.notify_all();
                    }
                    self.cond.wait_for(&mut inner, Duration::from_millis(50));
                }
                Request::Stop => return false,
            }
        }
    }

    /// Wait until the published state satisfies `pred`. Returns false on timeout.
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(ElementState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !pred(inner.state) {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return pred(inner.state);
            }
        }
        true
    }

    /// Back to `Init` with a run request pending, ready for the next task generation
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = ElementState::Init;
        inner.request = Request::Run;
        inner.error = None;
        self.cond.notify_all();
    }
}

/// Join handle of a running pipeline task. Dropping it stops and joins the task.
pub struct ElementTask {
    control: Arc<ElementControl>,
    handle: Option<JoinHandle<()>>,
}

impl ElementTask {
    pub fn new(control: Arc<ElementControl>, handle: JoinHandle<()>) -> Self {
        Self {
            control,
            handle: Some(handle),
        }
    }

    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Pipeline task '{}' panicked", self.control.name());
                self.control.fail("task panicked".to_string());
            }
        }
    }
}

impl Drop for ElementTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.control.request_stop();
            self.join_inner();
        }
    }
}
