//! Fakes and fixtures shared by the unit tests

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use crate::audio::{AudioOutput, StreamFormat};
use crate::collaborators::{Catalog, CompletionDirective, CompletionHook, FsContentResolver, TrackingSink, WirelessLink};
use crate::config::{CipherConfig, EngineConfig, LockTimeouts, PrefillConfig, SinkConfig};
use crate::error::PipelineError;
use crate::models::AlbumDescriptor;
use crate::pipeline::CipherKey;
use crate::playback::tracking::PlaybackTrackingRecord;
use crate::playback::{EngineDeps, PlaybackEngine, PollOutcome};

#[derive(Default)]
struct MemoryState {
    capacity: Option<usize>,
    held: usize,
    written: usize,
    muted: bool,
    mute_history: Vec<bool>,
    flushes: usize,
}

/// Audio output that records what reaches it. With a capacity it stops
/// accepting once that many samples are held, until `drain` is called.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(samples: usize) -> Self {
        let output = Self::default();
        output.state.lock().capacity = Some(samples);
        output
    }

    pub fn drain(&self) {
        self.state.lock().held = 0;
    }

    pub fn samples_written(&self) -> usize {
        self.state.lock().written
    }

    pub fn muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn mute_history(&self) -> Vec<bool> {
        self.state.lock().mute_history.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

impl AudioOutput for MemoryOutput {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, samples: &[f32], format: StreamFormat) -> Result<usize, PipelineError> {
        let mut state = self.state.lock();
        let room = match state.capacity {
            Some(capacity) => capacity.saturating_sub(state.held),
            None => samples.len(),
        };
        let channels = format.channels.max(1) as usize;
        let accepted = room.min(samples.len());
        let accepted = accepted - accepted % channels;
        state.held += accepted;
        state.written += accepted;
        Ok(accepted)
    }

    fn set_muted(&mut self, muted: bool) {
        let mut state = self.state.lock();
        state.muted = muted;
        state.mute_history.push(muted);
    }

    fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    fn flush(&mut self) {
        let mut state = self.state.lock();
        state.held = 0;
        state.flushes += 1;
    }
}

/// Mono 16-bit WAV with `frames` samples of a low tone. With a key the file
/// bytes are encrypted the way packaged content is.
pub fn write_wav(dir: &Path, name: &str, sample_rate: u32, frames: usize, key: Option<&CipherKey>) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = (t * 220.0 * std::f32::consts::TAU).sin() * 8000.0;
        writer.write_sample(sample as i16).unwrap();
    }
    writer.finalize().unwrap();

    if let Some(key) = key {
        let mut bytes = fs::read(&path).unwrap();
        key.apply_keystream_at(&mut bytes, 0);
        fs::write(&path, bytes).unwrap();
    }
    path
}

/// Wireless link with a switchable connection that records every call
pub struct SimulatedLink {
    connected: AtomicBool,
    stream_capacity: Option<usize>,
    streams: Mutex<Vec<MemoryOutput>>,
    calls: Mutex<Vec<&'static str>>,
    released: AtomicUsize,
}

impl SimulatedLink {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            stream_capacity: None,
            streams: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            released: AtomicUsize::new(0),
        }
    }

    /// Streams opened by this link hold at most `samples` until drained
    pub fn with_stream_capacity(connected: bool, samples: usize) -> Self {
        Self {
            stream_capacity: Some(samples),
            ..Self::new(connected)
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    pub fn streams(&self) -> Vec<MemoryOutput> {
        self.streams.lock().clone()
    }

    pub fn released_events(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl WirelessLink for SimulatedLink {
    fn is_audio_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn start_media_flow(&self) {
        self.calls.lock().push("start_media_flow");
    }

    fn stop_media_flow(&self) {
        self.calls.lock().push("stop_media_flow");
    }

    fn open_stream(&self) -> Result<Box<dyn AudioOutput>, PipelineError> {
        if !self.is_audio_connected() {
            return Err(PipelineError::SinkUnavailable("link down".to_string()));
        }
        self.calls.lock().push("open_stream");
        let output = match self.stream_capacity {
            Some(samples) => MemoryOutput::with_capacity(samples),
            None => MemoryOutput::new(),
        };
        self.streams.lock().push(output.clone());
        Ok(Box::new(output))
    }

    fn release_deferred_event(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CollectingTracking {
    records: Mutex<Vec<PlaybackTrackingRecord>>,
}

impl CollectingTracking {
    pub fn records(&self) -> Vec<PlaybackTrackingRecord> {
        self.records.lock().clone()
    }
}

impl TrackingSink for CollectingTracking {
    fn record(&self, record: PlaybackTrackingRecord) {
        self.records.lock().push(record);
    }
}

/// Catalog with a settable album list and a fixed filename order
#[derive(Default)]
pub struct StaticCatalog {
    albums: Mutex<Vec<AlbumDescriptor>>,
    order: Vec<String>,
}

impl StaticCatalog {
    pub fn with_order(order: Vec<&str>) -> Self {
        Self {
            albums: Mutex::new(Vec::new()),
            order: order.into_iter().map(String::from).collect(),
        }
    }

    pub fn set_albums(&self, albums: Vec<AlbumDescriptor>) {
        *self.albums.lock() = albums;
    }
}

impl Catalog for StaticCatalog {
    fn current_album(&self) -> Option<AlbumDescriptor> {
        self.albums.lock().first().cloned()
    }

    fn track_order(&self, _album: &AlbumDescriptor) -> Vec<String> {
        self.order.clone()
    }

    fn next_album(&self, current: &AlbumDescriptor) -> Option<AlbumDescriptor> {
        let albums = self.albums.lock();
        let position = albums.iter().position(|album| album.path == current.path)?;
        albums.get((position + 1) % albums.len()).cloned()
    }
}

/// Completion hook answering with a fixed directive
pub struct FixedCompletion(pub CompletionDirective);

impl CompletionHook for FixedCompletion {
    fn on_track_completed(&self, _track: &Path) -> CompletionDirective {
        self.0
    }
}

/// Engine configuration with short delays. Content under `plain_root` is
/// treated as unencrypted.
pub fn test_config(plain_root: &Path) -> EngineConfig {
    EngineConfig {
        prefill: PrefillConfig {
            poll_interval_ms: 2,
            timeout_ms: 150,
            fallback_local_ms: 10,
            fallback_wireless_ms: 10,
            local_settle_ms: 5,
            effect_prebuffer_ms: 5,
            ..PrefillConfig::default()
        },
        locks: LockTimeouts {
            poll_ms: 50,
            ..LockTimeouts::default()
        },
        sink: SinkConfig {
            ring_buffer_samples: 4096,
            wireless_start_settle_ms: 5,
            wireless_stop_settle_ms: 5,
            ..SinkConfig::default()
        },
        cipher: CipherConfig {
            plaintext_prefixes: vec![plain_root.join("plain")],
            ..CipherConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// An engine wired to fakes, with fixture directories `plain/` and `locked/`
pub struct TestRig {
    pub dir: TempDir,
    pub engine: PlaybackEngine,
    pub local: MemoryOutput,
    pub link: Arc<SimulatedLink>,
    pub catalog: Arc<StaticCatalog>,
    pub tracking: Arc<CollectingTracking>,
}

impl TestRig {
    pub fn new() -> Self {
        Self::build(MemoryOutput::new(), SimulatedLink::new(false), StaticCatalog::default(), None)
    }

    pub fn build(
        local: MemoryOutput,
        link: SimulatedLink,
        catalog: StaticCatalog,
        completion: Option<CompletionDirective>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plain")).unwrap();
        fs::create_dir(dir.path().join("locked")).unwrap();

        let link = Arc::new(link);
        let catalog = Arc::new(catalog);
        let tracking = Arc::new(CollectingTracking::default());
        let deps = EngineDeps {
            link: link.clone(),
            catalog: catalog.clone(),
            resolver: Arc::new(FsContentResolver::new(Some(dir.path().to_path_buf()))),
            tracking: tracking.clone(),
            completion: Arc::new(FixedCompletion(completion.unwrap_or(CompletionDirective::Continue))),
        };
        let engine = PlaybackEngine::new(test_config(dir.path()), Box::new(local.clone()), deps).unwrap();

        Self {
            dir,
            engine,
            local,
            link,
            catalog,
            tracking,
        }
    }

    pub fn key(&self) -> CipherKey {
        CipherConfig::default().key().unwrap()
    }

    /// Unencrypted track of `frames` samples at 8 kHz
    pub fn track(&self, name: &str, frames: usize) -> PathBuf {
        write_wav(&self.dir.path().join("plain"), name, 8000, frames, None)
    }

    /// Encrypted effect sound
    pub fn effect(&self, name: &str, frames: usize) -> PathBuf {
        write_wav(&self.dir.path().join("locked"), name, 8000, frames, Some(&self.key()))
    }

    /// Tick the poller until it reports something other than idle
    pub fn poll_until_event(&self, timeout: Duration) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let outcome = self.engine.periodic_check();
            if !matches!(outcome, PollOutcome::Idle) || Instant::now() >= deadline {
                return outcome;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
