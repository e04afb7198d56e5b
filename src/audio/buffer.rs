use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::StreamFormat;

struct RingState {
    buffer: Vec<f32>,
    read_pos: usize,
    len: usize,
}

/// Bounded sample ring between the decoder and the sink writer.
///
/// The decoder is the only writer and the sink task the only reader. The
/// stream format is published by the writer before the first samples land.
pub struct SampleRing {
    state: Mutex<RingState>,
    capacity: usize,
    format: Mutex<Option<StreamFormat>>,
    write_finished: AtomicBool,
}

impl SampleRing {
    /// Create a new ring holding `capacity` interleaved samples
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                buffer: vec![0.0; capacity],
                read_pos: 0,
                len: 0,
            }),
            capacity,
            format: Mutex::new(None),
            write_finished: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_read(&self) -> usize {
        self.state.lock().len
    }

    pub fn available_write(&self) -> usize {
        self.capacity - self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Fraction of the ring currently holding samples, 0.0 to 1.0
    pub fn fill_level(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.available_read() as f32 / self.capacity as f32
    }

    /// Write as many samples as fit. Returns the number written.
    pub fn write(&self, data: &[f32]) -> usize {
        let mut state = self.state.lock();
        let to_write = data.len().min(self.capacity - state.len);
        if to_write == 0 {
            return 0;
        }

        let write_pos = (state.read_pos + state.len) % self.capacity;
        let first_chunk = to_write.min(self.capacity - write_pos);
        state.buffer[write_pos..write_pos + first_chunk].copy_from_slice(&data[..first_chunk]);
        let second_chunk = to_write - first_chunk;
        if second_chunk > 0 {
            state.buffer[..second_chunk].copy_from_slice(&data[first_chunk..to_write]);
        }

        state.len += to_write;
        to_write
    }

    /// Copy up to `data.len()` samples without consuming them
    pub fn peek(&self, data: &mut [f32]) -> usize {
        let state = self.state.lock();
        let to_read = data.len().min(state.len);
        let first_chunk = to_read.min(self.capacity - state.read_pos);
        data[..first_chunk].copy_from_slice(&state.buffer[state.read_pos..state.read_pos + first_chunk]);
        let second_chunk = to_read - first_chunk;
        if second_chunk > 0 {
            data[first_chunk..to_read].copy_from_slice(&state.buffer[..second_chunk]);
        }
        to_read
    }

    /// Drop `count` samples from the read side
    pub fn consume(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let count = count.min(state.len);
        state.read_pos = (state.read_pos + count) % self.capacity.max(1);
        state.len -= count;
        count
    }

    /// Read and consume up to `data.len()` samples
    pub fn read(&self, data: &mut [f32]) -> usize {
        let read = self.peek(data);
        self.consume(read)
    }

    /// Discard buffered samples and clear the end-of-stream marker
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.read_pos = 0;
        state.len = 0;
        self.write_finished.store(false, Ordering::Release);
    }

    pub fn set_format(&self, format: StreamFormat) {
        *self.format.lock() = Some(format);
    }

    pub fn format(&self) -> Option<StreamFormat> {
        *self.format.lock()
    }

    /// Mark that the writer will not produce further samples
    pub fn finish_writing(&self) {
        self.write_finished.store(true, Ordering::Release);
    }

    pub fn is_write_finished(&self) -> bool {
        self.write_finished.load(Ordering::Acquire)
    }

    /// True once the writer finished and every sample has been consumed
    pub fn is_drained(&self) -> bool {
        self.is_write_finished() && self.is_empty()
    }

    /// Playback time represented by the buffered samples
    pub fn buffered_duration(&self) -> Duration {
        match self.format() {
            Some(format) if format.sample_rate > 0 && format.channels > 0 => {
                let frames = self.available_read() / format.channels as usize;
                Duration::from_secs_f64(frames as f64 / format.sample_rate as f64)
            }
            _ => Duration::ZERO,
        }
    }
}
