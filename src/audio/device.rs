use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::{AudioOutput, FormatConverter, SampleRing, StreamFormat};
use crate::error::PipelineError;

/// Device-side buffering: 100 ms at 48 kHz stereo
const DEVICE_RING_SAMPLES: usize = 9_600;

/// Converts incoming PCM to the device format and queues it for the stream callback
pub(crate) struct DeviceFeed {
    ring: Arc<SampleRing>,
    muted: Arc<AtomicBool>,
    device_format: StreamFormat,
    converter: Option<FormatConverter>,
    pending: Vec<f32>,
}

impl DeviceFeed {
    pub(crate) fn new(device_format: StreamFormat, ring: Arc<SampleRing>, muted: Arc<AtomicBool>) -> Self {
        ring.set_format(device_format);
        Self {
            ring,
            muted,
            device_format,
            converter: None,
            pending: Vec::new(),
        }
    }

    /// Queue `samples`, returning how many input samples were taken.
    ///
    /// Converted output that does not fit is held back and pushed first on the
    /// next call; nothing new is accepted until it drains.
    pub(crate) fn push(&mut self, samples: &[f32], format: StreamFormat) -> usize {
        if !self.pending.is_empty() {
            let written = self.ring.write(&self.pending);
            self.pending.drain(..written);
            if !self.pending.is_empty() {
                return 0;
            }
        }

        if self.converter.as_ref().map(FormatConverter::input_format) != Some(format) {
            debug!("Output conversion {:?} -> {:?}", format, self.device_format);
            self.converter = Some(FormatConverter::new(format, self.device_format));
        }

        let converted = match &mut self.converter {
            Some(converter) => converter.process(samples),
            None => samples.to_vec(),
        };
        let written = self.ring.write(&converted);
        if written < converted.len() {
            self.pending.extend_from_slice(&converted[written..]);
        }
        samples.len()
    }

    pub(crate) fn flush(&mut self) {
        self.pending.clear();
        self.ring.clear();
        if let Some(converter) = &mut self.converter {
            converter.reset();
        }
    }

    pub(crate) fn pending_samples(&self) -> usize {
        self.pending.len() + self.ring.available_read()
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

/// Local speaker output on the default (or a named) cpal device.
///
/// `cpal::Stream` is not `Send`, so a dedicated "audio-output" thread builds
/// and owns it. The stream callback drains a device ring fed by `write`.
pub struct CpalOutput {
    name: String,
    feed: DeviceFeed,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open(preferred_device: Option<&str>) -> Result<Self, PipelineError> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| PipelineError::Output(format!("Failed to enumerate devices: {}", e)))?
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| PipelineError::SinkUnavailable(format!("output device '{}' not found", wanted)))?,
            None => host
                .default_output_device()
                .ok_or_else(|| PipelineError::SinkUnavailable("no default output device".to_string()))?,
        };
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let ring = Arc::new(SampleRing::new(DEVICE_RING_SAMPLES));
        let muted = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamFormat, String>>();

        let thread = {
            let ring = Arc::clone(&ring);
            let muted = Arc::clone(&muted);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let stream = match build_stream(&device, &ring, &muted) {
                        Ok((stream, format)) => {
                            let _ = ready_tx.send(Ok(format));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    while running.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(10));
                    }

                    let _ = stream.pause();
                })
                .map_err(|e| PipelineError::TaskSpawn(format!("audio-output: {}", e)))?
        };

        let device_format = ready_rx
            .recv()
            .map_err(|_| PipelineError::Output("audio-output thread exited during setup".to_string()))?
            .map_err(PipelineError::Output)?;

        info!(
            "Local output '{}' opened at {} Hz, {} channels",
            name, device_format.sample_rate, device_format.channels
        );

        Ok(Self {
            name,
            feed: DeviceFeed::new(device_format, ring, muted),
            running,
            thread: Some(thread),
        })
    }
}

fn build_stream(
    device: &cpal::Device,
    ring: &Arc<SampleRing>,
    muted: &Arc<AtomicBool>,
) -> Result<(Stream, StreamFormat), String> {
    let default_config = device
        .default_output_config()
        .map_err(|e| format!("Failed to get default config: {}", e))?;
    let sample_format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let stream = match sample_format {
        SampleFormat::F32 => create_stream::<f32>(device, &config, ring, muted),
        SampleFormat::I16 => create_stream::<i16>(device, &config, ring, muted),
        SampleFormat::U16 => create_stream::<u16>(device, &config, ring, muted),
        other => return Err(format!("Unsupported sample format: {:?}", other)),
    }?;

    stream.play().map_err(|e| format!("Failed to start audio stream: {}", e))?;
    Ok((stream, format))
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: &Arc<SampleRing>,
    muted: &Arc<AtomicBool>,
) -> Result<Stream, String>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    T: cpal::FromSample<f32>,
{
    let ring = Arc::clone(ring);
    let muted = Arc::clone(muted);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let read = ring.read(&mut scratch);
                let silent = muted.load(Ordering::Relaxed);

                for (i, sample) in data.iter_mut().enumerate() {
                    let value = if silent || i >= read { 0.0 } else { scratch[i] };
                    *sample = cpal::Sample::from_sample(value);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {}", e))
}

impl AudioOutput for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, samples: &[f32], format: StreamFormat) -> Result<usize, PipelineError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(PipelineError::Output(format!("output '{}' is closed", self.name)));
        }
        Ok(self.feed.push(samples, format))
    }

    fn set_muted(&mut self, muted: bool) {
        self.feed.set_muted(muted);
    }

    fn is_muted(&self) -> bool {
        self.feed.is_muted()
    }

    fn flush(&mut self) {
        self.feed.flush();
    }

    fn pending_samples(&self) -> usize {
        self.feed.pending_samples()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("audio-output thread panicked");
            }
        }
    }
}
