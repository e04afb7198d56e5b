use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

use super::Pipeline;
use crate::config::PrefillConfig;
use crate::error::PlaybackError;
use crate::models::SinkKind;

/// How the pre-fill wait ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrefillOutcome {
    /// Fill level reached the target
    Reached { level: f32, waited: Duration },
    /// The whole stream fits in the buffer and is already decoded
    InputExhausted { level: f32, waited: Duration },
    /// Fill level could not be read; a fixed delay was used instead
    FixedDelay(Duration),
}

/// Wait for the decoder output ring to reach the target fill level for `kind`.
///
/// Polls every `poll_interval`. Gives up after `timeout` with
/// `BufferPrefillTimeout`, which callers log and otherwise ignore.
pub fn wait_for_prefill(
    pipeline: &Pipeline,
    kind: SinkKind,
    config: &PrefillConfig,
) -> Result<PrefillOutcome, PlaybackError> {
    let target = config.target_for(kind);
    let started = Instant::now();
    let mut level = 0.0;

    loop {
        let Some(current) = pipeline.buffer_fill() else {
            let delay = config.fallback_for(kind);
            debug!("Buffer level unavailable, pre-filling for a fixed {:?}", delay);
            thread::sleep(delay);
            return Ok(PrefillOutcome::FixedDelay(delay));
        };
        level = current.max(level);

        if level >= target {
            let waited = started.elapsed();
            trace!("Pre-fill reached {:.0}% in {:?}", level * 100.0, waited);
            return Ok(PrefillOutcome::Reached { level, waited });
        }
        if pipeline.input_exhausted() {
            return Ok(PrefillOutcome::InputExhausted {
                level,
                waited: started.elapsed(),
            });
        }
        if started.elapsed() >= config.timeout() {
            return Err(PlaybackError::BufferPrefillTimeout { reached: level, target });
        }

        thread::sleep(config.poll_interval());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BorrowedSink, CipherKey, LocalSinkResource, PipelineParams, SinkBinding};
    use crate::testing::{write_wav, MemoryOutput};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn params(ring_samples: usize) -> PipelineParams {
        PipelineParams {
            ring_samples,
            ack_timeout: Duration::from_millis(500),
            key: CipherKey::new([0; 16], [0; 8]),
        }
    }

    fn fast_config() -> PrefillConfig {
        PrefillConfig {
            poll_interval_ms: 2,
            timeout_ms: 300,
            fallback_local_ms: 15,
            fallback_wireless_ms: 10,
            ..PrefillConfig::default()
        }
    }

    fn local_pipeline(path: PathBuf, output: &MemoryOutput, ring_samples: usize) -> Pipeline {
        let resource = LocalSinkResource::new(Box::new(output.clone()));
        Pipeline::build(path, false, SinkBinding::Local(BorrowedSink::register(resource)), &params(ring_samples))
    }

    #[test]
    fn test_reaches_target_when_output_is_blocked() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "long.wav", 8000, 40_000, None);
        let output = MemoryOutput::with_capacity(0);
        let mut pipeline = local_pipeline(path, &output, 4096);
        pipeline.run(Duration::ZERO).unwrap();

        match wait_for_prefill(&pipeline, SinkKind::Local, &fast_config()) {
            Ok(PrefillOutcome::Reached { level, .. }) => assert!(level >= 0.75),
            other => panic!("Expected Reached, got {:?}", other),
        }
        pipeline.terminate();
    }

    #[test]
    fn test_short_stream_exhausts_input() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "click.wav", 8000, 200, None);
        let output = MemoryOutput::with_capacity(0);
        let mut pipeline = local_pipeline(path, &output, 4096);
        pipeline.run(Duration::ZERO).unwrap();

        assert!(matches!(
            wait_for_prefill(&pipeline, SinkKind::Wireless, &fast_config()),
            Ok(PrefillOutcome::InputExhausted { .. })
        ));
        pipeline.terminate();
    }

    #[test]
    fn test_unreachable_target_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_wav(temp_dir.path(), "long.wav", 8000, 400_000, None);
        let output = MemoryOutput::new();
        let mut pipeline = local_pipeline(path, &output, 4096);
        pipeline.run(Duration::ZERO).unwrap();

        let config = PrefillConfig {
            local_target: 1.01,
            timeout_ms: 40,
            ..fast_config()
        };
        match wait_for_prefill(&pipeline, SinkKind::Local, &config) {
            Err(PlaybackError::BufferPrefillTimeout { target, .. }) => assert_eq!(target, 1.01),
            Ok(PrefillOutcome::InputExhausted { .. }) => {}
            other => panic!("Expected timeout, got {:?}", other),
        }
        pipeline.terminate();
    }

    #[test]
    fn test_falls_back_to_fixed_delay_before_run() {
        let output = MemoryOutput::new();
        let pipeline = local_pipeline(PathBuf::from("/missing.wav"), &output, 4096);

        let started = Instant::now();
        let outcome = wait_for_prefill(&pipeline, SinkKind::Wireless, &fast_config()).unwrap();
        assert_eq!(outcome, PrefillOutcome::FixedDelay(Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(10));
    }
}
