//! Streaming conversion of decoded interleaved f32 audio to the output device's format.
//!
//! Channel count is adapted first (mono is duplicated, surplus channels are
//! averaged down), then the sample rate is converted by linear interpolation.
//! State carries across calls so chunk boundaries do not click.

use super::StreamFormat;

#[derive(Debug, Clone)]
pub struct FormatConverter {
    input: StreamFormat,
    output: StreamFormat,
    /// Source frames advanced per output frame
    step: f64,
    /// Fractional read position, relative to `last_frame`
    phase: f64,
    last_frame: Option<Vec<f32>>,
}

impl FormatConverter {
    pub fn new(input: StreamFormat, output: StreamFormat) -> Self {
        let step = if output.sample_rate == 0 {
            0.0
        } else {
            input.sample_rate as f64 / output.sample_rate as f64
        };
        Self {
            input,
            output,
            step,
            phase: 0.0,
            last_frame: None,
        }
    }

    pub fn input_format(&self) -> StreamFormat {
        self.input
    }

    pub fn output_format(&self) -> StreamFormat {
        self.output
    }

    pub fn is_passthrough(&self) -> bool {
        self.input == self.output
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.last_frame = None;
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        if self.input.channels == 0 || self.output.channels == 0 || self.step == 0.0 {
            return Vec::new();
        }

        let mapped = self.map_channels(samples);
        if self.input.sample_rate == self.output.sample_rate {
            return mapped;
        }
        self.convert_rate(&mapped)
    }

    fn map_channels(&self, samples: &[f32]) -> Vec<f32> {
        let in_ch = self.input.channels as usize;
        let out_ch = self.output.channels as usize;
        if in_ch == out_ch {
            return samples.to_vec();
        }

        let frames = samples.len() / in_ch;
        let mut out = Vec::with_capacity(frames * out_ch);
        for frame in samples.chunks_exact(in_ch) {
            if in_ch == 1 {
                out.extend(std::iter::repeat(frame[0]).take(out_ch));
            } else if out_ch == 1 {
                out.push(frame.iter().sum::<f32>() / in_ch as f32);
            } else {
                for ch in 0..out_ch {
                    out.push(frame[ch.min(in_ch - 1)]);
                }
            }
        }
        out
    }

    fn convert_rate(&mut self, samples: &[f32]) -> Vec<f32> {
        let ch = self.output.channels as usize;
        let in_frames = samples.len() / ch;
        if in_frames == 0 {
            return Vec::new();
        }

        // Frame 0 of the working view is the carried-over frame, or a copy of the
        // first input frame at stream start.
        let carried = match self.last_frame.take() {
            Some(frame) => frame,
            None => samples[..ch].to_vec(),
        };

        let total = in_frames + 1;
        let estimated = ((in_frames as f64) / self.step).ceil() as usize + 1;
        let mut out = Vec::with_capacity(estimated * ch);

        while self.phase + 1.0 < total as f64 {
            let base = self.phase.floor() as usize;
            let frac = (self.phase - base as f64) as f32;
            let a = working_frame(&carried, samples, base, ch);
            let b = working_frame(&carried, samples, base + 1, ch);
            for c in 0..ch {
                out.push(a[c] + (b[c] - a[c]) * frac);
            }
            self.phase += self.step;
        }

        self.phase -= in_frames as f64;
        self.last_frame = Some(samples[(in_frames - 1) * ch..in_frames * ch].to_vec());
        out
    }
}

fn working_frame<'a>(carried: &'a [f32], samples: &'a [f32], index: usize, ch: usize) -> &'a [f32] {
    if index == 0 {
        carried
    } else {
        &samples[(index - 1) * ch..index * ch]
    }
}
