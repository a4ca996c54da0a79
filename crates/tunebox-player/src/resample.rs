//! Sample-rate conversion for songs the output device cannot play natively.
//!
//! Runs inline on the decode thread: decoded frames go in, converted frames come out through
//! a callback, in fixed-size chunks so cancellation stays responsive.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
    from_hz: u32,
    to_hz: u32,
}

impl StreamResampler {
    pub fn new(from_hz: u32, to_hz: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let ratio = to_hz as f64 / from_hz.max(1) as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler =
            Async::<f32>::new_sinc(ratio, 1.1, &params, chunk_frames, channels, FixedAsync::Input)
                .with_context(|| format!("create resampler {from_hz} Hz -> {to_hz} Hz"))?;

        let out_frames = ((chunk_frames as f64 * ratio * 1.1).ceil() as usize + sinc_len)
            .max(chunk_frames * 3);

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; out_frames * channels],
            from_hz,
            to_hz,
        })
    }

    pub fn rates(&self) -> (u32, u32) {
        (self.from_hz, self.to_hz)
    }

    /// Feed interleaved input. Each full chunk is converted and passed to `emit`.
    ///
    /// Returns `Ok(false)` as soon as `emit` does.
    pub fn push<F>(&mut self, input: &[f32], mut emit: F) -> Result<bool>
    where
        F: FnMut(&[f32]) -> bool,
    {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;

        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let produced = self.process(consumed, self.chunk_frames, None)?;
            consumed += chunk_samples;
            if produced > 0 && !emit(&self.out[..produced]) {
                self.pending.drain(..consumed);
                return Ok(false);
            }
        }
        self.pending.drain(..consumed);
        Ok(true)
    }

    /// Convert whatever partial chunk is left over at the end of a song.
    pub fn flush<F>(&mut self, mut emit: F) -> Result<bool>
    where
        F: FnMut(&[f32]) -> bool,
    {
        let tail_frames = self.pending.len() / self.channels;
        if tail_frames == 0 {
            self.pending.clear();
            return Ok(true);
        }
        let produced = self.process(0, tail_frames, Some(tail_frames))?;
        self.pending.clear();
        Ok(produced == 0 || emit(&self.out[..produced]))
    }

    fn process(&mut self, offset: usize, frames: usize, partial: Option<usize>) -> Result<usize> {
        let end = offset + frames * self.channels;
        let input = InterleavedSlice::new(&self.pending[offset..end], self.channels, frames)
            .context("interleaved slice (input)")?;
        let out_frames = self.out.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
            .context("interleaved slice (output)")?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_, produced_frames) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .context("resample chunk")?;
        Ok(produced_frames * self.channels)
    }
}
