//! Decode stage: byte stream in, stereo `f32` PCM into the ring buffer out.
//!
//! [`Decoder`] is the seam the decode loop drives. [`SymphoniaDecoder`] is the real one;
//! anything else (tests, synthetic sources) only has to honor the same contract:
//! - report the source sample rate through [`DecodeContext::on_sample_rate`] before writing
//! - write in bounded chunks and stop promptly once [`DecodeContext::cancel`] is raised
//!
//! [`PcmSink`] does the common part: channel mapping to stereo, optional resampling when the
//! output kept a different rate, and chunked cancellable writes into the ring.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::resample::StreamResampler;
use crate::ring::SampleRing;
use crate::stream::SongStream;

/// Channels written to the ring buffer.
pub const OUTPUT_CHANNELS: usize = 2;

/// How a decode run ended. Errors are reported separately through `Result`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The stream was exhausted.
    Finished,
    /// Cancellation was requested before the end.
    Cancelled,
}

/// Everything a decoder needs from the decode loop for one song.
pub struct DecodeContext<'a> {
    pub ring: &'a SampleRing,
    pub cancel: &'a AtomicBool,
    /// Called with the source rate; returns the rate the output is actually running at.
    pub on_sample_rate: &'a (dyn Fn(u32) -> u32 + Send + Sync),
    /// Container hint, usually the file extension.
    pub hint: Option<String>,
    pub chunk_frames: usize,
}

impl DecodeContext<'_> {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn sink(&self) -> PcmSink<'_> {
        PcmSink::new(self)
    }
}

pub trait Decoder: Send {
    fn decode(&mut self, stream: SongStream, ctx: &DecodeContext<'_>) -> Result<DecodeOutcome>;
}

/// Writes decoded PCM into the ring as interleaved stereo at the output's rate.
pub struct PcmSink<'a> {
    ctx: &'a DecodeContext<'a>,
    source_rate: Option<u32>,
    resampler: Option<StreamResampler>,
    stereo: Vec<f32>,
}

impl<'a> PcmSink<'a> {
    fn new(ctx: &'a DecodeContext<'a>) -> Self {
        Self {
            ctx,
            source_rate: None,
            resampler: None,
            stereo: Vec::new(),
        }
    }

    /// Output rate negotiated for the current source rate, if any audio was written yet.
    pub fn resampling(&self) -> Option<(u32, u32)> {
        self.resampler.as_ref().map(StreamResampler::rates)
    }

    /// Write interleaved samples with `channels` channels at `rate` Hz.
    ///
    /// Returns `Ok(false)` if the write was cut short by cancellation.
    pub fn write(&mut self, samples: &[f32], channels: usize, rate: u32) -> Result<bool> {
        if self.source_rate != Some(rate) && !self.switch_rate(rate)? {
            return Ok(false);
        }
        to_stereo(samples, channels, &mut self.stereo);

        let ring = self.ctx.ring;
        let cancel = self.ctx.cancel;
        let chunk = self.ctx.chunk_frames.max(1) * OUTPUT_CHANNELS;
        match self.resampler.as_mut() {
            Some(resampler) => {
                resampler.push(&self.stereo, |out| put_chunked(ring, cancel, out, chunk))
            }
            None => Ok(put_chunked(ring, cancel, &self.stereo, chunk)),
        }
    }

    /// Drain the resampler tail. Call once at the natural end of a song.
    pub fn finish(&mut self) -> Result<bool> {
        let ring = self.ctx.ring;
        let cancel = self.ctx.cancel;
        let chunk = self.ctx.chunk_frames.max(1) * OUTPUT_CHANNELS;
        match self.resampler.as_mut() {
            Some(resampler) => resampler.flush(|out| put_chunked(ring, cancel, out, chunk)),
            None => Ok(true),
        }
    }

    fn switch_rate(&mut self, rate: u32) -> Result<bool> {
        if !self.finish()? {
            return Ok(false);
        }
        let output_rate = (self.ctx.on_sample_rate)(rate);
        self.source_rate = Some(rate);
        self.resampler = if output_rate != rate && output_rate > 0 {
            tracing::info!(from_hz = rate, to_hz = output_rate, "resampling");
            Some(StreamResampler::new(
                rate,
                output_rate,
                OUTPUT_CHANNELS,
                self.ctx.chunk_frames,
            )?)
        } else {
            None
        };
        Ok(true)
    }
}

fn put_chunked(ring: &SampleRing, cancel: &AtomicBool, samples: &[f32], chunk: usize) -> bool {
    samples.chunks(chunk).all(|piece| ring.put(piece, cancel))
}

/// Map interleaved `channels`-channel audio to interleaved stereo.
///
/// Mono is duplicated; layouts wider than stereo keep their first two (front) channels.
fn to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    match channels {
        0 => {}
        1 => out.extend(samples.iter().flat_map(|s| [*s, *s])),
        2 => out.extend_from_slice(samples),
        n => {
            for frame in samples.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

/// Symphonia-backed decoder for every format enabled in the workspace.
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&mut self, stream: SongStream, ctx: &DecodeContext<'_>) -> Result<DecodeOutcome> {
        let mut hint = Hint::new();
        if let Some(ext) = ctx.hint.as_deref() {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(stream), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("probe stream")?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();
        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        tracing::debug!(
            codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
            sample_rate = ?codec_params.sample_rate,
            duration_ms = ?duration_ms_from_codec_params(&codec_params),
            "decoding"
        );

        let mut sink = ctx.sink();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            if ctx.cancelled() {
                return Ok(DecodeOutcome::Cancelled);
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(_) if ctx.cancelled() => return Ok(DecodeOutcome::Cancelled),
                Err(e) => return Err(e).context("read packet"),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::debug!(reason = msg, "skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::IoError(_)) => continue,
                Err(e) => return Err(e).context("decode packet"),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            let needed = frames * spec.channels.count();
            if sample_buf.as_ref().is_none_or(|b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            if !sink.write(buf.samples(), spec.channels.count(), spec.rate)? {
                return Ok(DecodeOutcome::Cancelled);
            }
        }

        // A stopped stream reads as EOF; tell the two apart.
        if ctx.cancelled() || !sink.finish()? {
            return Ok(DecodeOutcome::Cancelled);
        }
        Ok(DecodeOutcome::Finished)
    }
}

/// Best-effort duration in milliseconds from codec metadata.
pub(crate) fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "flac",
        CODEC_TYPE_MP3 => "mp3",
        CODEC_TYPE_AAC => "aac",
        CODEC_TYPE_ALAC => "alac",
        CODEC_TYPE_VORBIS => "vorbis",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "pcm_s16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "pcm_s24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "pcm_f32",
        _ => return None,
    };
    Some(name)
}
