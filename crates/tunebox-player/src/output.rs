//! Audio output: the hardware callback and its control surface.
//!
//! The CPAL stream lives on a dedicated output thread (streams are not `Send` on every
//! platform). Other threads talk to it over a command channel, e.g. to reopen the device at
//! a new sample rate when a song starts.
//!
//! The callback itself only touches atomics and [`SampleRing::get`]:
//! - paused: output silence and leave the ring untouched ("pause means pause")
//! - playing: read whole chunks from the ring, silence on underrun
//! - map the ring's stereo frames onto the device channel layout and sample format

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::decode::OUTPUT_CHANNELS;
use crate::device;
use crate::ring::SampleRing;

/// Upper bound on frames fetched from the ring per read inside the callback.
const CALLBACK_CHUNK_FRAMES: usize = 4096;
const UNDERRUN_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// What the decode loop and the control plane need from an audio output.
pub trait AudioSink: Send + Sync {
    /// Ask the output to run at `rate`; returns the rate it actually runs at.
    fn set_sample_rate(&self, rate: u32) -> u32;
    fn sample_rate(&self) -> u32;
    /// Returns `true` if the output was playing.
    fn pause(&self) -> bool;
    /// Returns `true` if the output was paused.
    fn resume(&self) -> bool;
    fn is_playing(&self) -> bool;
}

enum OutputCommand {
    SetRate { rate: u32, reply: Sender<u32> },
    Shutdown,
}

/// Sound-card output driven by CPAL.
pub struct CpalOutput {
    cmd_tx: Sender<OutputCommand>,
    playing: Arc<AtomicBool>,
    rate: Arc<AtomicU32>,
    thread: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the device (by substring, or the default) and start the stream.
    ///
    /// Fails if the device cannot be opened; there is no silent fallback.
    pub fn open(device: Option<String>, ring: Arc<SampleRing>, initial_rate: u32) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let playing = Arc::new(AtomicBool::new(true));
        let rate = Arc::new(AtomicU32::new(initial_rate));

        let worker = OutputWorker {
            ring,
            playing: playing.clone(),
            rate: rate.clone(),
        };
        let thread = std::thread::Builder::new()
            .name("tunebox-output".into())
            .spawn(move || worker.run(device, initial_rate, cmd_rx, ready_tx))
            .context("spawn output thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during startup"))??;

        Ok(Self {
            cmd_tx,
            playing,
            rate,
            thread: std::sync::Mutex::new(Some(thread)),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(OutputCommand::Shutdown);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AudioSink for CpalOutput {
    fn set_sample_rate(&self, rate: u32) -> u32 {
        let (reply, answer) = crossbeam_channel::bounded(1);
        if self
            .cmd_tx
            .send(OutputCommand::SetRate { rate, reply })
            .is_err()
        {
            return self.sample_rate();
        }
        answer.recv().unwrap_or_else(|_| self.sample_rate())
    }

    fn sample_rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    fn pause(&self) -> bool {
        self.playing.swap(false, Ordering::Relaxed)
    }

    fn resume(&self) -> bool {
        !self.playing.swap(true, Ordering::Relaxed)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

struct OutputWorker {
    ring: Arc<SampleRing>,
    playing: Arc<AtomicBool>,
    rate: Arc<AtomicU32>,
}

struct ActiveStream {
    _stream: cpal::Stream,
    rate: u32,
}

impl OutputWorker {
    fn run(
        self,
        device_name: Option<String>,
        initial_rate: u32,
        cmd_rx: Receiver<OutputCommand>,
        ready_tx: Sender<Result<()>>,
    ) {
        let host = cpal::default_host();
        let opened = device::pick_device(&host, device_name.as_deref()).and_then(|device| {
            let stream = self.open_stream(&device, initial_rate)?;
            Ok((device, stream))
        });
        let (device, stream) = match opened {
            Ok(v) => v,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if let Ok(desc) = device.description() {
            tracing::info!(device = %desc, rate = stream.rate, "output device");
        }
        let mut active = Some(stream);
        let _ = ready_tx.send(Ok(()));

        let mut last_underruns = self.ring.underruns();
        let mut last_report = Instant::now();
        loop {
            match cmd_rx.recv_timeout(UNDERRUN_LOG_INTERVAL) {
                Ok(OutputCommand::SetRate { rate, reply }) => {
                    active = self.reconfigure(&device, active, rate);
                    let now = active.as_ref().map(|s| s.rate).unwrap_or(rate);
                    let _ = reply.send(now);
                }
                Ok(OutputCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if last_report.elapsed() >= UNDERRUN_LOG_INTERVAL {
                let underruns = self.ring.underruns();
                if underruns > last_underruns && self.playing.load(Ordering::Relaxed) {
                    tracing::info!(count = underruns - last_underruns, "output underruns");
                }
                last_underruns = underruns;
                last_report = Instant::now();
            }
        }
        tracing::debug!("output thread stopped");
    }

    /// Reopen the stream at `rate` when the device supports it exactly.
    fn reconfigure(
        &self,
        device: &cpal::Device,
        active: Option<ActiveStream>,
        rate: u32,
    ) -> Option<ActiveStream> {
        if active.as_ref().is_some_and(|s| s.rate == rate) {
            return active;
        }
        let supported = device::pick_output_config(device, rate)
            .map(|cfg| cfg.sample_rate() == rate)
            .unwrap_or(false);
        if !supported && active.is_some() {
            tracing::debug!(rate, "device cannot run at source rate; keeping current stream");
            return active;
        }

        let previous = active.as_ref().map(|s| s.rate);
        // Release the device before reopening it; some backends allow one stream only.
        drop(active);
        match self.open_stream(device, rate) {
            Ok(stream) => {
                tracing::info!(rate = stream.rate, "output reconfigured");
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(rate, "reopen output failed: {e:#}");
                let fallback = previous?;
                match self.open_stream(device, fallback) {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        tracing::error!(rate = fallback, "output lost: {e:#}");
                        None
                    }
                }
            }
        }
    }

    fn open_stream(&self, device: &cpal::Device, rate: u32) -> Result<ActiveStream> {
        let supported = device::pick_output_config(device, rate)?;
        let sample_format = supported.sample_format();
        let mut config = supported.config();
        config.buffer_size = device::pick_buffer_size(&supported);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, &self.ring, &self.playing),
            cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, &self.ring, &self.playing),
            cpal::SampleFormat::I32 => build_stream::<i32>(device, &config, &self.ring, &self.playing),
            cpal::SampleFormat::U16 => build_stream::<u16>(device, &config, &self.ring, &self.playing),
            other => Err(anyhow!("Unsupported sample format: {other:?}")),
        }?;
        stream.play().context("start output stream")?;

        self.rate.store(config.sample_rate, Ordering::Relaxed);
        tracing::debug!(
            rate = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "output stream opened"
        );
        Ok(ActiveStream {
            _stream: stream,
            rate: config.sample_rate,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: &Arc<SampleRing>,
    playing: &Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let ring = ring.clone();
    let playing = playing.clone();
    let chunk_frames = callback_chunk_frames(ring.capacity());
    // Allocated here so the callback never allocates.
    let mut scratch = vec![0.0f32; chunk_frames * OUTPUT_CHANNELS];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if !playing.load(Ordering::Relaxed) {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            }
            for out in data.chunks_mut(chunk_frames * channels_out) {
                let frames = out.len() / channels_out;
                let src = &mut scratch[..frames * OUTPUT_CHANNELS];
                ring.get(src, 0.0);
                write_frames(src, out, channels_out);
            }
        },
        |err| tracing::warn!("stream error: {err}"),
        None,
    )?;
    Ok(stream)
}

/// Frames per ring read: at most half the ring, so a read can succeed while the decoder
/// is still refilling the other half.
fn callback_chunk_frames(ring_capacity: usize) -> usize {
    (ring_capacity / OUTPUT_CHANNELS / 2).clamp(1, CALLBACK_CHUNK_FRAMES)
}

/// Copy stereo frames into a `channels_out`-wide device buffer.
///
/// Mono devices get the L/R average; extra device channels stay silent.
fn write_frames<T>(src: &[f32], out: &mut [T], channels_out: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    for (frame, dst) in src
        .chunks_exact(OUTPUT_CHANNELS)
        .zip(out.chunks_exact_mut(channels_out))
    {
        for (ch, sample) in dst.iter_mut().enumerate() {
            let value = match (channels_out, ch) {
                (1, _) => 0.5 * (frame[0] + frame[1]),
                (_, 0) => frame[0],
                (_, 1) => frame[1],
                _ => 0.0,
            };
            *sample = <T as cpal::Sample>::from_sample::<f32>(value);
        }
    }
}

/// Output without a sound card: accepts any rate and discards audio.
///
/// Nothing drains the ring, so a decoder blocks once it is full until it is cancelled.
#[derive(Debug)]
pub struct NullOutput {
    playing: AtomicBool,
    rate: AtomicU32,
}

impl NullOutput {
    pub fn new(rate: u32) -> Self {
        Self {
            playing: AtomicBool::new(true),
            rate: AtomicU32::new(rate),
        }
    }
}

impl AudioSink for NullOutput {
    fn set_sample_rate(&self, rate: u32) -> u32 {
        self.rate.store(rate, Ordering::Relaxed);
        rate
    }

    fn sample_rate(&self) -> u32 {
        self.rate.load(Ordering::Relaxed)
    }

    fn pause(&self) -> bool {
        self.playing.swap(false, Ordering::Relaxed)
    }

    fn resume(&self) -> bool {
        !self.playing.swap(true, Ordering::Relaxed)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_reads_fit_in_half_the_ring() {
        assert_eq!(callback_chunk_frames(8192), 2048);
        assert_eq!(callback_chunk_frames(4096), 1024);
        assert_eq!(callback_chunk_frames(1 << 20), CALLBACK_CHUNK_FRAMES);
        assert_eq!(callback_chunk_frames(2), 1);
    }

    #[test]
    fn small_ring_still_serves_callback_reads() {
        let ring = SampleRing::new(4096, Duration::from_millis(1));
        let frames = callback_chunk_frames(ring.capacity());
        let cancel = AtomicBool::new(false);
        assert!(ring.put(&vec![0.25; frames * OUTPUT_CHANNELS], &cancel));
        let mut scratch = vec![0.0; frames * OUTPUT_CHANNELS];
        assert!(ring.get(&mut scratch, 0.0));
        assert!(scratch.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn write_frames_passes_stereo_through() {
        let mut out = [0.0f32; 4];
        write_frames(&[0.1, 0.2, 0.3, 0.4], &mut out, 2);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn write_frames_downmixes_to_mono() {
        let mut out = [0.0f32; 2];
        write_frames(&[0.2, 0.4, 1.0, 0.0], &mut out, 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn write_frames_silences_extra_channels() {
        let mut out = [1.0f32; 4];
        write_frames(&[0.5, -0.5], &mut out, 4);
        assert_eq!(out, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn write_frames_converts_to_integer_formats() {
        let mut out = [0i16; 2];
        write_frames(&[1.0, -1.0], &mut out, 2);
        assert_eq!(out[0], i16::MAX);
        assert!(out[1] <= -i16::MAX);
    }

    #[test]
    fn null_output_tracks_pause_state() {
        let out = NullOutput::new(44_100);
        assert!(out.is_playing());
        assert!(out.pause());
        assert!(!out.pause());
        assert!(out.resume());
        assert!(!out.resume());
        assert_eq!(out.set_sample_rate(48_000), 48_000);
        assert_eq!(out.sample_rate(), 48_000);
    }
}
