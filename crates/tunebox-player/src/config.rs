use std::time::Duration;

/// Playback tuning parameters shared by the decode, resample and output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Ring buffer capacity in samples (interleaved stereo, so frames = capacity / 2).
    pub ring_capacity: usize,
    /// Decoder/resampler chunk size in frames.
    ///
    /// Bounds how long the decode thread can go without checking for cancellation.
    pub chunk_frames: usize,
    /// How long a producer sleeps before re-checking a full ring buffer.
    pub producer_backoff: Duration,
    /// Sample rate the output is opened with before the first song arrives.
    pub initial_sample_rate: u32,
    /// Network stream settings.
    pub http: HttpConfig,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            ring_capacity: 8192,
            chunk_frames: 1024,
            producer_backoff: Duration::from_millis(5),
            initial_sample_rate: 44_100,
            http: HttpConfig::default(),
        }
    }
}

/// Configuration for HTTP range fetching.
#[derive(Clone, Debug)]
pub struct HttpConfig {
    /// Bytes per fetched block.
    pub block_size: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            block_size: 512 * 1024,
            timeout: Duration::from_secs(10),
        }
    }
}
