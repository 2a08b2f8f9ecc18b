//! Amplitude sampling for the live waveform
//!
//! The capture callback pushes samples into a bounded ring buffer. Once per
//! frame the sampler reads a snapshot of byte magnitudes from it. The frame
//! stream belongs to one session generation and ends as soon as a newer
//! generation starts (or the session stops).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Number of magnitude bins per frame (matches a 256-point analysis window)
pub const DEFAULT_BIN_COUNT: usize = 128;

/// Buffer capacity (~200ms at 48kHz mono)
const BUFFER_CAPACITY: usize = 10_000;

/// An analysis tap that can be polled for the current amplitude picture.
pub trait AmplitudeSource: Send + Sync {
    fn bin_count(&self) -> usize;

    /// Fill `out` with magnitudes in 0..=255. Missing data reads as silence.
    fn fill(&self, out: &mut [u8]);
}

/// Ring buffer of recent samples used for visualization
pub struct AmplitudeBuffer {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl AmplitudeBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(BUFFER_CAPACITY),
            capacity: BUFFER_CAPACITY,
        }
    }

    /// Add samples to the buffer, removing oldest samples if at capacity
    pub fn push_samples(&mut self, samples: &[i16]) {
        let len = samples.len();

        // If incoming samples exceed capacity, just keep the last part
        if len >= self.capacity {
            self.samples.clear();
            self.samples.extend(&samples[len - self.capacity..]);
            return;
        }

        let to_remove = (self.samples.len() + len).saturating_sub(self.capacity);
        if to_remove > 0 {
            self.samples.drain(0..to_remove);
        }

        self.samples.extend(samples);
    }

    /// Split the buffer into `out.len()` segments and write each segment's
    /// RMS, scaled to 0..=255.
    pub fn magnitudes(&self, out: &mut [u8]) {
        out.fill(0);
        if self.samples.is_empty() || out.is_empty() {
            return;
        }

        let bins = out.len();
        let per_bin = (self.samples.len() / bins).max(1);

        for (idx, slot) in out.iter_mut().enumerate() {
            let start = idx * per_bin;
            if start >= self.samples.len() {
                break;
            }
            let end = ((idx + 1) * per_bin).min(self.samples.len());

            let sum_squares: f64 = (start..end)
                .map(|i| {
                    let normalized = self.samples[i] as f64 / i16::MAX as f64;
                    normalized * normalized
                })
                .sum();
            let rms = (sum_squares / (end - start) as f64).sqrt().clamp(0.0, 1.0);
            *slot = (rms * 255.0).round() as u8;
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for AmplitudeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle shared between the audio callback and the sampler.
#[derive(Clone, Default)]
pub struct SharedAmplitude {
    inner: Arc<Mutex<AmplitudeBuffer>>,
}

impl SharedAmplitude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_samples(&self, samples: &[i16]) {
        if let Ok(mut buffer) = self.inner.lock() {
            buffer.push_samples(samples);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.inner.lock() {
            buffer.clear();
        }
    }
}

impl AmplitudeSource for SharedAmplitude {
    fn bin_count(&self) -> usize {
        DEFAULT_BIN_COUNT
    }

    fn fill(&self, out: &mut [u8]) {
        match self.inner.lock() {
            Ok(buffer) => buffer.magnitudes(out),
            Err(_) => out.fill(0),
        }
    }
}

/// Generation counter shared by a controller and its frame loops.
/// Each session start or stop advances it; a loop that captured an older
/// value stops at its next frame.
#[derive(Debug, Clone, Default)]
pub struct SessionGeneration(Arc<AtomicU64>);

impl SessionGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Start a new generation and return it
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

struct FrameLoop {
    source: Arc<dyn AmplitudeSource>,
    generation: SessionGeneration,
    captured: u64,
    ticker: Interval,
}

/// One magnitude frame per `frame_interval` for as long as `captured` is the
/// current generation. The stream is single-use: once it ends it stays ended.
pub fn amplitude_frames(
    source: Arc<dyn AmplitudeSource>,
    generation: SessionGeneration,
    captured: u64,
    frame_interval: Duration,
) -> impl Stream<Item = Vec<u8>> {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let state = FrameLoop {
        source,
        generation,
        captured,
        ticker,
    };

    stream::unfold(state, |mut state| async move {
        state.ticker.tick().await;
        if !state.generation.is_current(state.captured) {
            log::debug!("Frame loop for generation {} ended", state.captured);
            return None;
        }
        let mut frame = vec![0u8; state.source.bin_count()];
        state.source.fill(&mut frame);
        Some((frame, state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    struct Constant(u8);

    impl AmplitudeSource for Constant {
        fn bin_count(&self) -> usize {
            4
        }

        fn fill(&self, out: &mut [u8]) {
            out.fill(self.0);
        }
    }

    #[test]
    fn test_buffer_bounded() {
        let mut buffer = AmplitudeBuffer::new();
        let samples: Vec<i16> = (0..15_000).map(|i| (i % 1000) as i16).collect();
        buffer.push_samples(&samples);
        assert_eq!(buffer.len(), BUFFER_CAPACITY);
    }

    #[test]
    fn test_push_samples_incremental() {
        let mut buffer = AmplitudeBuffer::new();
        buffer.push_samples(&[100, 200]);
        assert_eq!(buffer.len(), 2);
        buffer.push_samples(&[300, 400, 500]);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_empty_buffer_is_silent() {
        let buffer = AmplitudeBuffer::new();
        let mut out = [7u8; 16];
        buffer.magnitudes(&mut out);
        assert!(out.iter().all(|&m| m == 0));
    }

    #[test]
    fn test_max_amplitude_saturates() {
        let mut buffer = AmplitudeBuffer::new();
        buffer.push_samples(&vec![i16::MAX; 1024]);
        let mut out = [0u8; 8];
        buffer.magnitudes(&mut out);
        assert!(out.iter().all(|&m| m >= 254), "got {:?}", out);
    }

    #[test]
    fn test_sparse_buffer_leaves_tail_silent() {
        let mut buffer = AmplitudeBuffer::new();
        buffer.push_samples(&[i16::MAX, i16::MAX]);
        let mut out = [0u8; 4];
        buffer.magnitudes(&mut out);
        assert!(out[0] > 0 && out[1] > 0);
        assert_eq!(&out[2..], &[0, 0]);
    }

    #[test]
    fn generation_advance_invalidates_old_value() {
        let generation = SessionGeneration::new();
        let first = generation.advance();
        assert!(generation.is_current(first));
        let second = generation.advance();
        assert!(!generation.is_current(first));
        assert!(generation.is_current(second));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_stop_when_generation_moves_on() {
        let generation = SessionGeneration::new();
        let captured = generation.advance();
        let frames = amplitude_frames(
            Arc::new(Constant(42)),
            generation.clone(),
            captured,
            Duration::from_millis(16),
        );
        futures_util::pin_mut!(frames);

        assert_eq!(frames.next().await, Some(vec![42; 4]));
        assert_eq!(frames.next().await, Some(vec![42; 4]));

        generation.advance();
        assert_eq!(frames.next().await, None);
    }
}
