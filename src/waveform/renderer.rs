//! Waveform bars
//!
//! Maps each magnitude frame onto a fixed number of bars (heights in percent),
//! optionally smooths them, and hands them to a display sink. A sink that
//! fails to draw is logged and skipped; it never affects recording.

use std::io::Write;
use std::sync::{Arc, Mutex};

use futures_util::{Stream, StreamExt};

/// Number of visualization bars
pub const DEFAULT_BAR_COUNT: usize = 32;

/// Take every second bin, which keeps the bars in the lower half of the
/// spectrum where voice energy sits
pub const DEFAULT_BIN_STRIDE: usize = 2;

/// EMA smoothing factor (0.3 = 30% new value, 70% previous)
const EMA_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError(pub String);

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Waveform render failed: {}", self.0)
    }
}

impl std::error::Error for RenderError {}

/// Display handles for the bars.
pub trait WaveformSink: Send + Sync {
    /// `bars` holds one height per bar, 0..=100
    fn draw(&self, bars: &[u8]) -> Result<(), RenderError>;

    /// Called once when the frame loop ends
    fn clear(&self) {}
}

/// Which bins feed which bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarLayout {
    pub bar_count: usize,
    pub bin_stride: usize,
}

impl Default for BarLayout {
    fn default() -> Self {
        Self {
            bar_count: DEFAULT_BAR_COUNT,
            bin_stride: DEFAULT_BIN_STRIDE,
        }
    }
}

impl BarLayout {
    /// Bar `i` reads bin `i * stride`; bins past the end of the frame read as 0.
    pub fn heights(&self, frame: &[u8]) -> Vec<u8> {
        let stride = self.bin_stride.max(1);
        (0..self.bar_count)
            .map(|i| {
                let value = frame.get(i * stride).copied().unwrap_or(0) as u32;
                (value * 100 / 255) as u8
            })
            .collect()
    }
}

/// Exponential moving average over bar heights, to keep the bars from jittering:
/// smoothed[i] = alpha * current[i] + (1 - alpha) * previous[i]
#[derive(Debug, Clone, Default)]
pub struct EmaSmoother {
    prev: Vec<f32>,
}

impl EmaSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, bars: &mut [u8]) {
        if self.prev.len() != bars.len() {
            // First frame (or layout change): use raw values as initial state
            self.prev = bars.iter().map(|&b| b as f32).collect();
            return;
        }

        for (bar, prev) in bars.iter_mut().zip(self.prev.iter_mut()) {
            let smoothed = EMA_ALPHA * *bar as f32 + (1.0 - EMA_ALPHA) * *prev;
            *prev = smoothed;
            *bar = smoothed.round().clamp(0.0, 100.0) as u8;
        }
    }

    pub fn reset(&mut self) {
        self.prev.clear();
    }
}

/// Drive `sink` from a frame stream until the stream ends.
pub async fn run_renderer<S>(
    frames: S,
    layout: BarLayout,
    smoothing: bool,
    sink: Arc<dyn WaveformSink>,
) where
    S: Stream<Item = Vec<u8>>,
{
    futures_util::pin_mut!(frames);
    let mut ema = EmaSmoother::new();
    let mut drawn = 0usize;

    log::debug!("Waveform renderer started");

    while let Some(frame) = frames.next().await {
        let mut bars = layout.heights(&frame);
        if smoothing {
            ema.apply(&mut bars);
        }
        match sink.draw(&bars) {
            Ok(()) => drawn += 1,
            Err(e) => log::trace!("{}", e),
        }
    }

    sink.clear();
    log::debug!("Waveform renderer stopped after {} frames", drawn);
}

/// Bars drawn as a single line of block characters on stderr.
pub struct TerminalBars {
    out: Mutex<std::io::Stderr>,
}

impl TerminalBars {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    pub fn new() -> Self {
        Self {
            out: Mutex::new(std::io::stderr()),
        }
    }

    fn line(bars: &[u8]) -> String {
        bars.iter()
            .map(|&h| {
                let idx = (h as usize * (Self::LEVELS.len() - 1)) / 100;
                Self::LEVELS[idx.min(Self::LEVELS.len() - 1)]
            })
            .collect()
    }
}

impl Default for TerminalBars {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformSink for TerminalBars {
    fn draw(&self, bars: &[u8]) -> Result<(), RenderError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| RenderError("terminal handle poisoned".to_string()))?;
        write!(out, "\r{}", Self::line(bars))
            .and_then(|_| out.flush())
            .map_err(|e| RenderError(e.to_string()))
    }

    fn clear(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn heights_pick_strided_bins_and_scale_to_percent() {
        let layout = BarLayout {
            bar_count: 4,
            bin_stride: 2,
        };
        let frame = [255, 1, 0, 1, 51, 1, 102, 1];
        assert_eq!(layout.heights(&frame), vec![100, 0, 20, 40]);
    }

    #[test]
    fn heights_past_frame_end_are_zero() {
        let layout = BarLayout {
            bar_count: 4,
            bin_stride: 2,
        };
        assert_eq!(layout.heights(&[255, 0, 255]), vec![100, 100, 0, 0]);
    }

    #[test]
    fn default_layout_covers_first_64_bins() {
        let layout = BarLayout::default();
        let frame: Vec<u8> = (0..128).map(|i| if i < 64 { 255 } else { 0 }).collect();
        let heights = layout.heights(&frame);
        assert_eq!(heights.len(), DEFAULT_BAR_COUNT);
        assert!(heights.iter().all(|&h| h == 100));
    }

    #[test]
    fn test_ema_smoothing() {
        let mut ema = EmaSmoother::new();

        let mut first = [50u8; 3];
        ema.apply(&mut first);
        assert_eq!(first, [50; 3], "First frame should be unchanged");

        let mut second = [100u8; 3];
        ema.apply(&mut second);
        // 0.3 * 100 + 0.7 * 50 = 65
        assert_eq!(second, [65; 3]);
    }

    #[test]
    fn test_ema_reset() {
        let mut ema = EmaSmoother::new();
        let mut bars = [80u8; 2];
        ema.apply(&mut bars);
        ema.reset();

        let mut fresh = [20u8; 2];
        ema.apply(&mut fresh);
        assert_eq!(fresh, [20; 2], "After reset, first frame should be unchanged");
    }

    #[test]
    fn terminal_line_maps_extremes() {
        assert_eq!(TerminalBars::line(&[0, 100]), "▁█");
    }

    struct FailingSink {
        attempts: AtomicUsize,
        cleared: AtomicUsize,
    }

    impl WaveformSink for FailingSink {
        fn draw(&self, _bars: &[u8]) -> Result<(), RenderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RenderError("display handle missing".to_string()))
        }

        fn clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn render_failures_are_swallowed() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        });
        let frames = futures_util::stream::iter(vec![vec![255u8; 8], vec![0u8; 8]]);

        run_renderer(frames, BarLayout::default(), true, sink.clone()).await;

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
    }
}
