//! Real-time amplitude sampling and waveform bars
//!
//! The sampler turns a live analysis tap into a per-frame stream of byte
//! magnitudes; the renderer maps each frame onto a fixed set of bars.

mod renderer;
mod sampler;

pub use renderer::{
    run_renderer, BarLayout, EmaSmoother, RenderError, TerminalBars, WaveformSink,
    DEFAULT_BAR_COUNT, DEFAULT_BIN_STRIDE,
};
pub use sampler::{
    amplitude_frames, AmplitudeBuffer, AmplitudeSource, SessionGeneration, SharedAmplitude,
    DEFAULT_BIN_COUNT,
};
