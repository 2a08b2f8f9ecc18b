//! Capture module for fieldnote
//!
//! This module defines the capture-device boundary, the per-session chunk
//! buffer, and the default microphone device.
//! Uses CPAL for audio capture and hound for WAV encoding.

pub mod device;
pub mod microphone;
mod session;

pub use device::{
    device_channel, CaptureDevice, CaptureStream, Constraints, DeviceError, DeviceEvent,
    DeviceEvents, DeviceSink,
};
pub use microphone::MicrophoneDevice;
pub use session::{CaptureSession, MediaArtifact};
