//! Capture-device boundary
//!
//! A device is acquired once per session and hands back a stream. Everything
//! the stream produces (chunks, the finalize confirmation, errors) travels over
//! a per-session channel whose only consumer is the recording controller.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::waveform::AmplitudeSource;

/// Errors that can occur while acquiring or driving a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    NoInputDevice,
    NoSupportedConfig,
    PermissionDenied(String),
    StreamCreationFailed(String),
    EncodeFailed(String),
    Unsupported(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::NoInputDevice => write!(f, "No audio input device found"),
            DeviceError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            DeviceError::PermissionDenied(e) => write!(f, "Microphone access denied: {}", e),
            DeviceError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            DeviceError::EncodeFailed(e) => write!(f, "Failed to encode recording: {}", e),
            DeviceError::Unsupported(e) => write!(f, "Unsupported capture request: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {}

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Events emitted by a capture stream, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Chunk(Vec<u8>),
    /// Emission has stopped and every chunk has been delivered
    Finalized,
    Error(String),
}

/// Receiving side of a session's device channel.
pub type DeviceEvents = mpsc::UnboundedReceiver<DeviceEvent>;

/// Sending side handed to the device. Usable from non-async audio threads.
#[derive(Debug, Clone)]
pub struct DeviceSink {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl DeviceSink {
    pub fn chunk(&self, bytes: Vec<u8>) {
        self.send(DeviceEvent::Chunk(bytes));
    }

    pub fn finalized(&self) {
        self.send(DeviceEvent::Finalized);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(DeviceEvent::Error(message.into()));
    }

    fn send(&self, event: DeviceEvent) {
        // The controller drops the receiver once a session is released
        if self.tx.send(event).is_err() {
            log::trace!("Device event dropped: session already released");
        }
    }
}

/// Create the channel for one capture session.
pub fn device_channel() -> (DeviceSink, DeviceEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeviceSink { tx }, rx)
}

/// A capture device that can be acquired for a session.
#[async_trait(?Send)]
pub trait CaptureDevice {
    async fn acquire(
        &mut self,
        constraints: &Constraints,
        sink: DeviceSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError>;
}

/// A live stream owned by exactly one session.
pub trait CaptureStream {
    fn start_emission(&mut self) -> Result<(), DeviceError>;

    /// Ask the stream to finish. The stream must deliver its remaining chunks
    /// followed by exactly one `DeviceEvent::Finalized`.
    fn stop_emission(&mut self) -> Result<(), DeviceError>;

    /// Stop every underlying track. Must be safe to call more than once.
    fn release_tracks(&mut self);

    fn mime_type(&self) -> String;

    /// Analysis tap for the waveform, if the device offers one
    fn amplitude_source(&self) -> Option<Arc<dyn AmplitudeSource>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_preserves_emission_order() {
        let (sink, mut events) = device_channel();
        sink.chunk(vec![1]);
        sink.chunk(vec![2, 3]);
        sink.finalized();

        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::Chunk(vec![1])));
        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::Chunk(vec![2, 3])));
        assert_eq!(events.try_recv().ok(), Some(DeviceEvent::Finalized));
    }

    #[test]
    fn sink_tolerates_released_session() {
        let (sink, events) = device_channel();
        drop(events);
        sink.chunk(vec![1]);
        sink.error("late");
    }

    #[test]
    fn default_constraints_are_audio_only() {
        let c = Constraints::default();
        assert!(c.audio);
        assert!(!c.video);
    }
}
