//! Microphone capture using CPAL, encoded to WAV with hound
//!
//! The stream collects 16-bit samples while emitting and feeds the amplitude
//! tap for the waveform. On stop it encodes everything into a single WAV chunk,
//! delivers it through the session sink, and confirms with `Finalized`.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};

use super::device::{CaptureDevice, CaptureStream, Constraints, DeviceError, DeviceSink};
use crate::waveform::{AmplitudeSource, SharedAmplitude};

const WAV_MIME: &str = "audio/wav";

/// Default input device, opened fresh for every session.
#[derive(Debug, Default)]
pub struct MicrophoneDevice;

impl MicrophoneDevice {
    pub fn new() -> Self {
        Self
    }

    /// Check whether an input device is present without opening a stream.
    pub fn default_input_name() -> Result<String, DeviceError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?;
        Ok(device.name().unwrap_or_else(|_| "unknown".to_string()))
    }
}

#[async_trait(?Send)]
impl CaptureDevice for MicrophoneDevice {
    async fn acquire(
        &mut self,
        constraints: &Constraints,
        sink: DeviceSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        if constraints.video {
            return Err(DeviceError::Unsupported(
                "camera capture is not available on this device".to_string(),
            ));
        }
        if !constraints.audio {
            return Err(DeviceError::Unsupported(
                "a capture must include audio".to_string(),
            ));
        }

        let input = MicrophoneInput::open()?;
        let stream = input.build(sink)?;
        Ok(Box::new(stream))
    }
}

struct MicrophoneInput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl MicrophoneInput {
    fn open() -> Result<Self, DeviceError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(DeviceError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| DeviceError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    fn build(self, sink: DeviceSink) -> Result<MicrophoneStream, DeviceError> {
        let samples = Arc::new(Mutex::new(Vec::<i16>::new()));
        let is_recording = Arc::new(AtomicBool::new(false));
        let amplitude = SharedAmplitude::new();

        let err_sink = sink.clone();
        let err_fn = move |err: cpal::StreamError| {
            if ends_session(&err) {
                log::error!("Audio stream error: {}", err);
                err_sink.error(err.to_string());
            } else {
                log::warn!("Audio stream error: {}", err);
            }
        };

        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_typed::<i16>(
                samples.clone(),
                is_recording.clone(),
                amplitude.clone(),
                err_fn,
            ),
            SampleFormat::U16 => self.build_typed::<u16>(
                samples.clone(),
                is_recording.clone(),
                amplitude.clone(),
                err_fn,
            ),
            SampleFormat::F32 => self.build_typed::<f32>(
                samples.clone(),
                is_recording.clone(),
                amplitude.clone(),
                err_fn,
            ),
            _ => Err(DeviceError::NoSupportedConfig),
        }?;

        Ok(MicrophoneStream {
            stream: Some(stream),
            samples,
            is_recording,
            amplitude,
            sink,
            spec: WavSpec {
                channels: self.config.channels,
                sample_rate: self.config.sample_rate.0,
                bits_per_sample: 16, // Always write as 16-bit
                sample_format: hound::SampleFormat::Int,
            },
            finalized: false,
        })
    }

    fn build_typed<T>(
        &self,
        samples: Arc<Mutex<Vec<i16>>>,
        is_recording: Arc<AtomicBool>,
        amplitude: SharedAmplitude,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<Stream, DeviceError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        self.device
            .build_input_stream(
                &self.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !is_recording.load(Ordering::SeqCst) {
                        return;
                    }

                    let converted: Vec<i16> = data.iter().map(|&s| sample_to_i16(s)).collect();
                    amplitude.push_samples(&converted);
                    match samples.lock() {
                        Ok(mut guard) => guard.extend_from_slice(&converted),
                        Err(_) => log::error!("Sample buffer poisoned; dropping audio"),
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    DeviceError::PermissionDenied(e.to_string())
                }
                other => DeviceError::StreamCreationFailed(other.to_string()),
            })
    }
}

/// A live microphone stream. Dropping it releases the device.
pub struct MicrophoneStream {
    stream: Option<Stream>,
    samples: Arc<Mutex<Vec<i16>>>,
    is_recording: Arc<AtomicBool>,
    amplitude: SharedAmplitude,
    sink: DeviceSink,
    spec: WavSpec,
    finalized: bool,
}

impl CaptureStream for MicrophoneStream {
    fn start_emission(&mut self) -> Result<(), DeviceError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| DeviceError::StreamCreationFailed("stream released".to_string()))?;
        self.is_recording.store(true, Ordering::SeqCst);
        stream.play().map_err(|e| {
            DeviceError::StreamCreationFailed(format!("Failed to start stream: {}", e))
        })?;
        log::info!("Microphone emission started");
        Ok(())
    }

    fn stop_emission(&mut self) -> Result<(), DeviceError> {
        if self.finalized {
            return Ok(());
        }
        self.is_recording.store(false, Ordering::SeqCst);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                log::warn!("Failed to pause microphone stream: {}", e);
            }
        }

        let samples = match self.samples.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        let bytes = encode_wav(&samples, self.spec)?;
        log::info!(
            "Microphone stopped: {} samples, {} bytes WAV",
            samples.len(),
            bytes.len()
        );

        self.finalized = true;
        self.sink.chunk(bytes);
        self.sink.finalized();
        Ok(())
    }

    fn release_tracks(&mut self) {
        self.is_recording.store(false, Ordering::SeqCst);
        if self.stream.take().is_some() {
            self.amplitude.clear();
            log::debug!("Microphone track released");
        }
    }

    fn mime_type(&self) -> String {
        WAV_MIME.to_string()
    }

    fn amplitude_source(&self) -> Option<Arc<dyn AmplitudeSource>> {
        Some(Arc::new(self.amplitude.clone()))
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.release_tracks();
    }
}

/// Encode interleaved 16-bit samples as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], spec: WavSpec) -> Result<Vec<u8>, DeviceError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| DeviceError::EncodeFailed(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| DeviceError::EncodeFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| DeviceError::EncodeFailed(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T: cpal::Sample>(sample: T) -> i16
where
    f32: cpal::FromSample<T>,
{
    let f32_sample: f32 = sample.to_sample::<f32>();
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

/// Only a vanished device ends the recording; backend hiccups such as
/// overruns are logged and capture continues.
fn ends_session(err: &cpal::StreamError) -> bool {
    matches!(err, cpal::StreamError::DeviceNotAvailable)
}
