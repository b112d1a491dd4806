//! Audio device enumeration and stream format selection

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig, SupportedStreamConfigRange};
use serde::Serialize;

use crate::constants::{CHANNELS, CHUNK_SIZE, SAMPLE_RATE};
use crate::error::AudioError;

/// Sample formats we can convert to and from PCM16, in order of preference
const USABLE_FORMATS: [SampleFormat; 2] = [SampleFormat::I16, SampleFormat::F32];

/// Description of a device, for listing
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    /// Whether the device has a stream format a session can use
    pub supports_session_format: bool,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Pick the stream configuration for a session on this device.
    ///
    /// Outputs must run the session format. Inputs fall back to a native
    /// rate and channel count, converted after capture.
    pub fn session_stream(&self) -> Result<SessionStream, AudioError> {
        if self.is_input {
            let ranges: Vec<SupportedStreamConfigRange> = self
                .inner
                .supported_input_configs()
                .map_err(|e| AudioError::Cpal(e.to_string()))?
                .collect();
            return find_capture_stream(&ranges).ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("{} offers no i16 or f32 input", self.name))
            });
        }

        let ranges: Vec<SupportedStreamConfigRange> = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::Cpal(e.to_string()))?
            .collect();
        find_session_stream(&ranges).ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} does not offer {} channel(s) at {} Hz as i16 or f32",
                self.name, CHANNELS, SAMPLE_RATE
            ))
        })
    }
}

/// Stream parameters chosen for a device
#[derive(Debug, Clone)]
pub struct SessionStream {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
}

/// Choose a mono, `SAMPLE_RATE` configuration among `ranges`.
///
/// i16 is preferred since it needs no conversion; f32 is accepted and
/// converted at the callback boundary.
pub fn find_session_stream(ranges: &[SupportedStreamConfigRange]) -> Option<SessionStream> {
    let rate = cpal::SampleRate(SAMPLE_RATE);

    USABLE_FORMATS.iter().find_map(|format| {
        ranges
            .iter()
            .find(|range| {
                range.channels() == CHANNELS
                    && range.sample_format() == *format
                    && range.min_sample_rate() <= rate
                    && range.max_sample_rate() >= rate
            })
            .map(|range| SessionStream {
                config: StreamConfig {
                    channels: CHANNELS,
                    sample_rate: rate,
                    buffer_size: fixed_buffer_size(range),
                },
                sample_format: *format,
            })
    })
}

/// Choose a capture configuration among `ranges`.
///
/// The session format wins when offered. Otherwise take the usable range
/// with the fewest channels, at the supported rate nearest `SAMPLE_RATE`.
pub fn find_capture_stream(ranges: &[SupportedStreamConfigRange]) -> Option<SessionStream> {
    if let Some(stream) = find_session_stream(ranges) {
        return Some(stream);
    }

    let nearest_rate = |range: &SupportedStreamConfigRange| {
        SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0)
    };

    USABLE_FORMATS.iter().find_map(|format| {
        ranges
            .iter()
            .filter(|range| range.sample_format() == *format && range.channels() > 0)
            .min_by_key(|range| (range.channels(), nearest_rate(range).abs_diff(SAMPLE_RATE)))
            .map(|range| SessionStream {
                config: StreamConfig {
                    channels: range.channels(),
                    sample_rate: cpal::SampleRate(nearest_rate(range)),
                    buffer_size: cpal::BufferSize::Default,
                },
                sample_format: *format,
            })
    })
}

/// Ask for `CHUNK_SIZE` frames per buffer when the device allows it
fn fixed_buffer_size(range: &SupportedStreamConfigRange) -> cpal::BufferSize {
    match range.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&(CHUNK_SIZE as u32)) =>
        {
            cpal::BufferSize::Fixed(CHUNK_SIZE as u32)
        }
        _ => cpal::BufferSize::Default,
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                let wrapped = AudioDevice::from_cpal(device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    supports_session_format: wrapped.session_stream().is_ok(),
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                let wrapped = AudioDevice::from_cpal(device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    supports_session_format: wrapped.session_stream().is_ok(),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                });
            }
        }
    }

    devices
}

/// Get a device by its ID (`input:<name>` or `output:<name>`)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        return Err(AudioError::DeviceNotFound(format!(
            "{} (expected input:<name> or output:<name>)",
            id
        )));
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    };
    let mut devices = devices.map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    devices
        .find(|device| device.name().map(|n| n == name).unwrap_or(false))
        .map(|device| AudioDevice::from_cpal(device, is_input))
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Resolve the configured input device, or the host default
pub fn resolve_input(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => {
            let device = get_device_by_id(id)?;
            if !device.is_input {
                return Err(AudioError::DeviceNotFound(format!("{} is not an input", id)));
            }
            Ok(device)
        }
        None => get_default_input_device(),
    }
}

/// Resolve the configured output device, or the host default
pub fn resolve_output(id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => {
            let device = get_device_by_id(id)?;
            if device.is_input {
                return Err(AudioError::DeviceNotFound(format!("{} is not an output", id)));
            }
            Ok(device)
        }
        None => get_default_output_device(),
    }
}
