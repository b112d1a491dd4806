//! Audio subsystem module
//!
//! Devices are exposed through two blocking traits. Each handle is used by
//! exactly one unit of work while streaming; the session controller keeps a
//! second reference only to stop and close it during teardown, which is why
//! every method takes `&self`.

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod device;
pub mod playback;

pub use buffer::{AudioFrame, FrameAssembler};
pub use capture::AudioCapture;
pub use convert::CaptureConverter;
pub use device::{list_devices, AudioDevice, AudioDeviceInfo};
pub use playback::AudioPlayback;

use crate::error::AudioError;

/// Blocking source of fixed-size frames
pub trait AudioInput: Send + Sync {
    /// Begin delivering samples. Devices that need no setup keep the default.
    fn start(&self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Block until one whole frame is available.
    ///
    /// A device error or overflow discards any partially read frame and
    /// returns a transient error; the caller may simply call again.
    /// Returns `AudioError::Closed` once the device is closed.
    fn read_frame(&self) -> Result<AudioFrame, AudioError>;

    /// Stop delivering samples
    fn stop(&self) -> Result<(), AudioError>;

    /// Release the device. Idempotent; wakes a blocked `read_frame`.
    fn close(&self) -> Result<(), AudioError>;

    fn is_closed(&self) -> bool;
}

/// Blocking sink for PCM16 little-endian bytes
pub trait AudioOutput: Send + Sync {
    fn start(&self) -> Result<(), AudioError> {
        Ok(())
    }

    /// Queue `pcm` for playback, blocking while the device is behind.
    fn write(&self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Stop playback
    fn stop(&self) -> Result<(), AudioError>;

    /// Release the device. Idempotent; wakes a blocked `write`.
    fn close(&self) -> Result<(), AudioError>;

    fn is_closed(&self) -> bool;
}
