//! Audio capture from the input device
//!
//! The cpal stream lives on a dedicated thread (cpal streams are not `Send`
//! on every host). Its callback converts samples to PCM16 and hands them over
//! a bounded channel; [`AudioCapture::read_frame`] blocks on that channel and
//! assembles fixed-size frames. A device opened at its native format is
//! downmixed and resampled in the callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameAssembler};
use crate::audio::convert::CaptureConverter;
use crate::audio::device::{AudioDevice, SessionStream};
use crate::audio::AudioInput;
use crate::constants::{CHUNK_SIZE, SAMPLE_RATE};
use crate::error::AudioError;

/// Callback chunks buffered between the device thread and the reader
const SAMPLE_CHANNEL_CAPACITY: usize = 64;

/// How often a blocked reader re-checks for close
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Microphone capture producing fixed-size PCM16 frames
pub struct AudioCapture {
    device_name: String,
    stream: SessionStream,

    /// Set while the device thread should keep its stream alive
    running: Arc<AtomicBool>,
    closed: AtomicBool,

    /// Set by the callback when a chunk had to be dropped
    overflowed: Arc<AtomicBool>,

    sample_rx: Receiver<Vec<i16>>,
    sample_tx: Sender<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    error_tx: Sender<AudioError>,

    assembler: Mutex<FrameAssembler>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    device: Mutex<Option<AudioDevice>>,

    samples_captured: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Prepare capture on `device`; fails if it has no usable input format.
    pub fn new(device: AudioDevice) -> Result<Self, AudioError> {
        let stream = device.session_stream()?;
        let (sample_tx, sample_rx) = bounded(SAMPLE_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = bounded(16);

        Ok(Self {
            device_name: device.name.clone(),
            stream,
            running: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            overflowed: Arc::new(AtomicBool::new(false)),
            sample_rx,
            sample_tx,
            error_rx,
            error_tx,
            assembler: Mutex::new(FrameAssembler::new(CHUNK_SIZE)),
            thread_handle: Mutex::new(None),
            device: Mutex::new(Some(device)),
            samples_captured: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start capturing audio.
    ///
    /// Returns once the device thread has either started its stream or
    /// failed to.
    fn start_stream(&self) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::Closed);
        }
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = self
            .device
            .lock()
            .take()
            .ok_or_else(|| AudioError::StreamError("capture device already consumed".into()))?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let overflowed = self.overflowed.clone();
        let samples_captured = self.samples_captured.clone();
        let sample_tx = self.sample_tx.clone();
        let error_tx = self.error_tx.clone();
        let stream = self.stream.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let built = build_capture_stream(
                    &cpal_device,
                    &stream,
                    sample_tx,
                    error_tx,
                    overflowed,
                    samples_captured,
                );

                let stream = match built.and_then(|s| {
                    s.play().map_err(|e| AudioError::Cpal(e.to_string()))?;
                    Ok(s)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                if let Err(e) = stream.pause() {
                    tracing::debug!("Failed to pause capture stream: {}", e);
                }
                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        *self.thread_handle.lock() = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "Capture started on {} ({:?}, {} ch, {} Hz)",
                    self.device_name,
                    self.stream.sample_format,
                    self.stream.config.channels,
                    self.stream.config.sample_rate.0
                );
                if self.stream.config.sample_rate.0 != SAMPLE_RATE {
                    tracing::info!(
                        "Resampling capture from {} Hz to {} Hz",
                        self.stream.config.sample_rate.0,
                        SAMPLE_RATE
                    );
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.join_thread();
                Err(e)
            }
            Err(_) => {
                self.join_thread();
                Err(AudioError::StreamError("capture thread exited during start".into()))
            }
        }
    }

    /// Total session-rate samples produced from the device
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.stream.config
    }

    fn join_thread(&self) {
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl AudioInput for AudioCapture {
    fn start(&self) -> Result<(), AudioError> {
        self.start_stream()
    }

    fn read_frame(&self) -> Result<AudioFrame, AudioError> {
        let mut assembler = self.assembler.lock();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AudioError::Closed);
            }

            if self.overflowed.swap(false, Ordering::SeqCst) {
                assembler.reset();
                return Err(AudioError::BufferOverflow);
            }

            if let Ok(err) = self.error_rx.try_recv() {
                assembler.reset();
                return Err(err);
            }

            if let Some(frame) = assembler.next_frame() {
                return Ok(frame);
            }

            match self.sample_rx.recv_timeout(READ_POLL_INTERVAL) {
                Ok(chunk) => assembler.push(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Closed),
            }

            if !self.running.load(Ordering::SeqCst) && self.sample_rx.is_empty() {
                // Device thread is gone; nothing more will arrive
                return Err(AudioError::Closed);
            }
        }
    }

    fn stop(&self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        self.join_thread();
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop()?;
        self.device.lock().take();
        tracing::debug!("Capture device {} closed", self.device_name);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    stream: &SessionStream,
    sample_tx: Sender<Vec<i16>>,
    error_tx: Sender<AudioError>,
    overflowed: Arc<AtomicBool>,
    samples_captured: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError> {
    match stream.sample_format {
        SampleFormat::I16 => build_typed::<i16>(
            device,
            &stream.config,
            sample_tx,
            error_tx,
            overflowed,
            samples_captured,
        ),
        SampleFormat::F32 => build_typed::<f32>(
            device,
            &stream.config,
            sample_tx,
            error_tx,
            overflowed,
            samples_captured,
        ),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_tx: Sender<Vec<i16>>,
    error_tx: Sender<AudioError>,
    overflowed: Arc<AtomicBool>,
    samples_captured: Arc<AtomicU64>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let mut converter = CaptureConverter::new(config.channels, config.sample_rate.0, SAMPLE_RATE);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let native: Vec<i16> = data.iter().map(|s| i16::from_sample(*s)).collect();
                let chunk = if converter.is_identity() {
                    native
                } else {
                    converter.convert(&native)
                };
                if chunk.is_empty() {
                    return;
                }
                samples_captured.fetch_add(chunk.len() as u64, Ordering::Relaxed);

                match sample_tx.try_send(chunk) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => overflowed.store(true, Ordering::Relaxed),
                    Err(TrySendError::Disconnected(_)) => {}
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::Cpal(e.to_string()))
}
