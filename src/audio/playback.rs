//! Audio playback to the output device
//!
//! Decoded PCM16 is queued in a bounded playout queue drained by the cpal
//! output callback. [`AudioPlayback::write`] blocks while the queue is full,
//! so a slow device pushes back on its single writer and nothing else.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::pcm16_from_le_bytes;
use crate::audio::device::{AudioDevice, SessionStream};
use crate::audio::AudioOutput;
use crate::constants::PLAYOUT_QUEUE_SAMPLES;
use crate::error::AudioError;

/// How long a blocked writer waits before re-checking for close
const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on letting queued audio play out when the stream stops
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Samples waiting for the output callback
struct PlayoutQueue {
    samples: Mutex<VecDeque<i16>>,
    drained: Condvar,
    capacity: usize,
    underruns: AtomicU64,
}

impl PlayoutQueue {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            drained: Condvar::new(),
            capacity,
            underruns: AtomicU64::new(0),
        }
    }

    /// Fill `out` from the queue, padding with silence on underrun
    fn fill<T>(&self, out: &mut [T])
    where
        T: SizedSample + FromSample<i16>,
    {
        let mut queue = self.samples.lock();
        let mut starved = false;
        for slot in out.iter_mut() {
            *slot = match queue.pop_front() {
                Some(sample) => T::from_sample(sample),
                None => {
                    starved = true;
                    T::EQUILIBRIUM
                }
            };
        }
        drop(queue);

        if starved {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.drained.notify_all();
    }

    /// Block until the output callback has taken every queued sample.
    /// Gives up at `timeout`, or as soon as `playing` is cleared.
    fn wait_drained(&self, timeout: Duration, playing: &AtomicBool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.samples.lock();
        while !queue.is_empty() {
            if !playing.load(Ordering::SeqCst) {
                return false;
            }
            if self.drained.wait_until(&mut queue, deadline).timed_out() {
                return queue.is_empty();
            }
        }
        true
    }
}

/// Speaker playback accepting PCM16 little-endian bytes
pub struct AudioPlayback {
    device_name: String,
    stream: SessionStream,

    running: Arc<AtomicBool>,
    closed: AtomicBool,

    queue: Arc<PlayoutQueue>,
    /// Odd trailing byte of the previous write
    carry: Mutex<Option<u8>>,

    thread_handle: Mutex<Option<JoinHandle<()>>>,
    device: Mutex<Option<AudioDevice>>,

    bytes_written: AtomicU64,
}

impl AudioPlayback {
    /// Prepare playback on `device`; fails if it cannot run the session format.
    pub fn new(device: AudioDevice) -> Result<Self, AudioError> {
        let stream = device.session_stream()?;

        Ok(Self {
            device_name: device.name.clone(),
            stream,
            running: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            queue: Arc::new(PlayoutQueue::new(PLAYOUT_QUEUE_SAMPLES)),
            carry: Mutex::new(None),
            thread_handle: Mutex::new(None),
            device: Mutex::new(Some(device)),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Start the output stream
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
            .ok_or_else(|| AudioError::StreamError("playback device already consumed".into()))?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let queue = self.queue.clone();
        let stream = self.stream.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let built = build_playback_stream(&cpal_device, &stream, queue);

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
                    tracing::debug!("Failed to pause playback stream: {}", e);
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        *self.thread_handle.lock() = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "Playback started on {} ({:?}, {} Hz)",
                    self.device_name,
                    self.stream.sample_format,
                    self.stream.config.sample_rate.0
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.join_thread();
                Err(e)
            }
            Err(_) => {
                self.join_thread();
                Err(AudioError::StreamError("playback thread exited during start".into()))
            }
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Callbacks that found the queue empty
    pub fn underruns(&self) -> u64 {
        self.queue.underruns.load(Ordering::Relaxed)
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

impl AudioOutput for AudioPlayback {
    fn start(&self) -> Result<(), AudioError> {
        self.start_stream()
    }

    fn write(&self, pcm: &[u8]) -> Result<(), AudioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AudioError::Closed);
        }

        let samples = pcm16_from_le_bytes(pcm, &mut self.carry.lock());
        let mut queue = self.queue.samples.lock();

        // An oversized write is admitted once the queue has fully drained
        while !queue.is_empty() && queue.len() + samples.len() > self.queue.capacity {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AudioError::Closed);
            }
            if !self.running.load(Ordering::SeqCst) {
                return Err(AudioError::StreamError("playback stream is not running".into()));
            }
            self.queue.drained.wait_for(&mut queue, WRITE_POLL_INTERVAL);
        }

        queue.extend(samples);
        self.bytes_written.fetch_add(pcm.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst)
            && !self.queue.wait_drained(DRAIN_TIMEOUT, &self.running)
        {
            tracing::debug!(
                "Stopping playback with {} samples unplayed",
                self.queue.samples.lock().len()
            );
        }
        self.running.store(false, Ordering::SeqCst);
        self.join_thread();
        self.queue.samples.lock().clear();
        self.queue.drained.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<(), AudioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop()?;
        self.device.lock().take();
        tracing::debug!("Playback device {} closed", self.device_name);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn build_playback_stream(
    device: &cpal::Device,
    stream: &SessionStream,
    queue: Arc<PlayoutQueue>,
) -> Result<cpal::Stream, AudioError> {
    match stream.sample_format {
        SampleFormat::I16 => build_typed::<i16>(device, &stream.config, queue),
        SampleFormat::F32 => build_typed::<f32>(device, &stream.config, queue),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: Arc<PlayoutQueue>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| queue.fill(data),
            move |err| {
                tracing::warn!("Playback stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::Cpal(e.to_string()))
}
