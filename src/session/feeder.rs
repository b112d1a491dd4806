//! Capture feeder: microphone frames to outbound append envelopes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::AudioInput;
use crate::codec;
use crate::constants::CHUNK_SIZE;
use crate::error::{AudioError, NetworkError};
use crate::network::EnvelopeSender;
use crate::session::stats::SessionStats;

/// Pause after a non-transient read failure before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Blocking capture loop. Run it on the blocking pool, never on the
/// executor that services the connection.
pub struct CaptureFeeder {
    input: Arc<dyn AudioInput>,
    sender: EnvelopeSender,
    running: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
}

impl CaptureFeeder {
    pub fn new(
        input: Arc<dyn AudioInput>,
        sender: EnvelopeSender,
        running: Arc<AtomicBool>,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            input,
            sender,
            running,
            stats,
        }
    }

    /// Read, encode and send frames until stopped.
    ///
    /// Read failures are retried. Returns `Ok` when the input device closes
    /// or `running` is cleared, and the send error once the connection is
    /// gone.
    pub fn run(self) -> Result<(), NetworkError> {
        tracing::debug!("Capture feeder started");

        while self.running.load(Ordering::SeqCst) {
            let frame = match self.input.read_frame() {
                Ok(frame) => frame,
                Err(AudioError::Closed) => {
                    tracing::debug!("Input device closed");
                    break;
                }
                Err(e) => {
                    SessionStats::incr(&self.stats.read_errors);
                    if e.is_transient() {
                        tracing::warn!("Audio read failed, retrying: {}", e);
                    } else {
                        tracing::warn!("Audio read failed: {}", e);
                        thread::sleep(READ_RETRY_DELAY);
                    }
                    continue;
                }
            };

            if frame.len() != CHUNK_SIZE {
                SessionStats::incr(&self.stats.read_errors);
                tracing::warn!(
                    "Dropping {} sample frame (expected {})",
                    frame.len(),
                    CHUNK_SIZE
                );
                continue;
            }

            let event = codec::encode_outbound(&frame);
            match self.sender.send(&event) {
                Ok(()) => SessionStats::incr(&self.stats.frames_sent),
                Err(_) if !self.running.load(Ordering::SeqCst) => break,
                Err(e) => {
                    tracing::debug!("Capture feeder stopping: {}", e);
                    return Err(e);
                }
            }
        }

        tracing::debug!("Capture feeder stopped");
        Ok(())
    }
}
