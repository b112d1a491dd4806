//! Playback sink: inbound envelopes to the speaker and the transcript
//!
//! ```text
//!  EnvelopeReceiver ──► decode ──┬─► audio ──► [FIFO] ──► playout worker ──► AudioOutput
//!                                ├─► fragment / done ──► TranscriptSink
//!                                └─► ignored / malformed ──► log
//! ```
//!
//! Device writes happen on one blocking worker fed in arrival order, so a
//! stalled speaker never stops the receive loop and never reorders audio.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{self, Stdout, Write};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::audio::AudioOutput;
use crate::codec::{self, DecodedEvent};
use crate::error::{AudioError, NetworkError};
use crate::network::EnvelopeReceiver;
use crate::session::stats::SessionStats;

/// Destination for incremental transcript text
pub trait TranscriptSink: Send + 'static {
    /// Emit `text` with no terminator
    fn fragment(&mut self, text: &str);

    /// Emit exactly one utterance terminator
    fn end_utterance(&mut self);
}

/// Transcript printed to a terminal-like writer
pub struct ConsoleTranscript<W: Write = Stdout> {
    out: W,
    prompt: String,
}

impl ConsoleTranscript<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleTranscript<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            prompt: "Assistant: ".to_string(),
        }
    }

    /// Speaker label printed after each terminator
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            tracing::debug!("Transcript write failed: {}", e);
        }
    }
}

impl<W: Write + Send + 'static> TranscriptSink for ConsoleTranscript<W> {
    fn fragment(&mut self, text: &str) {
        self.emit(text);
    }

    fn end_utterance(&mut self) {
        let line = format!("\n{}", self.prompt);
        self.emit(&line);
    }
}

/// Receive loop for one session
pub struct PlaybackSink<T: TranscriptSink> {
    receiver: EnvelopeReceiver,
    output: Arc<dyn AudioOutput>,
    transcript: T,
    stats: Arc<SessionStats>,
}

impl<T: TranscriptSink> PlaybackSink<T> {
    pub fn new(
        receiver: EnvelopeReceiver,
        output: Arc<dyn AudioOutput>,
        transcript: T,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            receiver,
            output,
            transcript,
            stats,
        }
    }

    /// Process envelopes until the connection ends.
    ///
    /// Returns `Ok` on a normal close, after queued audio has been handed to
    /// the device, and the transport error otherwise.
    pub async fn run(mut self) -> Result<(), NetworkError> {
        let (audio_tx, audio_rx) = unbounded::<Bytes>();
        let output = self.output.clone();
        let stats = self.stats.clone();
        let worker = tokio::task::spawn_blocking(move || playout(output, audio_rx, stats));

        tracing::debug!("Playback sink started");
        let result = loop {
            match self.receiver.receive().await {
                Ok(Some(text)) => {
                    SessionStats::incr(&self.stats.envelopes_received);
                    self.dispatch(&text, &audio_tx);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        drop(audio_tx);
        if let Err(e) = worker.await {
            tracing::error!("Playout worker panicked: {}", e);
        }
        tracing::debug!("Playback sink stopped");
        result
    }

    fn dispatch(&mut self, text: &str, audio_tx: &Sender<Bytes>) {
        match codec::decode_inbound(text) {
            Ok(DecodedEvent::Audio(pcm)) => {
                if audio_tx.send(pcm).is_err() {
                    tracing::debug!("Playout worker gone; dropping audio");
                }
            }
            Ok(DecodedEvent::TranscriptFragment(fragment)) => {
                SessionStats::incr(&self.stats.transcript_fragments);
                self.transcript.fragment(&fragment);
            }
            Ok(DecodedEvent::TranscriptDone) => {
                SessionStats::incr(&self.stats.utterances);
                self.transcript.end_utterance();
            }
            Ok(DecodedEvent::ServerError(message)) => {
                tracing::warn!("Server reported an error: {}", message);
            }
            Ok(DecodedEvent::Ignored) => {
                SessionStats::incr(&self.stats.ignored);
                tracing::trace!("Ignored envelope");
            }
            Err(e) => {
                SessionStats::incr(&self.stats.decode_errors);
                tracing::warn!("Dropping inbound envelope: {}", e);
            }
        }
    }
}

/// Write queued chunks in order until the queue ends or the device closes
fn playout(output: Arc<dyn AudioOutput>, chunks: Receiver<Bytes>, stats: Arc<SessionStats>) {
    for chunk in chunks.iter() {
        match output.write(&chunk) {
            Ok(()) => {
                SessionStats::incr(&stats.audio_chunks_played);
                stats
                    .audio_bytes_played
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
            Err(AudioError::Closed) => {
                tracing::debug!("Output device closed; playout stopping");
                break;
            }
            Err(e) => {
                SessionStats::incr(&stats.write_errors);
                tracing::warn!("Audio write failed, dropping chunk: {}", e);
            }
        }
    }
}
