//! # Realtime Voice
//!
//! Full-duplex voice client for a realtime speech model: microphone audio is
//! streamed up continuously while synthesized speech and its transcript stream
//! back down over the same websocket.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         SESSION CONTROLLER (session)                     │
//! │                                                                          │
//! │  ┌────────────┐    ┌────────────────┐    ┌──────────────────────────┐    │
//! │  │ Microphone │───▶│ Capture Feeder │───▶│ EnvelopeSender           │    │
//! │  │ (cpal in)  │    │ blocking pool  │    │ input_audio_buffer.append│    │
//! │  └────────────┘    └────────────────┘    └────────────┬─────────────┘    │
//! │                      codec::encoder                   │                  │
//! │                                                       ▼                  │
//! │                                          ┌──────────────────────────┐    │
//! │                                          │ Connection (network)     │◀───┼── wss
//! │                                          │ one writer / one reader  │    │
//! │                                          └────────────┬─────────────┘    │
//! │                                                       │                  │
//! │                      codec::decoder                   ▼                  │
//! │  ┌────────────┐    ┌────────────────┐    ┌──────────────────────────┐    │
//! │  │  Speaker   │◀───│ Playout worker │◀───│ Playback Sink            │    │
//! │  │ (cpal out) │    │ blocking pool  │    │ response.audio.delta     │    │
//! │  └────────────┘    └────────────────┘    │ response.audio_transcript│    │
//! │                                          └────────────┬─────────────┘    │
//! │                                                       ▼                  │
//! │                                               TranscriptSink (stdout)    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Session sample rate; playback runs at it and capture is converted to it
    pub const SAMPLE_RATE: u32 = 24_000;

    /// Mono audio in both directions
    pub const CHANNELS: u16 = 1;

    /// Samples per frame, shared by capture and playback devices
    pub const CHUNK_SIZE: usize = 2048;

    /// Linear PCM16
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Realtime websocket endpoint
    pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

    /// Model requested in the endpoint query string
    pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

    /// Protocol version header sent on connect
    pub const PROTOCOL_HEADER: (&str, &str) = ("OpenAI-Beta", "realtime=v1");

    /// Environment variable holding the bearer credential
    pub const DEFAULT_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

    /// Playout queue limit in samples before `write` blocks (four frames)
    pub const PLAYOUT_QUEUE_SAMPLES: usize = CHUNK_SIZE * 4;
}
