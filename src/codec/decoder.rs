//! Inbound decoding: server envelopes to playback/transcript events

use base64::prelude::*;
use bytes::Bytes;

use crate::error::CodecError;
use crate::protocol::ServerEvent;

/// What the playback sink should do with one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// PCM16 bytes for the output device
    Audio(Bytes),
    /// Transcript text, emitted without a terminator
    TranscriptFragment(String),
    /// End of one utterance's transcript
    TranscriptDone,
    /// Server-reported error, surfaced as a diagnostic
    ServerError(String),
    /// A kind this client does not act on
    Ignored,
}

/// Decode a base64 audio payload
pub fn decode_audio(payload: &str) -> Result<Bytes, CodecError> {
    BASE64_STANDARD
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| CodecError::InvalidPayload(e.to_string()))
}

/// Parse and decode one inbound text envelope
pub fn decode_inbound(text: &str) -> Result<DecodedEvent, CodecError> {
    let event: ServerEvent =
        serde_json::from_str(text).map_err(|e| CodecError::MalformedEnvelope(e.to_string()))?;
    decode_event(event)
}

/// Decode an already parsed envelope
pub fn decode_event(event: ServerEvent) -> Result<DecodedEvent, CodecError> {
    match event {
        ServerEvent::AudioDelta { delta } => decode_audio(&delta).map(DecodedEvent::Audio),
        ServerEvent::AudioTranscriptDelta { delta } => Ok(DecodedEvent::TranscriptFragment(delta)),
        ServerEvent::AudioTranscriptDone => Ok(DecodedEvent::TranscriptDone),
        ServerEvent::Error { error } => Ok(DecodedEvent::ServerError(error.message)),
        ServerEvent::Unrecognized => Ok(DecodedEvent::Ignored),
    }
}
