//! Outbound encoding: audio frames to `input_audio_buffer.append` envelopes

use base64::prelude::*;

use crate::audio::AudioFrame;
use crate::error::CodecError;
use crate::protocol::ClientEvent;

/// Base64 rendering of raw audio bytes
pub fn encode_audio(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Wrap one captured frame in an append envelope
pub fn encode_outbound(frame: &AudioFrame) -> ClientEvent {
    ClientEvent::InputAudioBufferAppend {
        audio: encode_audio(&frame.to_le_bytes()),
    }
}

/// Serialize an envelope to its wire text
pub fn to_text(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}
