//! Wire envelopes exchanged with the realtime endpoint
//!
//! Every message is a JSON object tagged by its `type` field. Outbound and
//! inbound directions are separate closed enums; inbound kinds this client
//! does not act on all land in [`ServerEvent::Unrecognized`] so new server
//! events never break decoding.

use serde::{Deserialize, Serialize};

/// Output modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

/// Response settings carried by `response.create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: String,
}

/// Envelopes sent by the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One captured audio frame, base64 PCM16
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    /// Session-init: sent once, before any audio
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
}

impl ClientEvent {
    /// Wire name of this envelope's kind
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }
}

/// Error details attached to a server `error` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Envelopes received from the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthesized speech chunk, base64 PCM16
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// Transcript fragment of the speech being played
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    /// End of one utterance's transcript
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone,

    #[serde(rename = "error")]
    Error { error: ApiError },

    #[serde(other)]
    Unrecognized,
}
