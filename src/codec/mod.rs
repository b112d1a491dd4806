//! Envelope codec
//!
//! Stateless translation between raw PCM16 frames and the text envelopes
//! carried by the connection. Audio payloads use standard base64.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_audio, decode_event, decode_inbound, DecodedEvent};
pub use encoder::{encode_audio, encode_outbound, to_text};
