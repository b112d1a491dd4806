//! Transport to the realtime endpoint

pub mod connection;

pub use connection::{Connection, EnvelopeReceiver, EnvelopeSender};

/// Install the process-wide TLS crypto provider used by `wss://` endpoints.
///
/// Safe to call more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
