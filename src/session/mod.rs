//! Session subsystem
//!
//! One [`SessionController`] per interactive run. It wires a
//! [`CaptureFeeder`] and a [`PlaybackSink`] to a single
//! [`crate::network::Connection`] for the duration of `Streaming`.

pub mod controller;
pub mod feeder;
pub mod sink;
pub mod stats;

pub use controller::{
    SessionController, SessionDevices, SessionEnd, SessionReport, SessionState, TeardownStep,
};
pub use feeder::CaptureFeeder;
pub use sink::{ConsoleTranscript, PlaybackSink, TranscriptSink};
pub use stats::{SessionStats, StatsSnapshot};
