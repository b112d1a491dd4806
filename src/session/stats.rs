//! Per-session counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the capture and playback paths
#[derive(Debug, Default)]
pub struct SessionStats {
    pub(crate) frames_sent: AtomicU64,
    pub(crate) read_errors: AtomicU64,
    pub(crate) envelopes_received: AtomicU64,
    pub(crate) audio_chunks_played: AtomicU64,
    pub(crate) audio_bytes_played: AtomicU64,
    pub(crate) write_errors: AtomicU64,
    pub(crate) transcript_fragments: AtomicU64,
    pub(crate) utterances: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) ignored: AtomicU64,
}

impl SessionStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_sent: load(&self.frames_sent),
            read_errors: load(&self.read_errors),
            envelopes_received: load(&self.envelopes_received),
            audio_chunks_played: load(&self.audio_chunks_played),
            audio_bytes_played: load(&self.audio_bytes_played),
            write_errors: load(&self.write_errors),
            transcript_fragments: load(&self.transcript_fragments),
            utterances: load(&self.utterances),
            decode_errors: load(&self.decode_errors),
            ignored: load(&self.ignored),
        }
    }
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub read_errors: u64,
    pub envelopes_received: u64,
    pub audio_chunks_played: u64,
    pub audio_bytes_played: u64,
    pub write_errors: u64,
    pub transcript_fragments: u64,
    pub utterances: u64,
    pub decode_errors: u64,
    pub ignored: u64,
}
