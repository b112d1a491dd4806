//! Fixed-size PCM16 frames
//!
//! Device callbacks deliver whatever sample counts the host chooses. The
//! [`FrameAssembler`] regroups them into frames of exactly `CHUNK_SIZE`
//! samples; nothing downstream ever sees a short frame.

use std::collections::VecDeque;

use crate::constants::{BYTES_PER_SAMPLE, CHUNK_SIZE};
use crate::error::AudioError;

/// One fixed-length buffer of mono 16-bit linear PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap `samples`; the length must be exactly `CHUNK_SIZE`.
    pub fn new(samples: Vec<i16>) -> Result<Self, AudioError> {
        Self::with_len(samples, CHUNK_SIZE)
    }

    /// Wrap `samples`, requiring exactly `len` of them.
    pub fn with_len(samples: Vec<i16>, len: usize) -> Result<Self, AudioError> {
        if samples.len() != len {
            return Err(AudioError::ShortRead {
                expected: len,
                got: samples.len(),
            });
        }
        Ok(Self { samples })
    }

    /// A frame of `CHUNK_SIZE` zero samples
    pub fn silence() -> Self {
        Self {
            samples: vec![0; CHUNK_SIZE],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian byte image, as sent on the wire
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * BYTES_PER_SAMPLE);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Regroups variable-size sample chunks into whole frames
pub struct FrameAssembler {
    pending: VecDeque<i16>,
    frame_len: usize,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(frame_len * 2),
            frame_len,
        }
    }

    /// Append samples from a device callback
    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend(samples.iter().copied());
    }

    /// Take one whole frame if enough samples are pending
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.pending.len() < self.frame_len {
            return None;
        }
        let samples: Vec<i16> = self.pending.drain(..self.frame_len).collect();
        Some(AudioFrame { samples })
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Drop a partially assembled frame
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Convert little-endian PCM16 bytes to samples.
///
/// `carry` holds an odd trailing byte between calls; a delta may end in the
/// middle of a sample and the next one completes it.
pub fn pcm16_from_le_bytes(bytes: &[u8], carry: &mut Option<u8>) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE + 1);
    let mut rest = bytes;

    if let Some(low) = carry.take() {
        match rest.split_first() {
            Some((&high, tail)) => {
                samples.push(i16::from_le_bytes([low, high]));
                rest = tail;
            }
            None => {
                *carry = Some(low);
                return samples;
            }
        }
    }

    let mut chunks = rest.chunks_exact(BYTES_PER_SAMPLE);
    for pair in &mut chunks {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }
    if let [odd] = chunks.remainder() {
        *carry = Some(*odd);
    }
    samples
}
