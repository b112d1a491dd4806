//! Native capture format to session PCM16
//!
//! Microphones that cannot run mono at `SAMPLE_RATE` are opened at their own
//! rate and channel count. [`CaptureConverter`] averages each interleaved
//! frame down to mono and linearly resamples, carrying its position across
//! callback buffers so chunk boundaries leave no seams.

/// Streaming downmix and linear resampler for one capture stream
#[derive(Debug)]
pub struct CaptureConverter {
    channels: usize,
    /// Input samples consumed per output sample
    step: f64,
    /// Read position; 0.0 is `previous`, 1.0 the first sample of the next buffer
    position: f64,
    previous: i16,
}

impl CaptureConverter {
    pub fn new(channels: u16, from_rate: u32, to_rate: u32) -> Self {
        Self {
            channels: usize::from(channels.max(1)),
            step: f64::from(from_rate) / f64::from(to_rate.max(1)),
            position: 1.0,
            previous: 0,
        }
    }

    /// Whether samples pass through untouched
    pub fn is_identity(&self) -> bool {
        self.channels == 1 && self.step == 1.0
    }

    /// Convert one interleaved callback buffer
    pub fn convert(&mut self, interleaved: &[i16]) -> Vec<i16> {
        let mono = downmix(interleaved, self.channels);
        if self.step == 1.0 {
            return mono;
        }

        let available = mono.len() as f64;
        let mut out = Vec::with_capacity((available / self.step) as usize + 1);
        while self.position <= available {
            let index = self.position.floor() as usize;
            let frac = self.position - index as f64;
            let a = if index == 0 {
                self.previous
            } else {
                mono[index - 1]
            };
            let b = mono.get(index).copied().unwrap_or(a);
            let value = f64::from(a) + (f64::from(b) - f64::from(a)) * frac;
            out.push(value.round() as i16);
            self.position += self.step;
        }

        self.position -= available;
        if let Some(&last) = mono.last() {
            self.previous = last;
        }
        out
    }
}

/// Average each interleaved frame down to one sample
fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
