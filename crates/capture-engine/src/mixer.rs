//! Mixdown of capture audio and microphone into one track.

use std::collections::VecDeque;

use crate::media::AudioChunk;

/// Sums the active sources sample by sample.
///
/// Chunks at another rate are linearly resampled to the mixer rate on the
/// way in. Output only advances as far as every active source has
/// delivered. A source that falls more than one second behind is treated
/// as silent so the other cannot stall.
#[derive(Debug)]
pub struct AudioMixer {
    sample_rate: u32,
    capture: Option<VecDeque<f32>>,
    microphone: Option<VecDeque<f32>>,
}

impl AudioMixer {
    pub fn new(sample_rate: u32, capture: bool, microphone: bool) -> Self {
        Self {
            sample_rate,
            capture: capture.then(VecDeque::new),
            microphone: microphone.then(VecDeque::new),
        }
    }

    /// Whether there is any source to mix.
    pub fn has_sources(&self) -> bool {
        self.capture.is_some() || self.microphone.is_some()
    }

    pub fn push_capture(&mut self, chunk: &AudioChunk) {
        if let Some(queue) = self.capture.as_mut() {
            enqueue(queue, chunk, self.sample_rate);
        }
    }

    pub fn push_microphone(&mut self, chunk: &AudioChunk) {
        if let Some(queue) = self.microphone.as_mut() {
            enqueue(queue, chunk, self.sample_rate);
        }
    }

    /// Drop everything buffered, e.g. while paused.
    pub fn discard(&mut self) {
        for queue in [self.capture.as_mut(), self.microphone.as_mut()]
            .into_iter()
            .flatten()
        {
            queue.clear();
        }
    }

    /// Mix whatever is ready into a single chunk.
    pub fn mix(&mut self) -> Option<AudioChunk> {
        let queues: Vec<&mut VecDeque<f32>> = [self.capture.as_mut(), self.microphone.as_mut()]
            .into_iter()
            .flatten()
            .collect();
        let shortest = queues.iter().map(|q| q.len()).min()?;
        let longest = queues.iter().map(|q| q.len()).max()?;
        let count = if shortest == 0 && longest > self.sample_rate as usize {
            longest
        } else {
            shortest
        };
        if count == 0 {
            return None;
        }

        let mut mixed = vec![0.0f32; count];
        for queue in queues {
            let take = count.min(queue.len());
            for (out, sample) in mixed.iter_mut().zip(queue.drain(..take)) {
                *out += sample;
            }
        }
        for sample in &mut mixed {
            *sample = sample.clamp(-1.0, 1.0);
        }
        Some(AudioChunk {
            sample_rate: self.sample_rate,
            samples: mixed,
        })
    }
}

fn enqueue(queue: &mut VecDeque<f32>, chunk: &AudioChunk, rate: u32) {
    if chunk.sample_rate == rate {
        queue.extend(&chunk.samples);
    } else if chunk.sample_rate == 0 {
        tracing::debug!(samples = chunk.samples.len(), "Dropping audio chunk without a sample rate");
    } else {
        queue.extend(resample(&chunk.samples, chunk.sample_rate, rate));
    }
}

/// Linear interpolation from `from` Hz to `to` Hz.
fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    let Some(&last) = samples.last() else {
        return Vec::new();
    };
    let len = ((samples.len() as u64 * to as u64) / from as u64).max(1) as usize;
    let step = from as f64 / to as f64;
    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = pos.floor() as usize;
            let frac = (pos - index as f64) as f32;
            let a = samples.get(index).copied().unwrap_or(last);
            let b = samples.get(index + 1).copied().unwrap_or(last);
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(sample_rate: u32, samples: &[f32]) -> AudioChunk {
        AudioChunk {
            sample_rate,
            samples: samples.to_vec(),
        }
    }

    #[test]
    fn test_sums_and_clamps() {
        let mut mixer = AudioMixer::new(48_000, true, true);
        mixer.push_capture(&chunk(48_000, &[0.25, 0.75, 0.5]));
        mixer.push_microphone(&chunk(48_000, &[0.25, 0.5]));
        let mixed = mixer.mix().unwrap();
        assert_eq!(mixed.samples, vec![0.5, 1.0]);
        mixer.push_microphone(&chunk(48_000, &[-0.5]));
        assert_eq!(mixer.mix().unwrap().samples, vec![0.0]);
    }

    #[test]
    fn test_single_source_passes_through() {
        let mut mixer = AudioMixer::new(48_000, false, true);
        mixer.push_capture(&chunk(48_000, &[0.9]));
        mixer.push_microphone(&chunk(48_000, &[0.1, 0.2]));
        assert_eq!(mixer.mix().unwrap().samples, vec![0.1, 0.2]);
    }

    #[test]
    fn test_silent_source_does_not_stall() {
        let mut mixer = AudioMixer::new(4, true, true);
        mixer.push_microphone(&chunk(4, &[0.1; 3]));
        assert!(mixer.mix().is_none());
        mixer.push_microphone(&chunk(4, &[0.1; 3]));
        assert_eq!(mixer.mix().unwrap().samples.len(), 6);
    }

    #[test]
    fn test_mismatched_rates_are_resampled() {
        let mut mixer = AudioMixer::new(48_000, true, false);
        mixer.push_capture(&chunk(24_000, &[0.0, 1.0, 0.0, 1.0]));
        let mixed = mixer.mix().unwrap();
        assert_eq!(mixed.sample_rate, 48_000);
        assert_eq!(mixed.samples, vec![0.0, 0.5, 1.0, 0.5, 0.0, 0.5, 1.0, 1.0]);

        mixer.push_capture(&chunk(96_000, &[0.25, 0.5, 0.75, 1.0]));
        assert_eq!(mixer.mix().unwrap().samples, vec![0.25, 0.75]);
    }

    #[test]
    fn test_chunk_without_rate_is_dropped() {
        let mut mixer = AudioMixer::new(48_000, false, true);
        mixer.push_microphone(&chunk(0, &[0.5; 16]));
        assert!(mixer.mix().is_none());
    }

    #[test]
    fn test_no_sources() {
        let mut mixer = AudioMixer::new(48_000, false, false);
        assert!(!mixer.has_sources());
        assert!(mixer.mix().is_none());
    }
}
