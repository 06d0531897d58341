//! Decoded sample data shared by all voices.

use crate::constants::SPU_SAMPLE_RATE;

/// Loop region in sample frames: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    /// First sample of the loop
    pub start: u32,
    /// One past the last sample of the loop
    pub end: u32,
}

impl LoopRegion {
    /// Returns the region if it is usable with `len` samples of data.
    ///
    /// A loop needs `start < end <= len`; anything else disables looping.
    pub fn validated(start: u32, end: u32, len: usize) -> Option<Self> {
        if start < end && (end as usize) <= len {
            Some(LoopRegion { start, end })
        } else {
            None
        }
    }

    /// Loop length in samples
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Always false for a validated region
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// 16-bit mono PCM sample with its native rate and optional loop points.
///
/// Voices read the PCM through an `Arc` so swapping samples never copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleData {
    pcm: Box<[i16]>,
    sample_rate: u32,
    loop_region: Option<LoopRegion>,
}

impl SampleData {
    /// Wrap raw PCM recorded at `sample_rate` Hz, with no loop.
    pub fn from_pcm(pcm: Vec<i16>, sample_rate: u32) -> Self {
        SampleData {
            pcm: pcm.into_boxed_slice(),
            sample_rate: if sample_rate == 0 {
                SPU_SAMPLE_RATE
            } else {
                sample_rate
            },
            loop_region: None,
        }
    }

    /// Attach a loop region; invalid regions are dropped.
    pub fn with_loop(mut self, start: u32, end: u32) -> Self {
        self.loop_region = LoopRegion::validated(start, end, self.pcm.len());
        self
    }

    /// PCM samples
    pub fn pcm(&self) -> &[i16] {
        &self.pcm
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    /// True when there is no audio data
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Native sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Loop region embedded in the source data, if any
    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.loop_region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_region_validation() {
        assert_eq!(
            LoopRegion::validated(100, 1100, 2000),
            Some(LoopRegion {
                start: 100,
                end: 1100
            })
        );
        assert_eq!(LoopRegion::validated(1100, 100, 2000), None);
        assert_eq!(LoopRegion::validated(100, 100, 2000), None);
        assert_eq!(LoopRegion::validated(100, 2001, 2000), None);
        assert_eq!(LoopRegion::validated(0, 2000, 2000).map(|r| r.len()), Some(2000));
    }

    #[test]
    fn test_zero_rate_falls_back_to_spu_rate() {
        let data = SampleData::from_pcm(vec![1, 2, 3], 0);
        assert_eq!(data.sample_rate(), SPU_SAMPLE_RATE);
        assert!(data.loop_region().is_none());
        assert_eq!(data.with_loop(0, 4).loop_region(), None);
    }
}
