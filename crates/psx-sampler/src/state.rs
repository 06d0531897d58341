//! Persisted instrument state
//!
//! Binary layout (little-endian):
//!
//! ```text
//! offset  size        field
//! 0       4           magic "PSXS"
//! 4       2           format version (1)
//! 6       2           parameter count (25)
//! 8       count * 8   parameter values, f64
//! ..      1           sample flag (0 = no sample, 1 = sample follows)
//! ..      4           sample rate in Hz            (sample only)
//! ..      4           sample length in samples     (sample only)
//! ..      length * 2  PCM, i16                     (sample only)
//! ```
//!
//! Loop points live in the parameters, so the stored sample carries none.

use psx_spu::SampleData;

use crate::params::{Params, PARAM_COUNT};
use crate::{Result, SamplerError};

const STATE_MAGIC: &[u8; 4] = b"PSXS";
const STATE_VERSION: u16 = 1;

/// Encode parameters and the optional sample into a state blob
pub fn encode_state(params: &Params, sample: Option<&SampleData>) -> Vec<u8> {
    let pcm_len = sample.map_or(0, |s| s.len());
    let mut out = Vec::with_capacity(8 + PARAM_COUNT * 8 + 9 + pcm_len * 2);

    out.extend_from_slice(STATE_MAGIC);
    out.extend_from_slice(&STATE_VERSION.to_le_bytes());
    out.extend_from_slice(&(PARAM_COUNT as u16).to_le_bytes());
    for value in params.values() {
        out.extend_from_slice(&value.to_le_bytes());
    }

    match sample {
        Some(sample) => {
            out.push(1);
            out.extend_from_slice(&sample.sample_rate().to_le_bytes());
            out.extend_from_slice(&(sample.len() as u32).to_le_bytes());
            for s in sample.pcm() {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        None => out.push(0),
    }
    out
}

/// Bounds-checked little-endian reader over a state blob
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                SamplerError::State(format!(
                    "truncated state: need {len} bytes at offset {}, have {}",
                    self.offset,
                    self.data.len().saturating_sub(self.offset)
                ))
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

/// Decode a state blob.
///
/// Nothing is applied here; callers swap the result in only on success.
///
/// # Errors
///
/// Returns `SamplerError::State` for a wrong magic or version, a parameter
/// count other than 25, truncated data, non-finite values or a bad sample
/// flag.
pub fn decode_state(data: &[u8]) -> Result<(Params, Option<SampleData>)> {
    let mut reader = Reader::new(data);

    if &reader.array::<4>()? != STATE_MAGIC {
        return Err(SamplerError::State("missing PSXS magic".into()));
    }
    let version = reader.u16()?;
    if version != STATE_VERSION {
        return Err(SamplerError::State(format!(
            "unsupported state version {version}"
        )));
    }
    let count = reader.u16()? as usize;
    if count != PARAM_COUNT {
        return Err(SamplerError::State(format!(
            "expected {PARAM_COUNT} parameters, found {count}"
        )));
    }

    let mut values = [0.0; PARAM_COUNT];
    for value in values.iter_mut() {
        *value = reader.f64()?;
    }
    let params = Params::from_values(values)?;

    let sample = match reader.u8()? {
        0 => None,
        1 => {
            let sample_rate = reader.u32()?;
            let len = reader.u32()? as usize;
            let bytes = reader.take(len.checked_mul(2).ok_or_else(|| {
                SamplerError::State(format!("sample length {len} overflows"))
            })?)?;
            let pcm = bytes
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            Some(SampleData::from_pcm(pcm, sample_rate))
        }
        flag => {
            return Err(SamplerError::State(format!("invalid sample flag {flag}")));
        }
    };

    Ok((params, sample))
}
