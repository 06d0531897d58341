//! PS-ADPCM coding and VAG files
//!
//! SPU samples are stored as 16-byte ADPCM blocks, each holding 28 4-bit
//! samples:
//!
//! ```text
//! byte 0     : filter (bits 4-6) | shift (bits 0-3)
//! byte 1     : flags (loop end / repeat / loop start)
//! bytes 2-15 : 28 nibbles, low nibble first
//! ```
//!
//! Each nibble is sign extended, shifted into the top of a 16-bit word, scaled
//! down by `shift` and fed through one of five fixed prediction filters.
//!
//! The encoder runs the same arithmetic in reverse: it tries every filter and
//! shift on each block and keeps the pair with the lowest squared error.
//!
//! A VAG file is a 48-byte big-endian header ("VAGp", data size, sample rate,
//! name) followed by the ADPCM body.

use bitflags::bitflags;

use crate::constants::{ADPCM_BLOCK_SIZE, ADPCM_SAMPLES_PER_BLOCK};
use crate::sample::SampleData;
use crate::{Result, SpuError};

bitflags! {
    /// PS-ADPCM block flags (byte 1 of every block)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AdpcmFlags: u8 {
        /// Last block of the sample or loop
        const LOOP_END = 0x01;
        /// With `LOOP_END`: jump back to the loop start instead of stopping
        const REPEAT = 0x02;
        /// First block of the loop
        const LOOP_START = 0x04;
    }
}

impl AdpcmFlags {
    /// Block that marks the end of sample data (loops on itself silently)
    pub const TERMINATOR: AdpcmFlags = AdpcmFlags::all();
}

/// Positive and negative prediction filter coefficients (1/64 units)
const FILTER_POS: [i32; 5] = [0, 60, 115, 98, 122];
const FILTER_NEG: [i32; 5] = [0, 0, -52, -55, -60];

/// Largest shift the hardware decodes as written
const MAX_SHIFT: u32 = 12;

const VAG_MAGIC: &[u8; 4] = b"VAGp";
const VAG_VERSION: u32 = 0x20;
const VAG_HEADER_SIZE: usize = 48;
const VAG_NAME_SIZE: usize = 16;

/// Parsed VAG sample file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VagFile {
    /// Sample name from the header (may be empty)
    pub name: String,
    /// Decoded sample, including any loop region from the block flags
    pub sample: SampleData,
}

/// Decode a single 16-byte block, updating the filter history.
///
/// `history` is `(previous, before_previous)` sample.
fn decode_block(block: &[u8], history: &mut (i32, i32), out: &mut Vec<i16>) {
    let mut shift = (block[0] & 0x0F) as u32;
    if shift > 12 {
        shift = 9;
    }
    let filter = ((block[0] >> 4) & 0x07).min(4) as usize;
    let (pos, neg) = (FILTER_POS[filter], FILTER_NEG[filter]);

    for &byte in &block[2..ADPCM_BLOCK_SIZE] {
        for nibble in [byte & 0x0F, byte >> 4] {
            // Sign-extend the nibble into the top of a 16-bit word
            let raw = (((nibble as u16) << 12) as i16 as i32) >> shift;
            let predicted = (history.0 * pos + history.1 * neg + 32) >> 6;
            let sample = (raw + predicted).clamp(i16::MIN as i32, i16::MAX as i32);
            history.1 = history.0;
            history.0 = sample;
            out.push(sample as i16);
        }
    }
}

/// Decode a run of PS-ADPCM blocks into PCM.
///
/// Decoding stops after the first block flagged `LOOP_END`, or before a
/// terminator block. A `LOOP_START` block followed by a `LOOP_END | REPEAT`
/// block becomes the sample's loop region. Trailing bytes that do not fill a
/// block are ignored.
///
/// # Errors
///
/// Returns `SpuError::InvalidSample` when `data` holds no complete block.
pub fn decode_blocks(data: &[u8], sample_rate: u32) -> Result<SampleData> {
    let block_count = data.len() / ADPCM_BLOCK_SIZE;
    if block_count == 0 {
        return Err(SpuError::InvalidSample(format!(
            "ADPCM data too short: {} bytes, need at least {ADPCM_BLOCK_SIZE}",
            data.len()
        )));
    }

    let mut pcm = Vec::with_capacity(block_count * ADPCM_SAMPLES_PER_BLOCK);
    let mut history = (0, 0);
    let mut loop_start = None;
    let mut loop_end = None;

    for block in data.chunks_exact(ADPCM_BLOCK_SIZE) {
        let flags = AdpcmFlags::from_bits_truncate(block[1]);
        if flags == AdpcmFlags::TERMINATOR {
            break;
        }
        if flags.contains(AdpcmFlags::LOOP_START) {
            loop_start = Some(pcm.len() as u32);
        }

        decode_block(block, &mut history, &mut pcm);

        if flags.contains(AdpcmFlags::LOOP_END) {
            if flags.contains(AdpcmFlags::REPEAT) {
                loop_end = Some(pcm.len() as u32);
            }
            break;
        }
    }

    let sample = SampleData::from_pcm(pcm, sample_rate);
    Ok(match (loop_start, loop_end) {
        (Some(start), Some(end)) => sample.with_loop(start, end),
        (None, Some(end)) => sample.with_loop(0, end),
        _ => sample,
    })
}

fn blocks_for(samples: usize) -> usize {
    (samples + ADPCM_SAMPLES_PER_BLOCK - 1) / ADPCM_SAMPLES_PER_BLOCK
}

/// Quantize one block with a fixed filter and shift, writing nibbles into
/// `nibbles` and returning the squared error. `history` tracks the decoded
/// output, not the source, so the decoder sees exactly the same predictions.
fn quantize_block(
    frame: &[i16; ADPCM_SAMPLES_PER_BLOCK],
    filter: usize,
    shift: u32,
    history: &mut (i32, i32),
    nibbles: &mut [u8],
) -> i64 {
    let (pos, neg) = (FILTER_POS[filter], FILTER_NEG[filter]);
    let scale = 1i32 << (MAX_SHIFT - shift);
    let mut error = 0i64;

    for (i, &target) in frame.iter().enumerate() {
        let predicted = (history.0 * pos + history.1 * neg + 32) >> 6;
        let residual = target as i32 - predicted;
        let nibble = (residual + scale / 2).div_euclid(scale).clamp(-8, 7);
        let decoded = (nibble * scale + predicted).clamp(i16::MIN as i32, i16::MAX as i32);
        history.1 = history.0;
        history.0 = decoded;

        let diff = (target as i32 - decoded) as i64;
        error += diff * diff;
        nibbles[i / 2] |= ((nibble as u8) & 0x0F) << ((i % 2) * 4);
    }
    error
}

fn encode_block(
    frame: &[i16; ADPCM_SAMPLES_PER_BLOCK],
    history: &mut (i32, i32),
    flags: AdpcmFlags,
) -> [u8; ADPCM_BLOCK_SIZE] {
    let mut best_error = i64::MAX;
    let mut best_block = [0u8; ADPCM_BLOCK_SIZE];
    let mut best_history = *history;

    for filter in 0..FILTER_POS.len() {
        for shift in 0..=MAX_SHIFT {
            let mut block = [0u8; ADPCM_BLOCK_SIZE];
            block[0] = ((filter as u8) << 4) | shift as u8;
            block[1] = flags.bits();
            let mut trial = *history;
            let error = quantize_block(frame, filter, shift, &mut trial, &mut block[2..]);
            if error < best_error {
                best_error = error;
                best_block = block;
                best_history = trial;
            }
        }
    }

    *history = best_history;
    best_block
}

/// Encode PCM into PS-ADPCM blocks, followed by a terminator block.
///
/// Each block gets the filter and shift with the lowest squared error.
/// Loop points widen to block boundaries: `LOOP_START` marks the block
/// holding the loop start, and encoding stops at the block holding the last
/// loop sample, flagged `LOOP_END | REPEAT`. A loop inside a single block is
/// stretched over two, since all three flags on one block read as a
/// terminator. Without a loop the last data block carries `LOOP_END`. The
/// tail is padded with silence, and an empty sample still yields one block.
pub fn encode_blocks(sample: &SampleData) -> Vec<u8> {
    let pcm = sample.pcm();
    let loop_blocks = sample.loop_region().map(|region| {
        let start = region.start as usize / ADPCM_SAMPLES_PER_BLOCK;
        let end = blocks_for(region.end as usize) - 1;
        (start, end.max(start + 1))
    });
    let block_count = match loop_blocks {
        Some((_, end)) => end + 1,
        None => blocks_for(pcm.len()).max(1),
    };

    let mut out = Vec::with_capacity((block_count + 1) * ADPCM_BLOCK_SIZE);
    let mut history = (0, 0);
    let mut frame = [0i16; ADPCM_SAMPLES_PER_BLOCK];

    for index in 0..block_count {
        frame.fill(0);
        if let Some(source) = pcm.get(index * ADPCM_SAMPLES_PER_BLOCK..) {
            let n = source.len().min(ADPCM_SAMPLES_PER_BLOCK);
            frame[..n].copy_from_slice(&source[..n]);
        }

        let mut flags = AdpcmFlags::empty();
        match loop_blocks {
            Some((start, end)) => {
                if index == start {
                    flags |= AdpcmFlags::LOOP_START;
                }
                if index == end {
                    flags |= AdpcmFlags::LOOP_END | AdpcmFlags::REPEAT;
                }
            }
            None if index + 1 == block_count => flags |= AdpcmFlags::LOOP_END,
            None => {}
        }

        out.extend_from_slice(&encode_block(&frame, &mut history, flags));
    }

    let mut terminator = [0u8; ADPCM_BLOCK_SIZE];
    terminator[1] = AdpcmFlags::TERMINATOR.bits();
    out.extend_from_slice(&terminator);
    out
}

fn read_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| SpuError::InvalidSample(format!("VAG header truncated at offset {offset}")))
}

/// Parse a VAG file and decode its sample data.
///
/// # Errors
///
/// Returns `SpuError::InvalidSample` if the magic is wrong, the header is
/// truncated, the sample rate is zero, or the declared data size exceeds the
/// file.
pub fn parse_vag(data: &[u8]) -> Result<VagFile> {
    if data.len() < VAG_HEADER_SIZE {
        return Err(SpuError::InvalidSample(format!(
            "VAG file too short: {} bytes",
            data.len()
        )));
    }
    if &data[0..4] != VAG_MAGIC {
        return Err(SpuError::InvalidSample("missing VAGp magic".into()));
    }

    let data_size = read_u32_be(data, 12)? as usize;
    let sample_rate = read_u32_be(data, 16)?;
    if sample_rate == 0 {
        return Err(SpuError::InvalidSample("VAG sample rate is zero".into()));
    }

    let name_bytes = &data[32..48];
    let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(16);
    let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

    let body_end = VAG_HEADER_SIZE
        .checked_add(data_size)
        .ok_or_else(|| SpuError::InvalidSample("VAG data size overflow".into()))?;
    if body_end > data.len() {
        return Err(SpuError::InvalidSample(format!(
            "VAG body truncated: header declares {data_size} bytes, file has {}",
            data.len() - VAG_HEADER_SIZE
        )));
    }

    let sample = decode_blocks(&data[VAG_HEADER_SIZE..body_end], sample_rate)?;
    Ok(VagFile { name, sample })
}

/// Encode a sample as a VAG file.
///
/// `name` is cut to the 16-byte header field on a character boundary.
pub fn write_vag(name: &str, sample: &SampleData) -> Vec<u8> {
    let body = encode_blocks(sample);
    let name_len = name
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= VAG_NAME_SIZE)
        .last()
        .unwrap_or(0);

    let mut out = Vec::with_capacity(VAG_HEADER_SIZE + body.len());
    out.extend_from_slice(VAG_MAGIC);
    out.extend_from_slice(&VAG_VERSION.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&sample.sample_rate().to_be_bytes());
    out.extend_from_slice(&[0u8; 12]);
    let mut name_field = [0u8; VAG_NAME_SIZE];
    name_field[..name_len].copy_from_slice(&name.as_bytes()[..name_len]);
    out.extend_from_slice(&name_field);
    out.extend_from_slice(&body);
    out
}
