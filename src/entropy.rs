//! Adaptive Golomb-Rice residual coding with median edge detection (MED)
//! prediction, used for every plane stored in a section.

use crate::bit_io::{BitReader, BitWriter};
use crate::constants::{
    ESCAPE_PREFIX_LENGTH, ESCAPE_RAW_BITS, MAX_K_VALUE, NUM_ACTIVITY_CONTEXTS, RESET_THRESHOLD,
};
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidualContext {
    a: u32,
    n: u32,
}

impl ResidualContext {
    pub fn new(range: u32) -> Self {
        Self {
            a: std::cmp::max(2, (range + 32) / 64),
            n: 1,
        }
    }

    pub fn compute_golomb_coding_parameter(&self) -> u32 {
        let mut k = 0;
        while (self.n << k) < self.a && k < MAX_K_VALUE {
            k += 1;
        }
        k
    }

    pub fn update(&mut self, mapped_error: u32) {
        self.a += mapped_error;
        if self.n == RESET_THRESHOLD {
            self.a >>= 1;
            self.n >>= 1;
        }
        self.n += 1;
    }
}

/// Median edge detector prediction from the left, top and top-left samples.
pub fn get_predicted_value(ra: i64, rb: i64, rc: i64) -> i64 {
    if rc >= ra.max(rb) {
        ra.min(rb)
    } else if rc <= ra.min(rb) {
        ra.max(rb)
    } else {
        ra + rb - rc
    }
}

fn map_error_value(error_value: i64) -> u32 {
    ((error_value << 1) ^ (error_value >> 63)) as u32
}

fn unmap_error_value(mapped: u32) -> i64 {
    let mapped = mapped as i64;
    if mapped & 1 == 0 {
        mapped >> 1
    } else {
        -((mapped + 1) >> 1)
    }
}

fn activity_context(ra: i64, rb: i64, rc: i64) -> usize {
    let activity = (ra - rc).unsigned_abs() + (rb - rc).unsigned_abs();
    let bucket = (u64::BITS - activity.leading_zeros()) as usize;
    bucket.min(NUM_ACTIVITY_CONTEXTS - 1)
}

/// Neighbourhood of sample `(x, y)`. Missing neighbours are replaced by the
/// nearest available one, so both sides see identical predictions.
fn neighbours(samples: &[u32], xsize: usize, x: usize, y: usize) -> (i64, i64, i64) {
    let at = |x: usize, y: usize| samples[y * xsize + x] as i64;
    let ra = if x > 0 {
        at(x - 1, y)
    } else if y > 0 {
        at(x, y - 1)
    } else {
        0
    };
    let rb = if y > 0 { at(x, y - 1) } else { ra };
    let rc = if x > 0 && y > 0 { at(x - 1, y - 1) } else { rb };
    (ra, rb, rc)
}

struct PlaneCoder {
    contexts: [ResidualContext; NUM_ACTIVITY_CONTEXTS],
}

impl PlaneCoder {
    fn new(bits: u32) -> Self {
        Self {
            contexts: [ResidualContext::new(1u32 << bits); NUM_ACTIVITY_CONTEXTS],
        }
    }

    fn encode_mapped_value(writer: &mut BitWriter, k: u32, mapped_error: u32) {
        let high_bits = mapped_error >> k;
        if high_bits < ESCAPE_PREFIX_LENGTH {
            writer.write_bits(0, high_bits);
            writer.write_bits(1, 1);
            writer.write_bits(mapped_error & ((1u32 << k) - 1), k);
        } else {
            writer.write_bits(0, ESCAPE_PREFIX_LENGTH);
            writer.write_bits(mapped_error, ESCAPE_RAW_BITS);
        }
    }

    fn decode_mapped_value(reader: &mut BitReader, k: u32) -> Result<u32, CodecError> {
        let mut high_bits = 0;
        while high_bits < ESCAPE_PREFIX_LENGTH {
            if reader.read_bool()? {
                let low = reader.read_bits(k)?;
                return Ok((high_bits << k) | low);
            }
            high_bits += 1;
        }
        reader.read_bits(ESCAPE_RAW_BITS)
    }
}

/// Writes `samples`, each in `0..(1 << bits)`, row by row.
pub fn encode_plane(
    writer: &mut BitWriter,
    samples: &[u32],
    xsize: usize,
    ysize: usize,
    bits: u32,
) {
    if bits == 0 {
        return;
    }
    debug_assert_eq!(samples.len(), xsize * ysize);
    let mut coder = PlaneCoder::new(bits);
    for y in 0..ysize {
        for x in 0..xsize {
            let (ra, rb, rc) = neighbours(samples, xsize, x, y);
            let ctx = &mut coder.contexts[activity_context(ra, rb, rc)];
            let k = ctx.compute_golomb_coding_parameter();
            let predicted = get_predicted_value(ra, rb, rc);
            let mapped = map_error_value(samples[y * xsize + x] as i64 - predicted);
            PlaneCoder::encode_mapped_value(writer, k, mapped);
            ctx.update(mapped);
        }
    }
}

pub fn decode_plane(
    reader: &mut BitReader,
    xsize: usize,
    ysize: usize,
    bits: u32,
) -> Result<Vec<u32>, CodecError> {
    let len = xsize.checked_mul(ysize).ok_or(CodecError::FrameTooLarge)?;
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(len)
        .map_err(|_| CodecError::FrameTooLarge)?;
    samples.resize(len, 0u32);
    if bits == 0 {
        return Ok(samples);
    }
    let max_value = (1i64 << bits) - 1;
    let mut coder = PlaneCoder::new(bits);
    for y in 0..ysize {
        for x in 0..xsize {
            let (ra, rb, rc) = neighbours(&samples, xsize, x, y);
            let ctx = &mut coder.contexts[activity_context(ra, rb, rc)];
            let k = ctx.compute_golomb_coding_parameter();
            let mapped = PlaneCoder::decode_mapped_value(reader, k)?;
            let value = get_predicted_value(ra, rb, rc) + unmap_error_value(mapped);
            if !(0..=max_value).contains(&value) {
                return Err(CodecError::InvalidEntropyCode);
            }
            samples[y * xsize + x] = value as u32;
            ctx.update(mapped);
        }
    }
    Ok(samples)
}
