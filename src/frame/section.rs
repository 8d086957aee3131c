//! Section payloads: the global section (patches and the DC image) and the
//! pass groups holding one bit-plane chunk of a 64x64 group per channel.

use super::FrameDim;
use super::header::FrameHeader;
use super::patches::{Patch, read_patches, write_patches};
use crate::bit_io::{BitReader, BitWriter};
use crate::constants::BLOCK_DIM;
use crate::entropy::{decode_plane, encode_plane};
use crate::error::CodecError;

/// Bit range `[lo, hi)` of a sample coded in `pass` out of `num_passes`.
/// The first pass holds the most significant bits.
pub fn pass_bit_range(bits: u32, pass: u32, num_passes: u32) -> (u32, u32) {
    let lo = bits * (num_passes - 1 - pass) / num_passes;
    let hi = bits * (num_passes - pass) / num_passes;
    (lo, hi)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSection {
    pub patches: Vec<Patch>,
    /// Block means per channel, absent when the DC comes from a DC frame.
    pub dc: Option<Vec<Vec<u32>>>,
}

pub fn decode_global(
    reader: &mut BitReader,
    header: &FrameHeader,
    dim: &FrameDim,
    channel_bits: &[u32],
) -> Result<GlobalSection, CodecError> {
    let mut global = GlobalSection::default();
    if header.has_patches {
        global.patches = read_patches(reader)?;
    }
    if !header.use_dc_frame {
        let dc = channel_bits
            .iter()
            .map(|&bits| decode_plane(reader, dim.dc_xsize, dim.dc_ysize, bits))
            .collect::<Result<Vec<_>, _>>()?;
        global.dc = Some(dc);
    }
    Ok(global)
}

pub fn encode_global(
    writer: &mut BitWriter,
    header: &FrameHeader,
    dim: &FrameDim,
    channel_bits: &[u32],
    patches: &[Patch],
    samples: &[Vec<u32>],
) -> Result<(), CodecError> {
    if header.has_patches {
        write_patches(writer, patches)?;
    } else if !patches.is_empty() {
        return Err(CodecError::InvalidEncoderInput);
    }
    if !header.use_dc_frame {
        for (plane, &bits) in samples.iter().zip(channel_bits) {
            let dc = block_means(plane, dim);
            encode_plane(writer, &dc, dim.dc_xsize, dim.dc_ysize, bits);
        }
    }
    Ok(())
}

/// Rounded mean of every 8x8 block, edge blocks cover what is left.
pub fn block_means(plane: &[u32], dim: &FrameDim) -> Vec<u32> {
    let mut dc = Vec::with_capacity(dim.dc_xsize * dim.dc_ysize);
    for by in 0..dim.dc_ysize {
        for bx in 0..dim.dc_xsize {
            let x_end = ((bx + 1) * BLOCK_DIM).min(dim.xsize);
            let y_end = ((by + 1) * BLOCK_DIM).min(dim.ysize);
            let mut sum = 0u64;
            let mut count = 0u64;
            for y in by * BLOCK_DIM..y_end {
                for x in bx * BLOCK_DIM..x_end {
                    sum += plane[y * dim.xsize + x] as u64;
                    count += 1;
                }
            }
            dc.push(((sum + count / 2) / count.max(1)) as u32);
        }
    }
    dc
}

/// Decodes the chunk of every channel for one group and pass. Chunks are
/// group sized and hold the bits of the pass shifted down to 0.
pub fn decode_pass_group(
    reader: &mut BitReader,
    dim: &FrameDim,
    group: usize,
    pass: u32,
    num_passes: u32,
    channel_bits: &[u32],
) -> Result<Vec<Vec<u32>>, CodecError> {
    let rect = dim.group_rect(group);
    channel_bits
        .iter()
        .map(|&bits| {
            let (lo, hi) = pass_bit_range(bits, pass, num_passes);
            decode_plane(reader, rect.xsize, rect.ysize, hi - lo)
        })
        .collect()
}

pub fn encode_pass_group(
    writer: &mut BitWriter,
    dim: &FrameDim,
    group: usize,
    pass: u32,
    num_passes: u32,
    channel_bits: &[u32],
    samples: &[Vec<u32>],
) {
    let rect = dim.group_rect(group);
    for (plane, &bits) in samples.iter().zip(channel_bits) {
        let (lo, hi) = pass_bit_range(bits, pass, num_passes);
        let mask = (1u32 << (hi - lo)) - 1;
        let mut chunk = Vec::with_capacity(rect.xsize * rect.ysize);
        for y in rect.y0..rect.y0 + rect.ysize {
            for x in rect.x0..rect.x0 + rect.xsize {
                chunk.push((plane[y * dim.xsize + x] >> lo) & mask);
            }
        }
        encode_plane(writer, &chunk, rect.xsize, rect.ysize, hi - lo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_bit_ranges_cover_all_bits() {
        assert_eq!(pass_bit_range(8, 0, 1), (0, 8));
        assert_eq!(pass_bit_range(8, 0, 3), (5, 8));
        assert_eq!(pass_bit_range(8, 1, 3), (2, 5));
        assert_eq!(pass_bit_range(8, 2, 3), (0, 2));
        // More passes than bits leaves some passes empty.
        assert_eq!(pass_bit_range(1, 0, 2), (0, 1));
        assert_eq!(pass_bit_range(1, 1, 2), (0, 0));
    }

    #[test]
    fn test_block_means() {
        let dim = FrameDim::new(10, 1);
        let plane: Vec<u32> = (0..10).collect();
        // First block averages 0..8, second 8 and 9.
        assert_eq!(block_means(&plane, &dim), vec![4, 9]);
    }

    #[test]
    fn test_pass_chunks_reassemble() {
        let dim = FrameDim::new(70, 3);
        let bits = [8u32];
        let plane: Vec<u32> = (0..210).map(|i| (i * 37 % 256) as u32).collect();
        let samples = vec![plane.clone()];

        let mut accum = vec![0u32; plane.len()];
        for group in 0..dim.num_groups {
            for pass in 0..3 {
                let mut writer = BitWriter::new();
                encode_pass_group(&mut writer, &dim, group, pass, 3, &bits, &samples);
                let bytes = writer.finish();
                let chunks =
                    decode_pass_group(&mut BitReader::new(&bytes), &dim, group, pass, 3, &bits)
                        .unwrap();
                let rect = dim.group_rect(group);
                let (lo, _) = pass_bit_range(8, pass, 3);
                for (i, value) in chunks[0].iter().enumerate() {
                    let (x, y) = (rect.x0 + i % rect.xsize, rect.y0 + i / rect.xsize);
                    accum[y * dim.xsize + x] |= value << lo;
                }
            }
        }
        assert_eq!(accum, plane);
    }
}
