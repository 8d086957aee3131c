//! Table of contents: the byte size of every section of a frame, in the
//! order the sections are stored.

use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::error::CodecError;

const SECTION_SIZE_DIST: U32Coder = [
    U32Dist::Bits(10),
    U32Dist::BitsOffset(14, 1024),
    U32Dist::BitsOffset(22, 17408),
    U32Dist::BitsOffset(30, 4211712),
];

/// Selector plus the smallest payload of `SECTION_SIZE_DIST`.
const MIN_ENTRY_BITS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Section id: 0 is the global section, `1 + pass * num_groups + group`
    /// a pass group.
    pub id: usize,
    pub size: usize,
    /// Offset from the end of the TOC.
    pub offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toc {
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn total_size(&self) -> usize {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads `num_sections` entries and aligns to the next byte.
    pub fn read(reader: &mut BitReader, num_sections: usize) -> Result<Self, CodecError> {
        let permuted = reader.read_bool()?;
        // Every entry takes at least MIN_ENTRY_BITS, so a count the buffered
        // input cannot hold waits for more data instead of allocating.
        if num_sections.saturating_mul(MIN_ENTRY_BITS) > reader.remaining_bits() {
            return Err(CodecError::OutOfBounds);
        }
        let mut ids: Vec<usize> = (0..num_sections).collect();
        if permuted {
            let mut seen = vec![false; num_sections];
            for id in ids.iter_mut() {
                let value = reader.read_u32(&SECTION_SIZE_DIST)? as usize;
                if value >= num_sections || seen[value] {
                    return Err(CodecError::InvalidToc);
                }
                seen[value] = true;
                *id = value;
            }
        }
        let mut entries = Vec::with_capacity(num_sections);
        let mut offset = 0usize;
        for id in ids {
            let size = reader.read_u32(&SECTION_SIZE_DIST)? as usize;
            entries.push(TocEntry { id, size, offset });
            offset = offset.checked_add(size).ok_or(CodecError::InvalidToc)?;
        }
        reader.jump_to_byte_boundary()?;
        Ok(Self { entries })
    }

    /// Writes sections stored in `order` with the given sizes, indexed by id.
    pub fn write(
        writer: &mut BitWriter,
        order: &[usize],
        sizes: &[usize],
    ) -> Result<(), CodecError> {
        let permuted = order.iter().enumerate().any(|(i, &id)| i != id);
        writer.write_bool(permuted);
        if permuted {
            for &id in order {
                writer.write_u32(id as u32, &SECTION_SIZE_DIST)?;
            }
        }
        for &id in order {
            let size = u32::try_from(sizes[id]).map_err(|_| CodecError::InvalidEncoderInput)?;
            writer.write_u32(size, &SECTION_SIZE_DIST)?;
        }
        writer.zero_pad_to_byte();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permuted_toc() {
        let sizes = [10, 2000, 0, 70000];
        let order = [0, 3, 1, 2];
        let mut writer = BitWriter::new();
        Toc::write(&mut writer, &order, &sizes).unwrap();
        let bytes = writer.finish();
        let toc = Toc::read(&mut BitReader::new(&bytes), 4).unwrap();
        let ids: Vec<usize> = toc.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, order);
        assert_eq!(toc.entries[1].size, 70000);
        assert_eq!(toc.entries[2].offset, 70010);
        assert_eq!(toc.total_size(), 72010);
    }

    #[test]
    fn test_duplicate_section_id() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_u32(1, &SECTION_SIZE_DIST).unwrap();
        writer.write_u32(1, &SECTION_SIZE_DIST).unwrap();
        let bytes = writer.finish();
        assert_eq!(
            Toc::read(&mut BitReader::new(&bytes), 2),
            Err(CodecError::InvalidToc)
        );
    }

    #[test]
    fn test_truncated_toc() {
        let mut writer = BitWriter::new();
        Toc::write(&mut writer, &[0, 1, 2], &[5, 5, 5]).unwrap();
        let bytes = writer.finish();
        assert_eq!(
            Toc::read(&mut BitReader::new(&bytes[..1]), 3),
            Err(CodecError::OutOfBounds)
        );
    }

    #[test]
    fn test_section_count_beyond_input_waits_for_data() {
        let mut writer = BitWriter::new();
        Toc::write(&mut writer, &[0, 1], &[5, 5]).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            Toc::read(&mut reader, usize::MAX),
            Err(CodecError::OutOfBounds)
        );
        assert_eq!(
            Toc::read(&mut BitReader::new(&bytes), 1 << 40),
            Err(CodecError::OutOfBounds)
        );
    }
}
