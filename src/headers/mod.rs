//! Codestream headers: size header, image metadata, transform data and the
//! optional ICC profile. Every bundle has a `read` that either succeeds,
//! fails, or reports [`CodecError::OutOfBounds`] when it ran out of bits,
//! and a symmetric `write`.

pub mod color_encoding;
pub mod extra_channel;
pub mod icc;
pub mod image_metadata;
pub mod transform_data;

use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::constants::MAX_NAME_LENGTH;
use crate::error::CodecError;
use image_metadata::ImageMetadata;
use transform_data::TransformData;

pub(crate) const BITS_PER_SAMPLE_DIST: U32Coder = [
    U32Dist::Val(8),
    U32Dist::Val(10),
    U32Dist::Val(12),
    U32Dist::BitsOffset(4, 1),
];

const DIMENSION_DIST: U32Coder = [
    U32Dist::BitsOffset(9, 1),
    U32Dist::BitsOffset(13, 1),
    U32Dist::BitsOffset(18, 1),
    U32Dist::BitsOffset(30, 1),
];

const NAME_LENGTH_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Bits(4),
    U32Dist::BitsOffset(5, 16),
    U32Dist::BitsOffset(10, 48),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHeader {
    pub xsize: u32,
    pub ysize: u32,
}

impl SizeHeader {
    pub fn new(xsize: u32, ysize: u32) -> Self {
        Self { xsize, ysize }
    }

    pub fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        Ok(Self {
            xsize: reader.read_u32(&DIMENSION_DIST)?,
            ysize: reader.read_u32(&DIMENSION_DIST)?,
        })
    }

    pub fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        if self.xsize == 0 || self.ysize == 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        writer.write_u32(self.xsize, &DIMENSION_DIST)?;
        writer.write_u32(self.ysize, &DIMENSION_DIST)
    }
}

pub(crate) fn read_name(reader: &mut BitReader) -> Result<String, CodecError> {
    let len = reader.read_u32(&NAME_LENGTH_DIST)?;
    if len > MAX_NAME_LENGTH {
        return Err(CodecError::InvalidName);
    }
    let bytes = reader.read_bytes(len as usize)?;
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidName)
}

pub(crate) fn write_name(writer: &mut BitWriter, name: &str) -> Result<(), CodecError> {
    if name.len() > MAX_NAME_LENGTH as usize {
        return Err(CodecError::InvalidEncoderInput);
    }
    writer.write_u32(name.len() as u32, &NAME_LENGTH_DIST)?;
    writer.write_bytes(name.as_bytes());
    Ok(())
}

/// Everything the codestream headers describe about the image.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecMetadata {
    pub size: SizeHeader,
    pub image: ImageMetadata,
    pub transform: TransformData,
    pub icc: Option<Vec<u8>>,
}

impl Default for CodecMetadata {
    fn default() -> Self {
        Self {
            size: SizeHeader::new(0, 0),
            image: ImageMetadata::default(),
            transform: TransformData::default(),
            icc: None,
        }
    }
}

impl CodecMetadata {
    pub fn xsize(&self) -> usize {
        self.size.xsize as usize
    }

    pub fn ysize(&self) -> usize {
        self.size.ysize as usize
    }

    /// Image size as displayed, after undoing the orientation unless
    /// `keep_orientation` is set.
    pub fn oriented_size(&self, keep_orientation: bool) -> (usize, usize) {
        if !keep_orientation && self.image.is_transposing() {
            (self.ysize(), self.xsize())
        } else {
            (self.xsize(), self.ysize())
        }
    }

    pub fn preview_size(&self) -> Option<(usize, usize)> {
        self.image
            .preview_size
            .map(|p| (p.xsize as usize, p.ysize as usize))
    }

    pub fn oriented_preview_size(&self, keep_orientation: bool) -> Option<(usize, usize)> {
        let (xsize, ysize) = self.preview_size()?;
        if !keep_orientation && self.image.is_transposing() {
            Some((ysize, xsize))
        } else {
            Some((xsize, ysize))
        }
    }
}

/// Rough memory check on image and frame dimensions. A `limit` of 0 disables
/// it, zero sized dimensions always pass.
pub fn check_size_limit(limit: usize, xsize: usize, ysize: usize) -> bool {
    if limit == 0 || xsize == 0 || ysize == 0 {
        return true;
    }
    if xsize >= limit || ysize >= limit {
        return false;
    }
    match xsize
        .div_ceil(32)
        .checked_mul(32)
        .and_then(|row| row.checked_mul(ysize))
    {
        Some(num_pixels) => num_pixels <= limit,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limit() {
        assert!(check_size_limit(0, 1 << 30, 1 << 30));
        assert!(check_size_limit(100, 0, 5000));
        assert!(!check_size_limit(1000, 1000, 1));
        assert!(check_size_limit(1024, 32, 32));
        // 33 rounds up to 64.
        assert!(!check_size_limit(1024, 33, 17));
        assert!(!check_size_limit(usize::MAX - 1, usize::MAX / 2, 4));
    }

    #[test]
    fn test_name_limits() {
        let mut writer = BitWriter::new();
        write_name(&mut writer, "layer one").unwrap();
        let bytes = writer.finish();
        assert_eq!(read_name(&mut BitReader::new(&bytes)).unwrap(), "layer one");

        let long = "x".repeat(MAX_NAME_LENGTH as usize + 1);
        assert!(write_name(&mut BitWriter::new(), &long).is_err());

        let mut writer = BitWriter::new();
        writer.write_u32(2, &NAME_LENGTH_DIST).unwrap();
        writer.write_bytes(&[0xC3, 0x28]);
        let bytes = writer.finish();
        assert_eq!(
            read_name(&mut BitReader::new(&bytes)),
            Err(CodecError::InvalidName)
        );
    }

    #[test]
    fn test_oriented_size() {
        let mut metadata = CodecMetadata {
            size: SizeHeader::new(40, 10),
            ..CodecMetadata::default()
        };
        metadata.image.orientation = 7;
        assert_eq!(metadata.oriented_size(false), (10, 40));
        assert_eq!(metadata.oriented_size(true), (40, 10));
    }
}
