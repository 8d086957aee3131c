use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist, pack_signed, unpack_signed};
use crate::constants::{BLOCK_DIM, MAX_DC_LEVEL, MAX_NUM_PASSES};
use crate::error::CodecError;
use crate::headers::{CodecMetadata, read_name, write_name};
use num_enum::{IntoPrimitive, TryFromPrimitive};

const NUM_PASSES_DIST: U32Coder = [
    U32Dist::Val(1),
    U32Dist::Val(2),
    U32Dist::Val(3),
    U32Dist::BitsOffset(3, 4),
];

const DC_LEVEL_DIST: U32Coder = [
    U32Dist::Val(1),
    U32Dist::Val(2),
    U32Dist::Val(3),
    U32Dist::Val(4),
];

const CROP_DIST: U32Coder = [
    U32Dist::Bits(8),
    U32Dist::BitsOffset(11, 256),
    U32Dist::BitsOffset(14, 2304),
    U32Dist::BitsOffset(30, 18688),
];

const ALPHA_CHANNEL_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Val(1),
    U32Dist::Val(2),
    U32Dist::BitsOffset(3, 3),
];

const DURATION_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Val(1),
    U32Dist::Bits(8),
    U32Dist::Bits(32),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum FrameType {
    #[default]
    Regular = 0,
    /// Holds the 1/8 resolution DC image of a later frame.
    DcFrame = 1,
    /// Decoded only to be stored for blending or patches.
    ReferenceOnly = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum BlendMode {
    #[default]
    Replace = 0,
    Add = 1,
    Blend = 2,
    AlphaWeightedAdd = 3,
    Mul = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendingInfo {
    pub mode: BlendMode,
    /// Storage slot holding the background.
    pub source: u32,
    /// Extra channel index of the alpha used by `Blend` and
    /// `AlphaWeightedAdd`.
    pub alpha_channel: u32,
    pub clamp: bool,
}

impl BlendingInfo {
    fn uses_alpha(&self) -> bool {
        matches!(self.mode, BlendMode::Blend | BlendMode::AlphaWeightedAdd)
    }

    fn read(
        reader: &mut BitReader,
        cropped: bool,
        num_extra_channels: usize,
    ) -> Result<Self, CodecError> {
        let mut info = Self {
            mode: reader.read_enum()?,
            ..Self::default()
        };
        if info.mode != BlendMode::Replace || cropped {
            info.source = reader.read_bits(2)?;
        }
        if info.uses_alpha() {
            if num_extra_channels == 0 {
                return Err(CodecError::InvalidFrameHeader);
            }
            info.alpha_channel = reader.read_u32(&ALPHA_CHANNEL_DIST)?;
            if info.alpha_channel as usize >= num_extra_channels {
                return Err(CodecError::InvalidFrameHeader);
            }
        }
        if info.uses_alpha() || info.mode == BlendMode::Mul {
            info.clamp = reader.read_bool()?;
        }
        Ok(info)
    }

    fn write(
        &self,
        writer: &mut BitWriter,
        cropped: bool,
        num_extra_channels: usize,
    ) -> Result<(), CodecError> {
        writer.write_enum(self.mode)?;
        if self.mode != BlendMode::Replace || cropped {
            if self.source > 3 {
                return Err(CodecError::InvalidEncoderInput);
            }
            writer.write_bits(self.source, 2);
        }
        if self.uses_alpha() {
            if self.alpha_channel as usize >= num_extra_channels {
                return Err(CodecError::InvalidEncoderInput);
            }
            writer.write_u32(self.alpha_channel, &ALPHA_CHANNEL_DIST)?;
        }
        if self.uses_alpha() || self.mode == BlendMode::Mul {
            writer.write_bool(self.clamp);
        }
        Ok(())
    }
}

/// Position and size of a frame that does not cover the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    pub x0: i32,
    pub y0: i32,
    pub xsize: u32,
    pub ysize: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub num_passes: u32,
    /// 1..=4 for DC frames, 0 otherwise.
    pub dc_level: u32,
    pub use_dc_frame: bool,
    pub has_patches: bool,
    pub crop: Option<Crop>,
    pub blending: BlendingInfo,
    pub extra_blending: Vec<BlendingInfo>,
    pub duration: u32,
    pub timecode: u32,
    pub is_last: bool,
    pub save_as_reference: u32,
    pub name: String,
    /// Not serialized: set while decoding the preview frame.
    pub is_preview: bool,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            frame_type: FrameType::Regular,
            num_passes: 1,
            dc_level: 0,
            use_dc_frame: false,
            has_patches: false,
            crop: None,
            blending: BlendingInfo::default(),
            extra_blending: Vec::new(),
            duration: 0,
            timecode: 0,
            is_last: true,
            save_as_reference: 0,
            name: String::new(),
            is_preview: false,
        }
    }
}

impl FrameHeader {
    fn default_for(num_extra_channels: usize) -> Self {
        Self {
            extra_blending: vec![BlendingInfo::default(); num_extra_channels],
            ..Self::default()
        }
    }

    pub fn read(
        reader: &mut BitReader,
        metadata: &CodecMetadata,
        is_preview: bool,
    ) -> Result<Self, CodecError> {
        let num_extra_channels = metadata.image.extra_channels.len();
        let mut header = Self::default_for(num_extra_channels);
        header.is_preview = is_preview;
        if reader.read_bool()? {
            return Ok(header);
        }

        header.frame_type = FrameType::try_from_primitive(reader.read_bits(2)?)
            .map_err(|_| CodecError::InvalidFrameHeader)?;
        header.num_passes = reader.read_u32(&NUM_PASSES_DIST)?;
        if header.num_passes > MAX_NUM_PASSES {
            return Err(CodecError::InvalidFrameHeader);
        }
        if header.frame_type == FrameType::DcFrame {
            header.dc_level = reader.read_u32(&DC_LEVEL_DIST)?;
        }
        header.use_dc_frame = reader.read_bool()?;
        if header.use_dc_frame && header.dc_level == MAX_DC_LEVEL {
            return Err(CodecError::InvalidFrameHeader);
        }
        header.has_patches = reader.read_bool()?;

        if header.frame_type != FrameType::DcFrame && reader.read_bool()? {
            let x0 = unpack_signed(reader.read_u32(&CROP_DIST)?);
            let y0 = unpack_signed(reader.read_u32(&CROP_DIST)?);
            let xsize = reader.read_u32(&CROP_DIST)?;
            let ysize = reader.read_u32(&CROP_DIST)?;
            if xsize == 0 || ysize == 0 {
                return Err(CodecError::InvalidFrameHeader);
            }
            header.crop = Some(Crop {
                x0,
                y0,
                xsize,
                ysize,
            });
        }

        if header.frame_type == FrameType::Regular {
            let cropped = header.crop.is_some();
            header.blending = BlendingInfo::read(reader, cropped, num_extra_channels)?;
            for info in header.extra_blending.iter_mut() {
                *info = BlendingInfo::read(reader, cropped, num_extra_channels)?;
            }
            if let Some(animation) = &metadata.image.animation {
                header.duration = reader.read_u32(&DURATION_DIST)?;
                if animation.have_timecodes {
                    header.timecode = reader.read_bits(32)?;
                }
            }
            header.is_last = reader.read_bool()?;
        } else {
            header.is_last = false;
        }

        if !header.is_last && header.frame_type != FrameType::DcFrame {
            header.save_as_reference = reader.read_bits(2)?;
        }
        header.name = read_name(reader)?;

        if is_preview && !header.is_plain() {
            return Err(CodecError::InvalidFrameHeader);
        }
        Ok(header)
    }

    pub fn write(
        &self,
        writer: &mut BitWriter,
        metadata: &CodecMetadata,
    ) -> Result<(), CodecError> {
        let num_extra_channels = metadata.image.extra_channels.len();
        let mut expected_default = Self::default_for(num_extra_channels);
        expected_default.is_preview = self.is_preview;
        let all_default = *self == expected_default;
        writer.write_bool(all_default);
        if all_default {
            return Ok(());
        }
        if self.extra_blending.len() != num_extra_channels
            || self.num_passes == 0
            || self.num_passes > MAX_NUM_PASSES
        {
            return Err(CodecError::InvalidEncoderInput);
        }

        writer.write_bits(self.frame_type.into(), 2);
        writer.write_u32(self.num_passes, &NUM_PASSES_DIST)?;
        if self.frame_type == FrameType::DcFrame {
            writer.write_u32(self.dc_level, &DC_LEVEL_DIST)?;
        } else if self.dc_level != 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        if self.use_dc_frame && self.dc_level == MAX_DC_LEVEL {
            return Err(CodecError::InvalidEncoderInput);
        }
        writer.write_bool(self.use_dc_frame);
        writer.write_bool(self.has_patches);

        if self.frame_type != FrameType::DcFrame {
            writer.write_bool(self.crop.is_some());
            if let Some(crop) = &self.crop {
                if crop.xsize == 0 || crop.ysize == 0 {
                    return Err(CodecError::InvalidEncoderInput);
                }
                writer.write_u32(pack_signed(crop.x0), &CROP_DIST)?;
                writer.write_u32(pack_signed(crop.y0), &CROP_DIST)?;
                writer.write_u32(crop.xsize, &CROP_DIST)?;
                writer.write_u32(crop.ysize, &CROP_DIST)?;
            }
        } else if self.crop.is_some() {
            return Err(CodecError::InvalidEncoderInput);
        }

        if self.frame_type == FrameType::Regular {
            let cropped = self.crop.is_some();
            self.blending.write(writer, cropped, num_extra_channels)?;
            for info in &self.extra_blending {
                info.write(writer, cropped, num_extra_channels)?;
            }
            if let Some(animation) = &metadata.image.animation {
                writer.write_u32(self.duration, &DURATION_DIST)?;
                if animation.have_timecodes {
                    writer.write_bits(self.timecode, 32);
                }
            }
            writer.write_bool(self.is_last);
        } else if self.is_last {
            return Err(CodecError::InvalidEncoderInput);
        }

        if !self.is_last && self.frame_type != FrameType::DcFrame {
            if self.save_as_reference > 3 {
                return Err(CodecError::InvalidEncoderInput);
            }
            writer.write_bits(self.save_as_reference, 2);
        }
        write_name(writer, &self.name)
    }

    /// Preview frames may not use any cross-frame feature.
    fn is_plain(&self) -> bool {
        self.frame_type == FrameType::Regular
            && self.crop.is_none()
            && !self.use_dc_frame
            && !self.has_patches
            && self.blending.mode == BlendMode::Replace
    }

    /// Whether a later frame can reference this frame through a slot.
    pub fn can_be_referenced(&self) -> bool {
        !self.is_last
            && self.frame_type != FrameType::DcFrame
            && (self.duration == 0
                || self.save_as_reference != 0
                || self.frame_type == FrameType::ReferenceOnly)
    }

    /// Slot mask this frame is stored in: bits 0..=3 for regular references,
    /// bits 4..=7 for DC levels 1..=4.
    pub fn saved_as(&self) -> u8 {
        if self.is_preview {
            0
        } else if self.frame_type == FrameType::DcFrame {
            16u8 << (self.dc_level - 1)
        } else if self.can_be_referenced() {
            1u8 << self.save_as_reference
        } else {
            0
        }
    }

    /// Storage slot the DC image is read from when `use_dc_frame` is set.
    pub fn dc_source_slot(&self) -> usize {
        4 + self.dc_level as usize
    }

    /// Slots read for blending and the DC image. Patch slots are only known
    /// once the global section is decoded.
    pub fn header_references(&self) -> u8 {
        let mut result = 0u8;
        if self.frame_type == FrameType::Regular {
            let cropped = self.crop.is_some();
            for info in std::iter::once(&self.blending).chain(&self.extra_blending) {
                if cropped || info.mode != BlendMode::Replace {
                    result |= 1u8 << info.source;
                }
            }
        }
        if self.use_dc_frame {
            result |= 1u8 << self.dc_source_slot();
        }
        result
    }

    /// Frame dimensions in samples.
    pub fn frame_size(&self, metadata: &CodecMetadata) -> (usize, usize) {
        if self.is_preview {
            return metadata.preview_size().unwrap_or((0, 0));
        }
        if self.frame_type == FrameType::DcFrame {
            let shift = 3 * self.dc_level;
            let scale = 1usize << shift;
            return (
                metadata.xsize().div_ceil(scale),
                metadata.ysize().div_ceil(scale),
            );
        }
        match &self.crop {
            Some(crop) => (crop.xsize as usize, crop.ysize as usize),
            None => (metadata.xsize(), metadata.ysize()),
        }
    }

    pub fn dc_size(&self, metadata: &CodecMetadata) -> (usize, usize) {
        let (xsize, ysize) = self.frame_size(metadata);
        (xsize.div_ceil(BLOCK_DIM), ysize.div_ceil(BLOCK_DIM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::SizeHeader;
    use crate::headers::extra_channel::{ExtraChannelInfo, ExtraChannelType};
    use crate::headers::image_metadata::AnimationHeader;

    fn metadata_with_alpha() -> CodecMetadata {
        let mut metadata = CodecMetadata {
            size: SizeHeader::new(100, 80),
            ..CodecMetadata::default()
        };
        metadata
            .image
            .extra_channels
            .push(ExtraChannelInfo::new(ExtraChannelType::Alpha, 8));
        metadata.image.animation = Some(AnimationHeader {
            have_timecodes: true,
            ..AnimationHeader::default()
        });
        metadata
    }

    #[test]
    fn test_cropped_blended_frame() {
        let metadata = metadata_with_alpha();
        let header = FrameHeader {
            num_passes: 3,
            crop: Some(Crop {
                x0: -5,
                y0: 7,
                xsize: 20,
                ysize: 10,
            }),
            blending: BlendingInfo {
                mode: BlendMode::Blend,
                source: 2,
                alpha_channel: 0,
                clamp: true,
            },
            extra_blending: vec![BlendingInfo::default()],
            duration: 12,
            timecode: 0xABCD,
            is_last: false,
            save_as_reference: 1,
            name: "layer".to_string(),
            ..FrameHeader::default()
        };
        let mut writer = BitWriter::new();
        header.write(&mut writer, &metadata).unwrap();
        let bytes = writer.finish();
        let decoded = FrameHeader::read(&mut BitReader::new(&bytes), &metadata, false).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.frame_size(&metadata), (20, 10));
        assert_eq!(decoded.saved_as(), 2);
        // Cropped, so both the color and the alpha blending read slot 0 or 2.
        assert_eq!(decoded.header_references(), 0b101);
    }

    #[test]
    fn test_dc_frame() {
        let metadata = metadata_with_alpha();
        let header = FrameHeader {
            frame_type: FrameType::DcFrame,
            dc_level: 1,
            is_last: false,
            extra_blending: vec![BlendingInfo::default()],
            ..FrameHeader::default()
        };
        let mut writer = BitWriter::new();
        header.write(&mut writer, &metadata).unwrap();
        let bytes = writer.finish();
        let decoded = FrameHeader::read(&mut BitReader::new(&bytes), &metadata, false).unwrap();
        assert_eq!(decoded.saved_as(), 16);
        assert!(!decoded.can_be_referenced());
        assert_eq!(decoded.frame_size(&metadata), (13, 10));
    }

    #[test]
    fn test_animation_frame_with_duration_is_not_referenceable() {
        let header = FrameHeader {
            duration: 5,
            is_last: false,
            ..FrameHeader::default()
        };
        assert!(!header.can_be_referenced());
        assert_eq!(header.saved_as(), 0);
        let header = FrameHeader {
            use_dc_frame: true,
            ..header
        };
        assert_eq!(header.header_references(), 16);
    }

    #[test]
    fn test_invalid_frame_type() {
        let metadata = CodecMetadata::default();
        let mut writer = BitWriter::new();
        writer.write_bool(false);
        writer.write_bits(3, 2);
        let bytes = writer.finish();
        assert_eq!(
            FrameHeader::read(&mut BitReader::new(&bytes), &metadata, false),
            Err(CodecError::InvalidFrameHeader)
        );
    }
}
