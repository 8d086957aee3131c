use super::color_encoding::ColorEncoding;
use super::extra_channel::{ExtraChannelInfo, ExtraChannelType};
use super::{BITS_PER_SAMPLE_DIST, SizeHeader};
use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::constants::{DEFAULT_INTENSITY_TARGET, MAX_BITS_PER_SAMPLE, MAX_EXTRA_CHANNELS};
use crate::error::CodecError;

const NUM_EXTRA_CHANNELS_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Val(1),
    U32Dist::BitsOffset(4, 2),
    U32Dist::BitsOffset(8, 18),
];

const TPS_NUMERATOR_DIST: U32Coder = [
    U32Dist::Val(100),
    U32Dist::Val(1000),
    U32Dist::BitsOffset(10, 1),
    U32Dist::BitsOffset(30, 1),
];

const TPS_DENOMINATOR_DIST: U32Coder = [
    U32Dist::Val(1),
    U32Dist::Val(1001),
    U32Dist::BitsOffset(8, 1),
    U32Dist::BitsOffset(10, 1),
];

const NUM_LOOPS_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Bits(3),
    U32Dist::Bits(16),
    U32Dist::Bits(32),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationHeader {
    pub tps_numerator: u32,
    pub tps_denominator: u32,
    pub num_loops: u32,
    pub have_timecodes: bool,
}

impl Default for AnimationHeader {
    fn default() -> Self {
        Self {
            tps_numerator: 100,
            tps_denominator: 1,
            num_loops: 0,
            have_timecodes: false,
        }
    }
}

impl AnimationHeader {
    fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        Ok(Self {
            tps_numerator: reader.read_u32(&TPS_NUMERATOR_DIST)?,
            tps_denominator: reader.read_u32(&TPS_DENOMINATOR_DIST)?,
            num_loops: reader.read_u32(&NUM_LOOPS_DIST)?,
            have_timecodes: reader.read_bool()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_u32(self.tps_numerator, &TPS_NUMERATOR_DIST)?;
        writer.write_u32(self.tps_denominator, &TPS_DENOMINATOR_DIST)?;
        writer.write_u32(self.num_loops, &NUM_LOOPS_DIST)?;
        writer.write_bool(self.have_timecodes);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneMapping {
    pub intensity_target: f32,
    pub min_nits: f32,
    pub relative_to_max_display: bool,
    pub linear_below: f32,
}

impl Default for ToneMapping {
    fn default() -> Self {
        Self {
            intensity_target: DEFAULT_INTENSITY_TARGET,
            min_nits: 0.0,
            relative_to_max_display: false,
            linear_below: 0.0,
        }
    }
}

impl ToneMapping {
    fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        if reader.read_bool()? {
            return Ok(Self::default());
        }
        let tone_mapping = Self {
            intensity_target: reader.read_f32()?,
            min_nits: reader.read_f32()?,
            relative_to_max_display: reader.read_bool()?,
            linear_below: reader.read_f32()?,
        };
        if !(tone_mapping.intensity_target > 0.0)
            || !(tone_mapping.min_nits >= 0.0)
            || tone_mapping.min_nits > tone_mapping.intensity_target
        {
            return Err(CodecError::InvalidColorEncoding);
        }
        Ok(tone_mapping)
    }

    fn write(&self, writer: &mut BitWriter) {
        let all_default = *self == Self::default();
        writer.write_bool(all_default);
        if all_default {
            return;
        }
        writer.write_f32(self.intensity_target);
        writer.write_f32(self.min_nits);
        writer.write_bool(self.relative_to_max_display);
        writer.write_f32(self.linear_below);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub bits_per_sample: u32,
    /// EXIF style orientation, 1..=8.
    pub orientation: u32,
    pub intrinsic_size: Option<SizeHeader>,
    pub preview_size: Option<SizeHeader>,
    pub animation: Option<AnimationHeader>,
    pub extra_channels: Vec<ExtraChannelInfo>,
    pub xyb_encoded: bool,
    pub color_encoding: ColorEncoding,
    pub tone_mapping: ToneMapping,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            bits_per_sample: 8,
            orientation: 1,
            intrinsic_size: None,
            preview_size: None,
            animation: None,
            extra_channels: Vec::new(),
            xyb_encoded: false,
            color_encoding: ColorEncoding::default(),
            tone_mapping: ToneMapping::default(),
        }
    }
}

impl ImageMetadata {
    pub fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        if reader.read_bool()? {
            return Ok(Self::default());
        }
        let bits_per_sample = reader.read_u32(&BITS_PER_SAMPLE_DIST)?;
        if bits_per_sample > MAX_BITS_PER_SAMPLE {
            return Err(CodecError::InvalidBitDepth);
        }
        let orientation = reader.read_bits(3)? + 1;
        let intrinsic_size = if reader.read_bool()? {
            Some(SizeHeader::read(reader)?)
        } else {
            None
        };
        let preview_size = if reader.read_bool()? {
            Some(SizeHeader::read(reader)?)
        } else {
            None
        };
        let animation = if reader.read_bool()? {
            Some(AnimationHeader::read(reader)?)
        } else {
            None
        };
        let num_extra_channels = reader.read_u32(&NUM_EXTRA_CHANNELS_DIST)?;
        if num_extra_channels > MAX_EXTRA_CHANNELS {
            return Err(CodecError::InvalidExtraChannel);
        }
        let mut extra_channels = Vec::with_capacity(num_extra_channels as usize);
        for _ in 0..num_extra_channels {
            extra_channels.push(ExtraChannelInfo::read(reader)?);
        }
        let xyb_encoded = reader.read_bool()?;
        let color_encoding = ColorEncoding::read(reader)?;
        let tone_mapping = ToneMapping::read(reader)?;
        Ok(Self {
            bits_per_sample,
            orientation,
            intrinsic_size,
            preview_size,
            animation,
            extra_channels,
            xyb_encoded,
            color_encoding,
            tone_mapping,
        })
    }

    pub fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        let all_default = *self == Self::default();
        writer.write_bool(all_default);
        if all_default {
            return Ok(());
        }
        if self.bits_per_sample == 0 || self.bits_per_sample > MAX_BITS_PER_SAMPLE {
            return Err(CodecError::InvalidEncoderInput);
        }
        if !(1..=8).contains(&self.orientation)
            || self.extra_channels.len() > MAX_EXTRA_CHANNELS as usize
        {
            return Err(CodecError::InvalidEncoderInput);
        }
        writer.write_u32(self.bits_per_sample, &BITS_PER_SAMPLE_DIST)?;
        writer.write_bits(self.orientation - 1, 3);
        for size in [&self.intrinsic_size, &self.preview_size] {
            writer.write_bool(size.is_some());
            if let Some(size) = size {
                size.write(writer)?;
            }
        }
        writer.write_bool(self.animation.is_some());
        if let Some(animation) = &self.animation {
            animation.write(writer)?;
        }
        writer.write_u32(self.extra_channels.len() as u32, &NUM_EXTRA_CHANNELS_DIST)?;
        for channel in &self.extra_channels {
            channel.write(writer)?;
        }
        writer.write_bool(self.xyb_encoded);
        self.color_encoding.write(writer)?;
        self.tone_mapping.write(writer);
        Ok(())
    }

    pub fn have_preview(&self) -> bool {
        self.preview_size.is_some()
    }

    pub fn have_animation(&self) -> bool {
        self.animation.is_some()
    }

    pub fn num_color_channels(&self) -> u32 {
        if self.color_encoding.is_gray() { 1 } else { 3 }
    }

    /// Orientations 5..=8 transpose the image.
    pub fn is_transposing(&self) -> bool {
        self.orientation > 4
    }

    pub fn find_extra_channel(&self, channel_type: ExtraChannelType) -> Option<usize> {
        self.extra_channels
            .iter()
            .position(|ec| ec.channel_type == channel_type)
    }

    pub fn alpha(&self) -> Option<&ExtraChannelInfo> {
        self.find_extra_channel(ExtraChannelType::Alpha)
            .map(|i| &self.extra_channels[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metadata_is_one_bit() {
        let mut writer = BitWriter::new();
        ImageMetadata::default().write(&mut writer).unwrap();
        assert_eq!(writer.bits_written(), 1);
    }

    #[test]
    fn test_full_metadata() {
        let metadata = ImageMetadata {
            bits_per_sample: 12,
            orientation: 6,
            preview_size: Some(SizeHeader::new(16, 8)),
            animation: Some(AnimationHeader {
                tps_numerator: 30,
                tps_denominator: 1,
                num_loops: 3,
                have_timecodes: true,
            }),
            extra_channels: vec![ExtraChannelInfo::new(ExtraChannelType::Alpha, 12)],
            tone_mapping: ToneMapping {
                intensity_target: 1000.0,
                ..ToneMapping::default()
            },
            ..ImageMetadata::default()
        };
        let mut writer = BitWriter::new();
        metadata.write(&mut writer).unwrap();
        let bytes = writer.finish();
        let decoded = ImageMetadata::read(&mut BitReader::new(&bytes)).unwrap();
        assert_eq!(decoded, metadata);
        assert!(decoded.is_transposing());
        assert_eq!(decoded.alpha().map(|a| a.bits_per_sample), Some(12));
    }

    #[test]
    fn test_truncated_metadata() {
        let metadata = ImageMetadata {
            bits_per_sample: 10,
            ..ImageMetadata::default()
        };
        let mut writer = BitWriter::new();
        metadata.write(&mut writer).unwrap();
        let bytes = writer.finish();
        assert_eq!(
            ImageMetadata::read(&mut BitReader::new(&bytes[..1])),
            Err(CodecError::OutOfBounds)
        );
    }
}
