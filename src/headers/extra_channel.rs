use super::{BITS_PER_SAMPLE_DIST, read_name, write_name};
use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::constants::MAX_BITS_PER_SAMPLE;
use crate::error::CodecError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

const CFA_CHANNEL_DIST: U32Coder = [
    U32Dist::Val(1),
    U32Dist::Bits(2),
    U32Dist::BitsOffset(4, 3),
    U32Dist::BitsOffset(8, 19),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ExtraChannelType {
    Alpha = 0,
    Depth = 1,
    SpotColor = 2,
    SelectionMask = 3,
    Black = 4,
    Cfa = 5,
    Thermal = 6,
    Unknown = 15,
    Optional = 16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtraChannelInfo {
    pub channel_type: ExtraChannelType,
    pub bits_per_sample: u32,
    pub name: String,
    pub alpha_associated: bool,
    /// Linear RGB color and opacity of a spot color channel.
    pub spot_color: [f32; 4],
    pub cfa_channel: u32,
}

impl Default for ExtraChannelInfo {
    fn default() -> Self {
        Self {
            channel_type: ExtraChannelType::Alpha,
            bits_per_sample: 8,
            name: String::new(),
            alpha_associated: false,
            spot_color: [0.0; 4],
            cfa_channel: 1,
        }
    }
}

impl ExtraChannelInfo {
    pub fn new(channel_type: ExtraChannelType, bits_per_sample: u32) -> Self {
        Self {
            channel_type,
            bits_per_sample,
            ..Self::default()
        }
    }

    pub fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        if reader.read_bool()? {
            return Ok(Self::default());
        }
        let mut info = Self {
            channel_type: reader.read_enum()?,
            bits_per_sample: reader.read_u32(&BITS_PER_SAMPLE_DIST)?,
            ..Self::default()
        };
        if info.bits_per_sample > MAX_BITS_PER_SAMPLE {
            return Err(CodecError::InvalidExtraChannel);
        }
        info.name = read_name(reader)?;
        match info.channel_type {
            ExtraChannelType::Alpha => info.alpha_associated = reader.read_bool()?,
            ExtraChannelType::SpotColor => {
                for c in info.spot_color.iter_mut() {
                    *c = reader.read_f32()?;
                }
            }
            ExtraChannelType::Cfa => info.cfa_channel = reader.read_u32(&CFA_CHANNEL_DIST)?,
            _ => {}
        }
        Ok(info)
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
        writer.write_enum(self.channel_type)?;
        writer.write_u32(self.bits_per_sample, &BITS_PER_SAMPLE_DIST)?;
        write_name(writer, &self.name)?;
        match self.channel_type {
            ExtraChannelType::Alpha => writer.write_bool(self.alpha_associated),
            ExtraChannelType::SpotColor => {
                for &c in &self.spot_color {
                    writer.write_f32(c);
                }
            }
            ExtraChannelType::Cfa => writer.write_u32(self.cfa_channel, &CFA_CHANNEL_DIST)?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_color_channel() {
        let info = ExtraChannelInfo {
            name: "varnish".to_string(),
            spot_color: [0.1, 0.2, 0.3, 0.5],
            ..ExtraChannelInfo::new(ExtraChannelType::SpotColor, 12)
        };
        let mut writer = BitWriter::new();
        info.write(&mut writer).unwrap();
        let bytes = writer.finish();
        assert_eq!(ExtraChannelInfo::read(&mut BitReader::new(&bytes)).unwrap(), info);
    }

    #[test]
    fn test_rejects_deep_channel() {
        let info = ExtraChannelInfo::new(ExtraChannelType::Depth, 17);
        assert_eq!(
            info.write(&mut BitWriter::new()),
            Err(CodecError::InvalidEncoderInput)
        );
    }
}
