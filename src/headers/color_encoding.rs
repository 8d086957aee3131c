use crate::bit_io::{BitReader, BitWriter};
use crate::error::CodecError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ColorSpace {
    Rgb = 0,
    Gray = 1,
    Xyb = 2,
    Unknown = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum WhitePoint {
    D65 = 1,
    Custom = 2,
    E = 10,
    Dci = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Primaries {
    Srgb = 1,
    Custom = 2,
    Bt2100 = 9,
    P3 = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum TransferFunction {
    Bt709 = 1,
    Unknown = 2,
    Linear = 8,
    Srgb = 13,
    Pq = 16,
    Dci = 17,
    Hlg = 18,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum RenderingIntent {
    Perceptual = 0,
    Relative = 1,
    Saturation = 2,
    Absolute = 3,
}

/// Gamma values are stored as `gamma * GAMMA_SCALE` in 24 bits.
pub const GAMMA_SCALE: f64 = 10_000_000.0;

/// Parametric color description, or a marker that an ICC profile follows
/// the headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorEncoding {
    pub want_icc: bool,
    pub color_space: ColorSpace,
    pub white_point: WhitePoint,
    pub white_point_xy: [f32; 2],
    pub primaries: Primaries,
    pub primaries_xy: [[f32; 2]; 3],
    pub transfer_function: TransferFunction,
    /// Set when the transfer function is a pure gamma curve, scaled by
    /// [`GAMMA_SCALE`].
    pub gamma: Option<u32>,
    pub rendering_intent: RenderingIntent,
}

impl Default for ColorEncoding {
    fn default() -> Self {
        Self::srgb(false)
    }
}

impl ColorEncoding {
    pub fn srgb(is_gray: bool) -> Self {
        Self {
            want_icc: false,
            color_space: if is_gray {
                ColorSpace::Gray
            } else {
                ColorSpace::Rgb
            },
            white_point: WhitePoint::D65,
            white_point_xy: [0.3127, 0.329],
            primaries: Primaries::Srgb,
            primaries_xy: [[0.64, 0.33], [0.30, 0.60], [0.15, 0.06]],
            transfer_function: TransferFunction::Srgb,
            gamma: None,
            rendering_intent: RenderingIntent::Relative,
        }
    }

    pub fn linear_srgb(is_gray: bool) -> Self {
        Self {
            transfer_function: TransferFunction::Linear,
            ..Self::srgb(is_gray)
        }
    }

    pub fn icc(color_space: ColorSpace) -> Self {
        Self {
            want_icc: true,
            color_space,
            ..Self::srgb(false)
        }
    }

    pub fn is_gray(&self) -> bool {
        self.color_space == ColorSpace::Gray
    }

    pub fn is_default(&self) -> bool {
        *self == Self::srgb(false)
    }

    pub fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        if reader.read_bool()? {
            return Ok(Self::default());
        }
        let mut encoding = Self::default();
        encoding.want_icc = reader.read_bool()?;
        encoding.color_space = reader.read_enum()?;
        if encoding.want_icc {
            return Ok(encoding);
        }
        if encoding.color_space == ColorSpace::Unknown {
            return Err(CodecError::InvalidColorEncoding);
        }
        if encoding.color_space != ColorSpace::Xyb {
            encoding.white_point = reader.read_enum()?;
            if encoding.white_point == WhitePoint::Custom {
                encoding.white_point_xy = [reader.read_f32()?, reader.read_f32()?];
            }
        }
        if encoding.color_space == ColorSpace::Rgb {
            encoding.primaries = reader.read_enum()?;
            if encoding.primaries == Primaries::Custom {
                for xy in encoding.primaries_xy.iter_mut() {
                    *xy = [reader.read_f32()?, reader.read_f32()?];
                }
            }
        }
        if reader.read_bool()? {
            let gamma = reader.read_bits(24)?;
            if gamma == 0 || gamma as f64 > GAMMA_SCALE {
                return Err(CodecError::InvalidColorEncoding);
            }
            encoding.gamma = Some(gamma);
        } else {
            encoding.transfer_function = reader.read_enum()?;
        }
        encoding.rendering_intent = reader.read_enum()?;
        Ok(encoding)
    }

    pub fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        let all_default = self.is_default();
        writer.write_bool(all_default);
        if all_default {
            return Ok(());
        }
        writer.write_bool(self.want_icc);
        writer.write_enum(self.color_space)?;
        if self.want_icc {
            return Ok(());
        }
        if self.color_space == ColorSpace::Unknown {
            return Err(CodecError::InvalidEncoderInput);
        }
        if self.color_space != ColorSpace::Xyb {
            writer.write_enum(self.white_point)?;
            if self.white_point == WhitePoint::Custom {
                writer.write_f32(self.white_point_xy[0]);
                writer.write_f32(self.white_point_xy[1]);
            }
        }
        if self.color_space == ColorSpace::Rgb {
            writer.write_enum(self.primaries)?;
            if self.primaries == Primaries::Custom {
                for xy in &self.primaries_xy {
                    writer.write_f32(xy[0]);
                    writer.write_f32(xy[1]);
                }
            }
        }
        match self.gamma {
            Some(gamma) => {
                if gamma == 0 || gamma >= 1 << 24 {
                    return Err(CodecError::InvalidEncoderInput);
                }
                writer.write_bool(true);
                writer.write_bits(gamma, 24);
            }
            None => {
                writer.write_bool(false);
                writer.write_enum(self.transfer_function)?;
            }
        }
        writer.write_enum(self.rendering_intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_one_bit() {
        let mut writer = BitWriter::new();
        ColorEncoding::default().write(&mut writer).unwrap();
        assert_eq!(writer.bits_written(), 1);
    }

    #[test]
    fn test_gamma_gray() {
        let encoding = ColorEncoding {
            gamma: Some(4_545_455),
            white_point: WhitePoint::Dci,
            ..ColorEncoding::srgb(true)
        };
        let mut writer = BitWriter::new();
        encoding.write(&mut writer).unwrap();
        let bytes = writer.finish();
        let decoded = ColorEncoding::read(&mut BitReader::new(&bytes)).unwrap();
        assert_eq!(decoded.gamma, Some(4_545_455));
        assert_eq!(decoded.white_point, WhitePoint::Dci);
        assert!(decoded.is_gray());
    }

    #[test]
    fn test_unknown_space_needs_icc() {
        let mut writer = BitWriter::new();
        writer.write_bool(false);
        writer.write_bool(false);
        writer.write_enum(ColorSpace::Unknown).unwrap();
        let bytes = writer.finish();
        assert_eq!(
            ColorEncoding::read(&mut BitReader::new(&bytes)),
            Err(CodecError::InvalidColorEncoding)
        );
    }
}
