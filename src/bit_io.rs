//! Bit level reader and writer for codestream bundles.
//!
//! Bits are packed LSB first. Variable sized integers use a 2-bit selector
//! that picks one of four [`U32Dist`] distributions.

use crate::error::CodecError;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum U32Dist {
    Val(u32),
    Bits(u32),
    BitsOffset(u32, u32),
}

pub type U32Coder = [U32Dist; 4];

/// Distribution shared by every enum field.
pub const ENUM_DIST: U32Coder = [
    U32Dist::Val(0),
    U32Dist::Val(1),
    U32Dist::BitsOffset(4, 2),
    U32Dist::BitsOffset(6, 18),
];

#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn total_bits_consumed(&self) -> usize {
        self.bit_pos
    }

    pub fn total_bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }

    fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    pub fn remaining_bits(&self) -> usize {
        self.total_bits().saturating_sub(self.bit_pos)
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<(), CodecError> {
        let end = self
            .bit_pos
            .checked_add(count)
            .ok_or(CodecError::OutOfBounds)?;
        if end > self.total_bits() {
            return Err(CodecError::OutOfBounds);
        }
        self.bit_pos = end;
        Ok(())
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u32, CodecError> {
        debug_assert!(count <= 32);
        if count == 0 {
            return Ok(0);
        }
        if self.bit_pos + count as usize > self.total_bits() {
            return Err(CodecError::OutOfBounds);
        }
        let mut value = 0u64;
        let mut written = 0u32;
        while written < count {
            let byte = self.data[self.bit_pos / 8];
            let offset = (self.bit_pos % 8) as u32;
            let take = (8 - offset).min(count - written);
            let bits = (byte as u64 >> offset) & ((1u64 << take) - 1);
            value |= bits << written;
            written += take;
            self.bit_pos += take as usize;
        }
        Ok(value as u32)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn read_u32(&mut self, coder: &U32Coder) -> Result<u32, CodecError> {
        let selector = self.read_bits(2)? as usize;
        match coder[selector] {
            U32Dist::Val(v) => Ok(v),
            U32Dist::Bits(n) => self.read_bits(n),
            U32Dist::BitsOffset(n, offset) => {
                let v = self.read_bits(n)?;
                v.checked_add(offset).ok_or(CodecError::InvalidEnumValue)
            }
        }
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let lo = self.read_bits(32)? as u64;
        let hi = self.read_bits(32)? as u64;
        Ok(lo | (hi << 32))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.read_bits(32)?))
    }

    pub fn read_enum<T>(&mut self) -> Result<T, CodecError>
    where
        T: TryFromPrimitive<Primitive = u32>,
    {
        let raw = self.read_u32(&ENUM_DIST)?;
        T::try_from_primitive(raw).map_err(|_| CodecError::InvalidEnumValue)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, CodecError> {
        let needed = count.checked_mul(8).ok_or(CodecError::OutOfBounds)?;
        if self.bit_pos + needed > self.total_bits() {
            return Err(CodecError::OutOfBounds);
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    pub fn jump_to_byte_boundary(&mut self) -> Result<(), CodecError> {
        let aligned = self.bit_pos.div_ceil(8) * 8;
        if aligned > self.total_bits() {
            return Err(CodecError::OutOfBounds);
        }
        self.bit_pos = aligned;
        Ok(())
    }
}

/// Maps a signed value onto the unsigned range: 0, -1, 1, -2, ...
pub fn pack_signed(value: i32) -> u32 {
    ((value as u32) << 1) ^ ((value >> 31) as u32)
}

pub fn unpack_signed(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    data: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_written(&self) -> usize {
        self.bit_pos
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        debug_assert!(count <= 32);
        debug_assert!(count == 32 || value >> count == 0);
        let mut remaining = count;
        let mut value = value as u64;
        while remaining > 0 {
            let offset = (self.bit_pos % 8) as u32;
            if offset == 0 {
                self.data.push(0);
            }
            let take = (8 - offset).min(remaining);
            let bits = (value & ((1u64 << take) - 1)) as u8;
            if let Some(last) = self.data.last_mut() {
                *last |= bits << offset;
            }
            value >>= take;
            remaining -= take;
            self.bit_pos += take as usize;
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u32, 1);
    }

    pub fn write_u32(&mut self, value: u32, coder: &U32Coder) -> Result<(), CodecError> {
        for (selector, dist) in coder.iter().enumerate() {
            let fits = match *dist {
                U32Dist::Val(v) => v == value,
                U32Dist::Bits(n) => n == 32 || value >> n == 0,
                U32Dist::BitsOffset(n, offset) => {
                    value >= offset && (n == 32 || (value - offset) >> n == 0)
                }
            };
            if !fits {
                continue;
            }
            self.write_bits(selector as u32, 2);
            match *dist {
                U32Dist::Val(_) => {}
                U32Dist::Bits(n) => self.write_bits(value, n),
                U32Dist::BitsOffset(n, offset) => self.write_bits(value - offset, n),
            }
            return Ok(());
        }
        Err(CodecError::InvalidEncoderInput)
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value as u32, 32);
        self.write_bits((value >> 32) as u32, 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bits(value.to_bits(), 32);
    }

    pub fn write_enum<T: Into<u32>>(&mut self, value: T) -> Result<(), CodecError> {
        self.write_u32(value.into(), &ENUM_DIST)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_bits(b as u32, 8);
        }
    }

    pub fn zero_pad_to_byte(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.zero_pad_to_byte();
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_cross_byte_boundaries() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits(0x1ABC, 13);
        writer.write_bits(0xDEADBEEF, 32);
        writer.write_bool(true);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 7);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(13).unwrap(), 0x1ABC);
        assert_eq!(reader.read_bits(32).unwrap(), 0xDEADBEEF);
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.total_bits_consumed(), 49);
    }

    #[test]
    fn test_u32_selects_first_fitting_distribution() {
        let coder = [
            U32Dist::Val(8),
            U32Dist::Val(10),
            U32Dist::BitsOffset(4, 1),
            U32Dist::Bits(12),
        ];
        let mut writer = BitWriter::new();
        writer.write_u32(10, &coder).unwrap();
        writer.write_u32(16, &coder).unwrap();
        writer.write_u32(4000, &coder).unwrap();
        assert_eq!(writer.bits_written(), 2 + 6 + 14);
        assert!(writer.write_u32(5000, &coder).is_err());
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_u32(&coder).unwrap(), 10);
        assert_eq!(reader.read_u32(&coder).unwrap(), 16);
        assert_eq!(reader.read_u32(&coder).unwrap(), 4000);
    }

    #[test]
    fn test_out_of_bounds_does_not_advance() {
        let data = [0xFFu8];
        let mut reader = BitReader::new(&data);
        reader.read_bits(6).unwrap();
        assert_eq!(reader.read_bits(3), Err(CodecError::OutOfBounds));
        assert_eq!(reader.total_bits_consumed(), 6);
        assert_eq!(reader.read_bits(2).unwrap(), 3);
        assert_eq!(reader.jump_to_byte_boundary(), Ok(()));
        assert_eq!(reader.read_bool(), Err(CodecError::OutOfBounds));
    }

    #[test]
    fn test_signed_packing() {
        assert_eq!(pack_signed(0), 0);
        assert_eq!(pack_signed(-1), 1);
        assert_eq!(pack_signed(1), 2);
        assert_eq!(pack_signed(-3), 5);
        for v in [-70000, -1, 0, 5, 123456] {
            assert_eq!(unpack_signed(pack_signed(v)), v);
        }
    }
}
