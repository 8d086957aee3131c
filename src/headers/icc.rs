use crate::bit_io::{BitReader, BitWriter, U32Coder, U32Dist};
use crate::constants::MAX_ICC_SIZE;
use crate::error::CodecError;

const ICC_SIZE_DIST: U32Coder = [
    U32Dist::BitsOffset(8, 1),
    U32Dist::BitsOffset(12, 257),
    U32Dist::BitsOffset(16, 4353),
    U32Dist::BitsOffset(28, 69889),
];

/// Reads an embedded ICC profile. `memory_limit` of 0 means unlimited.
pub fn read_icc(reader: &mut BitReader, memory_limit: usize) -> Result<Vec<u8>, CodecError> {
    let size = reader.read_u32(&ICC_SIZE_DIST)? as usize;
    if size > MAX_ICC_SIZE || (memory_limit != 0 && size > memory_limit) {
        return Err(CodecError::InvalidIccProfile);
    }
    reader.read_bytes(size)
}

pub fn write_icc(writer: &mut BitWriter, icc: &[u8]) -> Result<(), CodecError> {
    if icc.is_empty() || icc.len() > MAX_ICC_SIZE {
        return Err(CodecError::InvalidEncoderInput);
    }
    writer.write_u32(icc.len() as u32, &ICC_SIZE_DIST)?;
    writer.write_bytes(icc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icc_limit() {
        let profile = vec![0x42u8; 300];
        let mut writer = BitWriter::new();
        write_icc(&mut writer, &profile).unwrap();
        let bytes = writer.finish();
        assert_eq!(read_icc(&mut BitReader::new(&bytes), 0).unwrap(), profile);
        assert_eq!(
            read_icc(&mut BitReader::new(&bytes), 100),
            Err(CodecError::InvalidIccProfile)
        );
        assert_eq!(
            read_icc(&mut BitReader::new(&bytes[..20]), 0),
            Err(CodecError::OutOfBounds)
        );
    }
}
