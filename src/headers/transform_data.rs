use crate::bit_io::{BitReader, BitWriter};
use crate::error::CodecError;

/// Number of custom weights for 2x, 4x and 8x upsampling.
pub const UPSAMPLING_WEIGHT_COUNTS: [usize; 3] = [15, 55, 210];

/// Custom upsampling weights. Only carried, never applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformData {
    pub upsampling_weights: [Option<Vec<i16>>; 3],
}

impl TransformData {
    pub fn is_default(&self) -> bool {
        self.upsampling_weights.iter().all(Option::is_none)
    }

    pub fn read(reader: &mut BitReader) -> Result<Self, CodecError> {
        let mut data = Self::default();
        if reader.read_bool()? {
            return Ok(data);
        }
        let mut present = [false; 3];
        for flag in present.iter_mut() {
            *flag = reader.read_bool()?;
        }
        for (i, &count) in UPSAMPLING_WEIGHT_COUNTS.iter().enumerate() {
            if !present[i] {
                continue;
            }
            let mut weights = Vec::with_capacity(count);
            for _ in 0..count {
                weights.push(reader.read_bits(16)? as u16 as i16);
            }
            data.upsampling_weights[i] = Some(weights);
        }
        Ok(data)
    }

    pub fn write(&self, writer: &mut BitWriter) -> Result<(), CodecError> {
        writer.write_bool(self.is_default());
        if self.is_default() {
            return Ok(());
        }
        for weights in &self.upsampling_weights {
            writer.write_bool(weights.is_some());
        }
        for (weights, &count) in self.upsampling_weights.iter().zip(&UPSAMPLING_WEIGHT_COUNTS) {
            let Some(weights) = weights else { continue };
            if weights.len() != count {
                return Err(CodecError::InvalidEncoderInput);
            }
            for &w in weights {
                writer.write_bits(w as u16 as u32, 16);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_weights() {
        let data = TransformData {
            upsampling_weights: [None, Some((0..55).map(|i| i * 7 - 100).collect()), None],
        };
        let mut writer = BitWriter::new();
        data.write(&mut writer).unwrap();
        let bytes = writer.finish();
        assert_eq!(TransformData::read(&mut BitReader::new(&bytes)).unwrap(), data);
    }

    #[test]
    fn test_wrong_weight_count() {
        let data = TransformData {
            upsampling_weights: [Some(vec![1, 2, 3]), None, None],
        };
        assert_eq!(
            data.write(&mut BitWriter::new()),
            Err(CodecError::InvalidEncoderInput)
        );
    }
}
