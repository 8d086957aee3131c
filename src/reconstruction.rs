//! Reconstruction metadata carried in a `jbrd` box, completed by the Exif and
//! XMP boxes of the file.

use crate::error::CodecError;

/// Parsed `jbrd` box plus the metadata boxes it announces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionMetadata {
    pub exif_size: u32,
    pub xmp_size: u32,
    /// Opaque reconstruction data following the two sizes.
    pub payload: Vec<u8>,
    pub exif: Option<Vec<u8>>,
    pub xmp: Option<Vec<u8>>,
}

impl ReconstructionMetadata {
    pub fn parse(content: &[u8]) -> Result<Self, CodecError> {
        if content.len() < 8 {
            return Err(CodecError::InvalidReconstructionBox);
        }
        let exif_size = u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
        let xmp_size = u32::from_be_bytes([content[4], content[5], content[6], content[7]]);
        Ok(Self {
            exif_size,
            xmp_size,
            payload: content[8..].to_vec(),
            exif: None,
            xmp: None,
        })
    }

    pub fn to_box_content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.extend_from_slice(&self.exif_size.to_be_bytes());
        out.extend_from_slice(&self.xmp_size.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Attaches the stored metadata boxes, which must match the announced
    /// sizes.
    pub fn attach(
        &mut self,
        exif: Option<Vec<u8>>,
        xmp: Option<Vec<u8>>,
    ) -> Result<(), CodecError> {
        let matches = |data: &Option<Vec<u8>>, size: u32| match data {
            Some(data) => data.len() == size as usize,
            None => size == 0,
        };
        if !matches(&exif, self.exif_size) || !matches(&xmp, self.xmp_size) {
            return Err(CodecError::InvalidReconstructionBox);
        }
        self.exif = exif.filter(|_| self.exif_size > 0);
        self.xmp = xmp.filter(|_| self.xmp_size > 0);
        Ok(())
    }
}

/// Progress of storing one metadata box for reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreState {
    #[default]
    Idle,
    Storing,
    Stored,
}

/// Where the reconstruction metadata stands relative to the box stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconStage {
    #[default]
    None,
    /// The `jbrd` box is parsed, metadata boxes may still be missing.
    SettingMetadata,
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_attach() {
        let meta = ReconstructionMetadata {
            exif_size: 3,
            xmp_size: 0,
            payload: vec![9, 8, 7, 6],
            ..ReconstructionMetadata::default()
        };
        let mut parsed = ReconstructionMetadata::parse(&meta.to_box_content()).unwrap();
        assert_eq!(parsed, meta);

        assert_eq!(
            parsed.attach(Some(vec![1, 2]), None),
            Err(CodecError::InvalidReconstructionBox)
        );
        assert_eq!(
            parsed.attach(Some(vec![1, 2, 3]), Some(vec![0; 10])),
            Err(CodecError::InvalidReconstructionBox)
        );
        parsed.attach(Some(vec![1, 2, 3]), None).unwrap();
        assert_eq!(parsed.exif.as_deref(), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.xmp, None);
    }

    #[test]
    fn test_short_box() {
        assert_eq!(
            ReconstructionMetadata::parse(&[0, 0, 0, 1]),
            Err(CodecError::InvalidReconstructionBox)
        );
    }
}
