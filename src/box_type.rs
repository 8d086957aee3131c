use std::fmt;

/// Four character code identifying a container box.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const SIGNATURE: BoxType = BoxType(*b"JXL ");
    pub const FTYP: BoxType = BoxType(*b"ftyp");
    pub const CODESTREAM: BoxType = BoxType(*b"jxlc");
    pub const PARTIAL_CODESTREAM: BoxType = BoxType(*b"jxlp");
    pub const BROTLI_COMPRESSED: BoxType = BoxType(*b"brob");
    pub const RECONSTRUCTION: BoxType = BoxType(*b"jbrd");
    pub const EXIF: BoxType = BoxType(*b"Exif");
    pub const XML: BoxType = BoxType(*b"xml ");
    pub const JUMBF: BoxType = BoxType(*b"jumb");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Boxes that can never be wrapped in a `brob` box.
    pub fn is_structural(&self) -> bool {
        matches!(
            *self,
            BoxType::SIGNATURE
                | BoxType::FTYP
                | BoxType::CODESTREAM
                | BoxType::PARTIAL_CODESTREAM
                | BoxType::BROTLI_COMPRESSED
                | BoxType::RECONSTRUCTION
        )
    }
}

impl From<[u8; 4]> for BoxType {
    fn from(value: [u8; 4]) -> Self {
        BoxType(value)
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType(\"{}\")", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_escapes_binary() {
        assert_eq!(BoxType::XML.to_string(), "xml ");
        assert_eq!(BoxType([0, b'a', b'b', b'c']).to_string(), "\\x00abc");
        assert!(BoxType::FTYP.is_structural());
        assert!(!BoxType::EXIF.is_structural());
    }
}
