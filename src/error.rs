use thiserror::Error;

/// Broad classes of failure, so callers can tell a broken stream apart from
/// an API call made at the wrong time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The bitstream is structurally invalid. Discard or reset the decoder.
    MalformedInput,
    /// The API was called out of order or with invalid arguments.
    Misuse,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid signature")]
    InvalidSignature = 1,
    #[error("File too small for signature")]
    TruncatedSignature = 2,
    #[error("Invalid box size")]
    InvalidBoxSize = 3,
    #[error("Box size overflow")]
    BoxSizeOverflow = 4,
    #[error("The second box must be the ftyp box")]
    FtypNotSecond = 5,
    #[error("The ftyp box must come second")]
    MisplacedFtyp = 6,
    #[error("File type box too small")]
    FtypTooSmall = 7,
    #[error("File type box major brand must be \"jxl \"")]
    InvalidBrand = 8,
    #[error("There can only be one jxlc box")]
    DuplicateCodestreamBox = 9,
    #[error("Cannot have jxlp box after last jxlp box")]
    PartialCodestreamAfterLast = 10,
    #[error("jxlp box too small to contain index")]
    PartialCodestreamTooSmall = 11,
    #[error("brob box too small to contain the box type")]
    CompressedBoxTooSmall = 12,
    #[error("Box decompression failed")]
    BoxDecompressionFailed = 13,
    #[error("Invalid codestream signature")]
    InvalidCodestreamSignature = 14,
    #[error("Read out of bounds")]
    OutOfBounds = 15,
    #[error("Invalid image size")]
    InvalidImageSize = 16,
    #[error("Invalid bit depth")]
    InvalidBitDepth = 17,
    #[error("Invalid extra channel info")]
    InvalidExtraChannel = 18,
    #[error("Invalid color encoding")]
    InvalidColorEncoding = 19,
    #[error("Invalid ICC profile")]
    InvalidIccProfile = 20,
    #[error("Invalid enum value")]
    InvalidEnumValue = 21,
    #[error("Image is too large")]
    ImageTooLarge = 22,
    #[error("Frame is too large")]
    FrameTooLarge = 23,
    #[error("Invalid frame header")]
    InvalidFrameHeader = 24,
    #[error("Invalid table of contents")]
    InvalidToc = 25,
    #[error("Frame out of bounds")]
    FrameOutOfBounds = 26,
    #[error("Invalid entropy coded data")]
    InvalidEntropyCode = 27,
    #[error("Reference to an empty or mismatched storage slot")]
    InvalidReference = 28,
    #[error("Invalid patch")]
    InvalidPatch = 29,
    #[error("Missing input")]
    MissingInput = 30,
    #[error("Codestream never finished")]
    CodestreamNeverFinished = 31,
    #[error("Missing metadata boxes for reconstruction")]
    MissingReconstructionMetadata = 32,
    #[error("Multiple reconstruction boxes not supported")]
    MultipleReconstructionBoxes = 33,
    #[error("Invalid reconstruction box")]
    InvalidReconstructionBox = 34,
    #[error("Invalid utf-8 name")]
    InvalidName = 35,

    #[error("Input already set, release it first")]
    InputAlreadySet = 100,
    #[error("Input already closed")]
    InputClosed = 101,
    #[error("Option must be set before starting")]
    DecoderStarted = 102,
    #[error("Can only subscribe to informative events")]
    InvalidEventMask = 103,
    #[error("Decoder encountered an error, reset it before using it again")]
    DecoderInErrorState = 104,
    #[error("Requested information is not available yet")]
    NotYetAvailable = 105,
    #[error("No output buffer needed at this time")]
    NoBufferNeeded = 106,
    #[error("Output buffer too small")]
    BufferTooSmall = 107,
    #[error("More than 4 channels not supported")]
    UnsupportedChannelCount = 108,
    #[error("Grayscale output not possible for color image")]
    GrayscaleMismatch = 109,
    #[error("Don't know frame dimensions yet")]
    FrameDimensionsUnknown = 110,
    #[error("Cannot mix image out buffer and image out callback")]
    CallbackBufferConflict = 111,
    #[error("Must release box buffer before setting it again")]
    BoxBufferAlreadySet = 112,
    #[error("Can only access box info after a box event")]
    NoBoxEvent = 113,
    #[error("No frame in progress")]
    NoFrameInProgress = 114,
    #[error("DC not yet decoded")]
    DcNotDecoded = 115,
    #[error("Invalid extra channel index")]
    InvalidExtraChannelIndex = 116,
    #[error("Too late to set the color encoding")]
    TooLateForColorProfile = 117,
    #[error("Only RGB or grayscale output supported")]
    UnsupportedColorSpace = 118,
    #[error("Negative intensity target requested")]
    NegativeIntensityTarget = 119,
    #[error("No ICC profile available")]
    NoIccProfile = 120,
    #[error("No parametric color encoding available")]
    NoEncodedProfile = 121,
    #[error("Unsupported progressive detail")]
    UnsupportedProgressiveDetail = 122,
    #[error("Invalid encoder input")]
    InvalidEncoderInput = 123,
    #[error("Extra channel output not supported with image out callback")]
    ExtraChannelsWithCallback = 124,
    #[error("No image out buffer set")]
    NoOutputBuffer = 125,
}

impl CodecError {
    pub fn category(&self) -> ErrorCategory {
        if (*self as u32) >= 100 {
            ErrorCategory::Misuse
        } else {
            ErrorCategory::MalformedInput
        }
    }

    pub fn is_misuse(&self) -> bool {
        self.category() == ErrorCategory::Misuse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(CodecError::InvalidBoxSize.category(), ErrorCategory::MalformedInput);
        assert_eq!(CodecError::FrameOutOfBounds.category(), ErrorCategory::MalformedInput);
        assert_eq!(CodecError::InputAlreadySet.category(), ErrorCategory::Misuse);
        assert!(CodecError::NoBoxEvent.is_misuse());
    }
}
