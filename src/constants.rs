pub const CODESTREAM_SIGNATURE: [u8; 2] = [0xFF, 0x0A];

// Signature box of the container: a 12 byte "JXL " box.
pub const CONTAINER_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, b'J', b'X', b'L', b' ', 0x0D, 0x0A, 0x87, 0x0A,
];

pub const FTYP_MAJOR_BRAND: [u8; 4] = *b"jxl ";
pub const FTYP_MIN_CONTENT_SIZE: usize = 12;

// Top bit of the jxlp index marks the last partial codestream box.
pub const JXLP_LAST_BOX_FLAG: u32 = 0x8000_0000;

// 12 bytes signature box, 20 bytes ftyp box, 16 bytes jxlc header and an
// estimate of 50 bytes for the basic info itself.
pub const INITIAL_BASIC_INFO_SIZE_HINT: usize = 98;

pub const NUM_STORAGE_SLOTS: usize = 8;
pub const NUM_REFERENCE_SLOTS: u32 = 4;
pub const MAX_DC_LEVEL: u32 = 4;

pub const GROUP_DIM: usize = 64;
pub const BLOCK_DIM: usize = 8;

pub const MAX_BITS_PER_SAMPLE: u32 = 16;
pub const MAX_EXTRA_CHANNELS: u32 = 256;
pub const MAX_NUM_PASSES: u32 = 11;
pub const MAX_PATCHES: u32 = 1 << 16;
pub const MAX_ICC_SIZE: usize = 1 << 28;
pub const MAX_NAME_LENGTH: u32 = 1071;

pub const DEFAULT_INTENSITY_TARGET: f32 = 255.0;

// Adaptive Golomb-Rice coding parameters.
pub const RESET_THRESHOLD: u32 = 64;
pub const MAX_K_VALUE: u32 = 16;
pub const ESCAPE_PREFIX_LENGTH: u32 = 24;
pub const ESCAPE_RAW_BITS: u32 = 20;
pub const NUM_ACTIVITY_CONTEXTS: usize = 12;

pub const MAX_OUTPUT_CHANNELS: u32 = 4;
