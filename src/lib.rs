//! Incremental image codestream decoder and symmetric encoder.
//!
//! The [`Decoder`] consumes input in arbitrary windows and is driven by
//! repeated calls to [`Decoder::process`], which report either an event the
//! caller subscribed to, a request for more input or an output buffer, or the
//! end of the file. Codestreams come bare or wrapped in a box container whose
//! boxes, including brotli compressed ones, are exposed to the caller.
//!
//! The [`Encoder`] writes the same format: lossless frames split into
//! sections behind a table of contents, optional previews, progressive
//! passes, reference slots with patches, and container boxes.

#[macro_use]
mod log;

pub mod bit_io;
pub mod box_type;
pub mod constants;
pub mod container;
pub mod decoder;
pub mod dependencies;
pub mod encoder;
pub mod entropy;
pub mod error;
pub mod frame;
pub mod headers;
pub mod input;
pub mod output;
pub mod parallel;
pub mod reconstruction;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use box_type::BoxType;
pub use decoder::{BasicInfo, Decoder, DecoderOptions, DecoderStatus, Events};
pub use dependencies::frame_dependencies;
pub use encoder::{Encoder, FrameImage, FrameSettings, ImageSettings};
pub use error::{CodecError, ErrorCategory};
pub use frame::ProgressiveDetail;
pub use output::{DataType, Endianness, PixelFormat};
pub use parallel::{ParallelRunner, SequentialRunner};

/// Version of the decoder as `major * 1_000_000 + minor * 1_000 + patch`.
pub fn decoder_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    part(env!("CARGO_PKG_VERSION_MAJOR")) * 1_000_000
        + part(env!("CARGO_PKG_VERSION_MINOR")) * 1_000
        + part(env!("CARGO_PKG_VERSION_PATCH"))
}
