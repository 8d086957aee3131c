//! C Foreign Function Interface for jxcodec-rs.
//!
//! Whole-file decoding behind an opaque handle, for use from C/C++ projects.
//! The handle owns a copy of the file, so the caller's buffer may be freed
//! right after `jxcodec_decoder_new`.

use crate::decoder::{Decoder, DecoderStatus, Events};
use crate::error::{CodecError, ErrorCategory};
use crate::output::{DataType, Endianness, PixelFormat};
use std::os::raw::{c_int, c_uchar};
use std::ptr;

/// Opaque decoder handle.
#[repr(C)]
pub struct JxCodecDecoder {
    _private: [u8; 0],
}

/// Image information structure.
#[repr(C)]
pub struct JxCodecImageInfo {
    pub width: u32,
    pub height: u32,
    pub color_channels: u32,
    pub extra_channels: u32,
    pub bits_per_sample: u32,
    pub have_animation: c_int,
}

/// Status codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JxCodecStatus {
    Ok = 0,
    MalformedInput = 1,
    Misuse = 2,
    BufferTooSmall = 3,
    InvalidArgument = 4,
}

impl From<CodecError> for JxCodecStatus {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BufferTooSmall => JxCodecStatus::BufferTooSmall,
            _ => match err.category() {
                ErrorCategory::MalformedInput => JxCodecStatus::MalformedInput,
                ErrorCategory::Misuse => JxCodecStatus::Misuse,
            },
        }
    }
}

struct DecoderState {
    data: Vec<u8>,
    last_error: Option<CodecError>,
}

fn status(result: Result<(), CodecError>, state: &mut DecoderState) -> c_int {
    match result {
        Ok(()) => JxCodecStatus::Ok as c_int,
        Err(err) => {
            state.last_error = Some(err);
            JxCodecStatus::from(err) as c_int
        }
    }
}

fn read_info(data: &[u8]) -> Result<JxCodecImageInfo, CodecError> {
    let mut decoder = Decoder::new();
    decoder.subscribe_events(Events::BASIC_INFO)?;
    decoder.set_input(data)?;
    decoder.close_input();
    loop {
        match decoder.process()? {
            DecoderStatus::BasicInfo => {
                let info = decoder.basic_info()?;
                return Ok(JxCodecImageInfo {
                    width: info.xsize,
                    height: info.ysize,
                    color_channels: info.num_color_channels,
                    extra_channels: info.num_extra_channels,
                    bits_per_sample: info.bits_per_sample,
                    have_animation: c_int::from(info.have_animation),
                });
            }
            DecoderStatus::Success => return Err(CodecError::CodestreamNeverFinished),
            _ => {}
        }
    }
}

/// Decodes the first full image into `out`.
fn decode_first_image(data: &[u8], format: PixelFormat, out: &mut [u8]) -> Result<(), CodecError> {
    let mut decoder = Decoder::new();
    decoder.subscribe_events(Events::FULL_IMAGE)?;
    decoder.set_input(data)?;
    decoder.close_input();
    let mut out = Some(out);
    loop {
        match decoder.process()? {
            DecoderStatus::NeedImageOutBuffer => {
                let buffer = out.take().ok_or(CodecError::NoOutputBuffer)?;
                decoder.set_image_out_buffer(format, buffer)?;
            }
            DecoderStatus::FullImage | DecoderStatus::Success => return Ok(()),
            _ => {}
        }
    }
}

/// Create a new decoder from a complete file.
///
/// # Safety
/// `data` must be a valid pointer to `len` bytes.
#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub unsafe extern "C" fn jxcodec_decoder_new(
    data: *const c_uchar,
    len: usize,
) -> *mut JxCodecDecoder {
    if data.is_null() || len == 0 {
        return ptr::null_mut();
    }
    let slice = unsafe { std::slice::from_raw_parts(data, len) };
    let state = Box::new(DecoderState {
        data: slice.to_vec(),
        last_error: None,
    });
    Box::into_raw(state) as *mut JxCodecDecoder
}

/// Free a decoder handle.
///
/// # Safety
/// `decoder` must be a valid handle from `jxcodec_decoder_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jxcodec_decoder_free(decoder: *mut JxCodecDecoder) {
    if !decoder.is_null() {
        let _ = unsafe { Box::from_raw(decoder as *mut DecoderState) };
    }
}

/// Read the basic image information.
///
/// # Safety
/// `decoder` must be valid. `info` must point to a valid JxCodecImageInfo.
#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub unsafe extern "C" fn jxcodec_decoder_read_info(
    decoder: *mut JxCodecDecoder,
    info: *mut JxCodecImageInfo,
) -> c_int {
    if decoder.is_null() || info.is_null() {
        return JxCodecStatus::InvalidArgument as c_int;
    }
    let state = unsafe { &mut *(decoder as *mut DecoderState) };
    let result = read_info(&state.data).map(|read| unsafe { *info = read });
    status(result, state)
}

/// Decode the first image as interleaved samples of `num_channels` channels,
/// 8 or 16 bits each (16-bit samples in native byte order).
///
/// # Safety
/// `decoder` must be valid. `output` must point to `output_len` writable bytes.
#[unsafe(no_mangle)]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub unsafe extern "C" fn jxcodec_decoder_decode(
    decoder: *mut JxCodecDecoder,
    output: *mut c_uchar,
    output_len: usize,
    num_channels: u32,
    bits: u32,
) -> c_int {
    if decoder.is_null() || output.is_null() {
        return JxCodecStatus::InvalidArgument as c_int;
    }
    let data_type = match bits {
        8 => DataType::U8,
        16 => DataType::U16,
        _ => return JxCodecStatus::InvalidArgument as c_int,
    };
    let format = PixelFormat {
        endianness: Endianness::Native,
        ..PixelFormat::new(num_channels, data_type)
    };
    let state = unsafe { &mut *(decoder as *mut DecoderState) };
    let out = unsafe { std::slice::from_raw_parts_mut(output, output_len) };
    let result = decode_first_image(&state.data, format, out);
    status(result, state)
}

/// Detailed code of the last failure, 0 if none. Values below 100 are
/// malformed input, values from 100 on are API misuse.
///
/// # Safety
/// `decoder` must be a valid handle from `jxcodec_decoder_new`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jxcodec_decoder_last_error(decoder: *const JxCodecDecoder) -> c_int {
    if decoder.is_null() {
        return 0;
    }
    let state = unsafe { &*(decoder as *const DecoderState) };
    state.last_error.map_or(0, |err| err as c_int)
}

/// Library version string, NUL terminated.
#[unsafe(no_mangle)]
pub extern "C" fn jxcodec_version() -> *const c_uchar {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, FrameImage, FrameSettings, ImageSettings};

    fn encoded_gray() -> Vec<u8> {
        let mut encoder = Encoder::new(ImageSettings::gray(3, 2));
        encoder
            .add_frame(
                FrameSettings::default(),
                FrameImage::new(3, 2, vec![vec![0, 50, 100, 150, 200, 250]]),
            )
            .unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_ffi_decode() {
        let data = encoded_gray();
        unsafe {
            let decoder = jxcodec_decoder_new(data.as_ptr(), data.len());
            assert!(!decoder.is_null());
            let mut info = JxCodecImageInfo {
                width: 0,
                height: 0,
                color_channels: 0,
                extra_channels: 0,
                bits_per_sample: 0,
                have_animation: 0,
            };
            assert_eq!(jxcodec_decoder_read_info(decoder, &mut info), 0);
            assert_eq!((info.width, info.height, info.color_channels), (3, 2, 1));

            let mut out = vec![0u8; 6];
            assert_eq!(jxcodec_decoder_decode(decoder, out.as_mut_ptr(), out.len(), 1, 8), 0);
            assert_eq!(out, vec![0, 50, 100, 150, 200, 250]);

            let mut small = vec![0u8; 2];
            assert_eq!(
                jxcodec_decoder_decode(decoder, small.as_mut_ptr(), small.len(), 1, 8),
                JxCodecStatus::BufferTooSmall as c_int
            );
            assert_eq!(
                jxcodec_decoder_last_error(decoder),
                CodecError::BufferTooSmall as c_int
            );
            jxcodec_decoder_free(decoder);
        }
    }

    #[test]
    fn test_ffi_rejects_null() {
        unsafe {
            assert!(jxcodec_decoder_new(ptr::null(), 4).is_null());
            assert_eq!(
                jxcodec_decoder_read_info(ptr::null_mut(), ptr::null_mut()),
                JxCodecStatus::InvalidArgument as c_int
            );
        }
    }
}
