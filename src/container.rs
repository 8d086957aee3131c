//! Container box framing: signature detection, box headers, box content
//! pass-through (raw or brotli compressed) and the matching box writer.

use crate::box_type::BoxType;
use crate::constants::{CODESTREAM_SIGNATURE, CONTAINER_SIGNATURE};
use crate::error::CodecError;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    NotEnoughBytes,
    Invalid,
    Codestream,
    Container,
}

/// Identifies a bare codestream or a container from the first bytes of a
/// file.
pub fn signature_check(data: &[u8]) -> Signature {
    let Some(&first) = data.first() else {
        return Signature::NotEnoughBytes;
    };
    if first == CODESTREAM_SIGNATURE[0] {
        return match data.get(1) {
            None => Signature::NotEnoughBytes,
            Some(&b) if b == CODESTREAM_SIGNATURE[1] => Signature::Codestream,
            Some(_) => Signature::Invalid,
        };
    }
    if first == CONTAINER_SIGNATURE[0] {
        let available = data.len().min(CONTAINER_SIGNATURE.len());
        if data[..available] != CONTAINER_SIGNATURE[..available] {
            return Signature::Invalid;
        }
        if available < CONTAINER_SIGNATURE.len() {
            return Signature::NotEnoughBytes;
        }
        return Signature::Container;
    }
    Signature::Invalid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    /// Total box size including the header, 0 for a final unbounded box.
    pub box_size: u64,
    pub header_size: u64,
}

impl BoxHeader {
    pub fn is_unbounded(&self) -> bool {
        self.box_size == 0
    }

    pub fn contents_size(&self) -> u64 {
        if self.is_unbounded() {
            0
        } else {
            self.box_size - self.header_size
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxHeaderStatus {
    Parsed(BoxHeader),
    /// Not enough input, carries a lower bound for the header size.
    NeedMoreInput(u64),
}

/// Parses the box header at the start of `data`. `file_pos` is the absolute
/// offset of `data[0]`, used for overflow checking.
pub fn parse_box_header(data: &[u8], file_pos: u64) -> Result<BoxHeaderStatus, CodecError> {
    if data.len() < 8 {
        return Ok(BoxHeaderStatus::NeedMoreInput(8));
    }
    let mut box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let mut pos = 4usize;
    if box_size == 1 {
        if data.len() < 16 {
            return Ok(BoxHeaderStatus::NeedMoreInput(16));
        }
        let mut size_bytes = [0u8; 8];
        size_bytes.copy_from_slice(&data[8..16]);
        box_size = u64::from_be_bytes(size_bytes);
        let mut type_bytes = [0u8; 4];
        type_bytes.copy_from_slice(&data[4..8]);
        pos += 12;
        return finish_box_header(BoxType(type_bytes), box_size, pos as u64, file_pos);
    }
    let mut type_bytes = [0u8; 4];
    type_bytes.copy_from_slice(&data[pos..pos + 4]);
    pos += 4;
    finish_box_header(BoxType(type_bytes), box_size, pos as u64, file_pos)
}

fn finish_box_header(
    box_type: BoxType,
    box_size: u64,
    header_size: u64,
    file_pos: u64,
) -> Result<BoxHeaderStatus, CodecError> {
    if box_size > 0 && box_size < header_size {
        return Err(CodecError::InvalidBoxSize);
    }
    file_pos
        .checked_add(header_size)
        .and_then(|v| v.checked_add(box_size))
        .ok_or(CodecError::BoxSizeOverflow)?;
    Ok(BoxHeaderStatus::Parsed(BoxHeader {
        box_type,
        box_size,
        header_size,
    }))
}

/// Where the box walker is inside the current box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxStage {
    Header,
    Ftyp,
    Skip,
    Codestream,
    PartialCodestream,
    Reconstruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxContentStatus {
    NeedMoreInput,
    NeedMoreOutput,
    Done,
}

/// Surfaces the contents of one box into caller provided output, raw or
/// brotli decompressed for `brob` boxes. The decoder advances its input
/// independently, so `process` is told how far into the box input already is.
#[derive(Debug, Default)]
pub struct BoxContentDecoder {
    brob_decode: bool,
    box_until_eof: bool,
    /// Bytes of the wrapped box type skipped so far.
    header_read: usize,
    remaining: u64,
    pos: u64,
    compressed: Vec<u8>,
    decompressed: Option<Vec<u8>>,
    delivered: usize,
}

impl BoxContentDecoder {
    pub fn start_box(&mut self, brob_decode: bool, box_until_eof: bool, contents_size: u64) {
        *self = Self {
            brob_decode,
            box_until_eof,
            remaining: if box_until_eof { 0 } else { contents_size },
            ..Self::default()
        };
    }

    /// `input` starts at absolute box content offset `box_pos`. Returns the
    /// status and the number of bytes written to `out`.
    pub fn process(
        &mut self,
        input: &[u8],
        box_pos: u64,
        input_closed: bool,
        out: &mut [u8],
    ) -> Result<(BoxContentStatus, usize), CodecError> {
        let skip = usize::try_from(self.pos.saturating_sub(box_pos))
            .map_err(|_| CodecError::BoxSizeOverflow)?;
        let mut input = input.get(skip..).unwrap_or(&[]);

        if self.brob_decode {
            return self.process_compressed(input, input_closed, out);
        }

        if !self.box_until_eof {
            input = &input[..bounded(input.len(), self.remaining)];
        }
        let to_write = input.len().min(out.len());
        out[..to_write].copy_from_slice(&input[..to_write]);
        self.pos += to_write as u64;
        if !self.box_until_eof {
            self.remaining -= to_write as u64;
        }
        if to_write < input.len() {
            return Ok((BoxContentStatus::NeedMoreOutput, to_write));
        }
        if !self.box_until_eof && self.remaining == 0 {
            return Ok((BoxContentStatus::Done, to_write));
        }
        Ok((BoxContentStatus::NeedMoreInput, to_write))
    }

    fn process_compressed(
        &mut self,
        mut input: &[u8],
        input_closed: bool,
        out: &mut [u8],
    ) -> Result<(BoxContentStatus, usize), CodecError> {
        if self.header_read < 4 {
            if !self.box_until_eof && self.header_read == 0 {
                if self.remaining < 4 {
                    return Err(CodecError::CompressedBoxTooSmall);
                }
                self.remaining -= 4;
            }
            let take = (4 - self.header_read).min(input.len());
            self.header_read += take;
            self.pos += take as u64;
            input = &input[take..];
            if self.header_read < 4 {
                return Ok((BoxContentStatus::NeedMoreInput, 0));
            }
        }

        if self.decompressed.is_none() {
            if !self.box_until_eof {
                input = &input[..bounded(input.len(), self.remaining)];
                self.remaining -= input.len() as u64;
            }
            self.compressed.extend_from_slice(input);
            self.pos += input.len() as u64;
            let complete = if self.box_until_eof {
                input_closed
            } else {
                self.remaining == 0
            };
            if !complete {
                return Ok((BoxContentStatus::NeedMoreInput, 0));
            }
            self.decompressed = Some(brotli_decompress(&self.compressed)?);
            self.compressed = Vec::new();
        }

        let data = self.decompressed.as_deref().unwrap_or(&[]);
        let left = &data[self.delivered..];
        let to_write = left.len().min(out.len());
        out[..to_write].copy_from_slice(&left[..to_write]);
        self.delivered += to_write;
        if to_write < left.len() {
            Ok((BoxContentStatus::NeedMoreOutput, to_write))
        } else {
            Ok((BoxContentStatus::Done, to_write))
        }
    }
}

fn bounded(len: usize, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(len, |r| len.min(r))
}

pub fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut Cursor::new(data), &mut out)
        .map_err(|_| CodecError::BoxDecompressionFailed)?;
    Ok(out)
}

pub fn brotli_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams::default();
    brotli::BrotliCompress(&mut Cursor::new(data), &mut out, &params)
        .map_err(|_| CodecError::InvalidEncoderInput)?;
    Ok(out)
}

/// Appends a box with the given contents, using the 64-bit size form when
/// the 32-bit one does not fit. `unbounded` writes a size of 0.
pub fn write_box(out: &mut Vec<u8>, box_type: BoxType, contents: &[u8], unbounded: bool) {
    let total = contents.len() as u64 + 8;
    if unbounded {
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(box_type.as_bytes());
    } else if total <= u32::MAX as u64 {
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(box_type.as_bytes());
    } else {
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(box_type.as_bytes());
        out.extend_from_slice(&(total + 8).to_be_bytes());
    }
    out.extend_from_slice(contents);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_check() {
        assert_eq!(signature_check(&[]), Signature::NotEnoughBytes);
        assert_eq!(signature_check(&[0xFF]), Signature::NotEnoughBytes);
        assert_eq!(signature_check(&[0xFF, 0x0A]), Signature::Codestream);
        assert_eq!(signature_check(&[0xFF, 0xD8]), Signature::Invalid);
        assert_eq!(
            signature_check(&CONTAINER_SIGNATURE[..5]),
            Signature::NotEnoughBytes
        );
        assert_eq!(signature_check(&CONTAINER_SIGNATURE), Signature::Container);
        assert_eq!(signature_check(&[0, 0, 0, 0x0D]), Signature::Invalid);
        assert_eq!(signature_check(b"GIF89a"), Signature::Invalid);
    }

    #[test]
    fn test_parse_box_header() {
        let data = [0, 0, 0, 20, b'f', b't', b'y', b'p', 0];
        let BoxHeaderStatus::Parsed(header) = parse_box_header(&data, 12).unwrap() else {
            panic!("expected a header");
        };
        assert_eq!(header.box_type, BoxType::FTYP);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.contents_size(), 12);

        assert_eq!(
            parse_box_header(&data[..6], 0),
            Ok(BoxHeaderStatus::NeedMoreInput(8))
        );
        assert_eq!(
            parse_box_header(&[0, 0, 0, 1, b'j', b'x', b'l', b'c', 0], 0),
            Ok(BoxHeaderStatus::NeedMoreInput(16))
        );
        assert_eq!(
            parse_box_header(&[0, 0, 0, 4, b'j', b'x', b'l', b'c'], 0),
            Err(CodecError::InvalidBoxSize)
        );
    }

    #[test]
    fn test_extended_size_and_overflow() {
        let mut data = vec![0, 0, 0, 1];
        data.extend_from_slice(b"jxlc");
        data.extend_from_slice(&100u64.to_be_bytes());
        let BoxHeaderStatus::Parsed(header) = parse_box_header(&data, 0).unwrap() else {
            panic!("expected a header");
        };
        assert_eq!(header.header_size, 16);
        assert_eq!(header.contents_size(), 84);

        let mut huge = vec![0, 0, 0, 1];
        huge.extend_from_slice(b"jxlc");
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(
            parse_box_header(&huge, 32),
            Err(CodecError::BoxSizeOverflow)
        );
    }

    #[test]
    fn test_raw_content_needs_more_output() {
        let mut decoder = BoxContentDecoder::default();
        decoder.start_box(false, false, 6);
        let content = b"abcdef";
        let mut out = [0u8; 4];
        let (status, written) = decoder.process(content, 0, false, &mut out).unwrap();
        assert_eq!((status, written), (BoxContentStatus::NeedMoreOutput, 4));
        assert_eq!(&out, b"abcd");

        // Input has not moved, the decoder skips what it already delivered.
        let mut rest = [0u8; 8];
        let (status, written) = decoder.process(content, 0, false, &mut rest).unwrap();
        assert_eq!((status, written), (BoxContentStatus::Done, 2));
        assert_eq!(&rest[..2], b"ef");
    }

    #[test]
    fn test_brob_content() {
        let payload = b"<x:xmpmeta>hello hello hello</x:xmpmeta>".to_vec();
        let mut content = b"xml ".to_vec();
        content.extend_from_slice(&brotli_compress(&payload).unwrap());

        let mut decoder = BoxContentDecoder::default();
        decoder.start_box(true, false, content.len() as u64);
        let mut out = vec![0u8; 256];
        let half = content.len() / 2;
        let (status, _) = decoder
            .process(&content[..half], 0, false, &mut out)
            .unwrap();
        assert_eq!(status, BoxContentStatus::NeedMoreInput);
        let (status, written) = decoder
            .process(&content[half..], half as u64, false, &mut out)
            .unwrap();
        assert_eq!(status, BoxContentStatus::Done);
        assert_eq!(&out[..written], &payload[..]);
    }

    #[test]
    fn test_write_box_header() {
        let mut out = Vec::new();
        write_box(&mut out, BoxType::EXIF, &[1, 2, 3], false);
        assert_eq!(out, vec![0, 0, 0, 11, b'E', b'x', b'i', b'f', 1, 2, 3]);
    }
}
