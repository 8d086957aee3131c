//! Writes codestreams the decoder reads back: headers, frames split into
//! sections behind a TOC, and optionally a box container around them.

use crate::bit_io::BitWriter;
use crate::box_type::BoxType;
use crate::constants::{
    CODESTREAM_SIGNATURE, CONTAINER_SIGNATURE, FTYP_MAJOR_BRAND, JXLP_LAST_BOX_FLAG,
    NUM_REFERENCE_SLOTS,
};
use crate::container::{brotli_compress, write_box};
use crate::error::CodecError;
use crate::frame::header::{BlendingInfo, Crop, FrameHeader, FrameType};
use crate::frame::patches::Patch;
use crate::frame::section::{encode_global, encode_pass_group};
use crate::frame::toc::Toc;
use crate::frame::{FrameDim, channel_bits};
use crate::headers::color_encoding::ColorEncoding;
use crate::headers::icc::write_icc;
use crate::headers::image_metadata::ImageMetadata;
use crate::headers::{CodecMetadata, SizeHeader};
use crate::reconstruction::ReconstructionMetadata;

/// Image wide settings. `metadata.preview_size` is filled in from the
/// preview image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSettings {
    pub xsize: u32,
    pub ysize: u32,
    pub metadata: ImageMetadata,
}

impl ImageSettings {
    pub fn new(xsize: u32, ysize: u32) -> Self {
        Self {
            xsize,
            ysize,
            metadata: ImageMetadata::default(),
        }
    }

    pub fn gray(xsize: u32, ysize: u32) -> Self {
        let mut settings = Self::new(xsize, ysize);
        settings.metadata.color_encoding = ColorEncoding::srgb(true);
        settings
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    pub frame_type: FrameType,
    pub num_passes: u32,
    pub dc_level: u32,
    pub use_dc_frame: bool,
    pub crop: Option<Crop>,
    pub blending: BlendingInfo,
    /// One per extra channel, or empty for `Replace` everywhere.
    pub extra_blending: Vec<BlendingInfo>,
    pub duration: u32,
    pub timecode: u32,
    pub save_as_reference: u32,
    pub name: String,
    pub patches: Vec<Patch>,
    /// Order sections are stored in, by section id. `None` stores them in
    /// id order.
    pub section_order: Option<Vec<usize>>,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            frame_type: FrameType::Regular,
            num_passes: 1,
            dc_level: 0,
            use_dc_frame: false,
            crop: None,
            blending: BlendingInfo::default(),
            extra_blending: Vec::new(),
            duration: 0,
            timecode: 0,
            save_as_reference: 0,
            name: String::new(),
            patches: Vec::new(),
            section_order: None,
        }
    }
}

/// Integer samples of one frame, color channels first then extra channels,
/// each plane row major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameImage {
    pub xsize: usize,
    pub ysize: usize,
    pub channels: Vec<Vec<u16>>,
}

impl FrameImage {
    pub fn new(xsize: usize, ysize: usize, channels: Vec<Vec<u16>>) -> Self {
        Self {
            xsize,
            ysize,
            channels,
        }
    }

    /// Every channel filled with `value`.
    pub fn filled(xsize: usize, ysize: usize, num_channels: usize, value: u16) -> Self {
        Self::new(xsize, ysize, vec![vec![value; xsize * ysize]; num_channels])
    }
}

#[derive(Debug, Clone)]
struct PendingBox {
    box_type: BoxType,
    data: Vec<u8>,
    compress: bool,
    trailing: bool,
}

pub struct Encoder {
    settings: ImageSettings,
    icc: Option<Vec<u8>>,
    container: bool,
    codestream_split: Option<usize>,
    unbounded_codestream: bool,
    boxes: Vec<PendingBox>,
    preview: Option<FrameImage>,
    frames: Vec<(FrameSettings, FrameImage)>,
}

impl Encoder {
    pub fn new(settings: ImageSettings) -> Self {
        Self {
            settings,
            icc: None,
            container: false,
            codestream_split: None,
            unbounded_codestream: false,
            boxes: Vec::new(),
            preview: None,
            frames: Vec::new(),
        }
    }

    /// Embeds `icc` in place of the parametric color encoding.
    pub fn set_icc_profile(&mut self, icc: Vec<u8>) -> Result<(), CodecError> {
        if icc.is_empty() {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.icc = Some(icc);
        Ok(())
    }

    pub fn use_container(&mut self, container: bool) {
        self.container = container;
    }

    /// Splits the codestream into `jxlp` boxes of at most `part_size` bytes.
    pub fn set_codestream_split(&mut self, part_size: Option<usize>) -> Result<(), CodecError> {
        if part_size == Some(0) {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.codestream_split = part_size;
        Ok(())
    }

    /// Writes the codestream box with a size of 0, running to the end of the
    /// file. Needs a single `jxlc` box and no trailing boxes.
    pub fn set_unbounded_codestream(&mut self, unbounded: bool) {
        self.unbounded_codestream = unbounded;
    }

    fn push_box(
        &mut self,
        box_type: BoxType,
        data: &[u8],
        compress: bool,
        trailing: bool,
    ) -> Result<(), CodecError> {
        if matches!(
            box_type,
            BoxType::SIGNATURE
                | BoxType::FTYP
                | BoxType::CODESTREAM
                | BoxType::PARTIAL_CODESTREAM
                | BoxType::BROTLI_COMPRESSED
        ) {
            return Err(CodecError::InvalidEncoderInput);
        }
        if compress && box_type.is_structural() {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.boxes.push(PendingBox {
            box_type,
            data: data.to_vec(),
            compress,
            trailing,
        });
        Ok(())
    }

    /// Adds a metadata box before the codestream. `compress` wraps it in a
    /// `brob` box.
    pub fn add_box(
        &mut self,
        box_type: BoxType,
        data: &[u8],
        compress: bool,
    ) -> Result<(), CodecError> {
        self.push_box(box_type, data, compress, false)
    }

    /// Adds a metadata box after the codestream.
    pub fn add_trailing_box(
        &mut self,
        box_type: BoxType,
        data: &[u8],
        compress: bool,
    ) -> Result<(), CodecError> {
        self.push_box(box_type, data, compress, true)
    }

    /// Adds a `jbrd` box before the codestream, and the Exif and XMP boxes
    /// it announces after it.
    pub fn add_reconstruction_metadata(
        &mut self,
        recon: &ReconstructionMetadata,
    ) -> Result<(), CodecError> {
        let exif_len = recon.exif.as_ref().map_or(0, Vec::len);
        let xmp_len = recon.xmp.as_ref().map_or(0, Vec::len);
        if exif_len != recon.exif_size as usize || xmp_len != recon.xmp_size as usize {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.push_box(BoxType::RECONSTRUCTION, &recon.to_box_content(), false, false)?;
        if let Some(exif) = recon.exif.as_deref() {
            self.push_box(BoxType::EXIF, exif, false, true)?;
        }
        if let Some(xmp) = recon.xmp.as_deref() {
            self.push_box(BoxType::XML, xmp, false, true)?;
        }
        Ok(())
    }

    pub fn set_preview(&mut self, preview: FrameImage) -> Result<(), CodecError> {
        if preview.xsize == 0 || preview.ysize == 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.preview = Some(preview);
        Ok(())
    }

    pub fn add_frame(
        &mut self,
        settings: FrameSettings,
        image: FrameImage,
    ) -> Result<(), CodecError> {
        if settings.num_passes == 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        self.frames.push((settings, image));
        Ok(())
    }

    fn codec_metadata(&self) -> Result<CodecMetadata, CodecError> {
        let settings = &self.settings;
        if settings.xsize == 0 || settings.ysize == 0 {
            return Err(CodecError::InvalidEncoderInput);
        }
        let mut image = settings.metadata.clone();
        image.preview_size = self
            .preview
            .as_ref()
            .map(|p| SizeHeader::new(p.xsize as u32, p.ysize as u32));
        if self.icc.is_some() {
            image.color_encoding = ColorEncoding::icc(image.color_encoding.color_space);
        }
        Ok(CodecMetadata {
            size: SizeHeader::new(settings.xsize, settings.ysize),
            image,
            icc: self.icc.clone(),
            ..CodecMetadata::default()
        })
    }

    /// Encodes everything added so far into a complete file.
    pub fn finish(&self) -> Result<Vec<u8>, CodecError> {
        if self.frames.is_empty() {
            return Err(CodecError::InvalidEncoderInput);
        }
        if !self.container && (!self.boxes.is_empty() || self.codestream_split.is_some()) {
            return Err(CodecError::InvalidEncoderInput);
        }
        let metadata = self.codec_metadata()?;

        let mut writer = BitWriter::new();
        metadata.size.write(&mut writer)?;
        metadata.image.write(&mut writer)?;
        metadata.transform.write(&mut writer)?;
        if let Some(icc) = &metadata.icc {
            write_icc(&mut writer, icc)?;
        }
        writer.zero_pad_to_byte();
        let mut codestream = CODESTREAM_SIGNATURE.to_vec();
        codestream.extend_from_slice(&writer.finish());

        if let Some(preview) = &self.preview {
            let header = FrameHeader {
                is_preview: true,
                extra_blending: vec![BlendingInfo::default(); metadata.image.extra_channels.len()],
                ..FrameHeader::default()
            };
            encode_frame(&mut codestream, &header, &metadata, preview, &[], None)?;
        }

        let mut saved_slots = 0u8;
        let mut dc_levels = 0u8;
        let last = self.frames.len() - 1;
        for (index, (settings, image)) in self.frames.iter().enumerate() {
            let header = frame_header(settings, &metadata, index == last)?;
            if header.use_dc_frame && dc_levels & (1u8 << (header.dc_level + 1)) == 0 {
                return Err(CodecError::InvalidEncoderInput);
            }
            if settings
                .patches
                .iter()
                .any(|p| p.slot >= NUM_REFERENCE_SLOTS || saved_slots & (1u8 << p.slot) == 0)
            {
                return Err(CodecError::InvalidEncoderInput);
            }
            encode_frame(
                &mut codestream,
                &header,
                &metadata,
                image,
                &settings.patches,
                settings.section_order.as_deref(),
            )?;
            if header.frame_type == FrameType::DcFrame {
                dc_levels |= 1u8 << header.dc_level;
            } else if header.can_be_referenced() {
                saved_slots |= 1u8 << header.save_as_reference;
            }
        }
        ldebug!(
            "encoded {} frames into a {} byte codestream",
            self.frames.len(),
            codestream.len()
        );

        if !self.container {
            return Ok(codestream);
        }
        self.wrap_in_container(&codestream)
    }

    fn wrap_in_container(&self, codestream: &[u8]) -> Result<Vec<u8>, CodecError> {
        let has_trailing = self.boxes.iter().any(|b| b.trailing);
        if self.unbounded_codestream && (has_trailing || self.codestream_split.is_some()) {
            return Err(CodecError::InvalidEncoderInput);
        }

        let mut out = CONTAINER_SIGNATURE.to_vec();
        let mut ftyp = FTYP_MAJOR_BRAND.to_vec();
        ftyp.extend_from_slice(&0u32.to_be_bytes());
        ftyp.extend_from_slice(&FTYP_MAJOR_BRAND);
        write_box(&mut out, BoxType::FTYP, &ftyp, false);

        for pending in self.boxes.iter().filter(|b| !b.trailing) {
            write_pending_box(&mut out, pending)?;
        }
        match self.codestream_split {
            Some(part_size) => {
                let num_parts = codestream.len().div_ceil(part_size).max(1);
                for (index, part) in codestream.chunks(part_size).enumerate() {
                    let mut flagged = index as u32;
                    if index + 1 == num_parts {
                        flagged |= JXLP_LAST_BOX_FLAG;
                    }
                    let mut contents = flagged.to_be_bytes().to_vec();
                    contents.extend_from_slice(part);
                    write_box(&mut out, BoxType::PARTIAL_CODESTREAM, &contents, false);
                }
            }
            None => write_box(&mut out, BoxType::CODESTREAM, codestream, self.unbounded_codestream),
        }
        for pending in self.boxes.iter().filter(|b| b.trailing) {
            write_pending_box(&mut out, pending)?;
        }
        Ok(out)
    }
}

fn write_pending_box(out: &mut Vec<u8>, pending: &PendingBox) -> Result<(), CodecError> {
    if pending.compress {
        let mut contents = pending.box_type.as_bytes().to_vec();
        contents.extend_from_slice(&brotli_compress(&pending.data)?);
        write_box(out, BoxType::BROTLI_COMPRESSED, &contents, false);
    } else {
        write_box(out, pending.box_type, &pending.data, false);
    }
    Ok(())
}

fn frame_header(
    settings: &FrameSettings,
    metadata: &CodecMetadata,
    is_last: bool,
) -> Result<FrameHeader, CodecError> {
    let num_extra = metadata.image.extra_channels.len();
    let extra_blending = if settings.extra_blending.is_empty() {
        vec![BlendingInfo::default(); num_extra]
    } else if settings.extra_blending.len() == num_extra {
        settings.extra_blending.clone()
    } else {
        return Err(CodecError::InvalidEncoderInput);
    };
    if is_last && settings.frame_type != FrameType::Regular {
        return Err(CodecError::InvalidEncoderInput);
    }
    if settings.duration > 0 && metadata.image.animation.is_none() {
        return Err(CodecError::InvalidEncoderInput);
    }
    Ok(FrameHeader {
        frame_type: settings.frame_type,
        num_passes: settings.num_passes,
        dc_level: settings.dc_level,
        use_dc_frame: settings.use_dc_frame,
        has_patches: !settings.patches.is_empty(),
        crop: settings.crop,
        blending: settings.blending,
        extra_blending,
        duration: settings.duration,
        timecode: settings.timecode,
        is_last,
        save_as_reference: if is_last { 0 } else { settings.save_as_reference },
        name: settings.name.clone(),
        is_preview: false,
    })
}

/// Appends the header, TOC and sections of one frame to `out`.
fn encode_frame(
    out: &mut Vec<u8>,
    header: &FrameHeader,
    metadata: &CodecMetadata,
    image: &FrameImage,
    patches: &[Patch],
    section_order: Option<&[usize]>,
) -> Result<(), CodecError> {
    let (xsize, ysize) = header.frame_size(metadata);
    let bits = channel_bits(metadata);
    if image.xsize != xsize || image.ysize != ysize || image.channels.len() != bits.len() {
        return Err(CodecError::InvalidEncoderInput);
    }
    let samples = image
        .channels
        .iter()
        .zip(&bits)
        .map(|(plane, &bits)| {
            let max = (1u32 << bits) - 1;
            if plane.len() != xsize * ysize || plane.iter().any(|&v| u32::from(v) > max) {
                return Err(CodecError::InvalidEncoderInput);
            }
            Ok(plane.iter().map(|&v| u32::from(v)).collect())
        })
        .collect::<Result<Vec<Vec<u32>>, CodecError>>()?;

    let dim = FrameDim::new(xsize, ysize);
    let mut sections = Vec::with_capacity(dim.num_sections(header.num_passes));
    let mut writer = BitWriter::new();
    encode_global(&mut writer, header, &dim, &bits, patches, &samples)?;
    sections.push(writer.finish());
    for pass in 0..header.num_passes {
        for group in 0..dim.num_groups {
            let mut writer = BitWriter::new();
            encode_pass_group(&mut writer, &dim, group, pass, header.num_passes, &bits, &samples);
            sections.push(writer.finish());
        }
    }

    let order: Vec<usize> = match section_order {
        Some(order) => {
            let mut seen = vec![false; sections.len()];
            if order.len() != sections.len() {
                return Err(CodecError::InvalidEncoderInput);
            }
            for &id in order {
                if id >= sections.len() || std::mem::replace(&mut seen[id], true) {
                    return Err(CodecError::InvalidEncoderInput);
                }
            }
            order.to_vec()
        }
        None => (0..sections.len()).collect(),
    };
    let sizes: Vec<usize> = sections.iter().map(Vec::len).collect();

    let mut writer = BitWriter::new();
    header.write(&mut writer, metadata)?;
    Toc::write(&mut writer, &order, &sizes)?;
    out.extend_from_slice(&writer.finish());
    for id in order {
        out.extend_from_slice(&sections[id]);
    }
    ltrace!(
        "frame {:?} {}x{}: {} sections",
        header.frame_type,
        xsize,
        ysize,
        sizes.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BoxHeaderStatus, parse_box_header};

    #[test]
    fn test_bare_codestream_starts_with_signature() {
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 7))
            .unwrap();
        let bytes = encoder.finish().unwrap();
        assert_eq!(bytes[..2], CODESTREAM_SIGNATURE);
    }

    #[test]
    fn test_container_layout() {
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder.use_container(true);
        encoder.add_box(BoxType::EXIF, &[1, 2, 3], false).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 7))
            .unwrap();
        let bytes = encoder.finish().unwrap();
        assert_eq!(bytes[..12], CONTAINER_SIGNATURE);

        let mut pos = 12;
        let mut types = Vec::new();
        while pos < bytes.len() {
            let BoxHeaderStatus::Parsed(header) =
                parse_box_header(&bytes[pos..], pos as u64).unwrap()
            else {
                panic!("truncated box");
            };
            types.push(header.box_type);
            pos += header.box_size as usize;
        }
        assert_eq!(types, vec![BoxType::FTYP, BoxType::EXIF, BoxType::CODESTREAM]);
    }

    #[test]
    fn test_split_codestream_flags_last_part() {
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        encoder.use_container(true);
        encoder.set_codestream_split(Some(5)).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 7))
            .unwrap();
        let bytes = encoder.finish().unwrap();

        let mut pos = 32;
        let mut indices = Vec::new();
        while pos < bytes.len() {
            let BoxHeaderStatus::Parsed(header) =
                parse_box_header(&bytes[pos..], pos as u64).unwrap()
            else {
                panic!("truncated box");
            };
            assert_eq!(header.box_type, BoxType::PARTIAL_CODESTREAM);
            let start = pos + header.header_size as usize;
            indices.push(u32::from_be_bytes([
                bytes[start],
                bytes[start + 1],
                bytes[start + 2],
                bytes[start + 3],
            ]));
            pos += header.box_size as usize;
        }
        assert!(indices.len() > 1);
        let last = indices.len() - 1;
        assert_eq!(indices[last], last as u32 | JXLP_LAST_BOX_FLAG);
        assert_eq!(indices[0], 0);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        assert_eq!(encoder.finish(), Err(CodecError::InvalidEncoderInput));

        // 8-bit samples only.
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 256))
            .unwrap();
        assert_eq!(encoder.finish(), Err(CodecError::InvalidEncoderInput));

        let mut encoder = Encoder::new(ImageSettings::new(4, 4));
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 0))
            .unwrap();
        assert_eq!(encoder.finish(), Err(CodecError::InvalidEncoderInput));

        let mut encoder = Encoder::new(ImageSettings::gray(4, 4));
        assert_eq!(
            encoder.add_box(BoxType::CODESTREAM, &[], false),
            Err(CodecError::InvalidEncoderInput)
        );
        encoder.add_box(BoxType::XML, &[b'x'], true).unwrap();
        encoder
            .add_frame(FrameSettings::default(), FrameImage::filled(4, 4, 1, 0))
            .unwrap();
        assert_eq!(encoder.finish(), Err(CodecError::InvalidEncoderInput));
    }

    #[test]
    fn test_patch_needs_saved_slot() {
        let mut encoder = Encoder::new(ImageSettings::gray(8, 8));
        let patch = Patch {
            slot: 1,
            x0: 0,
            y0: 0,
            xsize: 2,
            ysize: 2,
            dst_x: 0,
            dst_y: 0,
            mode: Default::default(),
        };
        encoder
            .add_frame(
                FrameSettings {
                    patches: vec![patch],
                    ..FrameSettings::default()
                },
                FrameImage::filled(8, 8, 1, 0),
            )
            .unwrap();
        assert_eq!(encoder.finish(), Err(CodecError::InvalidEncoderInput));
    }
}
