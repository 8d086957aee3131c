//! Frame decoding: sections are fed in any order as their bytes arrive, the
//! decoded layer is then composed with the reference slots.

pub mod blending;
pub mod header;
pub mod image;
pub mod patches;
pub mod section;
pub mod toc;

use crate::bit_io::BitReader;
use crate::constants::{BLOCK_DIM, GROUP_DIM};
use crate::error::CodecError;
use crate::headers::CodecMetadata;
use crate::parallel::{ParallelRunner, run_on_pool};
use blending::blend_layer;
use header::{FrameHeader, FrameType};
use image::{ImageBundle, ReferenceSlots};
use patches::{Patch, apply_patches, patch_references};
use section::{decode_global, decode_pass_group, pass_bit_range};
use toc::Toc;

/// How often the decoder pauses inside a frame to report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProgressiveDetail {
    /// Only whole frames.
    Frames,
    /// Once the DC image is available.
    #[default]
    Dc,
    /// Additionally before the last pass.
    LastPasses,
    /// Additionally after every pass.
    Passes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRect {
    pub x0: usize,
    pub y0: usize,
    pub xsize: usize,
    pub ysize: usize,
}

/// Frame geometry in samples, groups and DC blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDim {
    pub xsize: usize,
    pub ysize: usize,
    pub xsize_groups: usize,
    pub ysize_groups: usize,
    pub num_groups: usize,
    pub dc_xsize: usize,
    pub dc_ysize: usize,
}

impl FrameDim {
    pub fn new(xsize: usize, ysize: usize) -> Self {
        let xsize_groups = xsize.div_ceil(GROUP_DIM);
        let ysize_groups = ysize.div_ceil(GROUP_DIM);
        Self {
            xsize,
            ysize,
            xsize_groups,
            ysize_groups,
            num_groups: xsize_groups.saturating_mul(ysize_groups),
            dc_xsize: xsize.div_ceil(BLOCK_DIM),
            dc_ysize: ysize.div_ceil(BLOCK_DIM),
        }
    }

    pub fn group_rect(&self, group: usize) -> GroupRect {
        let x0 = (group % self.xsize_groups) * GROUP_DIM;
        let y0 = (group / self.xsize_groups) * GROUP_DIM;
        GroupRect {
            x0,
            y0,
            xsize: GROUP_DIM.min(self.xsize - x0),
            ysize: GROUP_DIM.min(self.ysize - y0),
        }
    }

    pub fn num_sections(&self, num_passes: u32) -> usize {
        (num_passes as usize).saturating_mul(self.num_groups).saturating_add(1)
    }
}

/// Bits per sample of every channel: color channels first, then the extra
/// channels.
pub fn channel_bits(metadata: &CodecMetadata) -> Vec<u32> {
    let num_color = metadata.image.num_color_channels() as usize;
    std::iter::repeat_n(metadata.image.bits_per_sample, num_color)
        .chain(metadata.image.extra_channels.iter().map(|ec| ec.bits_per_sample))
        .collect()
}

/// Zero-filled sample plane; an allocation the system refuses surfaces as
/// `FrameTooLarge` instead of aborting.
pub fn zeroed_plane(len: usize) -> Result<Vec<u32>, CodecError> {
    let mut plane = Vec::new();
    plane
        .try_reserve_exact(len)
        .map_err(|_| CodecError::FrameTooLarge)?;
    plane.resize(len, 0);
    Ok(plane)
}

/// Bytes of one section, fully available.
#[derive(Debug, Clone, Copy)]
pub struct SectionInfo<'a> {
    pub id: usize,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Done,
    /// Its dependencies are not decoded yet, offer it again later.
    Skipped,
}

fn section_error(err: CodecError) -> CodecError {
    match err {
        CodecError::OutOfBounds => CodecError::FrameOutOfBounds,
        other => other,
    }
}

pub struct FrameDecoder {
    header: FrameHeader,
    dim: FrameDim,
    toc: Toc,
    channel_bits: Vec<u32>,
    patches: Vec<Patch>,
    /// Normalized DC image, available once the global section is decoded.
    dc: Option<ImageBundle>,
    /// Bits decoded so far, per channel.
    accum: Vec<Vec<u32>>,
    decoded_passes: Vec<u32>,
    processed: Vec<bool>,
    passes_to_pause: Vec<u32>,
}

impl FrameDecoder {
    pub fn new(
        header: FrameHeader,
        toc: Toc,
        metadata: &CodecMetadata,
    ) -> Result<Self, CodecError> {
        let (xsize, ysize) = header.frame_size(metadata);
        let dim = FrameDim::new(xsize, ysize);
        let channel_bits = channel_bits(metadata);
        let num_sections = toc.len();
        let plane_len = xsize.checked_mul(ysize).ok_or(CodecError::FrameTooLarge)?;
        let mut accum = Vec::new();
        for _ in 0..channel_bits.len() {
            accum.push(zeroed_plane(plane_len)?);
        }
        Ok(Self {
            accum,
            decoded_passes: vec![0; dim.num_groups],
            processed: vec![false; num_sections],
            header,
            dim,
            toc,
            channel_bits,
            patches: Vec::new(),
            dc: None,
            passes_to_pause: Vec::new(),
        })
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn dim(&self) -> &FrameDim {
        &self.dim
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// Sets where progressive pauses happen and returns the detail that
    /// applies to this frame.
    pub fn set_pause_at_progressive(&mut self, detail: ProgressiveDetail) -> ProgressiveDetail {
        let num_passes = self.header.num_passes;
        self.passes_to_pause = match detail {
            ProgressiveDetail::Frames | ProgressiveDetail::Dc => Vec::new(),
            ProgressiveDetail::LastPasses if num_passes > 1 => vec![num_passes - 1],
            ProgressiveDetail::LastPasses => Vec::new(),
            ProgressiveDetail::Passes => (1..num_passes).collect(),
        };
        detail
    }

    pub fn num_complete_passes(&self) -> u32 {
        self.decoded_passes.iter().copied().min().unwrap_or(0)
    }

    pub fn next_num_passes_to_pause(&self) -> u32 {
        let complete = self.num_complete_passes();
        self.passes_to_pause
            .iter()
            .copied()
            .find(|&p| p > complete)
            .unwrap_or(u32::MAX)
    }

    pub fn has_decoded_dc(&self) -> bool {
        self.processed.first().copied().unwrap_or(false)
    }

    pub fn has_decoded_all(&self) -> bool {
        self.processed.iter().all(|&done| done)
    }

    pub fn is_processed(&self, id: usize) -> bool {
        self.processed.get(id).copied().unwrap_or(true)
    }

    /// Slots this frame reads. Complete once the global section is decoded.
    pub fn references(&self) -> u8 {
        self.header.header_references() | patch_references(&self.patches)
    }

    fn group_and_pass(&self, id: usize) -> (usize, u32) {
        let index = id - 1;
        (
            index % self.dim.num_groups,
            (index / self.dim.num_groups) as u32,
        )
    }

    fn process_global(&mut self, data: &[u8], slots: &ReferenceSlots) -> Result<(), CodecError> {
        let mut reader = BitReader::new(data);
        let global = decode_global(&mut reader, &self.header, &self.dim, &self.channel_bits)
            .map_err(section_error)?;
        self.patches = global.patches;
        let dc = match global.dc {
            Some(planes) => {
                let mut dc = ImageBundle::new(self.dim.dc_xsize, self.dim.dc_ysize, 0);
                dc.channels = planes
                    .into_iter()
                    .zip(&self.channel_bits)
                    .map(|(plane, &bits)| {
                        let max = max_sample(bits);
                        plane.into_iter().map(|v| v as f32 / max).collect()
                    })
                    .collect();
                dc
            }
            None => {
                let source = slots
                    .get(self.header.dc_source_slot())
                    .ok_or(CodecError::InvalidReference)?;
                if !source.same_size(self.dim.dc_xsize, self.dim.dc_ysize)
                    || source.num_channels() != self.channel_bits.len()
                {
                    return Err(CodecError::InvalidReference);
                }
                source.clone()
            }
        };
        self.dc = Some(dc);
        Ok(())
    }

    /// Decodes every section whose dependencies are met: the global section
    /// first, then pass `p` of a group once pass `p - 1` of it is decoded.
    /// Pass groups of one batch decode on `runner`.
    pub fn process_sections(
        &mut self,
        sections: &[SectionInfo],
        slots: &ReferenceSlots,
        runner: &dyn ParallelRunner,
    ) -> Result<Vec<SectionStatus>, CodecError> {
        let mut status = vec![SectionStatus::Skipped; sections.len()];
        for (i, section) in sections.iter().enumerate() {
            if section.id == 0 && !self.is_processed(0) {
                self.process_global(section.data, slots)?;
                self.processed[0] = true;
                status[i] = SectionStatus::Done;
            }
        }
        if !self.has_decoded_dc() {
            return Ok(status);
        }

        let mut candidates: Vec<(usize, usize, u32)> = sections
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id != 0 && !self.is_processed(s.id))
            .map(|(i, s)| {
                let (group, pass) = self.group_and_pass(s.id);
                (i, group, pass)
            })
            .collect();
        candidates.sort_by_key(|&(_, _, pass)| pass);
        let mut next_pass = self.decoded_passes.clone();
        let mut planned = Vec::new();
        for (i, group, pass) in candidates {
            if next_pass[group] == pass {
                next_pass[group] += 1;
                planned.push((i, group, pass));
            }
        }
        ltrace!(
            "decoding {} of {} offered pass group sections",
            planned.len(),
            sections.len()
        );

        let num_passes = self.header.num_passes;
        let dim = &self.dim;
        let channel_bits = &self.channel_bits;
        let decoded = run_on_pool(runner, planned.len(), |t| {
            let (i, group, pass) = planned[t];
            let mut reader = BitReader::new(sections[i].data);
            decode_pass_group(&mut reader, dim, group, pass, num_passes, channel_bits)
        });

        for (&(i, group, pass), chunks) in planned.iter().zip(decoded) {
            let chunks = chunks.map_err(section_error)?;
            self.merge_chunks(group, pass, &chunks);
            self.decoded_passes[group] = pass + 1;
            self.processed[sections[i].id] = true;
            status[i] = SectionStatus::Done;
        }
        Ok(status)
    }

    fn merge_chunks(&mut self, group: usize, pass: u32, chunks: &[Vec<u32>]) {
        let rect = self.dim.group_rect(group);
        let xsize = self.dim.xsize;
        for ((plane, chunk), &bits) in self.accum.iter_mut().zip(chunks).zip(&self.channel_bits) {
            let (lo, _) = pass_bit_range(bits, pass, self.header.num_passes);
            for (row, chunk_row) in chunk.chunks_exact(rect.xsize).enumerate() {
                let start = (rect.y0 + row) * xsize + rect.x0;
                for (sample, &value) in plane[start..start + rect.xsize].iter_mut().zip(chunk_row) {
                    *sample |= value << lo;
                }
            }
        }
    }

    /// The frame as decoded so far: groups without any pass show the
    /// upsampled DC, partially decoded samples sit mid-way in their range.
    pub fn render_layer(&self) -> ImageBundle {
        let mut layer = ImageBundle::new(self.dim.xsize, self.dim.ysize, self.channel_bits.len());
        let num_passes = self.header.num_passes;
        for (c, &bits) in self.channel_bits.iter().enumerate() {
            let max = max_sample(bits);
            for group in 0..self.dim.num_groups {
                let rect = self.dim.group_rect(group);
                let passes = self.decoded_passes[group];
                let rounding = if passes == 0 || passes == num_passes {
                    0
                } else {
                    let (lo, _) = pass_bit_range(bits, passes - 1, num_passes);
                    if lo > 0 { 1u32 << (lo - 1) } else { 0 }
                };
                for y in rect.y0..rect.y0 + rect.ysize {
                    for x in rect.x0..rect.x0 + rect.xsize {
                        let value = if passes == 0 {
                            self.dc
                                .as_ref()
                                .map_or(0.0, |dc| dc.get(c, x / BLOCK_DIM, y / BLOCK_DIM))
                        } else {
                            (self.accum[c][y * self.dim.xsize + x] + rounding) as f32 / max
                        };
                        layer.set(c, x, y, value);
                    }
                }
            }
        }
        layer
    }

    fn is_composited(&self, coalescing: bool) -> bool {
        coalescing && self.header.frame_type == FrameType::Regular && !self.header.is_preview
    }

    /// Renders the current partial state, blended when `coalescing`.
    pub fn render(
        &self,
        metadata: &CodecMetadata,
        slots: &ReferenceSlots,
        coalescing: bool,
    ) -> Result<ImageBundle, CodecError> {
        let mut layer = self.render_layer();
        apply_patches(&mut layer, &self.patches, slots)?;
        if self.is_composited(coalescing) {
            blend_layer(&self.header, metadata, &layer, slots)
        } else {
            Ok(layer)
        }
    }

    /// Composes the fully decoded frame, stores it in its slot and returns
    /// the image to output.
    pub fn finalize(
        &self,
        metadata: &CodecMetadata,
        slots: &mut ReferenceSlots,
        coalescing: bool,
    ) -> Result<ImageBundle, CodecError> {
        let mut layer = self.render_layer();
        apply_patches(&mut layer, &self.patches, slots)?;
        let header = &self.header;
        if header.is_preview {
            return Ok(layer);
        }
        match header.frame_type {
            FrameType::DcFrame => {
                ldebug!("storing DC frame of level {}", header.dc_level);
                slots.store(3 + header.dc_level as usize, layer.clone());
                Ok(layer)
            }
            FrameType::ReferenceOnly => {
                if header.can_be_referenced() {
                    slots.store(header.save_as_reference as usize, layer.clone());
                }
                Ok(layer)
            }
            FrameType::Regular => {
                let blended = blend_layer(header, metadata, &layer, slots)?;
                if header.can_be_referenced() {
                    slots.store(header.save_as_reference as usize, blended.clone());
                }
                Ok(if coalescing { blended } else { layer })
            }
        }
    }
}

fn max_sample(bits: u32) -> f32 {
    (((1u64 << bits) - 1).max(1)) as f32
}
