use super::{Decoder, DecoderStage, DecoderStatus, Events, FrameStage, ImageOutput};
use crate::bit_io::BitReader;
use crate::constants::CODESTREAM_SIGNATURE;
use crate::error::CodecError;
use crate::frame::header::{FrameHeader, FrameType};
use crate::frame::toc::Toc;
use crate::frame::{FrameDecoder, FrameDim, ProgressiveDetail, SectionInfo, SectionStatus};
use crate::headers::icc::read_icc;
use crate::headers::image_metadata::ImageMetadata;
use crate::headers::transform_data::TransformData;
use crate::headers::{SizeHeader, check_size_limit};
use crate::output::{OutputContext, OutputPlanes, write_to_buffer, write_to_callback};

/// Slot mask recorded for frames whose references are not known yet.
const UNKNOWN_REFERENCES: u8 = 0xff;

/// A frame ends a still image when it is displayed on its own.
fn ends_still(header: &FrameHeader, coalescing: bool) -> bool {
    header.is_last
        || header.duration > 0
        || (!coalescing && header.frame_type == FrameType::Regular)
}

impl<'a> Decoder<'a> {
    /// Decodes as much of the codestream as the available input and the
    /// subscribed events allow.
    pub(super) fn process_codestream(&mut self) -> Result<DecoderStatus, CodecError> {
        if !self.got_basic_info {
            let status = self.read_basic_info()?;
            if status != DecoderStatus::Success {
                return Ok(status);
            }
        }
        if self.events_wanted.contains(Events::BASIC_INFO) {
            self.events_wanted.remove(Events::BASIC_INFO);
            return Ok(DecoderStatus::BasicInfo);
        }
        if self.events_wanted.is_empty() {
            self.stage = DecoderStage::CodestreamFinished;
            return Ok(DecoderStatus::Success);
        }

        if !self.got_all_headers {
            let status = self.read_all_headers()?;
            if status != DecoderStatus::Success {
                return Ok(status);
            }
        }
        if self.events_wanted.contains(Events::COLOR_ENCODING) {
            self.events_wanted.remove(Events::COLOR_ENCODING);
            return Ok(DecoderStatus::ColorEncoding);
        }
        if self.events_wanted.is_empty() {
            self.stage = DecoderStage::CodestreamFinished;
            return Ok(DecoderStatus::Success);
        }

        self.post_headers = true;
        if !self.got_preview && self.metadata.image.have_preview() {
            self.preview_frame = true;
        }
        let status = self.process_frames()?;
        if status != DecoderStatus::Success {
            return Ok(status);
        }
        self.stage = DecoderStage::CodestreamFinished;
        Ok(DecoderStatus::Success)
    }

    fn read_basic_info(&mut self) -> Result<DecoderStatus, CodecError> {
        if !self.got_codestream_signature {
            let Some(span) = self.input.codestream() else {
                return Ok(DecoderStatus::NeedMoreInput);
            };
            if span.len() < CODESTREAM_SIGNATURE.len() {
                self.input.request_more();
                return Ok(DecoderStatus::NeedMoreInput);
            }
            if span[..2] != CODESTREAM_SIGNATURE {
                return Err(CodecError::InvalidCodestreamSignature);
            }
            self.input.advance_codestream(CODESTREAM_SIGNATURE.len());
            self.got_codestream_signature = true;
        }

        let Some(span) = self.input.codestream() else {
            return Ok(DecoderStatus::NeedMoreInput);
        };
        let mut reader = BitReader::new(span);
        let parsed = SizeHeader::read(&mut reader)
            .and_then(|size| Ok((size, ImageMetadata::read(&mut reader)?)));
        let (size, image) = match parsed {
            Ok(parsed) => parsed,
            Err(CodecError::OutOfBounds) => {
                self.input.request_more();
                return Ok(DecoderStatus::NeedMoreInput);
            }
            Err(err) => return Err(err),
        };
        let total_bits = reader.total_bits_consumed();
        self.input.advance_codestream(total_bits / 8);
        self.input.codestream_bits_ahead = total_bits % 8;

        if !check_size_limit(self.options.memory_limit, size.xsize as usize, size.ysize as usize) {
            return Err(CodecError::ImageTooLarge);
        }
        ldebug!(
            "basic info: {}x{}, {} extra channels",
            size.xsize,
            size.ysize,
            image.extra_channels.len()
        );
        self.metadata.size = size;
        self.metadata.image = image;
        self.got_basic_info = true;
        self.basic_info_size_hint = 0;
        Ok(DecoderStatus::Success)
    }

    fn read_all_headers(&mut self) -> Result<DecoderStatus, CodecError> {
        if !self.got_transform_data {
            let bits_ahead = self.input.codestream_bits_ahead;
            let Some(span) = self.input.codestream() else {
                return Ok(DecoderStatus::NeedMoreInput);
            };
            let mut reader = BitReader::new(span);
            let parsed = reader
                .skip_bits(bits_ahead)
                .and_then(|_| TransformData::read(&mut reader));
            let transform = match parsed {
                Ok(transform) => transform,
                Err(CodecError::OutOfBounds) => {
                    self.input.request_more();
                    return Ok(DecoderStatus::NeedMoreInput);
                }
                Err(err) => return Err(err),
            };
            let total_bits = reader.total_bits_consumed();
            self.input.advance_codestream(total_bits / 8);
            self.input.codestream_bits_ahead = total_bits % 8;
            self.metadata.transform = transform;
            self.got_transform_data = true;
        }

        let bits_ahead = self.input.codestream_bits_ahead;
        let want_icc = self.metadata.image.color_encoding.want_icc;
        let memory_limit = self.options.memory_limit;
        let Some(span) = self.input.codestream() else {
            return Ok(DecoderStatus::NeedMoreInput);
        };
        let mut reader = BitReader::new(span);
        let parsed = reader.skip_bits(bits_ahead).and_then(|_| {
            let icc = if want_icc {
                Some(read_icc(&mut reader, memory_limit)?)
            } else {
                None
            };
            reader.jump_to_byte_boundary()?;
            Ok(icc)
        });
        let icc = match parsed {
            Ok(icc) => icc,
            Err(CodecError::OutOfBounds) => {
                self.input.request_more();
                return Ok(DecoderStatus::NeedMoreInput);
            }
            Err(err) => return Err(err),
        };
        let consumed = reader.total_bytes_consumed();
        self.input.advance_codestream(consumed);
        self.input.codestream_bits_ahead = 0;
        if let Some(icc) = &icc {
            ldebug!("embedded ICC profile of {} bytes", icc.len());
        }
        self.metadata.icc = icc;
        self.got_all_headers = true;
        Ok(DecoderStatus::Success)
    }

    /// Parses the next frame header and its TOC.
    fn read_frame_header(&mut self) -> Result<Option<(FrameHeader, Toc)>, CodecError> {
        let Some(span) = self.input.codestream() else {
            return Ok(None);
        };
        let mut reader = BitReader::new(span);
        let parsed = FrameHeader::read(&mut reader, &self.metadata, self.preview_frame)
            .and_then(|header| {
                let (xsize, ysize) = header.frame_size(&self.metadata);
                if !check_size_limit(self.options.memory_limit, xsize, ysize) {
                    return Err(CodecError::FrameTooLarge);
                }
                let num_sections = FrameDim::new(xsize, ysize).num_sections(header.num_passes);
                let toc = Toc::read(&mut reader, num_sections)?;
                Ok((header, toc))
            });
        match parsed {
            Ok(parsed) => {
                let consumed = reader.total_bytes_consumed();
                self.input.advance_codestream(consumed);
                Ok(Some(parsed))
            }
            Err(CodecError::OutOfBounds) => {
                self.input.request_more();
                Ok(None)
            }
            Err(err @ (CodecError::InvalidToc | CodecError::FrameTooLarge)) => Err(err),
            Err(err) => {
                lwarn!("frame header rejected: {}", err);
                Err(CodecError::InvalidFrameHeader)
            }
        }
    }

    fn skip_frame_remainder(&mut self) {
        self.frame_stage = FrameStage::Header;
        self.input.advance_codestream(self.remaining_frame_size);
    }

    fn process_frames(&mut self) -> Result<DecoderStatus, CodecError> {
        loop {
            if !self
                .events_wanted
                .intersects(Events::PREVIEW_IMAGE | Events::FRAME | Events::FULL_IMAGE)
            {
                break;
            }
            if self.frame_stage == FrameStage::Header && self.is_last_total {
                break;
            }

            if self.frame_stage == FrameStage::Header {
                let Some((header, toc)) = self.read_frame_header()? else {
                    return Ok(DecoderStatus::NeedMoreInput);
                };
                let (xsize, ysize) = header.frame_size(&self.metadata);
                self.remaining_frame_size = toc.total_size();
                ltrace!(
                    "frame header: {:?} {}x{}, {} sections, {} bytes",
                    header.frame_type,
                    xsize,
                    ysize,
                    toc.len(),
                    self.remaining_frame_size
                );
                self.frame_dec = Some(FrameDecoder::new(header.clone(), toc, &self.metadata)?);
                self.frame_stage = FrameStage::Toc;

                if self.preview_frame {
                    self.frame_header = Some(header);
                    if !self.events_wanted.contains(Events::PREVIEW_IMAGE) {
                        self.skip_frame_remainder();
                        self.got_preview = true;
                        self.preview_frame = false;
                    }
                    continue;
                }

                self.is_last_total = header.is_last;
                self.is_last_of_still = ends_still(&header, self.options.coalescing);
                let internal_index = self.internal_frames;
                let external_index = self.external_frames;
                if self.is_last_of_still {
                    self.external_frames += 1;
                }
                self.internal_frames += 1;

                if self.skip_frames > 0 {
                    self.skipping_frame = true;
                    if self.is_last_of_still {
                        self.skip_frames -= 1;
                    }
                } else {
                    self.skipping_frame = false;
                }

                if external_index >= self.frame_external_to_internal.len() {
                    self.frame_external_to_internal.push(internal_index);
                }
                if internal_index >= self.frame_saved_as.len() {
                    self.frame_saved_as.push(header.saved_as());
                    self.frame_references.push(UNKNOWN_REFERENCES);
                }

                if self.skipping_frame {
                    let mut referenceable =
                        header.can_be_referenced() || header.frame_type == FrameType::DcFrame;
                    if self.frame_required.get(internal_index) == Some(&false) {
                        referenceable = false;
                    }
                    if !referenceable {
                        ltrace!("skipping unreferenced frame {}", internal_index);
                        self.frame_header = Some(header);
                        self.skip_frame_remainder();
                        continue;
                    }
                }

                self.frame_header = Some(header);
                if self.events_wanted.contains(Events::FRAME)
                    && self.is_last_of_still
                    && !self.skipping_frame
                {
                    return Ok(DecoderStatus::Frame);
                }
            }

            if self.frame_stage == FrameStage::Toc {
                let wants_progression =
                    !self.preview_frame && self.events_wanted.contains(Events::FRAME_PROGRESSION);
                let detail = self.options.progressive_detail;
                let Some(frame_dec) = self.frame_dec.as_mut() else {
                    self.frame_stage = FrameStage::Header;
                    continue;
                };
                self.frame_prog_detail = if wants_progression {
                    frame_dec.set_pause_at_progressive(detail)
                } else {
                    ProgressiveDetail::Frames
                };
                self.dc_frame_progression_done = false;
                self.next_section = 0;
                self.section_processed = vec![false; frame_dec.toc().len()];

                if self.preview_frame || self.events_wanted.contains(Events::FULL_IMAGE) {
                    self.frame_dec_in_progress = true;
                    self.frame_stage = FrameStage::Full;
                } else if !self.is_last_total {
                    self.skip_frame_remainder();
                    continue;
                } else {
                    break;
                }
            }

            if self.frame_stage == FrameStage::Full {
                let status = self.decode_full_frame()?;
                if status != DecoderStatus::Success {
                    return Ok(status);
                }
            }

            if self.frame_stage == FrameStage::FullOutput {
                let status = self.output_frame()?;
                if status != DecoderStatus::Success {
                    return Ok(status);
                }
            }
        }
        Ok(DecoderStatus::Success)
    }

    /// Feeds the available sections to the frame decoder and finalizes the
    /// frame once all of them are decoded.
    fn decode_full_frame(&mut self) -> Result<DecoderStatus, CodecError> {
        if self.preview_frame && self.preview_out.is_none() {
            return Ok(DecoderStatus::NeedPreviewOutBuffer);
        }
        if !self.preview_frame
            && self.events_wanted.contains(Events::FULL_IMAGE)
            && !self.image_out_buffer_set
            && self.is_last_of_still
            && !self.skipping_frame
        {
            return Ok(DecoderStatus::NeedImageOutBuffer);
        }

        let next_pause = match &self.frame_dec {
            Some(frame_dec) => frame_dec.next_num_passes_to_pause(),
            None => return Err(CodecError::NoFrameInProgress),
        };
        self.process_sections()?;

        let Some(frame_dec) = self.frame_dec.as_ref() else {
            return Err(CodecError::NoFrameInProgress);
        };
        let all_decoded = frame_dec.has_decoded_all();
        if !all_decoded {
            if self.frame_prog_detail >= ProgressiveDetail::Dc
                && !self.dc_frame_progression_done
                && frame_dec.has_decoded_dc()
            {
                self.dc_frame_progression_done = true;
                self.downsampling_target = 8;
                return Ok(DecoderStatus::FrameProgression);
            }
            if self.frame_prog_detail >= ProgressiveDetail::LastPasses
                && frame_dec.num_complete_passes() >= next_pause
            {
                self.downsampling_target = 1;
                return Ok(DecoderStatus::FrameProgression);
            }
            self.input.request_more();
            return Ok(DecoderStatus::NeedMoreInput);
        }

        if !self.preview_frame {
            let index = self.internal_frames - 1;
            if let Some(references) = self.frame_references.get_mut(index) {
                *references = frame_dec.references();
            }
        }
        let image = frame_dec.finalize(&self.metadata, &mut self.slots, self.options.coalescing)?;
        self.frame_output = Some(image);
        self.frame_dec_in_progress = false;
        self.frame_stage = FrameStage::FullOutput;
        Ok(DecoderStatus::Success)
    }

    /// Decodes every section whose bytes are fully available.
    fn process_sections(&mut self) -> Result<(), CodecError> {
        let Some(frame_dec) = self.frame_dec.as_mut() else {
            return Ok(());
        };
        let span = self.input.codestream().unwrap_or(&[]);

        let mut infos = Vec::new();
        let mut toc_indices = Vec::new();
        let mut pos = 0usize;
        for (i, entry) in frame_dec.toc().entries.iter().enumerate().skip(self.next_section) {
            if self.section_processed[i] {
                pos = pos.saturating_add(entry.size);
                continue;
            }
            let end = match pos.checked_add(entry.size) {
                Some(end) if end <= span.len() => end,
                _ => break,
            };
            infos.push(SectionInfo {
                id: entry.id,
                data: &span[pos..end],
            });
            toc_indices.push(i);
            pos = end;
        }
        if infos.is_empty() {
            return Ok(());
        }

        let status = frame_dec.process_sections(&infos, &self.slots, &*self.runner)?;
        for (&i, section_status) in toc_indices.iter().zip(&status) {
            if *section_status == SectionStatus::Done {
                self.section_processed[i] = true;
            }
        }

        let mut consumed = 0usize;
        let entries = &frame_dec.toc().entries;
        while self.next_section < self.section_processed.len()
            && self.section_processed[self.next_section]
        {
            consumed += entries[self.next_section].size;
            self.next_section += 1;
        }
        self.remaining_frame_size = self.remaining_frame_size.saturating_sub(consumed);
        self.input.advance_codestream(consumed);
        Ok(())
    }

    fn output_frame(&mut self) -> Result<DecoderStatus, CodecError> {
        let image = self.frame_output.take().ok_or(CodecError::NoFrameInProgress)?;
        self.frame_dec = None;
        let ctx = OutputContext {
            metadata: &self.metadata,
            keep_orientation: self.options.keep_orientation,
            render_spotcolors: self.options.render_spotcolors,
        };
        let runner = &*self.runner;

        if self.preview_frame {
            if let Some((format, buffer)) = self.preview_out.as_mut() {
                write_to_buffer(&image, &ctx, OutputPlanes::Color, *format, buffer, runner)?;
            }
            self.frame_stage = FrameStage::Header;
            self.got_preview = true;
            self.preview_frame = false;
            self.events_wanted.remove(Events::PREVIEW_IMAGE);
            return Ok(DecoderStatus::PreviewImage);
        }

        let mut return_full = false;
        if self.is_last_of_still {
            if self.events_wanted.contains(Events::FULL_IMAGE) {
                self.events_wanted.remove(Events::FULL_IMAGE);
                return_full = true;
            }
            self.events_wanted |= self.orig_events_wanted
                & (Events::FULL_IMAGE | Events::FRAME | Events::FRAME_PROGRESSION);

            if return_full && self.image_out_buffer_set && !self.skipping_frame {
                let is_callback = matches!(self.image_out, Some(ImageOutput::Callback(_)));
                match &mut self.image_out {
                    Some(ImageOutput::Buffer(buffer)) => {
                        write_to_buffer(
                            &image,
                            &ctx,
                            OutputPlanes::Color,
                            self.image_format,
                            buffer,
                            runner,
                        )?;
                    }
                    Some(ImageOutput::Callback(callback)) => {
                        write_to_callback(
                            &image,
                            &ctx,
                            self.image_format,
                            callback.as_mut(),
                            runner,
                        )?;
                    }
                    None => {}
                }
                self.image_out_buffer_set = false;

                for (index, slot) in self.extra_channel_output.iter_mut().enumerate() {
                    let Some(output) = slot.as_mut().filter(|output| output.pending) else {
                        continue;
                    };
                    if is_callback {
                        return Err(CodecError::ExtraChannelsWithCallback);
                    }
                    write_to_buffer(
                        &image,
                        &ctx,
                        OutputPlanes::ExtraChannel(index),
                        output.format,
                        output.buffer,
                        runner,
                    )?;
                    output.pending = false;
                }
            }
        }

        self.frame_stage = FrameStage::Header;
        if return_full && !self.skipping_frame {
            ldebug!("frame {} complete", self.external_frames);
            return Ok(DecoderStatus::FullImage);
        }
        Ok(DecoderStatus::Success)
    }
}
