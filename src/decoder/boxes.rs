use super::{Decoder, DecoderStage, DecoderStatus, Events};
use crate::box_type::BoxType;
use crate::constants::{
    FTYP_MAJOR_BRAND, FTYP_MIN_CONTENT_SIZE, INITIAL_BASIC_INFO_SIZE_HINT, JXLP_LAST_BOX_FLAG,
};
use crate::container::{BoxContentStatus, BoxHeaderStatus, BoxStage, parse_box_header};
use crate::error::CodecError;
use crate::reconstruction::{ReconStage, ReconstructionMetadata, StoreState};

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

impl<'a> Decoder<'a> {
    /// Walks the container boxes, handing codestream bytes to the codestream
    /// decoder. A bare codestream is treated as one unbounded codestream box.
    pub(super) fn handle_boxes(&mut self) -> Result<DecoderStatus, CodecError> {
        loop {
            if self.box_stage != BoxStage::Header {
                self.input.advance(to_usize(self.header_size));
                self.header_size = 0;
                if let Some(status) = self.output_box_contents()? {
                    return Ok(status);
                }
                self.store_metadata_box()?;
            }

            if self.recon_stage == ReconStage::SettingMetadata && !self.recon_needs_more_boxes() {
                if let Some(recon) = self.recon.as_mut() {
                    let exif =
                        Some(std::mem::take(&mut self.exif_data)).filter(|_| recon.exif_size > 0);
                    let xmp =
                        Some(std::mem::take(&mut self.xmp_data)).filter(|_| recon.xmp_size > 0);
                    recon.attach(exif, xmp)?;
                    ldebug!("reconstruction metadata complete");
                }
                self.recon_stage = ReconStage::Finished;
            }

            match self.box_stage {
                BoxStage::Header => {
                    if let Some(status) = self.read_next_box_header()? {
                        return Ok(status);
                    }
                }
                BoxStage::Ftyp => {
                    if self.box_contents_size < FTYP_MIN_CONTENT_SIZE as u64 {
                        return Err(CodecError::FtypTooSmall);
                    }
                    let next_in = self.input.next_in();
                    if next_in.len() < 4 {
                        return Ok(DecoderStatus::NeedMoreInput);
                    }
                    if next_in[..4] != FTYP_MAJOR_BRAND {
                        return Err(CodecError::InvalidBrand);
                    }
                    self.input.advance(4);
                    self.box_stage = BoxStage::Skip;
                }
                BoxStage::PartialCodestream => {
                    if self.last_codestream_seen {
                        return Err(CodecError::PartialCodestreamAfterLast);
                    }
                    let next_in = self.input.next_in();
                    if next_in.len() < 4 {
                        return Ok(DecoderStatus::NeedMoreInput);
                    }
                    if !self.box_contents_unbounded && self.box_contents_size < 4 {
                        return Err(CodecError::PartialCodestreamTooSmall);
                    }
                    let index =
                        u32::from_be_bytes([next_in[0], next_in[1], next_in[2], next_in[3]]);
                    ltrace!("partial codestream box {}", index & !JXLP_LAST_BOX_FLAG);
                    if index & JXLP_LAST_BOX_FLAG != 0 {
                        self.last_codestream_seen = true;
                    }
                    self.input.advance(4);
                    self.box_stage = BoxStage::Codestream;
                }
                BoxStage::Codestream => {
                    let status = self.process_codestream()?;
                    match status {
                        DecoderStatus::NeedMoreInput
                            if !self.box_contents_unbounded
                                && self.input.file_pos() == self.box_contents_end =>
                        {
                            self.box_stage = BoxStage::Header;
                        }
                        DecoderStatus::Success => {
                            if self.recon_needs_more_boxes() {
                                self.box_stage = BoxStage::Skip;
                            } else if self.box_contents_unbounded {
                                return Ok(DecoderStatus::Success);
                            } else if self.events_wanted.contains(Events::BOX) {
                                self.box_stage = BoxStage::Skip;
                            } else {
                                return Ok(DecoderStatus::Success);
                            }
                        }
                        other => return Ok(other),
                    }
                }
                BoxStage::Reconstruction => {
                    if let Some(status) = self.read_reconstruction_box()? {
                        return Ok(status);
                    }
                }
                BoxStage::Skip => {
                    if self.box_contents_unbounded {
                        if self.input.is_closed() || self.box_out_buffer.is_none() {
                            return Ok(DecoderStatus::Success);
                        }
                        self.input.advance(self.input.avail_in());
                        return Ok(DecoderStatus::NeedMoreInput);
                    }
                    let remaining =
                        to_usize(self.box_contents_end.saturating_sub(self.input.file_pos()));
                    let avail_in = self.input.avail_in();
                    if avail_in < remaining {
                        self.basic_info_size_hint =
                            INITIAL_BASIC_INFO_SIZE_HINT.saturating_add(remaining);
                        self.input.advance(avail_in);
                        return Ok(DecoderStatus::NeedMoreInput);
                    }
                    self.input.advance(remaining);
                    self.box_stage = BoxStage::Header;
                }
            }
        }
    }

    /// Copies what input holds of the current box into the box buffer.
    fn output_box_contents(&mut self) -> Result<Option<DecoderStatus>, CodecError> {
        if !self.events_wanted.contains(Events::BOX) || !self.box_out_buffer_set_current_box {
            return Ok(None);
        }
        let Some(buffer) = self.box_out_buffer.as_deref_mut() else {
            return Ok(None);
        };
        let pos = self.box_out_buffer_pos.min(buffer.len());
        let box_pos = self.input.file_pos().saturating_sub(self.box_contents_begin);
        let (status, written) = self.box_content_decoder.process(
            self.input.next_in(),
            box_pos,
            self.input.is_closed(),
            &mut buffer[pos..],
        )?;
        self.box_out_buffer_pos = pos + written;
        match status {
            BoxContentStatus::NeedMoreOutput => Ok(Some(DecoderStatus::BoxNeedMoreOutput)),
            BoxContentStatus::NeedMoreInput | BoxContentStatus::Done => Ok(None),
        }
    }

    /// Accumulates an Exif or XMP box needed by the reconstruction metadata.
    fn store_metadata_box(&mut self) -> Result<(), CodecError> {
        let (data, state) = if self.store_exif == StoreState::Storing {
            (&mut self.exif_data, &mut self.store_exif)
        } else if self.store_xmp == StoreState::Storing {
            (&mut self.xmp_data, &mut self.store_xmp)
        } else {
            return Ok(());
        };
        let box_pos = self.input.file_pos().saturating_sub(self.box_contents_begin);
        loop {
            if data.is_empty() {
                data.resize(64, 0);
            }
            let pos = self.recon_out_pos.min(data.len());
            let (status, written) = self.metadata_decoder.process(
                self.input.next_in(),
                box_pos,
                self.input.is_closed(),
                &mut data[pos..],
            )?;
            self.recon_out_pos = pos + written;
            let finished = match status {
                BoxContentStatus::NeedMoreOutput => {
                    let grown = data.len() * 2;
                    data.resize(grown, 0);
                    continue;
                }
                BoxContentStatus::NeedMoreInput => {
                    self.box_contents_unbounded
                        && self.input.is_closed()
                        && self.box_stage == BoxStage::Skip
                }
                BoxContentStatus::Done => true,
            };
            if finished {
                data.truncate(self.recon_out_pos);
                *state = StoreState::Stored;
                ldebug!("stored {} byte metadata box", self.recon_out_pos);
            }
            return Ok(());
        }
    }

    /// Reads the next box header. Returns `None` to keep walking boxes.
    fn read_next_box_header(&mut self) -> Result<Option<DecoderStatus>, CodecError> {
        if !self.have_container {
            if self.stage == DecoderStage::CodestreamFinished {
                return Ok(Some(DecoderStatus::Success));
            }
            self.box_stage = BoxStage::Codestream;
            self.box_contents_unbounded = true;
            self.input.set_codestream_end(None);
            return Ok(None);
        }

        if self.input.avail_in() == 0 {
            let status = if self.stage != DecoderStage::CodestreamFinished
                || self.recon_needs_more_boxes()
            {
                DecoderStatus::NeedMoreInput
            } else if self.input.is_closed() || !self.events_wanted.contains(Events::BOX) {
                DecoderStatus::Success
            } else {
                DecoderStatus::NeedMoreInput
            };
            return Ok(Some(status));
        }

        let boxed_codestream_done = self.events_wanted.contains(Events::BOX)
            && self.stage == DecoderStage::CodestreamFinished
            && self.last_codestream_seen
            && !self.recon_needs_more_boxes();
        let next_in = self.input.next_in();
        // A bare codestream appended to a finished container is not a box.
        if boxed_codestream_done && next_in.starts_with(&crate::constants::CODESTREAM_SIGNATURE) {
            return Ok(Some(DecoderStatus::Success));
        }

        let file_pos = self.input.file_pos();
        let header = match parse_box_header(next_in, file_pos)? {
            BoxHeaderStatus::Parsed(header) => header,
            BoxHeaderStatus::NeedMoreInput(header_size) => {
                self.basic_info_size_hint = INITIAL_BASIC_INFO_SIZE_HINT
                    .saturating_add(to_usize(header_size))
                    .saturating_sub(to_usize(file_pos));
                return Ok(Some(DecoderStatus::NeedMoreInput));
            }
        };
        let header_size = to_usize(header.header_size);
        let decoded_type = if header.box_type == BoxType::BROTLI_COMPRESSED {
            if !header.is_unbounded() && header.contents_size() < 4 {
                return Err(CodecError::CompressedBoxTooSmall);
            }
            match next_in.get(header_size..header_size + 4) {
                Some(bytes) => BoxType([bytes[0], bytes[1], bytes[2], bytes[3]]),
                None => return Ok(Some(DecoderStatus::NeedMoreInput)),
            }
        } else {
            header.box_type
        };

        self.box_count += 1;
        if boxed_codestream_done && header.box_type == BoxType::SIGNATURE {
            return Ok(Some(DecoderStatus::Success));
        }
        if self.box_count == 2 && header.box_type != BoxType::FTYP {
            return Err(CodecError::FtypNotSecond);
        }
        if header.box_type == BoxType::FTYP && self.box_count != 2 {
            return Err(CodecError::MisplacedFtyp);
        }
        ltrace!("box {} of {} bytes at {}", header.box_type, header.box_size, file_pos);

        self.box_event = false;
        self.box_type = header.box_type;
        self.box_decoded_type = decoded_type;
        self.box_contents_unbounded = header.is_unbounded();
        self.box_contents_begin = file_pos + header.header_size;
        self.box_contents_end = if self.box_contents_unbounded {
            0
        } else {
            file_pos + header.box_size
        };
        self.box_contents_size = header.contents_size();
        self.box_size = header.box_size;
        self.header_size = header.header_size;
        self.input.set_codestream_end(if self.box_contents_unbounded {
            None
        } else {
            Some(self.box_contents_end)
        });

        let is_brob = header.box_type == BoxType::BROTLI_COMPRESSED;
        let mut storing = false;
        if self.orig_events_wanted.contains(Events::JPEG_RECONSTRUCTION) {
            if decoded_type == BoxType::EXIF && self.store_exif == StoreState::Idle {
                self.store_exif = StoreState::Storing;
                self.exif_data.clear();
                self.recon_out_pos = 0;
                storing = true;
            } else if decoded_type == BoxType::XML && self.store_xmp == StoreState::Idle {
                self.store_xmp = StoreState::Storing;
                self.xmp_data.clear();
                self.recon_out_pos = 0;
                storing = true;
            }
        }
        if self.events_wanted.contains(Events::BOX) {
            self.box_content_decoder.start_box(
                self.options.decompress_boxes && is_brob,
                self.box_contents_unbounded,
                self.box_contents_size,
            );
        }
        if storing {
            self.metadata_decoder
                .start_box(is_brob, self.box_contents_unbounded, self.box_contents_size);
        }

        self.box_stage = match header.box_type {
            BoxType::FTYP => BoxStage::Ftyp,
            BoxType::CODESTREAM => {
                if self.last_codestream_seen {
                    return Err(CodecError::DuplicateCodestreamBox);
                }
                self.last_codestream_seen = true;
                BoxStage::Codestream
            }
            BoxType::PARTIAL_CODESTREAM => BoxStage::PartialCodestream,
            BoxType::RECONSTRUCTION
                if self.orig_events_wanted.contains(Events::JPEG_RECONSTRUCTION) =>
            {
                if !self.events_wanted.contains(Events::JPEG_RECONSTRUCTION) {
                    return Err(CodecError::MultipleReconstructionBoxes);
                }
                self.recon_buffer.clear();
                BoxStage::Reconstruction
            }
            _ => BoxStage::Skip,
        };

        if self.events_wanted.contains(Events::BOX) {
            self.box_event = true;
            self.box_out_buffer_set_current_box = false;
            return Ok(Some(DecoderStatus::Box));
        }
        Ok(None)
    }

    fn read_reconstruction_box(&mut self) -> Result<Option<DecoderStatus>, CodecError> {
        let next_in = self.input.next_in();
        let complete = if self.box_contents_unbounded {
            self.recon_buffer.extend_from_slice(next_in);
            self.input.advance(next_in.len());
            self.input.is_closed()
        } else {
            let remaining =
                to_usize(self.box_contents_size).saturating_sub(self.recon_buffer.len());
            let take = remaining.min(next_in.len());
            self.recon_buffer.extend_from_slice(&next_in[..take]);
            self.input.advance(take);
            take == remaining
        };
        if !complete {
            return Ok(Some(DecoderStatus::NeedMoreInput));
        }

        let recon = ReconstructionMetadata::parse(&self.recon_buffer)?;
        self.recon_buffer = Vec::new();
        ldebug!("reconstruction box: {} bytes Exif, {} bytes XMP", recon.exif_size, recon.xmp_size);
        self.recon_stage = if recon.exif_size > 0 || recon.xmp_size > 0 {
            ReconStage::SettingMetadata
        } else {
            ReconStage::Finished
        };
        self.recon = Some(recon);
        self.box_stage = BoxStage::Header;
        if self.events_wanted.contains(Events::JPEG_RECONSTRUCTION) {
            self.events_wanted.remove(Events::JPEG_RECONSTRUCTION);
            return Ok(Some(DecoderStatus::JpegReconstruction));
        }
        Ok(None)
    }
}
