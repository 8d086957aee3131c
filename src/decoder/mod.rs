//! Incremental decoder. The caller lends input windows with `set_input`, then
//! calls `process` until it returns an event, a request for input or output,
//! or `Success`. Every suspension leaves the decoder in a consistent state, so
//! decoding resumes exactly where it stopped once the request is satisfied.

mod boxes;
mod codestream;
pub mod types;

use crate::box_type::BoxType;
use crate::container::{BoxContentDecoder, BoxStage};
use crate::constants::{INITIAL_BASIC_INFO_SIZE_HINT, MAX_OUTPUT_CHANNELS};
use crate::dependencies::frame_dependencies;
use crate::error::CodecError;
use crate::frame::header::FrameHeader;
use crate::frame::image::{ImageBundle, ReferenceSlots};
use crate::frame::{FrameDecoder, ProgressiveDetail};
use crate::headers::CodecMetadata;
use crate::headers::color_encoding::{ColorEncoding, ColorSpace};
use crate::headers::extra_channel::ExtraChannelInfo;
use crate::input::InputBuffer;
use crate::output::{
    DataType, Endianness, FnImageOutCallback, ImageOutCallback, OutputContext, OutputPlanes,
    PixelFormat, write_to_buffer, write_to_callback,
};
use crate::parallel::{ParallelRunner, SequentialRunner};
use crate::reconstruction::{ReconStage, ReconstructionMetadata, StoreState};
pub use types::{
    AnimationInfo, BasicInfo, BlendInfo, ColorProfileTarget, DecoderOptions, DecoderStatus,
    Events, FrameHeaderInfo, LayerInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderStage {
    Inited,
    Started,
    CodestreamFinished,
    /// Sticky until `reset` or `rewind`.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStage {
    Header,
    Toc,
    Full,
    /// Decoded, waiting to be converted into the output buffers.
    FullOutput,
}

enum ImageOutput<'a> {
    Buffer(&'a mut [u8]),
    Callback(Box<dyn ImageOutCallback + 'a>),
}

struct ExtraChannelOutput<'a> {
    format: PixelFormat,
    buffer: &'a mut [u8],
    /// Cleared once the channel has been written for a frame.
    pending: bool,
}

pub struct Decoder<'a> {
    options: DecoderOptions,
    runner: Box<dyn ParallelRunner>,
    stage: DecoderStage,
    events_wanted: Events,
    orig_events_wanted: Events,

    input: InputBuffer<'a>,
    got_signature: bool,
    have_container: bool,
    last_codestream_seen: bool,
    box_count: usize,

    box_stage: BoxStage,
    box_contents_begin: u64,
    box_contents_end: u64,
    box_contents_size: u64,
    box_contents_unbounded: bool,
    box_size: u64,
    header_size: u64,
    box_type: BoxType,
    box_decoded_type: BoxType,
    box_event: bool,
    box_out_buffer: Option<&'a mut [u8]>,
    box_out_buffer_pos: usize,
    box_out_buffer_set_current_box: bool,
    box_content_decoder: BoxContentDecoder,

    metadata_decoder: BoxContentDecoder,
    store_exif: StoreState,
    store_xmp: StoreState,
    exif_data: Vec<u8>,
    xmp_data: Vec<u8>,
    recon_out_pos: usize,
    recon_buffer: Vec<u8>,
    recon: Option<ReconstructionMetadata>,
    recon_stage: ReconStage,

    metadata: CodecMetadata,
    got_codestream_signature: bool,
    got_basic_info: bool,
    got_transform_data: bool,
    got_all_headers: bool,
    post_headers: bool,
    basic_info_size_hint: usize,
    preferred_color: Option<ColorEncoding>,

    frame_stage: FrameStage,
    frame_header: Option<FrameHeader>,
    frame_dec: Option<FrameDecoder>,
    frame_dec_in_progress: bool,
    frame_output: Option<ImageBundle>,
    remaining_frame_size: usize,
    next_section: usize,
    section_processed: Vec<bool>,
    preview_frame: bool,
    got_preview: bool,
    is_last_of_still: bool,
    is_last_total: bool,
    internal_frames: usize,
    external_frames: usize,
    skip_frames: usize,
    skipping_frame: bool,
    frame_prog_detail: ProgressiveDetail,
    dc_frame_progression_done: bool,
    downsampling_target: usize,
    slots: ReferenceSlots,

    // Ledger of every frame seen, kept across `rewind`.
    frame_saved_as: Vec<u8>,
    frame_references: Vec<u8>,
    frame_external_to_internal: Vec<usize>,
    frame_required: Vec<bool>,

    preview_out: Option<(PixelFormat, &'a mut [u8])>,
    image_out: Option<ImageOutput<'a>>,
    image_format: PixelFormat,
    image_out_buffer_set: bool,
    extra_channel_output: Vec<Option<ExtraChannelOutput<'a>>>,
}

impl Default for Decoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Decoder<'a> {
    pub fn new() -> Self {
        Self::with_options(DecoderOptions::default())
    }

    pub fn with_options(options: DecoderOptions) -> Self {
        Self {
            options,
            runner: Box::new(SequentialRunner),
            stage: DecoderStage::Inited,
            events_wanted: Events::empty(),
            orig_events_wanted: Events::empty(),
            input: InputBuffer::new(),
            got_signature: false,
            have_container: false,
            last_codestream_seen: false,
            box_count: 0,
            box_stage: BoxStage::Header,
            box_contents_begin: 0,
            box_contents_end: 0,
            box_contents_size: 0,
            box_contents_unbounded: false,
            box_size: 0,
            header_size: 0,
            box_type: BoxType([0; 4]),
            box_decoded_type: BoxType([0; 4]),
            box_event: false,
            box_out_buffer: None,
            box_out_buffer_pos: 0,
            box_out_buffer_set_current_box: false,
            box_content_decoder: BoxContentDecoder::default(),
            metadata_decoder: BoxContentDecoder::default(),
            store_exif: StoreState::Idle,
            store_xmp: StoreState::Idle,
            exif_data: Vec::new(),
            xmp_data: Vec::new(),
            recon_out_pos: 0,
            recon_buffer: Vec::new(),
            recon: None,
            recon_stage: ReconStage::None,
            metadata: CodecMetadata::default(),
            got_codestream_signature: false,
            got_basic_info: false,
            got_transform_data: false,
            got_all_headers: false,
            post_headers: false,
            basic_info_size_hint: INITIAL_BASIC_INFO_SIZE_HINT,
            preferred_color: None,
            frame_stage: FrameStage::Header,
            frame_header: None,
            frame_dec: None,
            frame_dec_in_progress: false,
            frame_output: None,
            remaining_frame_size: 0,
            next_section: 0,
            section_processed: Vec::new(),
            preview_frame: false,
            got_preview: false,
            is_last_of_still: false,
            is_last_total: false,
            internal_frames: 0,
            external_frames: 0,
            skip_frames: 0,
            skipping_frame: false,
            frame_prog_detail: ProgressiveDetail::Frames,
            dc_frame_progression_done: false,
            downsampling_target: 8,
            slots: ReferenceSlots::default(),
            frame_saved_as: Vec::new(),
            frame_references: Vec::new(),
            frame_external_to_internal: Vec::new(),
            frame_required: Vec::new(),
            preview_out: None,
            image_out: None,
            image_format: PixelFormat::new(4, DataType::F32),
            image_out_buffer_set: false,
            extra_channel_output: Vec::new(),
        }
    }

    /// Starts decoding the same file again from its first byte. Options and
    /// subscriptions stay, as does the frame ledger used by `skip_frames`.
    pub fn rewind(&mut self) {
        ldebug!("rewinding decoder");
        self.stage = DecoderStage::Inited;
        self.events_wanted = self.orig_events_wanted;
        self.input.reset();
        self.got_signature = false;
        self.have_container = false;
        self.last_codestream_seen = false;
        self.box_count = 0;

        self.box_stage = BoxStage::Header;
        self.box_contents_begin = 0;
        self.box_contents_end = 0;
        self.box_contents_size = 0;
        self.box_contents_unbounded = false;
        self.box_size = 0;
        self.header_size = 0;
        self.box_type = BoxType([0; 4]);
        self.box_decoded_type = BoxType([0; 4]);
        self.box_event = false;
        self.box_out_buffer = None;
        self.box_out_buffer_pos = 0;
        self.box_out_buffer_set_current_box = false;
        self.box_content_decoder = BoxContentDecoder::default();

        self.metadata_decoder = BoxContentDecoder::default();
        self.store_exif = StoreState::Idle;
        self.store_xmp = StoreState::Idle;
        self.exif_data.clear();
        self.xmp_data.clear();
        self.recon_out_pos = 0;
        self.recon_buffer.clear();
        self.recon = None;
        self.recon_stage = ReconStage::None;

        self.metadata = CodecMetadata::default();
        self.got_codestream_signature = false;
        self.got_basic_info = false;
        self.got_transform_data = false;
        self.got_all_headers = false;
        self.post_headers = false;
        self.basic_info_size_hint = INITIAL_BASIC_INFO_SIZE_HINT;
        self.preferred_color = None;

        self.frame_stage = FrameStage::Header;
        self.frame_header = None;
        self.frame_dec = None;
        self.frame_dec_in_progress = false;
        self.frame_output = None;
        self.remaining_frame_size = 0;
        self.next_section = 0;
        self.section_processed.clear();
        self.preview_frame = false;
        self.got_preview = false;
        self.is_last_of_still = false;
        self.is_last_total = false;
        self.internal_frames = 0;
        self.external_frames = 0;
        self.skip_frames = 0;
        self.skipping_frame = false;
        self.frame_prog_detail = ProgressiveDetail::Frames;
        self.dc_frame_progression_done = false;
        self.downsampling_target = 8;
        self.slots.clear();

        self.preview_out = None;
        self.image_out = None;
        self.image_out_buffer_set = false;
        self.extra_channel_output.clear();
    }

    /// Returns the decoder to its freshly created state, keeping only the
    /// memory limit.
    pub fn reset(&mut self) {
        self.rewind();
        self.options.reset();
        self.runner = Box::new(SequentialRunner);
        self.events_wanted = Events::empty();
        self.orig_events_wanted = Events::empty();
        self.frame_saved_as.clear();
        self.frame_references.clear();
        self.frame_external_to_internal.clear();
        self.frame_required.clear();
    }

    fn require_inited(&self) -> Result<(), CodecError> {
        if self.stage == DecoderStage::Inited {
            Ok(())
        } else {
            Err(CodecError::DecoderStarted)
        }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: DecoderOptions) -> Result<(), CodecError> {
        self.require_inited()?;
        if options.desired_intensity_target < 0.0 {
            return Err(CodecError::NegativeIntensityTarget);
        }
        self.options = options;
        Ok(())
    }

    /// Selects the informative events `process` stops at.
    pub fn subscribe_events(&mut self, events: Events) -> Result<(), CodecError> {
        self.require_inited()?;
        self.events_wanted = events;
        self.orig_events_wanted = events;
        Ok(())
    }

    /// Same as [`Decoder::subscribe_events`] from raw bits. Bits outside the
    /// informative events are rejected.
    pub fn subscribe_events_bits(&mut self, bits: u32) -> Result<(), CodecError> {
        let events = Events::from_bits(bits).ok_or(CodecError::InvalidEventMask)?;
        self.subscribe_events(events)
    }

    pub fn set_keep_orientation(&mut self, keep_orientation: bool) -> Result<(), CodecError> {
        self.require_inited()?;
        self.options.keep_orientation = keep_orientation;
        Ok(())
    }

    pub fn set_render_spotcolors(&mut self, render_spotcolors: bool) -> Result<(), CodecError> {
        self.require_inited()?;
        self.options.render_spotcolors = render_spotcolors;
        Ok(())
    }

    pub fn set_coalescing(&mut self, coalescing: bool) -> Result<(), CodecError> {
        self.require_inited()?;
        self.options.coalescing = coalescing;
        Ok(())
    }

    pub fn set_parallel_runner(
        &mut self,
        runner: Box<dyn ParallelRunner>,
    ) -> Result<(), CodecError> {
        self.require_inited()?;
        self.runner = runner;
        Ok(())
    }

    /// `Frames` turns progressive pauses off entirely and is not accepted
    /// here; unsubscribe `FRAME_PROGRESSION` instead.
    pub fn set_progressive_detail(&mut self, detail: ProgressiveDetail) -> Result<(), CodecError> {
        match detail {
            ProgressiveDetail::Dc | ProgressiveDetail::LastPasses | ProgressiveDetail::Passes => {
                self.options.progressive_detail = detail;
                Ok(())
            }
            ProgressiveDetail::Frames => Err(CodecError::UnsupportedProgressiveDetail),
        }
    }

    pub fn set_desired_intensity_target(&mut self, target: f32) -> Result<(), CodecError> {
        if target < 0.0 || target.is_nan() {
            return Err(CodecError::NegativeIntensityTarget);
        }
        self.options.desired_intensity_target = target;
        Ok(())
    }

    pub fn set_decompress_boxes(&mut self, decompress: bool) {
        self.options.decompress_boxes = decompress;
    }

    /// Requests decoded pixels in `encoding` instead of the default for XYB
    /// images. Only possible between the color encoding and the first frame.
    pub fn set_preferred_color_profile(
        &mut self,
        encoding: &ColorEncoding,
    ) -> Result<(), CodecError> {
        if !self.got_all_headers {
            return Err(CodecError::NotYetAvailable);
        }
        if self.post_headers {
            return Err(CodecError::TooLateForColorProfile);
        }
        if self.metadata.image.color_encoding.is_gray() != encoding.is_gray() {
            return Err(CodecError::GrayscaleMismatch);
        }
        if matches!(encoding.color_space, ColorSpace::Unknown | ColorSpace::Xyb)
            || encoding.want_icc
        {
            return Err(CodecError::UnsupportedColorSpace);
        }
        if self.metadata.image.xyb_encoded {
            self.preferred_color = Some(*encoding);
        }
        Ok(())
    }

    pub fn set_input(&mut self, data: &'a [u8]) -> Result<(), CodecError> {
        if self.input.is_set() {
            return Err(CodecError::InputAlreadySet);
        }
        if self.input.is_closed() {
            return Err(CodecError::InputClosed);
        }
        self.input.set(data);
        Ok(())
    }

    /// Takes back the input window and returns how many of its bytes were
    /// not consumed. Those must be offered again at the start of the next
    /// window.
    pub fn release_input(&mut self) -> usize {
        self.input.release()
    }

    /// Marks the current window as the end of the file.
    pub fn close_input(&mut self) {
        self.input.close();
    }

    /// Runs the decoder until the next event, request or the end of the
    /// file. An error leaves the decoder unusable until `reset` or `rewind`.
    pub fn process(&mut self) -> Result<DecoderStatus, CodecError> {
        if self.stage == DecoderStage::Inited {
            self.stage = DecoderStage::Started;
        }
        if self.stage == DecoderStage::Error {
            return Err(CodecError::DecoderInErrorState);
        }
        match self.process_input() {
            Ok(status) => Ok(status),
            Err(err) => {
                lwarn!("decoding failed: {}", err);
                self.stage = DecoderStage::Error;
                Err(err)
            }
        }
    }

    fn process_input(&mut self) -> Result<DecoderStatus, CodecError> {
        use crate::container::{Signature, signature_check};

        if !self.got_signature {
            match signature_check(self.input.next_in()) {
                Signature::Invalid => return Err(CodecError::InvalidSignature),
                Signature::NotEnoughBytes if self.input.is_closed() => {
                    return Err(CodecError::TruncatedSignature);
                }
                Signature::NotEnoughBytes => return Ok(DecoderStatus::NeedMoreInput),
                Signature::Container => self.have_container = true,
                Signature::Codestream => self.last_codestream_seen = true,
            }
            self.got_signature = true;
        }

        let status = self.handle_boxes()?;
        if status == DecoderStatus::NeedMoreInput && self.input.is_closed() {
            return Err(CodecError::MissingInput);
        }
        if status == DecoderStatus::Success {
            if self.stage != DecoderStage::CodestreamFinished {
                return Err(CodecError::CodestreamNeverFinished);
            }
            if self.recon_needs_more_boxes() {
                return Err(CodecError::MissingReconstructionMetadata);
            }
        }
        Ok(status)
    }

    /// Skips the next `amount` frames that would produce a `FullImage`, on
    /// top of any skip already pending.
    pub fn skip_frames(&mut self, amount: usize) {
        self.skip_frames = self.skip_frames.saturating_add(amount);
        self.frame_required.clear();
        let next_frame = self.external_frames.saturating_add(self.skip_frames);
        let internal = self.frame_external_to_internal.get(next_frame).copied();
        if let Some(index) = internal.filter(|&i| i < self.frame_saved_as.len()) {
            let deps = frame_dependencies(index, &self.frame_saved_as, &self.frame_references);
            ldebug!("frame {} depends on {} earlier frames", index, deps.len());
            self.frame_required = vec![false; index + 1];
            for dep in deps {
                if let Some(required) = self.frame_required.get_mut(dep) {
                    *required = true;
                }
            }
        }
    }

    /// Abandons the frame being decoded and skips its remaining bytes.
    pub fn skip_current_frame(&mut self) -> Result<(), CodecError> {
        if self.frame_dec.is_none() || !self.frame_dec_in_progress {
            return Err(CodecError::NoFrameInProgress);
        }
        ldebug!("skipping current frame, {} bytes left", self.remaining_frame_size);
        self.frame_stage = FrameStage::Header;
        self.input.advance_codestream(self.remaining_frame_size);
        self.frame_dec_in_progress = false;
        if self.is_last_of_still {
            self.image_out_buffer_set = false;
        }
        Ok(())
    }

    /// Lower bound on the input bytes still needed before the basic info is
    /// available, 0 once it is.
    pub fn size_hint_basic_info(&self) -> usize {
        if self.got_basic_info {
            0
        } else {
            self.basic_info_size_hint
        }
    }

    pub fn basic_info(&self) -> Result<BasicInfo, CodecError> {
        if !self.got_basic_info {
            return Err(CodecError::NotYetAvailable);
        }
        let image = &self.metadata.image;
        let (xsize, ysize) = self.metadata.oriented_size(self.options.keep_orientation);
        let alpha = image.alpha();
        let tone_mapping = &image.tone_mapping;
        let mut info = BasicInfo {
            have_container: self.have_container,
            xsize: xsize as u32,
            ysize: ysize as u32,
            bits_per_sample: image.bits_per_sample,
            intensity_target: if self.options.desired_intensity_target > 0.0 {
                self.options.desired_intensity_target
            } else {
                tone_mapping.intensity_target
            },
            min_nits: tone_mapping.min_nits,
            relative_to_max_display: tone_mapping.relative_to_max_display,
            linear_below: tone_mapping.linear_below,
            uses_original_profile: !image.xyb_encoded,
            have_preview: image.have_preview(),
            have_animation: image.have_animation(),
            orientation: if self.options.keep_orientation {
                image.orientation
            } else {
                1
            },
            num_color_channels: image.num_color_channels(),
            num_extra_channels: image.extra_channels.len() as u32,
            alpha_bits: alpha.map_or(0, |a| a.bits_per_sample),
            alpha_premultiplied: alpha.is_some_and(|a| a.alpha_associated),
            ..BasicInfo::default()
        };
        if let Some(preview) = &image.preview_size {
            info.preview_xsize = preview.xsize;
            info.preview_ysize = preview.ysize;
        }
        if let Some(animation) = &image.animation {
            info.animation = AnimationInfo {
                tps_numerator: animation.tps_numerator,
                tps_denominator: animation.tps_denominator,
                num_loops: animation.num_loops,
                have_timecodes: animation.have_timecodes,
            };
        }
        match &image.intrinsic_size {
            Some(size) => {
                info.intrinsic_xsize = size.xsize;
                info.intrinsic_ysize = size.ysize;
            }
            None => {
                info.intrinsic_xsize = info.xsize;
                info.intrinsic_ysize = info.ysize;
            }
        }
        Ok(info)
    }

    pub fn extra_channel_info(&self, index: usize) -> Result<&ExtraChannelInfo, CodecError> {
        if !self.got_basic_info {
            return Err(CodecError::NotYetAvailable);
        }
        self.metadata
            .image
            .extra_channels
            .get(index)
            .ok_or(CodecError::InvalidExtraChannelIndex)
    }

    pub fn extra_channel_name(&self, index: usize) -> Result<&str, CodecError> {
        Ok(&self.extra_channel_info(index)?.name)
    }

    fn color_encoding_for(&self, target: ColorProfileTarget) -> Result<ColorEncoding, CodecError> {
        if !self.got_all_headers {
            return Err(CodecError::NotYetAvailable);
        }
        let original = self.metadata.image.color_encoding;
        if target == ColorProfileTarget::Data && self.metadata.image.xyb_encoded {
            return Ok(self
                .preferred_color
                .unwrap_or_else(|| ColorEncoding::linear_srgb(original.is_gray())));
        }
        Ok(original)
    }

    /// Parametric description of the color profile, unavailable when the
    /// image only carries an ICC profile.
    pub fn color_as_encoded_profile(
        &self,
        target: ColorProfileTarget,
    ) -> Result<ColorEncoding, CodecError> {
        let encoding = self.color_encoding_for(target)?;
        if encoding.want_icc {
            return Err(CodecError::NoEncodedProfile);
        }
        Ok(encoding)
    }

    /// The embedded ICC profile. Profiles are never synthesized from a
    /// parametric encoding.
    pub fn icc_profile(&self, target: ColorProfileTarget) -> Result<&[u8], CodecError> {
        let encoding = self.color_encoding_for(target)?;
        if !encoding.want_icc {
            return Err(CodecError::NoIccProfile);
        }
        self.metadata.icc.as_deref().ok_or(CodecError::NoIccProfile)
    }

    /// Downsampling factor of the pixels last delivered by a flush or a
    /// progression event.
    pub fn intended_downsampling_ratio(&self) -> usize {
        self.downsampling_target
    }

    pub fn default_pixel_format(&self) -> Result<PixelFormat, CodecError> {
        if !self.got_basic_info {
            return Err(CodecError::NotYetAvailable);
        }
        Ok(PixelFormat {
            endianness: Endianness::Little,
            ..PixelFormat::new(4, DataType::F32)
        })
    }

    /// Reconstruction metadata, complete once its Exif and XMP boxes have
    /// been read.
    pub fn reconstruction_metadata(&self) -> Option<&ReconstructionMetadata> {
        self.recon.as_ref()
    }

    fn current_frame_header(&self) -> Result<&FrameHeader, CodecError> {
        match &self.frame_header {
            Some(header) if self.frame_stage != FrameStage::Header => Ok(header),
            _ => Err(CodecError::NoFrameInProgress),
        }
    }

    pub fn frame_header(&self) -> Result<FrameHeaderInfo, CodecError> {
        let header = self.current_frame_header()?;
        let image = &self.metadata.image;
        let (xsize, ysize) = self.current_dimensions(true);
        let mut layer_info = LayerInfo {
            xsize: xsize as u32,
            ysize: ysize as u32,
            ..LayerInfo::default()
        };
        if !self.options.coalescing {
            if let Some(crop) = &header.crop {
                layer_info.have_crop = true;
                layer_info.crop_x0 = crop.x0;
                layer_info.crop_y0 = crop.y0;
            }
            if !self.options.keep_orientation {
                let (width, height) = self.metadata.oriented_size(false);
                if image.orientation > 4 {
                    std::mem::swap(&mut layer_info.crop_x0, &mut layer_info.crop_y0);
                }
                let o = (image.orientation - 1) & 3;
                if o > 0 && o < 3 {
                    layer_info.crop_x0 = width as i32 - xsize as i32 - layer_info.crop_x0;
                }
                if o > 1 {
                    layer_info.crop_y0 = height as i32 - ysize as i32 - layer_info.crop_y0;
                }
            }
            layer_info.blend_info = BlendInfo::from(&header.blending);
            layer_info.save_as_reference = header.save_as_reference;
        }
        Ok(FrameHeaderInfo {
            duration: if image.have_animation() { header.duration } else { 0 },
            timecode: match &image.animation {
                Some(animation) if animation.have_timecodes => header.timecode,
                _ => 0,
            },
            name_length: header.name.len() as u32,
            is_last: header.is_last,
            layer_info,
        })
    }

    pub fn frame_name(&self) -> Result<&str, CodecError> {
        Ok(&self.current_frame_header()?.name)
    }

    pub fn extra_channel_blend_info(&self, index: usize) -> Result<BlendInfo, CodecError> {
        let header = self.current_frame_header()?;
        header
            .extra_blending
            .get(index)
            .map(BlendInfo::from)
            .ok_or(CodecError::InvalidExtraChannelIndex)
    }

    pub fn box_type(&self, decompressed: bool) -> Result<BoxType, CodecError> {
        if !self.box_event {
            return Err(CodecError::NoBoxEvent);
        }
        Ok(if decompressed {
            self.box_decoded_type
        } else {
            self.box_type
        })
    }

    /// Size of the current box including its header, 0 for an unbounded box.
    pub fn box_size_raw(&self) -> Result<u64, CodecError> {
        if !self.box_event {
            return Err(CodecError::NoBoxEvent);
        }
        Ok(self.box_size)
    }

    /// Lends a buffer for the contents of the box just reported by a `Box`
    /// event.
    pub fn set_box_buffer(&mut self, buffer: &'a mut [u8]) -> Result<(), CodecError> {
        if self.box_out_buffer.is_some() {
            return Err(CodecError::BoxBufferAlreadySet);
        }
        if !self.box_event {
            return Err(CodecError::NoBoxEvent);
        }
        self.box_out_buffer = Some(buffer);
        self.box_out_buffer_set_current_box = true;
        self.box_out_buffer_pos = 0;
        Ok(())
    }

    /// Hands back the box buffer with the number of bytes written into it.
    pub fn release_box_buffer(&mut self) -> Option<(&'a mut [u8], usize)> {
        let buffer = self.box_out_buffer.take()?;
        let written = self.box_out_buffer_pos;
        self.box_out_buffer_pos = 0;
        self.box_out_buffer_set_current_box = false;
        Some((buffer, written))
    }

    /// Output dimensions of the image or layer being decoded.
    fn current_dimensions(&self, oriented: bool) -> (usize, usize) {
        let keep = self.options.keep_orientation || !oriented;
        if let Some(header) = &self.frame_header {
            if header.is_preview {
                return self.metadata.oriented_preview_size(keep).unwrap_or((0, 0));
            }
            if !self.options.coalescing {
                let (xsize, ysize) = header.frame_size(&self.metadata);
                return if !keep && self.metadata.image.orientation > 4 {
                    (ysize, xsize)
                } else {
                    (xsize, ysize)
                };
            }
        }
        self.metadata.oriented_size(keep)
    }

    fn prepare_size_check(&self, format: &PixelFormat) -> Result<(), CodecError> {
        if !self.got_basic_info {
            return Err(CodecError::NotYetAvailable);
        }
        if !self.options.coalescing
            && (self.frame_header.is_none() || self.frame_stage == FrameStage::Header)
        {
            return Err(CodecError::FrameDimensionsUnknown);
        }
        if format.num_channels == 0 || format.num_channels > MAX_OUTPUT_CHANNELS {
            return Err(CodecError::UnsupportedChannelCount);
        }
        Ok(())
    }

    fn check_gray_output(&self, format: &PixelFormat) -> Result<(), CodecError> {
        if format.num_channels < 3 && !self.metadata.image.color_encoding.is_gray() {
            return Err(CodecError::GrayscaleMismatch);
        }
        Ok(())
    }

    pub fn preview_out_buffer_size(&self, format: &PixelFormat) -> Result<usize, CodecError> {
        self.prepare_size_check(format)?;
        self.check_gray_output(format)?;
        let (xsize, ysize) = self
            .metadata
            .oriented_preview_size(self.options.keep_orientation)
            .ok_or(CodecError::NoBufferNeeded)?;
        format.preview_size(xsize, ysize)
    }

    pub fn set_preview_out_buffer(
        &mut self,
        format: PixelFormat,
        buffer: &'a mut [u8],
    ) -> Result<(), CodecError> {
        if !self.got_basic_info
            || !self.metadata.image.have_preview()
            || !self.orig_events_wanted.contains(Events::PREVIEW_IMAGE)
        {
            return Err(CodecError::NoBufferNeeded);
        }
        let min_size = self.preview_out_buffer_size(&format)?;
        if buffer.len() < min_size {
            return Err(CodecError::BufferTooSmall);
        }
        self.preview_out = Some((format, buffer));
        Ok(())
    }

    pub fn release_preview_out_buffer(&mut self) -> Option<&'a mut [u8]> {
        self.preview_out.take().map(|(_, buffer)| buffer)
    }

    pub fn image_out_buffer_size(&self, format: &PixelFormat) -> Result<usize, CodecError> {
        self.prepare_size_check(format)?;
        self.check_gray_output(format)?;
        let (xsize, ysize) = self.current_dimensions(true);
        format.image_size(xsize, ysize)
    }

    /// Lends the buffer the next full image is written to. A buffer still
    /// held from an earlier frame is dropped, release it first to keep it.
    pub fn set_image_out_buffer(
        &mut self,
        format: PixelFormat,
        buffer: &'a mut [u8],
    ) -> Result<(), CodecError> {
        if !self.got_basic_info || !self.orig_events_wanted.contains(Events::FULL_IMAGE) {
            return Err(CodecError::NoBufferNeeded);
        }
        if self.image_out_buffer_set && matches!(self.image_out, Some(ImageOutput::Callback(_))) {
            return Err(CodecError::CallbackBufferConflict);
        }
        let min_size = self.image_out_buffer_size(&format)?;
        if buffer.len() < min_size {
            return Err(CodecError::BufferTooSmall);
        }
        self.image_out = Some(ImageOutput::Buffer(buffer));
        self.image_format = format;
        self.image_out_buffer_set = true;
        Ok(())
    }

    pub fn release_image_out_buffer(&mut self) -> Option<&'a mut [u8]> {
        match self.image_out.take() {
            Some(ImageOutput::Buffer(buffer)) => {
                self.image_out_buffer_set = false;
                Some(buffer)
            }
            other => {
                self.image_out = other;
                None
            }
        }
    }

    /// Streams the next full image row by row to `callback(x, y, pixels)`.
    pub fn set_image_out_callback<F>(
        &mut self,
        format: PixelFormat,
        callback: F,
    ) -> Result<(), CodecError>
    where
        F: Fn(usize, usize, &[u8]) + Send + Sync + 'a,
    {
        self.set_multithreaded_image_out_callback(format, Box::new(FnImageOutCallback(callback)))
    }

    pub fn set_multithreaded_image_out_callback(
        &mut self,
        format: PixelFormat,
        callback: Box<dyn ImageOutCallback + 'a>,
    ) -> Result<(), CodecError> {
        if self.image_out_buffer_set && matches!(self.image_out, Some(ImageOutput::Buffer(_))) {
            return Err(CodecError::CallbackBufferConflict);
        }
        self.prepare_size_check(&format)?;
        self.check_gray_output(&format)?;
        self.image_out = Some(ImageOutput::Callback(callback));
        self.image_format = format;
        self.image_out_buffer_set = true;
        Ok(())
    }

    pub fn extra_channel_buffer_size(
        &self,
        format: &PixelFormat,
        index: usize,
    ) -> Result<usize, CodecError> {
        if !self.got_basic_info || !self.orig_events_wanted.contains(Events::FULL_IMAGE) {
            return Err(CodecError::NoBufferNeeded);
        }
        if index >= self.metadata.image.extra_channels.len() {
            return Err(CodecError::InvalidExtraChannelIndex);
        }
        self.prepare_size_check(format)?;
        let (xsize, ysize) = self.current_dimensions(true);
        let single = PixelFormat {
            num_channels: 1,
            ..*format
        };
        single.image_size(xsize, ysize)
    }

    pub fn set_extra_channel_buffer(
        &mut self,
        format: PixelFormat,
        buffer: &'a mut [u8],
        index: usize,
    ) -> Result<(), CodecError> {
        let min_size = self.extra_channel_buffer_size(&format, index)?;
        if buffer.len() < min_size {
            return Err(CodecError::BufferTooSmall);
        }
        let num_extra = self.metadata.image.extra_channels.len();
        if self.extra_channel_output.len() < num_extra {
            self.extra_channel_output.resize_with(num_extra, || None);
        }
        self.extra_channel_output[index] = Some(ExtraChannelOutput {
            format: PixelFormat {
                num_channels: 1,
                ..format
            },
            buffer,
            pending: true,
        });
        Ok(())
    }

    pub fn release_extra_channel_buffer(&mut self, index: usize) -> Option<&'a mut [u8]> {
        self.extra_channel_output
            .get_mut(index)
            .and_then(Option::take)
            .map(|output| output.buffer)
    }

    /// Writes the partially decoded current frame into the image buffer.
    /// Needs the DC of the frame to be decoded.
    pub fn flush_image(&mut self) -> Result<(), CodecError> {
        if !self.image_out_buffer_set {
            return Err(CodecError::NoOutputBuffer);
        }
        let frame_dec = match &self.frame_dec {
            Some(frame_dec) if self.frame_dec_in_progress => frame_dec,
            _ => return Err(CodecError::NoFrameInProgress),
        };
        if !frame_dec.has_decoded_dc() {
            return Err(CodecError::DcNotDecoded);
        }
        let image = frame_dec.render(&self.metadata, &self.slots, self.options.coalescing)?;
        let ctx = OutputContext {
            metadata: &self.metadata,
            keep_orientation: self.options.keep_orientation,
            render_spotcolors: self.options.render_spotcolors,
        };
        let runner = &*self.runner;
        match &mut self.image_out {
            Some(ImageOutput::Buffer(buffer)) => write_to_buffer(
                &image,
                &ctx,
                OutputPlanes::Color,
                self.image_format,
                buffer,
                runner,
            ),
            Some(ImageOutput::Callback(callback)) => {
                write_to_callback(&image, &ctx, self.image_format, callback.as_mut(), runner)
            }
            None => Err(CodecError::NoOutputBuffer),
        }
    }

    fn recon_needs_more_boxes(&self) -> bool {
        match &self.recon {
            Some(recon) => {
                (recon.exif_size > 0 && self.store_exif != StoreState::Stored)
                    || (recon.xmp_size > 0 && self.store_xmp != StoreState::Stored)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_only_before_start() {
        let data = [0xFFu8, 0x0A];
        let mut decoder = Decoder::new();
        decoder.set_keep_orientation(true).unwrap();
        decoder.subscribe_events(Events::BASIC_INFO).unwrap();
        decoder.set_input(&data).unwrap();
        assert_eq!(decoder.process(), Ok(DecoderStatus::NeedMoreInput));
        assert_eq!(decoder.set_coalescing(false), Err(CodecError::DecoderStarted));
        assert_eq!(
            decoder.subscribe_events(Events::FRAME),
            Err(CodecError::DecoderStarted)
        );
        assert!(decoder.options().keep_orientation);
    }

    #[test]
    fn test_input_misuse() {
        let data = [0xFFu8];
        let mut decoder = Decoder::new();
        decoder.set_input(&data).unwrap();
        assert_eq!(decoder.set_input(&data), Err(CodecError::InputAlreadySet));
        assert_eq!(decoder.release_input(), 1);
        decoder.close_input();
        assert_eq!(decoder.set_input(&data), Err(CodecError::InputClosed));
    }

    #[test]
    fn test_error_latches_until_reset() {
        let data = [0x12u8, 0x34];
        let mut decoder = Decoder::new();
        decoder.subscribe_events(Events::BASIC_INFO).unwrap();
        decoder.set_input(&data).unwrap();
        assert_eq!(decoder.process(), Err(CodecError::InvalidSignature));
        assert_eq!(decoder.process(), Err(CodecError::DecoderInErrorState));
        decoder.reset();
        assert_eq!(decoder.process(), Ok(DecoderStatus::NeedMoreInput));
    }

    #[test]
    fn test_truncated_signature() {
        let data = [0xFFu8];
        let mut decoder = Decoder::new();
        decoder.set_input(&data).unwrap();
        assert_eq!(decoder.process(), Ok(DecoderStatus::NeedMoreInput));
        decoder.close_input();
        assert_eq!(decoder.process(), Err(CodecError::TruncatedSignature));
    }

    #[test]
    fn test_getters_before_headers() {
        let decoder = Decoder::new();
        assert_eq!(decoder.basic_info(), Err(CodecError::NotYetAvailable));
        assert_eq!(decoder.box_type(false), Err(CodecError::NoBoxEvent));
        assert_eq!(decoder.frame_header(), Err(CodecError::NoFrameInProgress));
        assert_eq!(decoder.size_hint_basic_info(), INITIAL_BASIC_INFO_SIZE_HINT);
        assert_eq!(
            decoder.color_as_encoded_profile(ColorProfileTarget::Original),
            Err(CodecError::NotYetAvailable)
        );
    }

    #[test]
    fn test_rejects_unknown_event_bits() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.subscribe_events_bits(0x1), Err(CodecError::InvalidEventMask));
        decoder.subscribe_events_bits(0x40 | 0x1000).unwrap();
    }

    #[test]
    fn test_progressive_detail_values() {
        let mut decoder = Decoder::new();
        assert_eq!(
            decoder.set_progressive_detail(ProgressiveDetail::Frames),
            Err(CodecError::UnsupportedProgressiveDetail)
        );
        decoder.set_progressive_detail(ProgressiveDetail::Passes).unwrap();
        assert_eq!(decoder.options().progressive_detail, ProgressiveDetail::Passes);
        assert_eq!(
            decoder.set_desired_intensity_target(-1.0),
            Err(CodecError::NegativeIntensityTarget)
        );
    }
}
