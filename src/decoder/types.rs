use crate::frame::ProgressiveDetail;
use crate::frame::header::{BlendMode, BlendingInfo};
use bitflags::bitflags;

bitflags! {
    /// Informative events a caller can subscribe to before decoding starts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u32 {
        const BASIC_INFO = 0x40;
        const COLOR_ENCODING = 0x100;
        const PREVIEW_IMAGE = 0x200;
        const FRAME = 0x400;
        const FULL_IMAGE = 0x1000;
        const JPEG_RECONSTRUCTION = 0x2000;
        const BOX = 0x4000;
        const FRAME_PROGRESSION = 0x8000;
    }
}

/// Result of one `process` call: an event, a request or the end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStatus {
    /// Everything subscribed has been decoded.
    Success,
    NeedMoreInput,
    NeedPreviewOutBuffer,
    NeedImageOutBuffer,
    /// The box buffer is full: release it and set a new one.
    BoxNeedMoreOutput,
    BasicInfo,
    ColorEncoding,
    PreviewImage,
    Frame,
    FullImage,
    JpegReconstruction,
    Box,
    FrameProgression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnimationInfo {
    pub tps_numerator: u32,
    pub tps_denominator: u32,
    pub num_loops: u32,
    pub have_timecodes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BasicInfo {
    pub have_container: bool,
    /// Display size, after undoing the orientation unless it is kept.
    pub xsize: u32,
    pub ysize: u32,
    pub bits_per_sample: u32,
    pub intensity_target: f32,
    pub min_nits: f32,
    pub relative_to_max_display: bool,
    pub linear_below: f32,
    pub uses_original_profile: bool,
    pub have_preview: bool,
    pub have_animation: bool,
    pub orientation: u32,
    pub num_color_channels: u32,
    pub num_extra_channels: u32,
    pub alpha_bits: u32,
    pub alpha_premultiplied: bool,
    pub preview_xsize: u32,
    pub preview_ysize: u32,
    pub intrinsic_xsize: u32,
    pub intrinsic_ysize: u32,
    pub animation: AnimationInfo,
}

/// Blending of one channel group as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlendInfo {
    pub blend_mode: BlendMode,
    pub source: u32,
    pub alpha: u32,
    pub clamp: bool,
}

impl From<&BlendingInfo> for BlendInfo {
    fn from(info: &BlendingInfo) -> Self {
        Self {
            blend_mode: info.mode,
            source: info.source,
            alpha: info.alpha_channel,
            clamp: info.clamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerInfo {
    pub have_crop: bool,
    pub crop_x0: i32,
    pub crop_y0: i32,
    pub xsize: u32,
    pub ysize: u32,
    pub blend_info: BlendInfo,
    pub save_as_reference: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeaderInfo {
    pub duration: u32,
    pub timecode: u32,
    pub name_length: u32,
    pub is_last: bool,
    pub layer_info: LayerInfo,
}

/// Which color profile a getter describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorProfileTarget {
    /// The profile the image was encoded from.
    Original,
    /// The profile of the decoded pixels.
    Data,
}

/// Decoder settings, all of which must be chosen before decoding starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderOptions {
    pub keep_orientation: bool,
    pub render_spotcolors: bool,
    pub coalescing: bool,
    /// 0 keeps the intensity target of the image.
    pub desired_intensity_target: f32,
    pub decompress_boxes: bool,
    pub progressive_detail: ProgressiveDetail,
    /// Rough bound on pixels per image or frame, 0 means unlimited.
    pub memory_limit: usize,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            keep_orientation: false,
            render_spotcolors: true,
            coalescing: true,
            desired_intensity_target: 0.0,
            decompress_boxes: false,
            progressive_detail: ProgressiveDetail::Dc,
            memory_limit: 0,
        }
    }
}

impl DecoderOptions {
    /// Restores every option except `memory_limit`.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            memory_limit: self.memory_limit,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_memory_limit() {
        let mut options = DecoderOptions {
            coalescing: false,
            memory_limit: 1 << 20,
            ..DecoderOptions::default()
        };
        options.reset();
        assert!(options.coalescing);
        assert_eq!(options.memory_limit, 1 << 20);
    }

    #[test]
    fn test_event_values() {
        assert_eq!(Events::BASIC_INFO.bits(), 0x40);
        assert_eq!(Events::FRAME_PROGRESSION.bits(), 0x8000);
        assert!(Events::from_bits(0x1).is_none());
    }
}
