//! Composition of a decoded layer onto the image sized background held in a
//! reference slot.

use super::header::{BlendMode, BlendingInfo, FrameHeader};
use super::image::{ImageBundle, ReferenceSlots};
use crate::error::CodecError;
use crate::headers::CodecMetadata;

struct Background<'a> {
    image: Option<&'a ImageBundle>,
}

impl Background<'_> {
    #[inline]
    fn get(&self, c: usize, x: usize, y: usize) -> f32 {
        self.image.map_or(0.0, |image| image.get(c, x, y))
    }
}

fn background<'a>(
    slots: &'a ReferenceSlots,
    source: u32,
    xsize: usize,
    ysize: usize,
) -> Result<Background<'a>, CodecError> {
    match slots.get(source as usize) {
        Some(image) if !image.same_size(xsize, ysize) => Err(CodecError::InvalidReference),
        image => Ok(Background { image }),
    }
}

#[allow(clippy::too_many_arguments)]
fn blend_sample(
    info: &BlendingInfo,
    is_alpha: bool,
    premultiplied: bool,
    old: f32,
    new: f32,
    old_alpha: f32,
    new_alpha: f32,
) -> f32 {
    let new_alpha = if info.clamp {
        new_alpha.clamp(0.0, 1.0)
    } else {
        new_alpha
    };
    match info.mode {
        BlendMode::Replace => new,
        BlendMode::Add => old + new,
        BlendMode::Mul => {
            let new = if info.clamp { new.clamp(0.0, 1.0) } else { new };
            old * new
        }
        BlendMode::Blend => {
            let alpha = new_alpha + old_alpha * (1.0 - new_alpha);
            if is_alpha {
                alpha
            } else if premultiplied {
                new + old * (1.0 - new_alpha)
            } else if alpha > 0.0 {
                (new * new_alpha + old * old_alpha * (1.0 - new_alpha)) / alpha
            } else {
                0.0
            }
        }
        BlendMode::AlphaWeightedAdd => {
            if is_alpha {
                old
            } else {
                old + new * new_alpha
            }
        }
    }
}

/// Blends `layer` at its crop origin onto the backgrounds named by the
/// frame's blending info and returns the image sized result.
pub fn blend_layer(
    header: &FrameHeader,
    metadata: &CodecMetadata,
    layer: &ImageBundle,
    slots: &ReferenceSlots,
) -> Result<ImageBundle, CodecError> {
    let (xsize, ysize) = (metadata.xsize(), metadata.ysize());
    let num_color = metadata.image.num_color_channels() as usize;
    let (x0, y0) = header
        .crop
        .as_ref()
        .map_or((0i64, 0i64), |c| (c.x0 as i64, c.y0 as i64));

    let mut out = ImageBundle::new(xsize, ysize, layer.num_channels());
    for c in 0..layer.num_channels() {
        let info = if c < num_color {
            &header.blending
        } else {
            &header.extra_blending[c - num_color]
        };
        let bg = if header.crop.is_some() || info.mode != BlendMode::Replace {
            background(slots, info.source, xsize, ysize)?
        } else {
            Background { image: None }
        };
        let alpha_index = num_color + info.alpha_channel as usize;
        let is_alpha = c == alpha_index;
        let premultiplied = metadata
            .image
            .extra_channels
            .get(info.alpha_channel as usize)
            .is_some_and(|ec| ec.alpha_associated);
        let needs_alpha = matches!(info.mode, BlendMode::Blend | BlendMode::AlphaWeightedAdd);
        if needs_alpha && alpha_index >= layer.num_channels() {
            return Err(CodecError::InvalidFrameHeader);
        }

        for y in 0..ysize {
            let ly = y as i64 - y0;
            for x in 0..xsize {
                let lx = x as i64 - x0;
                let old = bg.get(c, x, y);
                let inside = lx >= 0
                    && ly >= 0
                    && (lx as usize) < layer.xsize
                    && (ly as usize) < layer.ysize;
                let value = if !inside {
                    old
                } else {
                    let (lx, ly) = (lx as usize, ly as usize);
                    let (old_alpha, new_alpha) = if needs_alpha {
                        (bg.get(alpha_index, x, y), layer.get(alpha_index, lx, ly))
                    } else {
                        (0.0, 0.0)
                    };
                    blend_sample(
                        info,
                        is_alpha,
                        premultiplied,
                        old,
                        layer.get(c, lx, ly),
                        old_alpha,
                        new_alpha,
                    )
                };
                out.set(c, x, y, value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::header::Crop;
    use crate::headers::SizeHeader;
    use crate::headers::extra_channel::{ExtraChannelInfo, ExtraChannelType};

    fn gray_with_alpha(xsize: u32, ysize: u32) -> CodecMetadata {
        let mut metadata = CodecMetadata {
            size: SizeHeader::new(xsize, ysize),
            ..CodecMetadata::default()
        };
        metadata.image.color_encoding = crate::headers::color_encoding::ColorEncoding::srgb(true);
        metadata
            .image
            .extra_channels
            .push(ExtraChannelInfo::new(ExtraChannelType::Alpha, 8));
        metadata
    }

    #[test]
    fn test_cropped_replace_keeps_background() {
        let metadata = gray_with_alpha(3, 1);
        let mut bg = ImageBundle::new(3, 1, 2);
        bg.channels[0] = vec![0.1, 0.2, 0.3];
        let mut slots = ReferenceSlots::default();
        slots.store(0, bg);

        let header = FrameHeader {
            crop: Some(Crop {
                x0: 2,
                y0: 0,
                xsize: 2,
                ysize: 1,
            }),
            extra_blending: vec![BlendingInfo::default()],
            ..FrameHeader::default()
        };
        let mut layer = ImageBundle::new(2, 1, 2);
        layer.channels[0] = vec![0.9, 0.8];
        let out = blend_layer(&header, &metadata, &layer, &slots).unwrap();
        assert_eq!(out.channels[0], vec![0.1, 0.2, 0.9]);
    }

    #[test]
    fn test_alpha_blend() {
        let metadata = gray_with_alpha(1, 1);
        let mut bg = ImageBundle::new(1, 1, 2);
        bg.channels = vec![vec![1.0], vec![1.0]];
        let mut slots = ReferenceSlots::default();
        slots.store(2, bg);

        let info = BlendingInfo {
            mode: BlendMode::Blend,
            source: 2,
            alpha_channel: 0,
            clamp: false,
        };
        let header = FrameHeader {
            blending: info,
            extra_blending: vec![info],
            ..FrameHeader::default()
        };
        let mut layer = ImageBundle::new(1, 1, 2);
        layer.channels = vec![vec![0.0], vec![0.25]];
        let out = blend_layer(&header, &metadata, &layer, &slots).unwrap();
        assert_eq!(out.channels[1], vec![1.0]);
        assert_eq!(out.channels[0], vec![0.75]);
    }

    #[test]
    fn test_mismatched_background() {
        let metadata = gray_with_alpha(2, 2);
        let mut slots = ReferenceSlots::default();
        slots.store(0, ImageBundle::new(1, 1, 2));
        let header = FrameHeader {
            blending: BlendingInfo {
                mode: BlendMode::Add,
                ..BlendingInfo::default()
            },
            extra_blending: vec![BlendingInfo::default()],
            ..FrameHeader::default()
        };
        let layer = ImageBundle::new(2, 2, 2);
        assert_eq!(
            blend_layer(&header, &metadata, &layer, &slots),
            Err(CodecError::InvalidReference)
        );
    }
}
