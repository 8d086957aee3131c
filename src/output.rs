//! Conversion of decoded images into caller provided pixel buffers or row
//! callbacks.

use crate::error::CodecError;
use crate::frame::image::ImageBundle;
use crate::headers::CodecMetadata;
use crate::headers::extra_channel::ExtraChannelType;
use crate::parallel::ParallelRunner;
use std::borrow::Cow;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    U8,
    U16,
    F32,
}

impl DataType {
    pub fn bits(&self) -> usize {
        match self {
            Self::U8 => 8,
            Self::U16 => 16,
            Self::F32 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Native,
    Little,
    Big,
}

/// Layout of output pixels. `align` rounds every row stride up to a
/// multiple of it, 0 or 1 means packed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub num_channels: u32,
    pub data_type: DataType,
    pub endianness: Endianness,
    pub align: usize,
}

impl PixelFormat {
    pub fn new(num_channels: u32, data_type: DataType) -> Self {
        Self {
            num_channels,
            data_type,
            endianness: Endianness::Native,
            align: 0,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.num_channels as usize * self.data_type.bits() / 8
    }

    /// Row size without padding.
    pub fn unaligned_row_size(&self, xsize: usize) -> Result<usize, CodecError> {
        let bits = xsize
            .checked_mul(self.num_channels as usize * self.data_type.bits())
            .ok_or(CodecError::ImageTooLarge)?;
        Ok(bits.div_ceil(8))
    }

    pub fn row_stride(&self, xsize: usize) -> Result<usize, CodecError> {
        let row = self.unaligned_row_size(xsize)?;
        if self.align > 1 {
            row.div_ceil(self.align)
                .checked_mul(self.align)
                .ok_or(CodecError::ImageTooLarge)
        } else {
            Ok(row)
        }
    }

    /// Bytes needed for an image: every row at the full stride.
    pub fn image_size(&self, xsize: usize, ysize: usize) -> Result<usize, CodecError> {
        self.row_stride(xsize)?
            .checked_mul(ysize)
            .ok_or(CodecError::ImageTooLarge)
    }

    /// Bytes needed for a preview: the last row does not need padding.
    pub fn preview_size(&self, xsize: usize, ysize: usize) -> Result<usize, CodecError> {
        if ysize == 0 {
            return Ok(0);
        }
        self.row_stride(xsize)?
            .checked_mul(ysize - 1)
            .and_then(|rows| rows.checked_add(self.unaligned_row_size(xsize).ok()?))
            .ok_or(CodecError::ImageTooLarge)
    }

    fn for_extra_channel(&self) -> Self {
        Self {
            num_channels: 1,
            ..*self
        }
    }

    fn write_sample(&self, value: f32, out: &mut [u8]) {
        match self.data_type {
            DataType::U8 => out[0] = (value.clamp(0.0, 1.0) * 255.0).round() as u8,
            DataType::U16 => {
                let v = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
                let bytes = match self.endianness {
                    Endianness::Native => v.to_ne_bytes(),
                    Endianness::Little => v.to_le_bytes(),
                    Endianness::Big => v.to_be_bytes(),
                };
                out[..2].copy_from_slice(&bytes);
            }
            DataType::F32 => {
                let bytes = match self.endianness {
                    Endianness::Native => value.to_ne_bytes(),
                    Endianness::Little => value.to_le_bytes(),
                    Endianness::Big => value.to_be_bytes(),
                };
                out[..4].copy_from_slice(&bytes);
            }
        }
    }
}

/// Receives converted pixels row by row. `run` is called concurrently from
/// up to `num_threads` threads, each call with pixels of a single row
/// starting at `(x, y)` in the output orientation.
pub trait ImageOutCallback: Send + Sync {
    fn init(&mut self, _num_threads: usize, _pixels_per_thread: usize) {}

    fn run(&self, thread_id: usize, x: usize, y: usize, pixels: &[u8]);

    fn destroy(&mut self) {}
}

/// Adapts a plain closure `(x, y, pixels)` to [`ImageOutCallback`].
pub struct FnImageOutCallback<F>(pub F);

impl<F> ImageOutCallback for FnImageOutCallback<F>
where
    F: Fn(usize, usize, &[u8]) + Send + Sync,
{
    fn run(&self, _thread_id: usize, x: usize, y: usize, pixels: &[u8]) {
        (self.0)(x, y, pixels)
    }
}

/// Which planes of an image are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPlanes {
    /// Gray or RGB, plus the main alpha channel for 2 or 4 channels.
    Color,
    /// One extra channel, always written as a single channel.
    ExtraChannel(usize),
}

/// Display settings shared by every conversion of one decoder.
#[derive(Debug, Clone, Copy)]
pub struct OutputContext<'m> {
    pub metadata: &'m CodecMetadata,
    pub keep_orientation: bool,
    pub render_spotcolors: bool,
}

impl OutputContext<'_> {
    fn orientation(&self) -> u32 {
        if self.keep_orientation {
            1
        } else {
            self.metadata.image.orientation
        }
    }
}

/// Output dimensions of a stored `xsize` x `ysize` image.
pub fn oriented_dims(xsize: usize, ysize: usize, orientation: u32) -> (usize, usize) {
    if orientation > 4 {
        (ysize, xsize)
    } else {
        (xsize, ysize)
    }
}

/// Maps an output position back to the stored sample for `orientation`.
/// `xsize` and `ysize` are the stored dimensions.
pub fn stored_position(
    orientation: u32,
    ox: usize,
    oy: usize,
    xsize: usize,
    ysize: usize,
) -> (usize, usize) {
    match orientation {
        2 => (xsize - 1 - ox, oy),
        3 => (xsize - 1 - ox, ysize - 1 - oy),
        4 => (ox, ysize - 1 - oy),
        5 => (oy, ox),
        6 => (oy, ysize - 1 - ox),
        7 => (xsize - 1 - oy, ysize - 1 - ox),
        8 => (xsize - 1 - oy, ox),
        _ => (ox, oy),
    }
}

/// Mixes every spot color channel into the color channels.
fn render_spot_colors(image: &ImageBundle, metadata: &CodecMetadata) -> ImageBundle {
    let num_color = metadata.image.num_color_channels() as usize;
    let mut out = image.clone();
    for (i, ec) in metadata.image.extra_channels.iter().enumerate() {
        if ec.channel_type != ExtraChannelType::SpotColor {
            continue;
        }
        let solidity = ec.spot_color[3];
        let spot = &image.channels[num_color + i];
        for c in 0..num_color {
            for (sample, &amount) in out.channels[c].iter_mut().zip(spot) {
                let mix = solidity * amount;
                *sample = *sample * (1.0 - mix) + ec.spot_color[c] * mix;
            }
        }
    }
    out
}

struct RowWriter<'i> {
    image: Cow<'i, ImageBundle>,
    planes: OutputPlanes,
    format: PixelFormat,
    orientation: u32,
    num_color: usize,
    alpha: Option<usize>,
    out_xsize: usize,
}

impl<'i> RowWriter<'i> {
    fn new(
        image: &'i ImageBundle,
        ctx: &OutputContext,
        planes: OutputPlanes,
        format: PixelFormat,
    ) -> Result<Self, CodecError> {
        let metadata = ctx.metadata;
        let num_color = metadata.image.num_color_channels() as usize;
        let format = match planes {
            OutputPlanes::Color => format,
            OutputPlanes::ExtraChannel(index) => {
                if index >= metadata.image.extra_channels.len() {
                    return Err(CodecError::InvalidExtraChannelIndex);
                }
                format.for_extra_channel()
            }
        };
        let has_spot = metadata
            .image
            .extra_channels
            .iter()
            .any(|ec| ec.channel_type == ExtraChannelType::SpotColor);
        let image = if planes == OutputPlanes::Color && ctx.render_spotcolors && has_spot {
            Cow::Owned(render_spot_colors(image, metadata))
        } else {
            Cow::Borrowed(image)
        };
        let orientation = ctx.orientation();
        let (out_xsize, _) = oriented_dims(image.xsize, image.ysize, orientation);
        Ok(Self {
            alpha: metadata
                .image
                .find_extra_channel(ExtraChannelType::Alpha)
                .map(|i| num_color + i),
            image,
            planes,
            format,
            orientation,
            num_color,
            out_xsize,
        })
    }

    fn out_ysize(&self) -> usize {
        oriented_dims(self.image.xsize, self.image.ysize, self.orientation).1
    }

    fn sample(&self, channel: usize, x: usize, y: usize) -> f32 {
        self.image.get(channel, x, y)
    }

    /// Writes output row `oy` into `row`, which holds at least the unaligned
    /// row size.
    fn write_row(&self, oy: usize, row: &mut [u8]) {
        let image = &*self.image;
        let bytes_per_sample = self.format.data_type.bits() / 8;
        let num_channels = self.format.num_channels as usize;
        for ox in 0..self.out_xsize {
            let (x, y) = stored_position(self.orientation, ox, oy, image.xsize, image.ysize);
            let pixel = &mut row[ox * num_channels * bytes_per_sample..];
            for c in 0..num_channels {
                let value = match self.planes {
                    OutputPlanes::ExtraChannel(index) => self.sample(self.num_color + index, x, y),
                    OutputPlanes::Color => {
                        let is_alpha =
                            (num_channels == 2 && c == 1) || (num_channels == 4 && c == 3);
                        if is_alpha {
                            self.alpha.map_or(1.0, |a| self.sample(a, x, y))
                        } else {
                            self.sample(c.min(self.num_color - 1), x, y)
                        }
                    }
                };
                self.format
                    .write_sample(value, &mut pixel[c * bytes_per_sample..]);
            }
        }
    }
}

/// Converts `image` into `out`, rows distributed over `runner`.
pub fn write_to_buffer(
    image: &ImageBundle,
    ctx: &OutputContext,
    planes: OutputPlanes,
    format: PixelFormat,
    out: &mut [u8],
    runner: &dyn ParallelRunner,
) -> Result<(), CodecError> {
    let writer = RowWriter::new(image, ctx, planes, format)?;
    let ysize = writer.out_ysize();
    let stride = writer.format.row_stride(writer.out_xsize)?;
    let needed = writer.format.preview_size(writer.out_xsize, ysize)?;
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall);
    }
    let rows: Vec<Mutex<&mut [u8]>> = out
        .chunks_mut(stride.max(1))
        .take(ysize)
        .map(Mutex::new)
        .collect();
    runner.run(ysize, &|y, _thread| {
        if let Ok(mut row) = rows[y].lock() {
            writer.write_row(y, &mut row);
        }
    });
    Ok(())
}

/// Converts `image` and hands every row to `callback`.
pub fn write_to_callback(
    image: &ImageBundle,
    ctx: &OutputContext,
    format: PixelFormat,
    callback: &mut dyn ImageOutCallback,
    runner: &dyn ParallelRunner,
) -> Result<(), CodecError> {
    let writer = RowWriter::new(image, ctx, OutputPlanes::Color, format)?;
    let ysize = writer.out_ysize();
    let row_size = writer.format.unaligned_row_size(writer.out_xsize)?;
    callback.init(runner.num_threads(), writer.out_xsize);
    {
        let callback = &*callback;
        runner.run(ysize, &|y, thread| {
            let mut row = vec![0u8; row_size];
            writer.write_row(y, &mut row);
            callback.run(thread, 0, y, &row);
        });
    }
    callback.destroy();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::SizeHeader;
    use crate::headers::extra_channel::ExtraChannelInfo;
    use crate::parallel::SequentialRunner;

    fn gray_image(xsize: usize, ysize: usize) -> (CodecMetadata, ImageBundle) {
        let mut metadata = CodecMetadata {
            size: SizeHeader::new(xsize as u32, ysize as u32),
            ..CodecMetadata::default()
        };
        metadata.image.color_encoding = crate::headers::color_encoding::ColorEncoding::srgb(true);
        let mut image = ImageBundle::new(xsize, ysize, 1);
        for (i, v) in image.channels[0].iter_mut().enumerate() {
            *v = i as f32 / 255.0;
        }
        (metadata, image)
    }

    #[test]
    fn test_buffer_sizes() {
        let format = PixelFormat {
            num_channels: 3,
            data_type: DataType::U16,
            endianness: Endianness::Big,
            align: 8,
        };
        assert_eq!(format.unaligned_row_size(5), Ok(30));
        assert_eq!(format.row_stride(5), Ok(32));
        assert_eq!(format.image_size(5, 4), Ok(128));
        assert_eq!(format.preview_size(5, 4), Ok(126));
    }

    #[test]
    fn test_buffer_size_overflow() {
        let format = PixelFormat::new(4, DataType::F32);
        assert_eq!(format.row_stride(1 << 30), Ok(1 << 34));
        assert_eq!(format.image_size(1 << 30, 1 << 30), Err(CodecError::ImageTooLarge));
        assert_eq!(format.preview_size(usize::MAX, 2), Err(CodecError::ImageTooLarge));
        let aligned = PixelFormat { align: 64, ..format };
        assert_eq!(aligned.row_stride(usize::MAX / 16), Err(CodecError::ImageTooLarge));
    }

    #[test]
    fn test_orientation_mapping() {
        // Stored 3x2 image, orientation 6 displays it as 2x3.
        assert_eq!(oriented_dims(3, 2, 6), (2, 3));
        assert_eq!(stored_position(6, 0, 0, 3, 2), (0, 1));
        assert_eq!(stored_position(6, 1, 2, 3, 2), (2, 0));
        assert_eq!(stored_position(3, 0, 0, 3, 2), (2, 1));
    }

    #[test]
    fn test_gray_to_rgba_with_orientation() {
        let (mut metadata, image) = gray_image(3, 2);
        metadata.image.orientation = 2;
        let ctx = OutputContext {
            metadata: &metadata,
            keep_orientation: false,
            render_spotcolors: true,
        };
        let format = PixelFormat::new(4, DataType::U8);
        let mut out = vec![0u8; format.image_size(3, 2).unwrap()];
        write_to_buffer(&image, &ctx, OutputPlanes::Color, format, &mut out, &SequentialRunner)
            .unwrap();
        assert_eq!(&out[..4], &[2, 2, 2, 255]);
        assert_eq!(&out[12..16], &[5, 5, 5, 255]);
    }

    #[test]
    fn test_buffer_too_small() {
        let (metadata, image) = gray_image(3, 2);
        let ctx = OutputContext {
            metadata: &metadata,
            keep_orientation: false,
            render_spotcolors: true,
        };
        let mut out = vec![0u8; 5];
        assert_eq!(
            write_to_buffer(
                &image,
                &ctx,
                OutputPlanes::Color,
                PixelFormat::new(1, DataType::U8),
                &mut out,
                &SequentialRunner
            ),
            Err(CodecError::BufferTooSmall)
        );
    }

    #[test]
    fn test_spot_color_rendering() {
        let (mut metadata, mut image) = gray_image(1, 1);
        let mut spot = ExtraChannelInfo::new(ExtraChannelType::SpotColor, 8);
        spot.spot_color = [1.0, 0.0, 0.0, 1.0];
        metadata.image.extra_channels.push(spot);
        image.channels[0] = vec![0.0];
        image.channels.push(vec![0.5]);

        let mut ctx = OutputContext {
            metadata: &metadata,
            keep_orientation: false,
            render_spotcolors: true,
        };
        let format = PixelFormat::new(1, DataType::F32);
        let mut out = vec![0u8; 4];
        write_to_buffer(&image, &ctx, OutputPlanes::Color, format, &mut out, &SequentialRunner)
            .unwrap();
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 0.5);

        ctx.render_spotcolors = false;
        write_to_buffer(&image, &ctx, OutputPlanes::Color, format, &mut out, &SequentialRunner)
            .unwrap();
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 0.0);

        write_to_buffer(
            &image,
            &ctx,
            OutputPlanes::ExtraChannel(0),
            format,
            &mut out,
            &SequentialRunner,
        )
        .unwrap();
        assert_eq!(f32::from_ne_bytes([out[0], out[1], out[2], out[3]]), 0.5);
    }

    #[test]
    fn test_callback_rows() {
        let (metadata, image) = gray_image(2, 3);
        let ctx = OutputContext {
            metadata: &metadata,
            keep_orientation: false,
            render_spotcolors: true,
        };
        let rows = Mutex::new(Vec::new());
        let mut callback = FnImageOutCallback(|x: usize, y: usize, pixels: &[u8]| {
            rows.lock().unwrap().push((x, y, pixels.to_vec()));
        });
        write_to_callback(
            &image,
            &ctx,
            PixelFormat::new(1, DataType::U8),
            &mut callback,
            &SequentialRunner,
        )
        .unwrap();
        let rows = rows.into_inner().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], (0, 2, vec![4, 5]));
    }
}
