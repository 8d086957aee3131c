use clap::{Parser, Subcommand, ValueEnum};
use jxcodec_rs::box_type::BoxType;
use jxcodec_rs::decoder::{BasicInfo, ColorProfileTarget, Decoder, DecoderStatus, Events};
use jxcodec_rs::encoder::{Encoder, FrameImage, FrameSettings, ImageSettings};
use jxcodec_rs::output::{DataType, Endianness, PixelFormat};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Parser)]
#[command(name = "jxcodec")]
#[command(author = "jxcodec-rs contributors")]
#[command(version)]
#[command(about = "Incremental image codestream decoder and encoder", long_about = None)]
#[command(after_help = "EXAMPLES:
    jxcodec decode -i image.jxl -o image.pam
    jxcodec decode -i image.jxl -o image.ppm -f pnm --bits 16 --chunk-size 4096
    jxcodec encode -i image.ppm -o image.jxl --passes 2 --container
    jxcodec encode -i raw.bin -o image.jxl -w 640 -H 480 -c 3
    jxcodec info -i image.jxl
    jxcodec boxes -i image.jxl --decompress")]
struct Cli {
    /// Print decoder diagnostics to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an image to PAM, PNM or raw interleaved samples
    #[command(visible_alias = "d")]
    Decode {
        /// Input file path
        #[arg(short, long, help = "Input codestream or container file")]
        input: PathBuf,

        /// Output file path
        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "pam", value_enum)]
        format: OutputFormat,

        /// Bits per output sample
        #[arg(short, long, default_value = "8", value_parser = ["8", "16"])]
        bits: String,

        /// Feed the decoder this many new bytes at a time
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Index of the displayed frame to write
        #[arg(long, default_value = "0")]
        frame: usize,

        /// Keep the stored orientation instead of undoing it
        #[arg(long)]
        keep_orientation: bool,
    },

    /// Encode PNM or raw samples losslessly
    #[command(visible_alias = "e")]
    Encode {
        /// Input file path
        #[arg(short, long, help = "Input PGM/PPM file, or raw samples with --width/--height")]
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Image width (raw input)
        #[arg(short, long)]
        width: Option<u32>,

        /// Image height (raw input)
        #[arg(short = 'H', long)]
        height: Option<u32>,

        /// Number of channels, 1 or 3 (raw input)
        #[arg(short, long, default_value = "1")]
        channels: u32,

        /// Number of progressive passes
        #[arg(short, long, default_value = "1")]
        passes: u32,

        /// Wrap the codestream in a box container
        #[arg(long)]
        container: bool,

        /// Split the codestream into partial boxes of this many bytes
        #[arg(long)]
        split: Option<usize>,
    },

    /// Show image information
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// List the boxes of a container file
    #[command(visible_alias = "b")]
    Boxes {
        #[arg(short, long)]
        input: PathBuf,

        /// Report the inner type of brotli compressed boxes
        #[arg(long)]
        decompress: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Portable Arbitrary Map, keeps alpha
    Pam,
    /// Portable GrayMap/PixMap, color channels only
    Pnm,
    /// Interleaved samples in native byte order
    Raw,
}

/// A simple stderr logger.
#[cfg(feature = "logging")]
static LOGGER: SimpleLogger = SimpleLogger;

#[cfg(feature = "logging")]
struct SimpleLogger;

#[cfg(feature = "logging")]
impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let target = if !record.target().is_empty() {
                record.target()
            } else {
                record.module_path().unwrap_or_default()
            };
            let args = record.args();

            match record.level() {
                log::Level::Error => eprintln!("Error (in {target}): {args}"),
                log::Level::Warn => eprintln!("Warning (in {target}): {args}"),
                log::Level::Info => eprintln!("Info (in {target}): {args}"),
                log::Level::Debug => eprintln!("Debug (in {target}): {args}"),
                log::Level::Trace => eprintln!("Trace (in {target}): {args}"),
            }
        }
    }

    fn flush(&self) {}
}

#[cfg(feature = "logging")]
fn init_logging(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        });
    }
}

#[cfg(not(feature = "logging"))]
fn init_logging(_verbose: bool) {}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Decode {
            input,
            output,
            format,
            bits,
            chunk_size,
            frame,
            keep_orientation,
        } => decode_image(
            &input,
            &output,
            format,
            bits == "16",
            chunk_size,
            frame,
            keep_orientation,
        ),
        Commands::Encode {
            input,
            output,
            width,
            height,
            channels,
            passes,
            container,
            split,
        } => encode_image(&input, &output, width, height, channels, passes, container, split),
        Commands::Info { input } => show_info(&input),
        Commands::Boxes { input, decompress } => list_boxes(&input, decompress),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Decoded samples of one image, interleaved.
struct DecodedImage {
    info: BasicInfo,
    format: PixelFormat,
    pixels: Vec<u8>,
}

/// Offers `data` to the decoder `chunk` new bytes at a time, re-offering
/// whatever the decoder left unconsumed, until `on_event` returns `false`
/// or decoding succeeds.
fn drive<'a, F>(
    decoder: &mut Decoder<'a>,
    data: &'a [u8],
    chunk: Option<usize>,
    mut on_event: F,
) -> CliResult<()>
where
    F: FnMut(&mut Decoder<'a>, DecoderStatus) -> CliResult<bool>,
{
    let chunk = chunk.unwrap_or(data.len()).max(1);
    let mut start = 0;
    let mut end = chunk.min(data.len());
    decoder.set_input(&data[start..end])?;
    if end == data.len() {
        decoder.close_input();
    }
    loop {
        let status = decoder.process()?;
        match status {
            DecoderStatus::Success => return Ok(()),
            DecoderStatus::NeedMoreInput => {
                let remaining = decoder.release_input();
                start = end - remaining;
                end = (end + chunk).min(data.len());
                decoder.set_input(&data[start..end])?;
                if end == data.len() {
                    decoder.close_input();
                }
            }
            _ => {
                if !on_event(decoder, status)? {
                    return Ok(());
                }
            }
        }
    }
}

fn decode_to_samples(
    data: &[u8],
    output: OutputFormat,
    sixteen_bit: bool,
    chunk: Option<usize>,
    frame: usize,
    keep_orientation: bool,
) -> CliResult<DecodedImage> {
    let pixels = Mutex::new(Vec::new());
    let mut result: Option<(BasicInfo, PixelFormat)> = None;

    let mut decoder = Decoder::new();
    decoder.subscribe_events(Events::BASIC_INFO | Events::FULL_IMAGE)?;
    decoder.set_keep_orientation(keep_orientation)?;
    #[cfg(feature = "rayon")]
    decoder.set_parallel_runner(Box::new(jxcodec_rs::parallel::RayonRunner))?;

    let pixels_ref = &pixels;
    let mut done = false;
    drive(&mut decoder, data, chunk, |decoder, status| {
        match status {
            DecoderStatus::BasicInfo => {
                let info = decoder.basic_info()?;
                let with_alpha = info.alpha_bits > 0 && !matches!(output, OutputFormat::Pnm);
                let format = PixelFormat {
                    endianness: match output {
                        OutputFormat::Raw => Endianness::Native,
                        _ => Endianness::Big,
                    },
                    ..PixelFormat::new(
                        info.num_color_channels + u32::from(with_alpha),
                        if sixteen_bit { DataType::U16 } else { DataType::U8 },
                    )
                };
                if frame > 0 {
                    decoder.skip_frames(frame);
                }
                result = Some((info, format));
            }
            DecoderStatus::NeedImageOutBuffer => {
                let Some((info, format)) = result else {
                    return Err("image requested before basic info".into());
                };
                let size = decoder.image_out_buffer_size(&format)?;
                let stride = format.row_stride(info.xsize as usize)?;
                let bytes_per_pixel = format.bytes_per_pixel();
                if let Ok(mut buffer) = pixels_ref.lock() {
                    buffer.clear();
                    buffer.resize(size, 0);
                }
                decoder.set_image_out_callback(format, move |x, y, row: &[u8]| {
                    if let Ok(mut buffer) = pixels_ref.lock() {
                        let offset = y * stride + x * bytes_per_pixel;
                        if let Some(dst) = buffer.get_mut(offset..offset + row.len()) {
                            dst.copy_from_slice(row);
                        }
                    }
                })?;
            }
            DecoderStatus::FullImage => {
                done = true;
                return Ok(false);
            }
            _ => {}
        }
        Ok(true)
    })?;
    drop(decoder);

    let (info, format) = result.ok_or("file has no basic info")?;
    if !done {
        return Err(format!("file has no frame {}", frame).into());
    }
    let pixels = pixels.into_inner().map_err(|_| "output buffer poisoned")?;
    Ok(DecodedImage { info, format, pixels })
}

fn decode_image(
    input: &PathBuf,
    output: &PathBuf,
    format: OutputFormat,
    sixteen_bit: bool,
    chunk: Option<usize>,
    frame: usize,
    keep_orientation: bool,
) -> CliResult<()> {
    let data = fs::read(input)?;
    let image = decode_to_samples(&data, format, sixteen_bit, chunk, frame, keep_orientation)?;
    let (width, height) = (image.info.xsize, image.info.ysize);
    let channels = image.format.num_channels;
    let maxval = if sixteen_bit { 65535 } else { 255 };

    let mut encoded = Vec::with_capacity(image.pixels.len() + 64);
    match format {
        OutputFormat::Pam => {
            let tuple_type = match channels {
                1 => "GRAYSCALE",
                2 => "GRAYSCALE_ALPHA",
                3 => "RGB",
                _ => "RGB_ALPHA",
            };
            encoded.extend_from_slice(
                format!(
                    "P7\nWIDTH {}\nHEIGHT {}\nDEPTH {}\nMAXVAL {}\nTUPLTYPE {}\nENDHDR\n",
                    width, height, channels, maxval, tuple_type
                )
                .as_bytes(),
            );
        }
        OutputFormat::Pnm => {
            let magic = if channels == 1 { "P5" } else { "P6" };
            let header = format!("{}\n{} {}\n{}\n", magic, width, height, maxval);
            encoded.extend_from_slice(header.as_bytes());
        }
        OutputFormat::Raw => {}
    }
    encoded.extend_from_slice(&image.pixels);
    fs::write(output, &encoded)?;

    println!(
        "✓ Decoded {}x{} image ({} channels, {} bits) to {:?}",
        width,
        height,
        channels,
        if sixteen_bit { 16 } else { 8 },
        output
    );
    Ok(())
}

/// Samples of a PGM/PPM file plus their bit depth.
struct PnmImage {
    width: u32,
    height: u32,
    channels: u32,
    bits: u32,
    planes: Vec<Vec<u16>>,
}

fn parse_pnm(data: &[u8]) -> CliResult<PnmImage> {
    let mut pos = 2;
    let mut next_field = || -> CliResult<u32> {
        loop {
            match data.get(pos) {
                Some(b'#') => {
                    while data.get(pos).is_some_and(|&b| b != b'\n') {
                        pos += 1;
                    }
                }
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(_) => break,
                None => return Err("truncated PNM header".into()),
            }
        }
        let start = pos;
        while data.get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }
        Ok(std::str::from_utf8(&data[start..pos])?.parse::<u32>()?)
    };

    let channels = match data.get(..2) {
        Some(b"P5") => 1,
        Some(b"P6") => 3,
        _ => return Err("only binary PGM (P5) and PPM (P6) are supported".into()),
    };
    let width = next_field()?;
    let height = next_field()?;
    let maxval = next_field()?;
    if maxval == 0 || maxval > 65535 {
        return Err("invalid PNM maxval".into());
    }
    // Exactly one whitespace byte separates the header from the samples.
    let body = data.get(pos + 1..).ok_or("truncated PNM header")?;

    let wide = maxval > 255;
    let num_pixels = width as usize * height as usize;
    let sample_bytes = if wide { 2 } else { 1 };
    if body.len() < num_pixels * channels as usize * sample_bytes {
        return Err("truncated PNM samples".into());
    }
    let samples: Vec<u16> = if wide {
        body.chunks_exact(2).map(|b| u16::from_be_bytes([b[0], b[1]])).collect()
    } else {
        body.iter().map(|&b| u16::from(b)).collect()
    };
    let planes = deinterleave(&samples, channels as usize, num_pixels);
    Ok(PnmImage {
        width,
        height,
        channels,
        bits: 32 - maxval.leading_zeros(),
        planes,
    })
}

fn deinterleave(samples: &[u16], channels: usize, num_pixels: usize) -> Vec<Vec<u16>> {
    (0..channels)
        .map(|c| (0..num_pixels).map(|i| samples[i * channels + c]).collect())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn encode_image(
    input: &PathBuf,
    output: &PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    channels: u32,
    passes: u32,
    container: bool,
    split: Option<usize>,
) -> CliResult<()> {
    let data = fs::read(input)?;
    let image = if data.starts_with(b"P5") || data.starts_with(b"P6") {
        parse_pnm(&data)?
    } else {
        let (Some(width), Some(height)) = (width, height) else {
            return Err("raw input needs --width and --height".into());
        };
        if channels != 1 && channels != 3 {
            return Err("raw input must have 1 or 3 channels".into());
        }
        let num_pixels = width as usize * height as usize;
        if data.len() < num_pixels * channels as usize {
            return Err("raw input is smaller than width * height * channels".into());
        }
        let samples: Vec<u16> = data.iter().map(|&b| u16::from(b)).collect();
        PnmImage {
            width,
            height,
            channels,
            bits: 8,
            planes: deinterleave(&samples, channels as usize, num_pixels),
        }
    };

    let mut settings = if image.channels == 1 {
        ImageSettings::gray(image.width, image.height)
    } else {
        ImageSettings::new(image.width, image.height)
    };
    settings.metadata.bits_per_sample = image.bits;

    let mut encoder = Encoder::new(settings);
    encoder.use_container(container || split.is_some());
    encoder.set_codestream_split(split)?;
    let frame = FrameSettings {
        num_passes: passes,
        ..FrameSettings::default()
    };
    encoder.add_frame(
        frame,
        FrameImage::new(image.width as usize, image.height as usize, image.planes),
    )?;
    let encoded = encoder.finish()?;
    fs::write(output, &encoded)?;

    println!(
        "✓ Encoded {}x{} image ({} channels, {} bits) to {:?}, {} bytes",
        image.width,
        image.height,
        image.channels,
        image.bits,
        output,
        encoded.len()
    );
    Ok(())
}

fn show_info(input: &PathBuf) -> CliResult<()> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let mut decoder = Decoder::new();
    decoder.subscribe_events(Events::BASIC_INFO | Events::COLOR_ENCODING | Events::FRAME)?;
    let mut frame_index = 0;
    drive(&mut decoder, &data, None, |decoder, status| {
        match status {
            DecoderStatus::BasicInfo => {
                let info = decoder.basic_info()?;
                println!("Container: {}", if info.have_container { "yes" } else { "no" });
                println!("Dimensions: {}x{}", info.xsize, info.ysize);
                println!("Bits per sample: {}", info.bits_per_sample);
                println!("Color channels: {}", info.num_color_channels);
                println!("Extra channels: {}", info.num_extra_channels);
                println!("Orientation: {}", info.orientation);
                if info.have_preview {
                    println!("Preview: {}x{}", info.preview_xsize, info.preview_ysize);
                }
                if info.have_animation {
                    println!(
                        "Animation: {}/{} ticks per second, {} loops",
                        info.animation.tps_numerator,
                        info.animation.tps_denominator,
                        info.animation.num_loops
                    );
                }
                for index in 0..info.num_extra_channels as usize {
                    let channel = decoder.extra_channel_info(index)?;
                    println!(
                        "  Extra channel {}: {:?}, {} bits, {:?}",
                        index,
                        channel.channel_type,
                        channel.bits_per_sample,
                        decoder.extra_channel_name(index)?
                    );
                }
            }
            DecoderStatus::ColorEncoding => {
                match decoder.color_as_encoded_profile(ColorProfileTarget::Original) {
                    Ok(encoding) => println!(
                        "Color: {:?}, {:?} primaries, {:?} transfer",
                        encoding.color_space, encoding.primaries, encoding.transfer_function
                    ),
                    Err(_) => println!(
                        "Color: ICC profile, {} bytes",
                        decoder.icc_profile(ColorProfileTarget::Original)?.len()
                    ),
                }
            }
            DecoderStatus::Frame => {
                let header = decoder.frame_header()?;
                let layer = header.layer_info;
                print!(
                    "Frame {}: {}x{} at ({}, {}), duration {}",
                    frame_index,
                    layer.xsize,
                    layer.ysize,
                    layer.crop_x0,
                    layer.crop_y0,
                    header.duration
                );
                if header.name_length > 0 {
                    print!(", name {:?}", decoder.frame_name()?);
                }
                println!("{}", if header.is_last { ", last" } else { "" });
                frame_index += 1;
            }
            _ => {}
        }
        Ok(true)
    })?;
    Ok(())
}

fn list_boxes(input: &PathBuf, decompress: bool) -> CliResult<()> {
    let data = fs::read(input)?;

    let mut decoder = Decoder::new();
    decoder.subscribe_events(Events::BOX)?;
    decoder.set_decompress_boxes(decompress);
    let mut count = 0;
    drive(&mut decoder, &data, None, |decoder, status| {
        if status == DecoderStatus::Box {
            let box_type = decoder.box_type(false)?;
            let size = decoder.box_size_raw()?;
            let size = if size == 0 {
                "to end of file".to_string()
            } else {
                format!("{} bytes", size)
            };
            if box_type == BoxType::BROTLI_COMPRESSED {
                println!("{} ({}), {}", box_type, decoder.box_type(true)?, size);
            } else {
                println!("{}, {}", box_type, size);
            }
            count += 1;
        }
        Ok(true)
    })?;
    if count == 0 {
        println!("Bare codestream, no boxes");
    }
    Ok(())
}
