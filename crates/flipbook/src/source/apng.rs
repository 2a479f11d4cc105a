//! APNG frame source. A PNG without an `acTL` chunk parses as a single still frame.

use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::time::Duration;

use super::pixels::{PackedPixels, SampleLayout};
use super::types::{BlendOp, ContainerFormat, DisposalOp, Rect, RepeatPolicy};
use super::{AnimationContainer, Frame, ParseOptions, frame_from_source, rewind};
use crate::error::DecodeError;

const FORMAT: ContainerFormat = ContainerFormat::Apng;

pub fn parse<R: Read + Seek>(
    mut stream: R,
    options: &ParseOptions,
) -> Result<AnimationContainer, DecodeError> {
    rewind(&mut stream)?;
    let frame_controls = count_frame_controls(&mut stream).map_err(DecodeError::Unreadable)?;
    rewind(&mut stream)?;

    let mut decoder = ::png::Decoder::new(BufReader::new(stream));
    decoder.set_transformations(::png::Transformations::EXPAND | ::png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().map_err(map_error)?;

    let (width, height) = {
        let info = reader.info();
        (info.width, info.height)
    };
    options.check_canvas(FORMAT, width, height)?;

    let Some(actl) = reader.info().animation_control().cloned() else {
        let frame = read_still(&mut reader, width, height, options)?;
        let container =
            AnimationContainer::new(FORMAT, width, height, vec![frame], RepeatPolicy::Count(1))?;
        log::info!("Loaded PNG: {}x{}, still image", width, height);
        return Ok(container);
    };

    if actl.num_frames == 0 {
        return Err(DecodeError::malformed(FORMAT, "acTL declares zero frames"));
    }
    if frame_controls > actl.num_frames {
        return Err(DecodeError::malformed(
            FORMAT,
            format!("{frame_controls} fcTL chunks but acTL declares {} frames", actl.num_frames),
        ));
    }

    // No fcTL before IDAT: the default image is a fallback for non-APNG viewers.
    if reader.info().frame_control().is_none() {
        let mut skip = vec![0; reader.output_buffer_size()];
        reader.next_frame(&mut skip).map_err(map_error)?;
    }

    let mut frames = Vec::with_capacity(actl.num_frames as usize);
    for index in 0..actl.num_frames as usize {
        let mut buf = vec![0; reader.output_buffer_size()];
        let out = reader.next_frame(&mut buf).map_err(|e| match e {
            ::png::DecodingError::IoError(ref err)
                if err.kind() == io::ErrorKind::UnexpectedEof =>
            {
                DecodeError::malformed(
                    FORMAT,
                    format!(
                        "stream ended after {index} of {} declared frames",
                        actl.num_frames
                    ),
                )
            }
            other => map_error(other),
        })?;
        let Some(fc) = reader.info().frame_control().cloned() else {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("frame {index} has no fcTL"),
            ));
        };

        let rect = Rect::new(fc.x_offset, fc.y_offset, fc.width, fc.height);
        if (out.width, out.height) != (rect.width, rect.height) {
            return Err(DecodeError::malformed(
                FORMAT,
                format!(
                    "frame {index} decoded {}x{} but fcTL says {}x{}",
                    out.width, out.height, rect.width, rect.height
                ),
            ));
        }
        if !rect.fits_within(width, height) {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("frame {index} rect {rect:?} exceeds the {width}x{height} canvas"),
            ));
        }
        if index == 0 && rect != Rect::full(width, height) {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("first frame rect {rect:?} must cover the canvas"),
            ));
        }

        let den = if fc.delay_den == 0 { 100 } else { fc.delay_den };
        let declared =
            Duration::from_nanos(u64::from(fc.delay_num) * 1_000_000_000 / u64::from(den));

        let mut disposal = map_dispose(fc.dispose_op);
        // Nothing to restore before the first frame.
        if index == 0 && disposal == DisposalOp::Previous {
            disposal = DisposalOp::Background;
        }

        let pixels = packed(&out, buf)?;
        frames.push(frame_from_source(
            index,
            options.clamp_delay(declared),
            rect,
            map_blend(fc.blend_op),
            disposal,
            Box::new(pixels),
            options.memoize_frames,
        ));
    }

    let repeat = match actl.num_plays {
        0 => RepeatPolicy::Infinite,
        n => RepeatPolicy::Count(n),
    };
    let container = AnimationContainer::new(FORMAT, width, height, frames, repeat)?;
    log::info!(
        "Loaded APNG: {}x{}, {} frame{}",
        width,
        height,
        container.frame_count(),
        if container.frame_count() == 1 { "" } else { "s" }
    );
    Ok(container)
}

/// Count `fcTL` chunks by walking chunk headers. A truncated stream yields
/// the count so far; the decoder reports the truncation itself.
fn count_frame_controls<R: Read + Seek>(stream: &mut R) -> io::Result<u32> {
    let mut signature = [0; 8];
    if let Err(e) = stream.read_exact(&mut signature) {
        return eof_ok(e, 0);
    }

    let mut count = 0;
    let mut header = [0; 8];
    loop {
        if let Err(e) = stream.read_exact(&mut header) {
            return eof_ok(e, count);
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        match &header[4..] {
            b"fcTL" => count += 1,
            b"IEND" => return Ok(count),
            _ => {}
        }
        // data plus CRC
        stream.seek(SeekFrom::Current(i64::from(length) + 4))?;
    }
}

fn eof_ok(err: io::Error, count: u32) -> io::Result<u32> {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Ok(count)
    } else {
        Err(err)
    }
}

fn read_still<R: Read>(
    reader: &mut ::png::Reader<R>,
    width: u32,
    height: u32,
    options: &ParseOptions,
) -> Result<Frame, DecodeError> {
    let mut buf = vec![0; reader.output_buffer_size()];
    let out = reader.next_frame(&mut buf).map_err(map_error)?;
    let pixels = packed(&out, buf)?;
    Ok(frame_from_source(
        0,
        options.clamp_delay(Duration::ZERO),
        Rect::full(width, height),
        BlendOp::Source,
        DisposalOp::None,
        Box::new(pixels),
        options.memoize_frames,
    ))
}

/// Strip row padding and tag the sample layout.
fn packed(out: &::png::OutputInfo, buf: Vec<u8>) -> Result<PackedPixels, DecodeError> {
    let layout = match (out.color_type, out.bit_depth) {
        (::png::ColorType::Grayscale, ::png::BitDepth::Eight) => SampleLayout::Gray,
        (::png::ColorType::GrayscaleAlpha, ::png::BitDepth::Eight) => SampleLayout::GrayAlpha,
        (::png::ColorType::Rgb, ::png::BitDepth::Eight) => SampleLayout::Rgb,
        (::png::ColorType::Rgba, ::png::BitDepth::Eight) => SampleLayout::Rgba,
        (color, depth) => {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("unsupported output {color:?} at {depth:?}"),
            ));
        }
    };

    let row = out.width as usize * layout.channels();
    let samples = if out.line_size == row {
        let mut buf = buf;
        buf.truncate(row * out.height as usize);
        buf
    } else {
        buf.chunks(out.line_size)
            .take(out.height as usize)
            .flat_map(|line| &line[..row.min(line.len())])
            .copied()
            .collect()
    };

    Ok(PackedPixels {
        width: out.width,
        height: out.height,
        layout,
        samples,
    })
}

fn map_dispose(op: ::png::DisposeOp) -> DisposalOp {
    match op {
        ::png::DisposeOp::None => DisposalOp::None,
        ::png::DisposeOp::Background => DisposalOp::Background,
        ::png::DisposeOp::Previous => DisposalOp::Previous,
    }
}

fn map_blend(op: ::png::BlendOp) -> BlendOp {
    match op {
        ::png::BlendOp::Source => BlendOp::Source,
        ::png::BlendOp::Over => BlendOp::Over,
    }
}

fn map_error(err: ::png::DecodingError) -> DecodeError {
    match err {
        ::png::DecodingError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            DecodeError::malformed(FORMAT, format!("truncated stream: {e}"))
        }
        ::png::DecodingError::IoError(e) => DecodeError::Unreadable(e),
        other => DecodeError::malformed(FORMAT, other.to_string()),
    }
}
