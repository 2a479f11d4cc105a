//! GIF frame source.

use std::io::{self, BufReader, Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use super::pixels::IndexedPixels;
use super::types::{BlendOp, ContainerFormat, DisposalOp, Rect, RepeatPolicy};
use super::{AnimationContainer, ParseOptions, frame_from_source, rewind};
use crate::error::DecodeError;

const FORMAT: ContainerFormat = ContainerFormat::Gif;

/// Parse an animated (or still) GIF. Frame pixels stay palette-indexed until decoded.
pub fn parse<R: Read + Seek>(
    mut stream: R,
    options: &ParseOptions,
) -> Result<AnimationContainer, DecodeError> {
    rewind(&mut stream)?;

    let mut decoder = ::gif::DecodeOptions::new();
    decoder.set_color_output(::gif::ColorOutput::Indexed);
    let mut reader = decoder
        .read_info(BufReader::new(stream))
        .map_err(map_error)?;

    let width = reader.width() as u32;
    let height = reader.height() as u32;
    options.check_canvas(FORMAT, width, height)?;

    let global_palette: Option<Arc<[u8]>> = reader.global_palette().map(Arc::from);
    let mut frames = Vec::new();

    while let Some(frame) = reader.read_next_frame().map_err(map_error)? {
        let index = frames.len();
        let rect = Rect::new(
            frame.left as u32,
            frame.top as u32,
            frame.width as u32,
            frame.height as u32,
        );
        if !rect.fits_within(width, height) {
            return Err(DecodeError::malformed(
                FORMAT,
                format!("frame {index} rect {rect:?} exceeds the {width}x{height} screen"),
            ));
        }

        // GIF delay is in centiseconds
        let delay = options.clamp_delay(Duration::from_millis(frame.delay as u64 * 10));
        let palette = frame
            .palette
            .as_deref()
            .map(Arc::from)
            .or_else(|| global_palette.clone());
        let pixels = IndexedPixels {
            width: rect.width,
            height: rect.height,
            indices: frame.buffer.to_vec(),
            palette,
            transparent: frame.transparent,
        };

        // GIF frames always draw over the canvas; the transparent index leaves it untouched.
        frames.push(frame_from_source(
            index,
            delay,
            rect,
            BlendOp::Over,
            map_disposal(frame.dispose),
            Box::new(pixels),
            options.memoize_frames,
        ));
    }

    // The NETSCAPE2.0 block may follow the first image, so read it last.
    let repeat = match reader.repeat() {
        ::gif::Repeat::Infinite => RepeatPolicy::Infinite,
        // Loop count n means n repeats after the first play.
        ::gif::Repeat::Finite(n) => RepeatPolicy::Count(n as u32 + 1),
    };

    let container = AnimationContainer::new(FORMAT, width, height, frames, repeat)?;
    log::info!(
        "Loaded GIF: {}x{}, {} frame{}",
        width,
        height,
        container.frame_count(),
        if container.frame_count() == 1 { "" } else { "s" }
    );
    Ok(container)
}

fn map_disposal(dispose: ::gif::DisposalMethod) -> DisposalOp {
    match dispose {
        ::gif::DisposalMethod::Background => DisposalOp::Background,
        ::gif::DisposalMethod::Previous => DisposalOp::Previous,
        ::gif::DisposalMethod::Any | ::gif::DisposalMethod::Keep => DisposalOp::None,
    }
}

fn map_error(err: ::gif::DecodingError) -> DecodeError {
    match err {
        ::gif::DecodingError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            DecodeError::malformed(FORMAT, format!("truncated stream: {e}"))
        }
        ::gif::DecodingError::Io(e) => DecodeError::Unreadable(e),
        other => DecodeError::malformed(FORMAT, other.to_string()),
    }
}
