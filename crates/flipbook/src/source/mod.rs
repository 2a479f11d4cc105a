pub mod apng;
pub mod gif;
pub mod pixels;
pub mod types;

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use crate::canvas::Bitmap;
use crate::error::{DecodeError, FrameDecodeError};
use pixels::{LazyPixels, PixelSource};
use types::{BlendOp, ContainerFormat, DisposalOp, Rect, RepeatPolicy};

/// Delay floor for frames that declare zero (or near-zero) delay.
pub const DEFAULT_MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

/// Default canvas pixel limit (8192x8192).
pub const DEFAULT_MAX_CANVAS_PIXELS: u64 = 8192 * 8192;

/// Knobs shared by every frame source.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub min_frame_delay: Duration,
    pub max_canvas_pixels: u64,
    pub memoize_frames: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            min_frame_delay: DEFAULT_MIN_FRAME_DELAY,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            memoize_frames: true,
        }
    }
}

impl ParseOptions {
    /// Clamp a declared delay up to the configured floor (never below 1ms).
    pub fn clamp_delay(&self, declared: Duration) -> Duration {
        declared.max(self.min_frame_delay).max(Duration::from_millis(1))
    }

    pub(crate) fn check_canvas(
        &self,
        format: ContainerFormat,
        width: u32,
        height: u32,
    ) -> Result<(), DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::malformed(
                format,
                format!("canvas {width}x{height} must be at least 1x1"),
            ));
        }
        if width as u64 * height as u64 > self.max_canvas_pixels {
            return Err(DecodeError::TooLarge {
                width,
                height,
                limit: self.max_canvas_pixels,
            });
        }
        Ok(())
    }
}

/// One logical animation step.
pub struct Frame {
    pub index: usize,
    pub delay: Duration,
    pub rect: Rect,
    pub blend: BlendOp,
    pub disposal: DisposalOp,
    pixels: LazyPixels,
}

impl Frame {
    pub fn new(
        index: usize,
        delay: Duration,
        rect: Rect,
        blend: BlendOp,
        disposal: DisposalOp,
        pixels: LazyPixels,
    ) -> Self {
        Self {
            index,
            delay,
            rect,
            blend,
            disposal,
            pixels,
        }
    }

    /// Pixels at `rect` size, decoded on first use.
    pub fn decode(&self) -> Result<Arc<Bitmap>, FrameDecodeError> {
        self.pixels.get(self.index)
    }

    pub fn is_decoded(&self) -> bool {
        self.pixels.is_cached()
    }

    pub(crate) fn evict(&self) {
        self.pixels.evict();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("delay", &self.delay)
            .field("rect", &self.rect)
            .field("blend", &self.blend)
            .field("disposal", &self.disposal)
            .finish_non_exhaustive()
    }
}

/// A parsed animation: immutable canvas geometry plus its ordered frames.
#[derive(Debug)]
pub struct AnimationContainer {
    format: ContainerFormat,
    width: u32,
    height: u32,
    frames: Vec<Frame>,
    repeat_hint: RepeatPolicy,
}

impl AnimationContainer {
    /// Validate and assemble a container. Every frame rect must fit the canvas
    /// and match its pixel source's size.
    pub fn new(
        format: ContainerFormat,
        width: u32,
        height: u32,
        frames: Vec<Frame>,
        repeat_hint: RepeatPolicy,
    ) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::malformed(
                format,
                format!("canvas {width}x{height} must be at least 1x1"),
            ));
        }
        if frames.is_empty() {
            return Err(DecodeError::malformed(format, "no frames"));
        }
        for (i, frame) in frames.iter().enumerate() {
            if frame.index != i {
                return Err(DecodeError::malformed(
                    format,
                    format!("frame {} stored at position {i}", frame.index),
                ));
            }
            if !frame.rect.fits_within(width, height) {
                return Err(DecodeError::malformed(
                    format,
                    format!(
                        "frame {i} rect {:?} exceeds the {width}x{height} canvas",
                        frame.rect
                    ),
                ));
            }
            if frame.pixels.dimensions() != (frame.rect.width, frame.rect.height) {
                return Err(DecodeError::malformed(
                    format,
                    format!("frame {i} pixel data does not match its rect"),
                ));
            }
        }
        Ok(Self {
            format,
            width,
            height,
            frames,
            repeat_hint,
        })
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Loop count declared by the file itself.
    pub fn repeat_hint(&self) -> RepeatPolicy {
        self.repeat_hint
    }

    /// A single frame never changes over time, so the host can draw it once.
    pub fn is_static(&self) -> bool {
        self.frames.len() == 1
    }

    pub fn total_duration(&self) -> Duration {
        self.frames.iter().map(|f| f.delay).sum()
    }

    /// Drop memoized frame pixels.
    pub fn release_decoded(&self) {
        for frame in &self.frames {
            frame.evict();
        }
    }
}

/// Parse a seekable byte stream of a known container format.
pub fn parse<R: Read + Seek>(
    format: ContainerFormat,
    stream: R,
    options: &ParseOptions,
) -> Result<AnimationContainer, DecodeError> {
    match format {
        ContainerFormat::Gif => self::gif::parse(stream, options),
        ContainerFormat::Apng => self::apng::parse(stream, options),
    }
}

/// Shorthand for a frame whose pixels are already decoded.
pub fn decoded_frame(
    index: usize,
    delay: Duration,
    rect: Rect,
    blend: BlendOp,
    disposal: DisposalOp,
    bitmap: Bitmap,
) -> Frame {
    frame_from_source(
        index,
        delay,
        rect,
        blend,
        disposal,
        Box::new(pixels::DecodedPixels(bitmap)),
        true,
    )
}

/// Frame backed by any [`PixelSource`], e.g. a host-provided decoder.
pub fn frame_from_source(
    index: usize,
    delay: Duration,
    rect: Rect,
    blend: BlendOp,
    disposal: DisposalOp,
    source: Box<dyn PixelSource>,
    memoize: bool,
) -> Frame {
    Frame::new(
        index,
        delay,
        rect,
        blend,
        disposal,
        LazyPixels::new(source, memoize),
    )
}

fn rewind<R: Seek>(stream: &mut R) -> Result<(), DecodeError> {
    stream
        .seek(SeekFrom::Start(0))
        .map(|_| ())
        .map_err(DecodeError::NotSeekable)
}
