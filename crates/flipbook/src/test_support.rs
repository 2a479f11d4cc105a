//! In-memory fixture builders shared by the unit tests.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::canvas::Bitmap;
use crate::source::pixels::PixelSource;
use crate::source::types::{BlendOp, ContainerFormat, DisposalOp, Rect, RepeatPolicy};
use crate::source::{AnimationContainer, Frame, decoded_frame, frame_from_source};

#[derive(Clone)]
pub struct GifFrameSpec {
    pub rect: Rect,
    pub delay_cs: u16,
    pub dispose: gif::DisposalMethod,
    pub palette: Vec<u8>,
    pub indices: Vec<u8>,
    pub transparent: Option<u8>,
}

impl GifFrameSpec {
    pub fn solid(rect: Rect, rgb: [u8; 3], delay_cs: u16) -> Self {
        Self {
            rect,
            delay_cs,
            dispose: gif::DisposalMethod::Keep,
            palette: rgb.to_vec(),
            indices: vec![0; rect.area() as usize],
            transparent: None,
        }
    }

    pub fn with_dispose(mut self, dispose: gif::DisposalMethod) -> Self {
        self.dispose = dispose;
        self
    }
}

pub fn gif_bytes(
    width: u16,
    height: u16,
    frames: &[GifFrameSpec],
    repeat: Option<gif::Repeat>,
) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width, height, &[]).unwrap();
        if let Some(repeat) = repeat {
            encoder.set_repeat(repeat).unwrap();
        }
        for spec in frames {
            let frame = gif::Frame {
                left: spec.rect.x as u16,
                top: spec.rect.y as u16,
                width: spec.rect.width as u16,
                height: spec.rect.height as u16,
                delay: spec.delay_cs,
                dispose: spec.dispose,
                transparent: spec.transparent,
                palette: Some(spec.palette.clone()),
                buffer: Cow::Borrowed(spec.indices.as_slice()),
                ..gif::Frame::default()
            };
            encoder.write_frame(&frame).unwrap();
        }
    }
    out
}

#[derive(Clone)]
pub struct ApngFrameSpec {
    pub rect: Rect,
    pub delay: (u16, u16),
    pub dispose: png::DisposeOp,
    pub blend: png::BlendOp,
    pub rgba: Vec<u8>,
}

impl ApngFrameSpec {
    pub fn solid(rect: Rect, rgba: [u8; 4], delay_ms: u16) -> Self {
        Self {
            rect,
            delay: (delay_ms, 1000),
            dispose: png::DisposeOp::None,
            blend: png::BlendOp::Source,
            rgba: rgba.repeat(rect.area() as usize),
        }
    }

    pub fn with_ops(mut self, dispose: png::DisposeOp, blend: png::BlendOp) -> Self {
        self.dispose = dispose;
        self.blend = blend;
        self
    }
}

/// Encode an APNG. With `hidden_default`, the first spec becomes a default
/// image that is not part of the animation.
pub fn apng_bytes(
    width: u32,
    height: u32,
    frames: &[ApngFrameSpec],
    num_plays: u32,
    hidden_default: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let animated = frames.len() as u32 - u32::from(hidden_default);
        encoder.set_animated(animated, num_plays).unwrap();
        encoder.set_sep_def_img(hidden_default).unwrap();
        let mut writer = encoder.write_header().unwrap();
        for (i, spec) in frames.iter().enumerate() {
            if hidden_default && i == 0 {
                writer.write_image_data(&spec.rgba).unwrap();
                continue;
            }
            writer.set_frame_position(0, 0).unwrap();
            writer
                .set_frame_dimension(spec.rect.width, spec.rect.height)
                .unwrap();
            writer.set_frame_position(spec.rect.x, spec.rect.y).unwrap();
            writer.set_frame_delay(spec.delay.0, spec.delay.1).unwrap();
            writer.set_dispose_op(spec.dispose).unwrap();
            writer.set_blend_op(spec.blend).unwrap();
            writer.write_image_data(&spec.rgba).unwrap();
        }
        writer.finish().unwrap();
    }
    out
}

/// Plain, non-animated RGBA PNG.
/// Rewrite the `acTL` frame count of an encoded APNG, fixing up the chunk CRC.
pub fn set_actl_frames(bytes: &mut [u8], num_frames: u32) {
    let at = bytes
        .windows(4)
        .position(|w| w == b"acTL")
        .expect("no acTL chunk");
    bytes[at + 4..at + 8].copy_from_slice(&num_frames.to_be_bytes());
    let crc = crc32(&bytes[at..at + 12]);
    bytes[at + 12..at + 16].copy_from_slice(&crc.to_be_bytes());
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

pub fn png_bytes(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(rgba).unwrap();
        writer.finish().unwrap();
    }
    out
}

pub fn solid_frame(
    index: usize,
    rect: Rect,
    bgra: [u8; 4],
    delay_ms: u64,
    blend: BlendOp,
    disposal: DisposalOp,
) -> Frame {
    decoded_frame(
        index,
        Duration::from_millis(delay_ms),
        rect,
        blend,
        disposal,
        Bitmap::filled(rect.width, rect.height, bgra),
    )
}

/// Frame whose pixel source always fails.
pub fn broken_frame(index: usize, rect: Rect, delay_ms: u64) -> Frame {
    struct Broken(u32, u32);

    impl PixelSource for Broken {
        fn dimensions(&self) -> (u32, u32) {
            (self.0, self.1)
        }

        fn decode(&self) -> Result<Bitmap, String> {
            Err("corrupt image data".into())
        }
    }

    frame_from_source(
        index,
        Duration::from_millis(delay_ms),
        rect,
        BlendOp::Source,
        DisposalOp::None,
        Box::new(Broken(rect.width, rect.height)),
        true,
    )
}

/// Frame whose pixel source panics, as a misbehaving host decoder might.
pub fn panicking_frame(index: usize, rect: Rect, delay_ms: u64) -> Frame {
    struct Panicking(u32, u32);

    impl PixelSource for Panicking {
        fn dimensions(&self) -> (u32, u32) {
            (self.0, self.1)
        }

        fn decode(&self) -> Result<Bitmap, String> {
            panic!("host decoder blew up");
        }
    }

    frame_from_source(
        index,
        Duration::from_millis(delay_ms),
        rect,
        BlendOp::Source,
        DisposalOp::None,
        Box::new(Panicking(rect.width, rect.height)),
        true,
    )
}

/// Full-canvas opaque frame that takes `decode_time` on every decode.
pub fn slow_frame(index: usize, rect: Rect, delay_ms: u64, decode_time: Duration) -> Frame {
    struct Slow {
        rect: Rect,
        decode_time: Duration,
    }

    impl PixelSource for Slow {
        fn dimensions(&self) -> (u32, u32) {
            (self.rect.width, self.rect.height)
        }

        fn decode(&self) -> Result<Bitmap, String> {
            std::thread::sleep(self.decode_time);
            Ok(Bitmap::filled(self.rect.width, self.rect.height, [9, 9, 9, 255]))
        }
    }

    frame_from_source(
        index,
        Duration::from_millis(delay_ms),
        rect,
        BlendOp::Source,
        DisposalOp::None,
        Box::new(Slow { rect, decode_time }),
        false,
    )
}

pub fn container(width: u32, height: u32, frames: Vec<Frame>) -> Arc<AnimationContainer> {
    Arc::new(
        AnimationContainer::new(
            ContainerFormat::Apng,
            width,
            height,
            frames,
            RepeatPolicy::Infinite,
        )
        .unwrap(),
    )
}

/// `count` full-canvas opaque frames, each `delay_ms` long, frame `i` filled with gray level `i`.
pub fn numbered_container(count: usize, delay_ms: u64) -> Arc<AnimationContainer> {
    let frames = (0..count)
        .map(|i| {
            solid_frame(
                i,
                Rect::full(2, 2),
                [i as u8, i as u8, i as u8, 255],
                delay_ms,
                BlendOp::Source,
                DisposalOp::None,
            )
        })
        .collect();
    container(2, 2, frames)
}
