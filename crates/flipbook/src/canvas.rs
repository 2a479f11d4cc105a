//! Straight-alpha BGRA8 pixel buffers and the blit primitives the compositor needs.

use std::fmt;

use crate::source::types::Rect;

pub const BYTES_PER_PIXEL: usize = 4;

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// A `width`x`height` image, rows tightly packed, pixels in B, G, R, A order
/// with non-premultiplied alpha.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Bitmap {
    /// Fully transparent bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
        }
    }

    /// Wrap existing BGRA bytes. `None` if the length doesn't match the dimensions.
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * BYTES_PER_PIXEL {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Bitmap filled with a single BGRA color.
    pub fn filled(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let mut bitmap = Self::new(width, height);
        bitmap.pixels_mut().fill(bgra);
        bitmap
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

    pub fn bounds(&self) -> Rect {
        Rect::full(self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels()[(y * self.width + x) as usize])
    }

    pub fn is_fully_transparent(&self, rect: Rect) -> bool {
        let rect = rect.intersect(&self.bounds());
        (rect.y..rect.y + rect.height).all(|y| {
            let start = (y * self.width + rect.x) as usize;
            self.pixels()[start..start + rect.width as usize]
                .iter()
                .all(|px| px[3] == 0)
        })
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Set every pixel inside `rect` to fully transparent.
    pub fn clear_rect(&mut self, rect: Rect) {
        let rect = rect.intersect(&self.bounds());
        let width = self.width;
        let pixels = self.pixels_mut();
        for y in rect.y..rect.y + rect.height {
            let start = (y * width + rect.x) as usize;
            pixels[start..start + rect.width as usize].fill(TRANSPARENT);
        }
    }

    /// Copy `src` into `at`, replacing destination pixels (alpha included).
    pub fn blit_source(&mut self, src: &Bitmap, at: Rect) {
        let region = self.blit_region(src, at);
        let row_bytes = region.width as usize * BYTES_PER_PIXEL;
        for row in 0..region.height {
            let src_start = (row * src.width) as usize * BYTES_PER_PIXEL;
            let dst_start =
                ((region.y + row) * self.width + region.x) as usize * BYTES_PER_PIXEL;
            self.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src.data[src_start..src_start + row_bytes]);
        }
    }

    /// Alpha-composite `src` over the pixels at `at`.
    pub fn blit_over(&mut self, src: &Bitmap, at: Rect) {
        let region = self.blit_region(src, at);
        let width = self.width;
        let src_pixels = src.pixels();
        let dst_pixels = self.pixels_mut();
        for row in 0..region.height {
            let src_start = (row * src.width) as usize;
            let dst_start = ((region.y + row) * width + region.x) as usize;
            let src_row = &src_pixels[src_start..src_start + region.width as usize];
            let dst_row = &mut dst_pixels[dst_start..dst_start + region.width as usize];
            for (dst, src) in dst_row.iter_mut().zip(src_row) {
                *dst = blend_over(*dst, *src);
            }
        }
    }

    /// Copy of the pixels inside `rect` (clipped to the bitmap).
    pub fn crop(&self, rect: Rect) -> Bitmap {
        let rect = rect.intersect(&self.bounds());
        let mut out = Bitmap::new(rect.width, rect.height);
        let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
        for row in 0..rect.height {
            let src_start = ((rect.y + row) * self.width + rect.x) as usize * BYTES_PER_PIXEL;
            let dst_start = row as usize * row_bytes;
            out.data[dst_start..dst_start + row_bytes]
                .copy_from_slice(&self.data[src_start..src_start + row_bytes]);
        }
        out
    }

    /// RGBA8 copy of the pixels, for encoders that don't speak BGRA.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        for px in out.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
        out
    }

    /// Destination region of a blit: `at` clipped to both the canvas and the source size.
    fn blit_region(&self, src: &Bitmap, at: Rect) -> Rect {
        let sized = Rect::new(
            at.x,
            at.y,
            at.width.min(src.width),
            at.height.min(src.height),
        );
        sized.intersect(&self.bounds())
    }
}

/// Straight-alpha "over" operator for a single BGRA pixel.
pub fn blend_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as u32;
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = dst[3] as u32;
    let inv = 255 - sa;
    // out_a scaled by 255*255
    let out_a = sa * 255 + da * inv;
    if out_a == 0 {
        return TRANSPARENT;
    }
    let channel = |i: usize| {
        let premul = src[i] as u32 * sa * 255 + dst[i] as u32 * da * inv;
        ((premul + out_a / 2) / out_a) as u8
    };
    [channel(0), channel(1), channel(2), ((out_a + 127) / 255) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [0, 0, 255, 255];
    const BLUE: [u8; 4] = [255, 0, 0, 255];

    #[test]
    fn from_bgra_rejects_wrong_length() {
        assert!(Bitmap::from_bgra(2, 2, vec![0; 15]).is_none());
        assert!(Bitmap::from_bgra(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn clear_rect_only_touches_rect() {
        let mut bitmap = Bitmap::filled(4, 4, RED);
        bitmap.clear_rect(Rect::new(1, 1, 2, 2));
        assert_eq!(bitmap.pixel(0, 0), Some(RED));
        assert_eq!(bitmap.pixel(1, 1), Some(TRANSPARENT));
        assert_eq!(bitmap.pixel(2, 2), Some(TRANSPARENT));
        assert_eq!(bitmap.pixel(3, 3), Some(RED));
        assert!(bitmap.is_fully_transparent(Rect::new(1, 1, 2, 2)));
    }

    #[test]
    fn blit_source_overwrites_alpha() {
        let mut canvas = Bitmap::filled(3, 3, RED);
        let src = Bitmap::new(1, 1);
        canvas.blit_source(&src, Rect::new(1, 1, 1, 1));
        assert_eq!(canvas.pixel(1, 1), Some(TRANSPARENT));
        assert_eq!(canvas.pixel(0, 1), Some(RED));
    }

    #[test]
    fn blit_over_keeps_background_under_transparent_pixels() {
        let mut canvas = Bitmap::filled(2, 1, RED);
        let src = Bitmap::from_bgra(2, 1, vec![255, 0, 0, 255, 255, 0, 0, 0]).unwrap();
        canvas.blit_over(&src, Rect::new(0, 0, 2, 1));
        assert_eq!(canvas.pixel(0, 0), Some(BLUE));
        assert_eq!(canvas.pixel(1, 0), Some(RED));
    }

    #[test]
    fn blend_over_half_alpha() {
        let out = blend_over(RED, [255, 0, 0, 128]);
        assert_eq!(out[3], 255);
        assert!((out[0] as i32 - 128).abs() <= 1);
        assert!((out[2] as i32 - 127).abs() <= 1);
        assert_eq!(blend_over(TRANSPARENT, [10, 20, 30, 128]), [10, 20, 30, 128]);
    }

    #[test]
    fn blit_is_clipped_to_canvas() {
        let mut canvas = Bitmap::new(2, 2);
        canvas.blit_source(&Bitmap::filled(3, 3, RED), Rect::new(1, 1, 3, 3));
        assert_eq!(canvas.pixel(1, 1), Some(RED));
        assert_eq!(canvas.pixel(0, 0), Some(TRANSPARENT));
    }

    #[test]
    fn crop_and_rgba() {
        let mut canvas = Bitmap::new(3, 2);
        canvas.blit_source(&Bitmap::filled(1, 1, RED), Rect::new(2, 1, 1, 1));
        let cropped = canvas.crop(Rect::new(1, 1, 2, 1));
        assert_eq!(cropped.size(), (2, 1));
        assert_eq!(cropped.pixel(1, 0), Some(RED));
        assert_eq!(&cropped.to_rgba()[4..8], &[255, 0, 0, 255]);
    }
}
