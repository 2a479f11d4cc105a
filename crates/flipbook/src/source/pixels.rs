//! Lazy per-frame pixel data. Containers keep frames in their compact native
//! form and expand them to BGRA only when the compositor asks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crate::canvas::Bitmap;
use crate::error::{FrameDecodeError, panic_message};

/// Something that can produce a frame's BGRA pixels at the frame's own size.
pub trait PixelSource: Send + Sync {
    fn dimensions(&self) -> (u32, u32);

    fn decode(&self) -> Result<Bitmap, String>;
}

/// Memoizing wrapper around a [`PixelSource`].
pub struct LazyPixels {
    source: Box<dyn PixelSource>,
    cache: Mutex<Option<Arc<Bitmap>>>,
    memoize: bool,
}

impl LazyPixels {
    pub fn new(source: Box<dyn PixelSource>, memoize: bool) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
            memoize,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Decoded pixels for frame `index`. Repeated calls return equal content.
    pub fn get(&self, index: usize) -> Result<Arc<Bitmap>, FrameDecodeError> {
        if self.memoize {
            if let Some(cached) = self.lock().as_ref() {
                return Ok(Arc::clone(cached));
            }
        }

        // A panicking source counts as a decode failure.
        let bitmap = panic::catch_unwind(AssertUnwindSafe(|| self.source.decode()))
            .unwrap_or_else(|payload| {
                Err(format!("decoder panicked: {}", panic_message(&*payload)))
            })
            .map_err(|reason| FrameDecodeError { index, reason })?;
        let expected = self.source.dimensions();
        if bitmap.size() != expected {
            return Err(FrameDecodeError {
                index,
                reason: format!(
                    "decoded {}x{}, expected {}x{}",
                    bitmap.width(),
                    bitmap.height(),
                    expected.0,
                    expected.1
                ),
            });
        }

        let bitmap = Arc::new(bitmap);
        if self.memoize {
            *self.lock() = Some(Arc::clone(&bitmap));
        }
        Ok(bitmap)
    }

    pub fn is_cached(&self) -> bool {
        self.lock().is_some()
    }

    /// Drop the memoized buffer, if any.
    pub fn evict(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<Bitmap>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Already-decoded BGRA pixels.
pub struct DecodedPixels(pub Bitmap);

impl PixelSource for DecodedPixels {
    fn dimensions(&self) -> (u32, u32) {
        self.0.size()
    }

    fn decode(&self) -> Result<Bitmap, String> {
        Ok(self.0.clone())
    }
}

/// Palette-indexed pixels as stored in a GIF image block.
pub struct IndexedPixels {
    pub width: u32,
    pub height: u32,
    pub indices: Vec<u8>,
    /// RGB triplets; `None` when neither a local nor a global color table exists.
    pub palette: Option<Arc<[u8]>>,
    pub transparent: Option<u8>,
}

impl PixelSource for IndexedPixels {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn decode(&self) -> Result<Bitmap, String> {
        let palette = self
            .palette
            .as_deref()
            .ok_or_else(|| "no local or global color table".to_string())?;
        let expected = self.width as usize * self.height as usize;
        if self.indices.len() != expected {
            return Err(format!(
                "{} palette indices for a {}x{} frame",
                self.indices.len(),
                self.width,
                self.height
            ));
        }

        let mut bitmap = Bitmap::new(self.width, self.height);
        for (px, &index) in bitmap.pixels_mut().iter_mut().zip(&self.indices) {
            if Some(index) == self.transparent {
                continue;
            }
            let offset = index as usize * 3;
            // Indices past the end of the table stay transparent.
            if let Some(rgb) = palette.get(offset..offset + 3) {
                *px = [rgb[2], rgb[1], rgb[0], 255];
            }
        }
        Ok(bitmap)
    }
}

/// 8-bit sample layouts a PNG frame can arrive in after palette expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl SampleLayout {
    pub fn channels(self) -> usize {
        match self {
            SampleLayout::Gray => 1,
            SampleLayout::GrayAlpha => 2,
            SampleLayout::Rgb => 3,
            SampleLayout::Rgba => 4,
        }
    }
}

/// Tightly packed 8-bit rows from a PNG frame.
pub struct PackedPixels {
    pub width: u32,
    pub height: u32,
    pub layout: SampleLayout,
    pub samples: Vec<u8>,
}

impl PixelSource for PackedPixels {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn decode(&self) -> Result<Bitmap, String> {
        let channels = self.layout.channels();
        let expected = self.width as usize * self.height as usize * channels;
        if self.samples.len() != expected {
            return Err(format!(
                "{} bytes of {:?} samples for a {}x{} frame",
                self.samples.len(),
                self.layout,
                self.width,
                self.height
            ));
        }

        let mut bitmap = Bitmap::new(self.width, self.height);
        let samples = self.samples.chunks_exact(channels);
        for (px, s) in bitmap.pixels_mut().iter_mut().zip(samples) {
            *px = match self.layout {
                SampleLayout::Gray => [s[0], s[0], s[0], 255],
                SampleLayout::GrayAlpha => [s[0], s[0], s[0], s[1]],
                SampleLayout::Rgb => [s[2], s[1], s[0], 255],
                SampleLayout::Rgba => [s[2], s[1], s[0], s[3]],
            };
        }
        Ok(bitmap)
    }
}
