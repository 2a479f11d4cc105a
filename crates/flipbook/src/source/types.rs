use std::fmt;

use serde::{Deserialize, Serialize};

/// Animation container formats the frame sources understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    Gif,
    Apng,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerFormat::Gif => f.write_str("GIF"),
            ContainerFormat::Apng => f.write_str("APNG"),
        }
    }
}

/// Pixel rectangle within a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rect covering a whole `width`x`height` canvas.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the rect lies entirely inside a `width`x`height` canvas.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= width as u64 && bottom <= height as u64
    }

    /// Smallest rect containing both. Empty rects are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Overlap of the two rects (empty when they don't touch).
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let bottom =
            (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        if right <= x as u64 || bottom <= y as u64 {
            return Rect::new(x, y, 0, 0);
        }
        Rect::new(x, y, (right - x as u64) as u32, (bottom - y as u64) as u32)
    }
}

/// How a frame's pixels are combined with the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendOp {
    /// Overwrite destination pixels, alpha included.
    #[default]
    Source,
    /// Alpha-composite onto the existing canvas.
    Over,
}

/// What happens to a frame's area once its display time is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalOp {
    /// Leave the canvas as-is.
    #[default]
    None,
    /// Clear the frame's rect to fully transparent.
    Background,
    /// Restore the canvas to what it was before the frame was drawn.
    Previous,
}

/// How many times an animation cycles before it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    #[default]
    Infinite,
    /// Play `n` full cycles, then rest on the last frame. `Count(0)` behaves like `Count(1)`.
    Count(u32),
}

impl RepeatPolicy {
    /// Whether `iterations` completed cycles use up this policy.
    pub fn is_exhausted(&self, iterations: u32) -> bool {
        match self {
            RepeatPolicy::Infinite => false,
            RepeatPolicy::Count(n) => iterations >= (*n).max(1),
        }
    }
}
