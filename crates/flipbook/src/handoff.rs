//! Single-slot publication of the current composited frame.
//!
//! The writer (scheduler or player thread) swaps in a new immutable snapshot;
//! readers clone the `Arc`. The lock is held only for that swap/clone, never
//! across decode or compositing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::canvas::Bitmap;
use crate::source::types::Rect;

/// What a publication carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Whole canvas, origin (0, 0).
    #[default]
    FullCanvas,
    /// Only the region that changed since the last publication a reader
    /// picked up.
    DirtyRect,
}

/// An immutable snapshot of the canvas (or part of it) to draw at `origin`.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub bitmap: Arc<Bitmap>,
    pub origin: (u32, u32),
    /// The host may discard whatever it showed before.
    pub is_full_replace: bool,
    pub frame_index: usize,
    /// Canvas region that changed with this publication.
    pub dirty: Rect,
}

impl PublishedFrame {
    /// Canvas rectangle covered by `bitmap`.
    pub fn placement(&self) -> Rect {
        Rect::new(
            self.origin.0,
            self.origin.1,
            self.bitmap.width(),
            self.bitmap.height(),
        )
    }

    pub fn same_publication(&self, other: &PublishedFrame) -> bool {
        Arc::ptr_eq(&self.bitmap, &other.bitmap)
    }
}

/// Last-writer-wins slot shared between the compositing side and the renderer.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Current>,
    generation: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct Current {
    frame: Option<PublishedFrame>,
    /// Published but not yet handed to a reader.
    unread: bool,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current publication. No-op once closed.
    pub fn publish(&self, frame: PublishedFrame) {
        let mut current = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        current.frame = Some(frame);
        current.unread = true;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn read(&self) -> Option<PublishedFrame> {
        let mut current = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        current.unread = false;
        current.frame.clone()
    }

    /// The current publication if no reader has picked it up yet. Does not
    /// count as a read.
    pub fn unread(&self) -> Option<PublishedFrame> {
        let current = self.lock();
        if !current.unread || self.closed.load(Ordering::Acquire) {
            return None;
        }
        current.frame.clone()
    }

    /// Number of publications so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Drop the current publication; every later read returns `None`.
    pub fn close(&self) {
        let mut current = self.lock();
        self.closed.store(true, Ordering::Release);
        current.frame.take();
        current.unread = false;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Current> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
