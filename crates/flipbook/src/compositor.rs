//! Dispose-then-draw compositing onto a cumulative canvas.

use std::sync::Arc;

use crate::canvas::Bitmap;
use crate::error::FrameDecodeError;
use crate::handoff::{FrameSlot, PublishMode, PublishedFrame};
use crate::source::types::{BlendOp, DisposalOp, Rect};
use crate::source::{AnimationContainer, Frame};

/// Bookkeeping for the frame currently on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShownFrame {
    index: usize,
    rect: Rect,
    disposal: DisposalOp,
}

/// The canvas plus what is needed to dispose of the frame on it.
#[derive(Debug)]
pub struct CompositeState {
    canvas: Bitmap,
    /// Pixels under the shown frame's rect from before it was drawn.
    pending_restore: Option<Bitmap>,
    shown: Option<ShownFrame>,
}

/// Result of drawing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Composed {
    pub dirty: Rect,
    pub full_replace: bool,
}

impl Composed {
    fn merge(self, later: Composed) -> Composed {
        Composed {
            dirty: self.dirty.union(&later.dirty),
            full_replace: self.full_replace || later.full_replace,
        }
    }

    /// Widen to also cover a publication the reader never picked up.
    pub fn absorb(self, missed: &PublishedFrame) -> Composed {
        self.merge(Composed {
            dirty: missed.placement(),
            full_replace: missed.is_full_replace,
        })
    }
}

impl CompositeState {
    /// Fully transparent canvas, nothing shown yet.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: Bitmap::new(width, height),
            pending_restore: None,
            shown: None,
        }
    }

    pub fn for_container(container: &AnimationContainer) -> Self {
        Self::new(container.width(), container.height())
    }

    pub fn canvas(&self) -> &Bitmap {
        &self.canvas
    }

    /// Index of the frame currently drawn, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.shown.map(|s| s.index)
    }

    /// Back to a transparent canvas with no previous frame.
    pub fn reset(&mut self) {
        self.canvas.clear();
        self.pending_restore = None;
        self.shown = None;
    }

    /// Free the canvas memory. The state is unusable until the next `reset`.
    pub fn release(&mut self) {
        self.canvas = Bitmap::new(0, 0);
        self.pending_restore = None;
        self.shown = None;
    }

    fn ensure_canvas(&mut self, width: u32, height: u32) {
        if self.canvas.size() != (width, height) {
            self.canvas = Bitmap::new(width, height);
            self.pending_restore = None;
            self.shown = None;
        }
    }

    /// Apply the shown frame's disposal. Returns the area it touched.
    fn dispose_shown(&mut self) -> Rect {
        let Some(shown) = self.shown.take() else {
            return Rect::default();
        };
        let restore = self.pending_restore.take();
        match shown.disposal {
            DisposalOp::None => Rect::default(),
            DisposalOp::Background => {
                self.canvas.clear_rect(shown.rect);
                shown.rect
            }
            DisposalOp::Previous => match restore {
                Some(saved) => {
                    self.canvas.blit_source(&saved, shown.rect);
                    shown.rect
                }
                None => Rect::default(),
            },
        }
    }
}

/// Dispose of the shown frame and draw `frame`. Index 0 always starts from a
/// transparent canvas. Decoding happens first, so on error `state` is untouched.
pub fn compose_frame(
    state: &mut CompositeState,
    frame: &Frame,
) -> Result<Composed, FrameDecodeError> {
    let pixels = frame.decode()?;
    let bounds = state.canvas.bounds();

    let mut dirty = if frame.index == 0 {
        state.reset();
        bounds
    } else {
        state.dispose_shown()
    };

    if frame.disposal == DisposalOp::Previous {
        state.pending_restore = Some(state.canvas.crop(frame.rect));
    }

    match frame.blend {
        BlendOp::Source => state.canvas.blit_source(&pixels, frame.rect),
        BlendOp::Over => state.canvas.blit_over(&pixels, frame.rect),
    }
    dirty = dirty.union(&frame.rect);

    state.shown = Some(ShownFrame {
        index: frame.index,
        rect: frame.rect,
        disposal: frame.disposal,
    });

    Ok(Composed {
        dirty,
        full_replace: frame.index == 0 || (frame.blend == BlendOp::Source && frame.rect == bounds),
    })
}

/// Snapshot the canvas for the handoff.
pub fn publish(state: &CompositeState, composed: Composed, mode: PublishMode) -> PublishedFrame {
    let frame_index = state.current_index().unwrap_or(0);
    let bounds = state.canvas.bounds();
    let region = match mode {
        PublishMode::FullCanvas => bounds,
        PublishMode::DirtyRect if composed.full_replace => bounds,
        PublishMode::DirtyRect => composed.dirty.intersect(&bounds),
    };
    let bitmap = if region == bounds {
        state.canvas.clone()
    } else {
        state.canvas.crop(region)
    };
    PublishedFrame {
        bitmap: Arc::new(bitmap),
        origin: (region.x, region.y),
        is_full_replace: composed.full_replace,
        frame_index,
        dirty: composed.dirty,
    }
}

/// Publish into `slot`. In dirty-rect mode a publication still waiting for
/// its reader is folded into this one, so a reader that only sees the latest
/// publication still ends up with the whole canvas.
pub fn publish_to(
    slot: &FrameSlot,
    state: &CompositeState,
    composed: Composed,
    mode: PublishMode,
) {
    let composed = match (mode, slot.unread()) {
        (PublishMode::DirtyRect, Some(missed)) => composed.absorb(&missed),
        _ => composed,
    };
    slot.publish(publish(state, composed, mode));
}

/// Composite one transition and publish the result.
pub fn advance_to(
    state: &mut CompositeState,
    frame: &Frame,
    mode: PublishMode,
) -> Result<PublishedFrame, FrameDecodeError> {
    let composed = compose_frame(state, frame)?;
    Ok(publish(state, composed, mode))
}

/// Bring the canvas to `target` by replaying frames forward from the shown
/// frame (or from frame 0 when going backward). The result covers every frame
/// drawn, ready for a single publication.
///
/// Frames that fail to decode are skipped with a warning. `cancelled` is
/// checked before each decode. Returns `None` when nothing was drawn or the
/// replay was cancelled.
pub fn replay_to(
    state: &mut CompositeState,
    container: &AnimationContainer,
    target: usize,
    cancelled: impl Fn() -> bool,
) -> Option<Composed> {
    state.ensure_canvas(container.width(), container.height());
    let target = target.min(container.frame_count().saturating_sub(1));
    let start = match state.current_index() {
        Some(current) if current == target => return None,
        Some(current) if current < target => current + 1,
        _ => 0,
    };

    let mut composed: Option<Composed> = None;
    for frame in &container.frames()[start..=target] {
        if cancelled() {
            log::debug!("Replay to frame {target} cancelled at frame {}", frame.index);
            return None;
        }
        match compose_frame(state, frame) {
            Ok(step) => composed = Some(composed.map_or(step, |acc| acc.merge(step))),
            Err(e) => log::warn!("Skipping frame during replay: {e}"),
        }
    }
    composed
}
