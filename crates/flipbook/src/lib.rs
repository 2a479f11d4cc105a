//! Animated GIF and APNG playback: frame sources, disposal-aware compositing,
//! a playback scheduler with polling and background execution models, and a
//! single-slot handoff for the renderer.

pub mod animated;
pub mod canvas;
pub mod compositor;
pub mod error;
pub mod handoff;
pub mod player;
pub mod scheduler;
pub mod settings;
pub mod source;

#[cfg(test)]
mod test_support;

pub use animated::AnimatedImage;
pub use canvas::Bitmap;
pub use error::{DecodeError, FrameDecodeError, PlaybackError};
pub use handoff::{FrameSlot, PublishMode, PublishedFrame};
pub use player::{Command, FrameEvent, Player};
pub use scheduler::timing::Stopwatch;
pub use scheduler::{PlaybackState, Scheduler, SchedulerOptions, SchedulerState};
pub use settings::{DriveMode, PlaybackConfig};
pub use source::types::{BlendOp, ContainerFormat, DisposalOp, Rect, RepeatPolicy};
pub use source::{AnimationContainer, Frame, ParseOptions};
