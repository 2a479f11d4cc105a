//! The object a host widget owns: one opened animation plus whichever
//! execution model the configuration picked.

use std::io::{self, Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::compositor::{self, CompositeState};
use crate::error::{DecodeError, PlaybackError};
use crate::handoff::{FrameSlot, PublishMode, PublishedFrame};
use crate::player::{FrameEvent, Player};
use crate::scheduler::{PlaybackState, Scheduler};
use crate::settings::{DriveMode, PlaybackConfig};
use crate::source::types::{ContainerFormat, RepeatPolicy};
use crate::source::{self, AnimationContainer};

enum Playback {
    /// Single frame, composited once. `None` after dispose.
    Static(Option<PublishedFrame>),
    Polled(Box<Scheduler>),
    Background(Player),
}

pub struct AnimatedImage {
    container: Arc<AnimationContainer>,
    playback: Playback,
}

impl AnimatedImage {
    /// Open a stream through the host's resolver. The format must already be known.
    pub fn open<S, F>(
        format: ContainerFormat,
        opener: F,
        config: &PlaybackConfig,
    ) -> Result<Self, PlaybackError>
    where
        S: Read + Seek,
        F: FnOnce() -> io::Result<S>,
    {
        let stream = opener().map_err(DecodeError::Unreadable)?;
        Self::from_stream(format, stream, config)
    }

    pub fn from_stream<S: Read + Seek>(
        format: ContainerFormat,
        stream: S,
        config: &PlaybackConfig,
    ) -> Result<Self, PlaybackError> {
        let container = source::parse(format, stream, &config.parse_options())?;
        Self::from_container(Arc::new(container), config)
    }

    pub fn from_container(
        container: Arc<AnimationContainer>,
        config: &PlaybackConfig,
    ) -> Result<Self, PlaybackError> {
        if container.is_static() {
            let mut state = CompositeState::for_container(&container);
            let frame = compositor::advance_to(
                &mut state,
                &container.frames()[0],
                PublishMode::FullCanvas,
            )?;
            return Ok(Self {
                container,
                playback: Playback::Static(Some(frame)),
            });
        }

        let options = config.scheduler_options(container.repeat_hint());
        let playback = match config.drive {
            DriveMode::Polling => {
                let mut scheduler =
                    Scheduler::new(Arc::clone(&container), Arc::new(FrameSlot::new()), options);
                scheduler.prime();
                if config.auto_start {
                    scheduler.play();
                }
                Playback::Polled(Box::new(scheduler))
            }
            DriveMode::Background => Playback::Background(Player::spawn(
                Arc::clone(&container),
                options,
                config.command_queue_capacity,
                config.auto_start,
            )?),
        };
        Ok(Self {
            container,
            playback,
        })
    }

    /// The frame to draw at animation-elapsed time `elapsed`, placed at its
    /// `origin`. Only the polling model looks at `elapsed`.
    pub fn composited_frame(&mut self, elapsed: Duration) -> Option<PublishedFrame> {
        match &mut self.playback {
            Playback::Static(frame) => frame.clone(),
            Playback::Polled(scheduler) => scheduler.evaluate(elapsed),
            Playback::Background(player) => player.read(),
        }
    }

    pub fn natural_size(&self) -> (u32, u32) {
        self.container.size()
    }

    pub fn is_static(&self) -> bool {
        self.container.is_static()
    }

    pub fn frame_count(&self) -> usize {
        self.container.frame_count()
    }

    pub fn container(&self) -> &Arc<AnimationContainer> {
        &self.container
    }

    pub fn play(&mut self) {
        match &mut self.playback {
            Playback::Static(_) => {}
            Playback::Polled(scheduler) => scheduler.play(),
            Playback::Background(player) => player.play(),
        }
    }

    pub fn pause(&mut self) {
        match &mut self.playback {
            Playback::Static(_) => {}
            Playback::Polled(scheduler) => scheduler.pause(),
            Playback::Background(player) => player.pause(),
        }
    }

    pub fn seek_to_frame(&mut self, index: u32) {
        let index = index as usize;
        match &mut self.playback {
            Playback::Static(_) => {}
            Playback::Polled(scheduler) => scheduler.seek(index),
            Playback::Background(player) => player.seek_to(index),
        }
    }

    pub fn set_repeat_policy(&mut self, policy: RepeatPolicy) {
        match &mut self.playback {
            Playback::Static(_) => {}
            Playback::Polled(scheduler) => scheduler.set_repeat_policy(policy),
            Playback::Background(player) => player.set_repeat_policy(policy),
        }
    }

    /// Stop playback and release decode resources. Every later call is a no-op
    /// and `composited_frame` returns `None`.
    pub fn dispose(&mut self) {
        match &mut self.playback {
            Playback::Static(frame) => {
                frame.take();
                self.container.release_decoded();
            }
            Playback::Polled(scheduler) => scheduler.dispose(),
            Playback::Background(player) => player.dispose(),
        }
    }

    /// `None` for static images, which never run a scheduler.
    pub fn playback_state(&self) -> Option<PlaybackState> {
        match &self.playback {
            Playback::Static(_) => None,
            Playback::Polled(scheduler) => Some(scheduler.playback_state()),
            Playback::Background(player) => Some(player.playback_state()),
        }
    }

    /// Frame-change notifications, background model only.
    pub fn frame_events(&self) -> Option<&Receiver<FrameEvent>> {
        match &self.playback {
            Playback::Background(player) => Some(player.events()),
            _ => None,
        }
    }
}
