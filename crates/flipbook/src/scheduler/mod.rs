//! Playback state machine and the polling execution model.

pub mod timing;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::compositor::{self, CompositeState};
use crate::handoff::{FrameSlot, PublishMode, PublishedFrame};
use crate::source::AnimationContainer;
use crate::source::types::RepeatPolicy;
use timing::{FrameTimeline, LocalClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing composited yet.
    Uninitialized,
    /// First frame shown, clock not started.
    Ready,
    Running,
    Paused,
    /// Repeat count used up; resting on the last frame.
    Completed,
    Disposed,
}

/// Snapshot of where playback is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    /// -1 before anything is shown.
    pub current_frame_index: i64,
    pub iteration_count: u32,
    pub repeat_policy: RepeatPolicy,
    pub state: SchedulerState,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    pub repeat: RepeatPolicy,
    pub publish_mode: PublishMode,
    /// Composite every frame between the shown one and the target instead of
    /// jumping straight to the target.
    pub replay_skipped_frames: bool,
}

/// Owns one animation's composite state and decides which frame is visible.
pub struct Scheduler {
    container: Arc<AnimationContainer>,
    timeline: FrameTimeline,
    composite: CompositeState,
    slot: Arc<FrameSlot>,
    options: SchedulerOptions,
    clock: LocalClock,
    last_cycle: u64,
    /// Local time to continue from when resuming after a pause.
    resume_at: Duration,
    current: Option<usize>,
    iterations: u32,
    state: SchedulerState,
    /// Checked before each decode; set by whoever disposes from another thread.
    cancel: Option<Arc<AtomicBool>>,
}

impl Scheduler {
    pub fn new(
        container: Arc<AnimationContainer>,
        slot: Arc<FrameSlot>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            timeline: FrameTimeline::for_container(&container),
            composite: CompositeState::for_container(&container),
            container,
            slot,
            options,
            clock: LocalClock::default(),
            last_cycle: 0,
            resume_at: Duration::ZERO,
            current: None,
            iterations: 0,
            state: SchedulerState::Uninitialized,
            cancel: None,
        }
    }

    /// Stop compositing as soon as `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn container(&self) -> &Arc<AnimationContainer> {
        &self.container
    }

    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState {
            current_frame_index: self.current.map_or(-1, |i| i as i64),
            iteration_count: self.iterations,
            repeat_policy: self.options.repeat,
            state: self.state,
        }
    }

    /// Delay of the frame currently shown.
    pub fn current_delay(&self) -> Duration {
        self.container
            .frame(self.current.unwrap_or(0))
            .map_or(Duration::ZERO, |f| f.delay)
    }

    /// Show frame 0 without starting the clock.
    pub fn prime(&mut self) {
        if self.state != SchedulerState::Uninitialized {
            return;
        }
        self.show(0);
        self.set_state(SchedulerState::Ready);
    }

    pub fn play(&mut self) {
        match self.state {
            SchedulerState::Uninitialized => {
                self.prime();
                self.set_state(SchedulerState::Running);
            }
            SchedulerState::Ready => self.set_state(SchedulerState::Running),
            SchedulerState::Paused => {
                self.rebase(self.resume_at);
                self.set_state(SchedulerState::Running);
            }
            SchedulerState::Completed => {
                self.restart();
                self.set_state(SchedulerState::Running);
            }
            SchedulerState::Running | SchedulerState::Disposed => {}
        }
    }

    pub fn pause(&mut self) {
        if self.state != SchedulerState::Running {
            return;
        }
        let total = self.timeline.total().as_nanos();
        let local = self.clock.last_local().as_nanos();
        self.resume_at = if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((local % total) as u64)
        };
        self.set_state(SchedulerState::Paused);
    }

    /// Move to `index` (clamped to the last frame), replaying forward so the
    /// cumulative canvas is correct.
    pub fn seek(&mut self, index: usize) {
        match self.state {
            SchedulerState::Disposed => return,
            SchedulerState::Uninitialized => self.prime(),
            SchedulerState::Completed => {
                self.iterations = 0;
                self.set_state(SchedulerState::Paused);
            }
            _ => {}
        }

        let target = index.min(self.container.frame_count() - 1);
        log::debug!("Seek to frame {target}");
        if !self.replay(target) {
            return;
        }
        self.resume_at = self.timeline.start_of(target);
        self.rebase(self.resume_at);
    }

    /// Takes effect from the next cycle check. A completed animation stays
    /// completed until played again.
    pub fn set_repeat_policy(&mut self, policy: RepeatPolicy) {
        if self.state == SchedulerState::Disposed {
            return;
        }
        self.options.repeat = policy;
    }

    /// Polling entry point: the publication that should be visible at
    /// `elapsed`. Composites at most once per frame change. `None` once
    /// disposed.
    pub fn evaluate(&mut self, elapsed: Duration) -> Option<PublishedFrame> {
        match self.state {
            SchedulerState::Disposed => return None,
            SchedulerState::Uninitialized => self.prime(),
            SchedulerState::Running => self.tick(elapsed),
            SchedulerState::Ready | SchedulerState::Paused | SchedulerState::Completed => {}
        }
        self.slot.read()
    }

    /// Background entry point: advance one frame, wrapping at the end of the
    /// cycle or completing if the repeat policy is used up.
    pub fn step(&mut self) {
        if self.state != SchedulerState::Running {
            return;
        }
        let next = self.current.map_or(0, |i| i + 1);
        if next >= self.container.frame_count() {
            self.iterations = self.iterations.saturating_add(1);
            if self.options.repeat.is_exhausted(self.iterations) {
                self.complete();
                return;
            }
            self.show(0);
        } else {
            self.show(next);
        }
    }

    /// Stop for good: close the slot and drop the canvas and decoded frames.
    pub fn dispose(&mut self) {
        if self.state == SchedulerState::Disposed {
            return;
        }
        self.set_state(SchedulerState::Disposed);
        self.slot.close();
        self.composite.release();
        self.container.release_decoded();
    }

    fn tick(&mut self, elapsed: Duration) {
        let local = self.clock.local(elapsed);
        let position = self.timeline.position(local);
        if position.cycle > self.last_cycle {
            let wrapped = position.cycle - self.last_cycle;
            self.iterations = self
                .iterations
                .saturating_add(u32::try_from(wrapped).unwrap_or(u32::MAX));
            self.last_cycle = position.cycle;
            if self.options.repeat.is_exhausted(self.iterations) {
                self.complete();
                return;
            }
        }
        if self.current != Some(position.frame) {
            self.transition(position.frame);
        }
    }

    fn transition(&mut self, target: usize) {
        let consecutive = match self.current {
            Some(current) => target == current + 1 || target == 0,
            None => target == 0,
        };
        if !self.options.replay_skipped_frames || consecutive {
            self.show(target);
            return;
        }
        self.replay(target);
    }

    /// Replay forward to `target` and publish once. Returns `false` if
    /// cancelled part way, leaving `current` alone.
    fn replay(&mut self, target: usize) -> bool {
        let cancel = self.cancel.clone();
        let cancelled = || cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire));
        let composed =
            compositor::replay_to(&mut self.composite, &self.container, target, cancelled);
        if self.is_cancelled() {
            return false;
        }
        if let Some(composed) = composed {
            let mode = self.options.publish_mode;
            compositor::publish_to(&self.slot, &self.composite, composed, mode);
        }
        self.current = Some(target);
        true
    }

    /// Composite `index` onto the canvas and publish. A frame that fails to
    /// decode keeps the last publication but still counts as shown, so it is
    /// not retried on every poll.
    fn show(&mut self, index: usize) {
        let Some(frame) = self.container.frame(index) else {
            return;
        };
        if self.is_cancelled() {
            return;
        }
        match compositor::compose_frame(&mut self.composite, frame) {
            Ok(composed) => compositor::publish_to(
                &self.slot,
                &self.composite,
                composed,
                self.options.publish_mode,
            ),
            Err(e) => log::warn!("{e}; keeping the previous frame"),
        }
        self.current = Some(index);
    }

    fn complete(&mut self) {
        let last = self.container.frame_count() - 1;
        if self.current != Some(last) {
            if self.options.replay_skipped_frames {
                self.transition(last);
            } else {
                self.show(last);
            }
        }
        self.set_state(SchedulerState::Completed);
    }

    fn restart(&mut self) {
        self.composite.reset();
        self.current = None;
        self.iterations = 0;
        self.show(0);
        self.resume_at = Duration::ZERO;
        self.rebase(Duration::ZERO);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn rebase(&mut self, at: Duration) {
        self.clock.rebase(at);
        self.last_cycle = 0;
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            log::debug!("Playback {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Bitmap;
    use crate::source::Frame;
    use crate::source::types::BlendOp::Source;
    use crate::source::types::DisposalOp::None as Keep;
    use crate::source::types::Rect;
    use crate::test_support::{broken_frame, container, numbered_container, solid_frame};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn scheduler(container: Arc<AnimationContainer>, repeat: RepeatPolicy) -> Scheduler {
        Scheduler::new(
            container,
            Arc::new(FrameSlot::new()),
            SchedulerOptions {
                repeat,
                ..SchedulerOptions::default()
            },
        )
    }

    fn gray(frame: &PublishedFrame) -> u8 {
        frame.bitmap.pixel(0, 0).unwrap()[0]
    }

    #[test]
    fn evaluate_selects_frame_by_cumulative_delay() {
        let frames = [30, 50, 70]
            .into_iter()
            .enumerate()
            .map(|(i, d)| {
                solid_frame(i, Rect::full(1, 1), [i as u8, 0, 0, 255], d, Source, Keep)
            })
            .collect();
        let mut s = scheduler(container(1, 1, frames), RepeatPolicy::Infinite);
        s.play();

        let eps = Duration::from_micros(1);
        for (i, end) in [ms(30), ms(80), ms(150)].into_iter().enumerate() {
            assert_eq!(s.evaluate(end - eps).unwrap().frame_index, i);
            assert_eq!(s.evaluate(end + eps).unwrap().frame_index, (i + 1) % 3);
        }
        assert_eq!(s.playback_state().iteration_count, 1);
    }

    #[test]
    fn repeated_evaluate_returns_same_publication() {
        let mut s = scheduler(numbered_container(4, 25), RepeatPolicy::Infinite);
        s.play();
        let a = s.evaluate(ms(60)).unwrap();
        let b = s.evaluate(ms(60)).unwrap();
        assert!(a.same_publication(&b));
        assert_eq!(s.slot().generation(), 2);
    }

    #[test]
    fn count_policy_completes_and_stops_advancing() {
        let mut s = scheduler(numbered_container(2, 50), RepeatPolicy::Count(2));
        s.play();
        let rest = s.evaluate(ms(250)).unwrap();
        let state = s.playback_state();
        assert_eq!(state.state, SchedulerState::Completed);
        assert_eq!(state.iteration_count, 2);
        assert_eq!(rest.frame_index, 1);

        let later = s.evaluate(ms(10_000)).unwrap();
        assert!(later.same_publication(&rest));
        assert_eq!(s.playback_state().iteration_count, 2);
    }

    #[test]
    fn play_after_completion_restarts() {
        let mut s = scheduler(numbered_container(2, 50), RepeatPolicy::Count(1));
        s.play();
        s.evaluate(ms(120));
        assert_eq!(s.state(), SchedulerState::Completed);

        s.play();
        assert_eq!(s.state(), SchedulerState::Running);
        assert_eq!(s.playback_state().iteration_count, 0);
        // restart anchors at the next poll, whatever the host clock says
        assert_eq!(s.evaluate(ms(500)).unwrap().frame_index, 0);
        assert_eq!(s.evaluate(ms(560)).unwrap().frame_index, 1);
    }

    #[test]
    fn pause_preserves_position() {
        let mut s = scheduler(numbered_container(4, 100), RepeatPolicy::Infinite);
        s.play();
        assert_eq!(s.evaluate(ms(150)).unwrap().frame_index, 1);
        s.pause();
        assert_eq!(s.evaluate(ms(900)).unwrap().frame_index, 1);

        s.play();
        // resumes 50ms into frame 1
        assert_eq!(s.evaluate(ms(1000)).unwrap().frame_index, 1);
        assert_eq!(s.evaluate(ms(1060)).unwrap().frame_index, 2);
    }

    #[test]
    fn seek_replays_and_rebases() {
        let mut s = scheduler(numbered_container(5, 100), RepeatPolicy::Infinite);
        s.play();
        s.evaluate(ms(50));
        s.seek(3);
        assert_eq!(s.playback_state().current_frame_index, 3);
        assert_eq!(gray(&s.slot().read().unwrap()), 3);

        assert_eq!(s.evaluate(ms(2000)).unwrap().frame_index, 3);
        assert_eq!(s.evaluate(ms(2110)).unwrap().frame_index, 4);

        s.seek(42);
        assert_eq!(s.playback_state().current_frame_index, 4);
    }

    #[test]
    fn seek_from_completed_pauses() {
        let mut s = scheduler(numbered_container(3, 10), RepeatPolicy::Count(1));
        s.play();
        s.evaluate(ms(100));
        assert_eq!(s.state(), SchedulerState::Completed);

        s.seek(0);
        let state = s.playback_state();
        assert_eq!(state.state, SchedulerState::Paused);
        assert_eq!(state.iteration_count, 0);
        assert_eq!(state.current_frame_index, 0);
    }

    #[test]
    fn broken_frame_is_skipped_once() {
        let frames = vec![
            solid_frame(0, Rect::full(1, 1), [7, 7, 7, 255], 10, Source, Keep),
            broken_frame(1, Rect::full(1, 1), 10),
            solid_frame(2, Rect::full(1, 1), [9, 9, 9, 255], 10, Source, Keep),
        ];
        let mut s = scheduler(container(1, 1, frames), RepeatPolicy::Infinite);
        s.play();
        let kept = s.evaluate(ms(15)).unwrap();
        assert_eq!(kept.frame_index, 0);
        assert_eq!(s.playback_state().current_frame_index, 1);
        let generation = s.slot().generation();
        s.evaluate(ms(16));
        assert_eq!(s.slot().generation(), generation);

        assert_eq!(gray(&s.evaluate(ms(25)).unwrap()), 9);
    }

    #[test]
    fn step_wraps_and_completes() {
        let mut s = scheduler(numbered_container(3, 10), RepeatPolicy::Count(2));
        s.play();
        let mut shown = vec![s.playback_state().current_frame_index];
        while s.state() == SchedulerState::Running {
            s.step();
            shown.push(s.playback_state().current_frame_index);
        }
        assert_eq!(shown, [0, 1, 2, 0, 1, 2, 2]);
        assert_eq!(s.playback_state().iteration_count, 2);
        assert_eq!(s.state(), SchedulerState::Completed);
    }

    fn strip_frames() -> Vec<Frame> {
        vec![
            solid_frame(0, Rect::full(3, 1), [0, 0, 0, 255], 10, Source, Keep),
            solid_frame(1, Rect::new(0, 0, 1, 1), [1, 1, 1, 255], 10, Source, Keep),
            solid_frame(2, Rect::new(1, 0, 1, 1), [2, 2, 2, 255], 10, Source, Keep),
            solid_frame(3, Rect::new(2, 0, 1, 1), [3, 3, 3, 255], 10, Source, Keep),
        ]
    }

    #[test]
    fn replay_option_composites_skipped_frames() {
        let mut s = Scheduler::new(
            container(3, 1, strip_frames()),
            Arc::new(FrameSlot::new()),
            SchedulerOptions {
                replay_skipped_frames: true,
                ..SchedulerOptions::default()
            },
        );
        s.play();
        let jumped = s.evaluate(ms(35)).unwrap();
        assert_eq!(jumped.frame_index, 3);
        assert_eq!(jumped.bitmap.pixel(0, 0), Some([1, 1, 1, 255]));
        assert_eq!(jumped.bitmap.pixel(1, 0), Some([2, 2, 2, 255]));
    }

    #[test]
    fn dirty_rect_reader_that_misses_a_step_still_matches_the_canvas() {
        let mut s = Scheduler::new(
            container(3, 1, strip_frames()),
            Arc::new(FrameSlot::new()),
            SchedulerOptions {
                repeat: RepeatPolicy::Infinite,
                publish_mode: PublishMode::DirtyRect,
                ..SchedulerOptions::default()
            },
        );
        s.play();
        let mut surface = Bitmap::new(3, 1);
        let blit = |surface: &mut Bitmap, frame: PublishedFrame| {
            surface.blit_source(&frame.bitmap, frame.placement());
        };
        blit(&mut surface, s.slot().read().unwrap());

        s.step();
        s.step();
        let latest = s.slot().read().unwrap();
        assert_eq!(latest.frame_index, 2);
        assert_eq!(latest.placement(), Rect::new(0, 0, 2, 1));
        blit(&mut surface, latest);
        assert_eq!(surface, *s.composite.canvas());

        s.step();
        let next = s.slot().read().unwrap();
        assert_eq!(next.placement(), Rect::new(2, 0, 1, 1));
        blit(&mut surface, next);
        assert_eq!(surface, *s.composite.canvas());
    }

    #[test]
    fn cancel_flag_stops_compositing() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut s = scheduler(numbered_container(4, 10), RepeatPolicy::Infinite)
            .with_cancel_flag(Arc::clone(&flag));
        s.prime();
        let generation = s.slot().generation();

        flag.store(true, Ordering::Release);
        s.seek(3);
        s.play();
        s.step();
        assert_eq!(s.playback_state().current_frame_index, 0);
        assert_eq!(s.slot().generation(), generation);
    }

    #[test]
    fn dispose_closes_the_slot() {
        let mut s = scheduler(numbered_container(2, 10), RepeatPolicy::Infinite);
        s.play();
        assert!(s.evaluate(ms(5)).is_some());
        s.dispose();
        s.dispose();
        assert!(s.evaluate(ms(15)).is_none());
        assert!(s.slot().read().is_none());
        s.play();
        s.seek(1);
        assert_eq!(s.state(), SchedulerState::Disposed);
    }
}
