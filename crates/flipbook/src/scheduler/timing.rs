use std::time::{Duration, Instant};

use crate::source::AnimationContainer;

/// Cumulative frame boundaries of one animation cycle.
#[derive(Debug, Clone)]
pub struct FrameTimeline {
    /// `ends[i]` is the sum of the delays of frames `0..=i`.
    ends: Vec<Duration>,
}

/// Where an animation-local time falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePosition {
    /// Completed cycles before this one.
    pub cycle: u64,
    pub frame: usize,
}

impl FrameTimeline {
    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Self {
        let mut total = Duration::ZERO;
        let ends = delays
            .into_iter()
            .map(|d| {
                total += d;
                total
            })
            .collect();
        Self { ends }
    }

    pub fn for_container(container: &AnimationContainer) -> Self {
        Self::new(container.frames().iter().map(|f| f.delay))
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn total(&self) -> Duration {
        self.ends.last().copied().unwrap_or_default()
    }

    /// Cycle offset at which frame `index` becomes visible.
    pub fn start_of(&self, index: usize) -> Duration {
        match index {
            0 => Duration::ZERO,
            i => self.ends.get(i - 1).copied().unwrap_or_else(|| self.total()),
        }
    }

    /// Frame visible at `local`: the first one whose cumulative delay exceeds
    /// `local mod total`.
    pub fn position(&self, local: Duration) -> CyclePosition {
        let total = self.total().as_nanos();
        if total == 0 {
            return CyclePosition { cycle: 0, frame: 0 };
        }
        let local = local.as_nanos();
        let modulus = local % total;
        let frame = self.ends.partition_point(|end| end.as_nanos() <= modulus);
        CyclePosition {
            cycle: (local / total) as u64,
            frame: frame.min(self.ends.len() - 1),
        }
    }
}

/// Maps the host's elapsed time onto animation-local time. The mapping can be
/// re-anchored so a seek or resume continues from a chosen position.
#[derive(Debug, Clone, Default)]
pub struct LocalClock {
    origin: Duration,
    base: Duration,
    last_local: Duration,
    pending: Option<Duration>,
}

impl LocalClock {
    /// Make the next `local()` call return `at`, measuring onward from there.
    pub fn rebase(&mut self, at: Duration) {
        self.pending = Some(at);
    }

    pub fn local(&mut self, elapsed: Duration) -> Duration {
        if let Some(at) = self.pending.take() {
            self.origin = elapsed;
            self.base = at;
        } else if elapsed < self.origin {
            // host restarted its clock; hold position
            self.origin = elapsed;
            self.base = self.last_local;
        }
        self.last_local = self.base + (elapsed - self.origin);
        self.last_local
    }

    pub fn last_local(&self) -> Duration {
        self.pending.unwrap_or(self.last_local)
    }
}

/// Pausable monotonic stopwatch for hosts driving the polling model.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started() -> Self {
        let mut watch = Self::new();
        watch.start();
        watch
    }

    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn position_respects_cumulative_boundaries() {
        let timeline = FrameTimeline::new([ms(30), ms(50), ms(70)]);
        assert_eq!(timeline.total(), ms(150));
        assert_eq!(timeline.start_of(2), ms(80));

        let eps = Duration::from_micros(1);
        for (i, end) in [ms(30), ms(80), ms(150)].into_iter().enumerate() {
            assert_eq!(timeline.position(end - eps).frame, i);
            assert_eq!(timeline.position(end + eps).frame, (i + 1) % 3);
        }
        assert_eq!(
            timeline.position(ms(320)),
            CyclePosition { cycle: 2, frame: 0 }
        );
    }

    #[test]
    fn clock_rebases_and_survives_host_reset() {
        let mut clock = LocalClock::default();
        assert_eq!(clock.local(ms(250)), ms(250));

        clock.rebase(ms(40));
        assert_eq!(clock.last_local(), ms(40));
        assert_eq!(clock.local(ms(1000)), ms(40));
        assert_eq!(clock.local(ms(1010)), ms(50));

        // elapsed jumped backwards
        assert_eq!(clock.local(ms(5)), ms(50));
        assert_eq!(clock.local(ms(15)), ms(60));
    }

    #[test]
    fn stopwatch_freezes_while_stopped() {
        let mut watch = Stopwatch::started();
        thread::sleep(ms(5));
        watch.stop();
        let frozen = watch.elapsed();
        assert!(frozen >= ms(5));
        thread::sleep(ms(5));
        assert_eq!(watch.elapsed(), frozen);
        assert!(!watch.is_running());

        watch.reset();
        assert_eq!(watch.elapsed(), Duration::ZERO);
    }
}
