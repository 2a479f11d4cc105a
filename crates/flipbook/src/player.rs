//! Background-loop execution model: a dedicated thread owns the scheduler and
//! advances frames on their delays, driven by a bounded command channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::error::{PlaybackError, panic_message};
use crate::handoff::{FrameSlot, PublishedFrame};
use crate::scheduler::{PlaybackState, Scheduler, SchedulerOptions, SchedulerState};
use crate::source::AnimationContainer;
use crate::source::types::RepeatPolicy;

/// Requests applied by the player thread at the start of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    SeekTo(usize),
    SetRepeatPolicy(RepeatPolicy),
    Dispose,
}

/// Sent whenever a new frame is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    pub frame_index: usize,
    pub generation: u64,
}

/// Handle to a running background player. Methods take `&self`, so the handle
/// can be shared behind an `Arc`.
pub struct Player {
    commands: Sender<Command>,
    events: Receiver<FrameEvent>,
    slot: Arc<FrameSlot>,
    status: Arc<Mutex<PlaybackState>>,
    disposed: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Show frame 0 immediately, then hand the scheduler to a new thread.
    pub fn spawn(
        container: Arc<AnimationContainer>,
        options: SchedulerOptions,
        queue_capacity: usize,
        auto_start: bool,
    ) -> Result<Self, PlaybackError> {
        let slot = Arc::new(FrameSlot::new());
        let disposed = Arc::new(AtomicBool::new(false));
        let mut scheduler = Scheduler::new(container, Arc::clone(&slot), options)
            .with_cancel_flag(Arc::clone(&disposed));
        scheduler.prime();
        if auto_start {
            scheduler.play();
        }

        let capacity = queue_capacity.max(1);
        let (command_tx, command_rx) = crossbeam_channel::bounded(capacity);
        let (event_tx, event_rx) = crossbeam_channel::bounded(capacity);
        let status = Arc::new(Mutex::new(scheduler.playback_state()));

        let worker = Worker {
            last_generation: slot.generation(),
            scheduler,
            commands: command_rx,
            events: event_tx,
            status: Arc::clone(&status),
            disposed: Arc::clone(&disposed),
            deadline: None,
            remaining: None,
        };
        let handle = thread::Builder::new()
            .name("flipbook-player".into())
            .spawn(move || worker.run())
            .map_err(PlaybackError::Spawn)?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            slot,
            status,
            disposed,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn seek_to(&self, index: usize) {
        self.send(Command::SeekTo(index));
    }

    pub fn set_repeat_policy(&self, policy: RepeatPolicy) {
        self.send(Command::SetRepeatPolicy(policy));
    }

    /// Latest publication, `None` after dispose.
    pub fn read(&self) -> Option<PublishedFrame> {
        self.slot.read()
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Frame-change notifications. Events are dropped if nobody keeps up.
    pub fn events(&self) -> &Receiver<FrameEvent> {
        &self.events
    }

    /// State as of the player's last iteration.
    pub fn playback_state(&self) -> PlaybackState {
        *lock(&self.status)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop the thread, wait for it, and close the slot. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        // The flag alone stops the loop at its next wake point; the command wakes it now.
        let _ = self.commands.try_send(Command::Dispose);

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Player thread panicked during shutdown");
            }
        }

        self.slot.close();
        lock(&self.status).state = SchedulerState::Disposed;
        log::debug!("Player disposed");
    }

    fn send(&self, command: Command) {
        if self.is_disposed() {
            return;
        }
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                log::warn!("Player command queue full, dropping {command:?}");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock(status: &Mutex<PlaybackState>) -> MutexGuard<'_, PlaybackState> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-side state.
struct Worker {
    scheduler: Scheduler,
    commands: Receiver<Command>,
    events: Sender<FrameEvent>,
    status: Arc<Mutex<PlaybackState>>,
    disposed: Arc<AtomicBool>,
    /// When the current frame's delay runs out.
    deadline: Option<Instant>,
    /// Delay left on the current frame when paused.
    remaining: Option<Duration>,
    last_generation: u64,
}

impl Worker {
    fn run(mut self) {
        'outer: loop {
            if self.cancelled() {
                break;
            }

            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }
            if self.cancelled() {
                break;
            }

            if self.scheduler.state() != SchedulerState::Running {
                // Idle until told otherwise.
                match self.commands.recv() {
                    Ok(command) => {
                        if self.apply(command) {
                            continue;
                        }
                        break;
                    }
                    Err(_) => break,
                }
            }

            let delay = self.scheduler.current_delay();
            let due = *self.deadline.get_or_insert_with(|| Instant::now() + delay);
            let now = Instant::now();
            if now < due {
                match self.commands.recv_timeout(due - now) {
                    Ok(command) => {
                        if !self.apply(command) {
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            if self.cancelled() {
                break;
            }
            self.advance(due);
        }

        self.scheduler.dispose();
        self.sync_status();
    }

    fn cancelled(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns `false` when the loop should exit.
    fn apply(&mut self, command: Command) -> bool {
        if command == Command::Dispose {
            return false;
        }
        log::debug!("Player command {command:?}");
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
            log::error!("Player command {command:?} panicked: {}", panic_message(&*payload));
        }
        self.notify();
        self.sync_status();
        true
    }

    fn execute(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Play => {
                let before = self.scheduler.state();
                self.scheduler.play();
                self.deadline = match (before, self.remaining.take()) {
                    (SchedulerState::Paused, Some(left)) => Some(now + left),
                    (SchedulerState::Running, _) => self.deadline,
                    _ => None,
                };
            }
            Command::Pause => {
                if self.scheduler.state() == SchedulerState::Running {
                    self.remaining = self.deadline.take().map(|d| d.saturating_duration_since(now));
                    self.scheduler.pause();
                }
            }
            Command::SeekTo(index) => {
                self.scheduler.seek(index);
                self.deadline = None;
                self.remaining = None;
            }
            Command::SetRepeatPolicy(policy) => self.scheduler.set_repeat_policy(policy),
            Command::Dispose => {}
        }
    }

    /// Show the next frame and schedule the one after against the previous
    /// deadline, so compositing time is not added to the frame delay.
    fn advance(&mut self, due: Instant) {
        let scheduler = &mut self.scheduler;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| scheduler.step())) {
            log::error!("Player iteration panicked, skipping frame: {}", panic_message(&*payload));
        }

        let now = Instant::now();
        let next = due + self.scheduler.current_delay();
        self.deadline = Some(if next <= now { now } else { next });
        self.notify();
        self.sync_status();
    }

    fn notify(&mut self) {
        let generation = self.scheduler.slot().generation();
        if generation == self.last_generation {
            return;
        }
        self.last_generation = generation;
        let frame_index = self.scheduler.playback_state().current_frame_index.max(0) as usize;
        // A full queue means the host is behind; it can still read the slot.
        let _ = self.events.try_send(FrameEvent {
            frame_index,
            generation,
        });
    }

    fn sync_status(&self) {
        *lock(&self.status) = self.scheduler.playback_state();
    }
}
