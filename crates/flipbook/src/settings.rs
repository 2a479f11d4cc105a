use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handoff::PublishMode;
use crate::scheduler::SchedulerOptions;
use crate::source::types::RepeatPolicy;
use crate::source::{DEFAULT_MAX_CANVAS_PIXELS, DEFAULT_MIN_FRAME_DELAY, ParseOptions};

/// Which execution model advances frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// The host calls `composited_frame(elapsed)` on its own render tick.
    #[default]
    Polling,
    /// A dedicated player thread advances frames on their delays.
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub version: u32,
    pub min_frame_delay_ms: u64,
    /// Overrides the loop count stored in the file.
    pub repeat: Option<RepeatPolicy>,
    pub auto_start: bool,
    pub drive: DriveMode,
    pub publish: PublishMode,
    pub cache_decoded_frames: bool,
    pub max_canvas_pixels: u64,
    pub command_queue_capacity: usize,
    pub replay_skipped_frames: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            version: 1,
            min_frame_delay_ms: DEFAULT_MIN_FRAME_DELAY.as_millis() as u64,
            repeat: None,
            auto_start: true,
            drive: DriveMode::Polling,
            publish: PublishMode::FullCanvas,
            cache_decoded_frames: true,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            command_queue_capacity: 64,
            replay_skipped_frames: false,
        }
    }
}

impl PlaybackConfig {
    /// `<config dir>/flipbook/playback.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("flipbook").join("playback.json"))
    }

    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Read a config file, falling back to defaults if it is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&json) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring invalid playback config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::default_path() else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            log::warn!("Failed to save playback config: {e}");
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            min_frame_delay: Duration::from_millis(self.min_frame_delay_ms),
            max_canvas_pixels: self.max_canvas_pixels,
            memoize_frames: self.cache_decoded_frames,
        }
    }

    /// Scheduler options for an animation whose file declares `hint`.
    pub fn scheduler_options(&self, hint: RepeatPolicy) -> SchedulerOptions {
        SchedulerOptions {
            repeat: self.repeat.unwrap_or(hint),
            publish_mode: self.publish,
            replay_skipped_frames: self.replay_skipped_frames,
        }
    }
}
