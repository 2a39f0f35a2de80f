//! Presence detection
//!
//! A cheap pixel-statistics heuristic stands in for face detection. Each sampled
//! frame is reduced to three ratios:
//!
//! - **bright**: pixels whose luma falls in a mid-high band
//! - **dark**: near-black pixels (covered or misdirected camera)
//! - **skin tone**: red-dominant pixels with red−green above a floor
//!
//! Presence = `(skin_tone > 0.08 OR bright > 0.25) AND dark < 0.7` with the
//! default thresholds. Violations are edge-triggered on present → absent.

use crate::capture::Frame;
use crate::config::PresenceConfig;
use serde::{Deserialize, Serialize};

/// Pixel ratios for one frame (each 0-1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub bright_ratio: f64,
    pub dark_ratio: f64,
    pub skin_tone_ratio: f64,
}

impl FrameStats {
    /// Scan every pixel of `frame`
    pub fn analyze(frame: &Frame, config: &PresenceConfig) -> Self {
        let total = frame.pixel_count();
        if total == 0 {
            return Self {
                bright_ratio: 0.0,
                dark_ratio: 1.0,
                skin_tone_ratio: 0.0,
            };
        }

        let mut bright = 0usize;
        let mut dark = 0usize;
        let mut skin = 0usize;

        for [r, g, b] in frame.pixels() {
            let luma = (r as f64 + g as f64 + b as f64) / 3.0;
            if luma > config.bright_luma_low && luma < config.bright_luma_high {
                bright += 1;
            }
            if luma <= config.dark_luma_max {
                dark += 1;
            }
            if is_skin_tone(r, g, b, config.skin_red_green_floor) {
                skin += 1;
            }
        }

        let total = total as f64;
        Self {
            bright_ratio: bright as f64 / total,
            dark_ratio: dark as f64 / total,
            skin_tone_ratio: skin as f64 / total,
        }
    }

    pub fn is_present(&self, config: &PresenceConfig) -> bool {
        (self.skin_tone_ratio > config.skin_tone_min_ratio
            || self.bright_ratio > config.bright_min_ratio)
            && self.dark_ratio < config.dark_max_ratio
    }
}

/// Red channel dominant and red−green above `floor`
fn is_skin_tone(r: u8, g: u8, b: u8, floor: i16) -> bool {
    r > g && r > b && (r as i16 - g as i16) > floor
}

/// Edge reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceTransition {
    /// present → absent; becomes a violation
    Lost,
    /// absent → present; silent, never reverses an earlier violation
    Restored,
}

/// Edge-triggered presence state
#[derive(Debug, Clone)]
pub struct PresenceDetector {
    last_presence: bool,
    losses: u32,
}

impl Default for PresenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceDetector {
    /// Starts as present so nothing fires before the first sample
    pub fn new() -> Self {
        Self {
            last_presence: true,
            losses: 0,
        }
    }

    pub fn last_presence(&self) -> bool {
        self.last_presence
    }

    /// Number of present → absent edges observed
    pub fn losses(&self) -> u32 {
        self.losses
    }

    /// Feed one presence sample
    pub fn observe(&mut self, present: bool) -> Option<PresenceTransition> {
        let previous = self.last_presence;
        self.last_presence = present;
        match (previous, present) {
            (true, false) => {
                self.losses += 1;
                Some(PresenceTransition::Lost)
            }
            (false, true) => Some(PresenceTransition::Restored),
            _ => None,
        }
    }

    /// Analyze a frame and feed the resulting sample
    pub fn sample(
        &mut self,
        frame: &Frame,
        config: &PresenceConfig,
    ) -> (FrameStats, Option<PresenceTransition>) {
        let stats = FrameStats::analyze(frame, config);
        let transition = self.observe(stats.is_present(config));
        (stats, transition)
    }
}
