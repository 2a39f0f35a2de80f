//! Assessment countdown
//!
//! Driven by one scheduler tick per second. Advisory marks fire once each on the
//! way down; reaching zero reports [`CountdownTick::Expired`] exactly once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of one countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tick", rename_all = "snake_case")]
pub enum CountdownTick {
    Running { remaining: u32 },
    /// `remaining` just crossed a configured advisory mark
    Advisory { remaining: u32 },
    /// Reached zero on this tick
    Expired,
    /// Already at zero; nothing happened
    Idle,
}

/// Display band for the remaining time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    /// Ten minutes or less
    Warning,
    /// Five minutes or less
    Critical,
}

impl Urgency {
    pub fn for_remaining(secs: u32) -> Self {
        if secs <= 300 {
            Urgency::Critical
        } else if secs <= 600 {
            Urgency::Warning
        } else {
            Urgency::Normal
        }
    }
}

/// `MM:SS`, minutes unbounded
pub fn format_mm_ss(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[derive(Debug, Clone)]
pub struct Countdown {
    total: u32,
    remaining: u32,
    marks: BTreeSet<u32>,
    fired: BTreeSet<u32>,
}

impl Countdown {
    pub fn new(total_secs: u32, advisory_marks: &[u32]) -> Self {
        Self {
            total: total_secs,
            remaining: total_secs,
            marks: advisory_marks
                .iter()
                .copied()
                .filter(|&m| m > 0 && m < total_secs)
                .collect(),
            fired: BTreeSet::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn elapsed(&self) -> u32 {
        self.total - self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    pub fn urgency(&self) -> Urgency {
        Urgency::for_remaining(self.remaining)
    }

    pub fn display(&self) -> String {
        format_mm_ss(self.remaining)
    }

    /// Advance one second
    pub fn tick(&mut self) -> CountdownTick {
        if self.remaining == 0 {
            return CountdownTick::Idle;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            return CountdownTick::Expired;
        }
        if self.marks.contains(&self.remaining) && self.fired.insert(self.remaining) {
            return CountdownTick::Advisory {
                remaining: self.remaining,
            };
        }
        CountdownTick::Running {
            remaining: self.remaining,
        }
    }
}
