//! Core types for the Proctor Flux session core
//!
//! This module defines the data that flows between the detectors, the violation
//! ledger, the session controller and the submission path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Answers keyed by question id
pub type Answers = BTreeMap<String, String>;

/// Kind of integrity violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    PresenceLost,
    SustainedNoise,
    TabSwitch,
    WindowBlur,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 4] = [
        ViolationKind::PresenceLost,
        ViolationKind::SustainedNoise,
        ViolationKind::TabSwitch,
        ViolationKind::WindowBlur,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::PresenceLost => "presence-lost",
            ViolationKind::SustainedNoise => "sustained-noise",
            ViolationKind::TabSwitch => "tab-switch",
            ViolationKind::WindowBlur => "window-blur",
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Monotonic index within the session, starting at 0
    pub sequence: u64,
    pub kind: ViolationKind,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Candidate is reading the instructions
    Rules,
    /// Waiting on the camera/microphone grant
    RequestingCapture,
    /// Countdown and detectors running
    Active,
    Completed,
    Locked,
    Errored,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Completed | SessionPhase::Locked | SessionPhase::Errored
        )
    }
}

/// Candidate details captured on the form; opaque to the integrity logic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMeta {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    /// Campus or institution name
    #[serde(default)]
    pub institution: String,
}

impl CandidateMeta {
    /// Fields the manual submit path requires to be non-blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.phone.trim().is_empty() {
            missing.push("phone");
        }
        if self.email.trim().is_empty() {
            missing.push("email");
        }
        if self.institution.trim().is_empty() {
            missing.push("institution");
        }
        missing
    }
}

/// Per-attempt session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub started_at: Option<DateTime<Utc>>,
    /// Never negative; non-increasing while Active
    pub time_remaining_secs: u32,
    pub candidate: CandidateMeta,
    pub is_locked: bool,
}

/// One detector reading; consumed immediately by its detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "value", rename_all = "snake_case")]
pub enum DetectionSample {
    Presence(bool),
    Noise(f64),
}

/// Which threshold forced the lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockoutReason {
    PresenceLost,
    TabSwitch,
}

/// Why the final payload was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitReason {
    Manual,
    Timeout,
    Lockout,
    PageClosedMidAssessment,
}

impl SubmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::Timeout => "timeout",
            SubmitReason::Lockout => "lockout",
            SubmitReason::PageClosedMidAssessment => "page-closed-mid-assessment",
        }
    }

    /// Forced submits bypass answer validation
    pub fn is_forced(&self) -> bool {
        !matches!(self, SubmitReason::Manual)
    }
}

/// Frozen view of the ledger attached to the submitted report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total: usize,
    pub by_kind: BTreeMap<ViolationKind, u32>,
    /// Tab-hidden transitions seen by the focus monitor
    pub switch_count: u32,
    pub lockout: Option<LockoutReason>,
    pub violations: Vec<Violation>,
}

impl ViolationSummary {
    pub fn count(&self, kind: ViolationKind) -> u32 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Completion statistics reported to the rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub completed: usize,
    pub total: usize,
    /// Weighted score percentage (0-100)
    pub score: f64,
}

/// Acknowledgement returned by the remote data store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub receipt_id: String,
}
