//! Violation ledger and lockout policy
//!
//! The ledger is the single writer of per-kind counts. [`ViolationLedger::record`]
//! appends, bumps the count and evaluates the lockout policy in one synchronous
//! call, so two detectors firing in the same tick are strictly serialized.
//! Once a lockout is decided the ledger freezes: later records are no-ops and
//! the submitted summary is stable.

use crate::config::LockoutConfig;
use crate::types::{LockoutReason, Violation, ViolationKind, ViolationSummary};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Count thresholds that force a lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub presence_lost_limit: u32,
    pub tab_switch_limit: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        LockoutConfig::default().into()
    }
}

impl From<LockoutConfig> for LockoutPolicy {
    fn from(config: LockoutConfig) -> Self {
        Self {
            presence_lost_limit: config.presence_lost_limit,
            tab_switch_limit: config.tab_switch_limit,
        }
    }
}

impl LockoutPolicy {
    /// Pure decision over the current counts
    pub fn evaluate(&self, counts: &BTreeMap<ViolationKind, u32>) -> Option<LockoutReason> {
        let count = |kind| counts.get(&kind).copied().unwrap_or(0);
        if count(ViolationKind::PresenceLost) >= self.presence_lost_limit {
            Some(LockoutReason::PresenceLost)
        } else if count(ViolationKind::TabSwitch) >= self.tab_switch_limit {
            Some(LockoutReason::TabSwitch)
        } else {
            None
        }
    }
}

/// Result of a [`ViolationLedger::record`] call
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded {
        violation: Violation,
        /// Set when this append crossed a lockout threshold
        lockout: Option<LockoutReason>,
    },
    /// Ledger already locked; nothing was written
    Frozen,
}

impl RecordOutcome {
    pub fn lockout(&self) -> Option<LockoutReason> {
        match self {
            RecordOutcome::Recorded { lockout, .. } => *lockout,
            RecordOutcome::Frozen => None,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            RecordOutcome::Recorded { violation, .. } => Some(violation),
            RecordOutcome::Frozen => None,
        }
    }
}

/// Append-only violation log
#[derive(Debug, Clone, Default)]
pub struct ViolationLedger {
    entries: Vec<Violation>,
    counts: BTreeMap<ViolationKind, u32>,
    policy: LockoutPolicy,
    lockout: Option<LockoutReason>,
}

impl ViolationLedger {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            entries: Vec::new(),
            counts: BTreeMap::new(),
            policy,
            lockout: None,
        }
    }

    /// Append a violation and evaluate the lockout policy
    pub fn record(
        &mut self,
        kind: ViolationKind,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> RecordOutcome {
        if self.lockout.is_some() {
            return RecordOutcome::Frozen;
        }

        let violation = Violation {
            sequence: self.entries.len() as u64,
            kind,
            timestamp: at,
            detail: detail.into(),
        };
        self.entries.push(violation.clone());
        *self.counts.entry(kind).or_insert(0) += 1;

        warn!(
            kind = kind.as_str(),
            sequence = violation.sequence,
            count = self.count(kind),
            detail = %violation.detail,
            "proctoring violation"
        );

        let lockout = self.policy.evaluate(&self.counts);
        if let Some(reason) = lockout {
            info!(?reason, total = self.entries.len(), "lockout threshold reached");
            self.lockout = Some(reason);
        }

        RecordOutcome::Recorded { violation, lockout }
    }

    pub fn count(&self, kind: ViolationKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<ViolationKind, u32> {
        &self.counts
    }

    pub fn entries(&self) -> &[Violation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lockout(&self) -> Option<LockoutReason> {
        self.lockout
    }

    pub fn is_frozen(&self) -> bool {
        self.lockout.is_some()
    }

    /// Snapshot for the submitted report
    pub fn summary(&self, switch_count: u32) -> ViolationSummary {
        ViolationSummary {
            total: self.entries.len(),
            by_kind: self.counts.clone(),
            switch_count,
            lockout: self.lockout,
            violations: self.entries.clone(),
        }
    }
}
