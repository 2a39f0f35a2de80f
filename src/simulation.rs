//! Deterministic session simulation
//!
//! A [`Scenario`] is a timeline of what the candidate and their surroundings do
//! (leaving the camera, noise, tab switches, answers, submit, closing the page).
//! [`run_scenario`] drives a real [`SessionController`] through it one virtual
//! second at a time using scripted capture, a manual focus source, a manual
//! clock and in-memory stores, and reports everything the controller emitted.

use crate::capture::{ScriptedCapture, ScriptedFeed};
use crate::clock::ManualClock;
use crate::config::ProctorConfig;
use crate::controller::{EventLog, SessionController, SessionEvent, SessionParts};
use crate::draft::MemoryDraftStore;
use crate::error::{DeviceError, ProctorError};
use crate::focus::{FocusSignal, ManualFocusSource};
use crate::questions::{QuestionBank, WeightedQuestionBank};
use crate::submission::{MemoryDataStore, SubmissionPayload};
use crate::types::{CandidateMeta, SessionState, ViolationSummary};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Capture failure to inject at consent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFailure {
    PermissionDenied,
    NotFound,
    Busy,
}

impl From<CaptureFailure> for DeviceError {
    fn from(failure: CaptureFailure) -> Self {
        match failure {
            CaptureFailure::PermissionDenied => DeviceError::PermissionDenied,
            CaptureFailure::NotFound => DeviceError::NotFound,
            CaptureFailure::Busy => DeviceError::Busy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceStep {
    pub at: u64,
    pub present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseStep {
    pub at: u64,
    pub energy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusStep {
    pub at: u64,
    pub signal: FocusSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerStep {
    pub at: u64,
    pub question: String,
    pub choice: String,
}

/// Timeline of one simulated attempt; `at` is seconds after consent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub start: Option<DateTime<Utc>>,
    pub candidate: CandidateMeta,
    pub capture_failure: Option<CaptureFailure>,
    /// Second at which the device becomes available and capture is retried
    pub capture_recovers_at: Option<u64>,
    pub presence: Vec<PresenceStep>,
    pub noise: Vec<NoiseStep>,
    pub focus: Vec<FocusStep>,
    pub answers: Vec<AnswerStep>,
    /// Answer every question with this option at second 0
    pub answer_all_with: Option<String>,
    pub submit_at: Option<u64>,
    pub close_at: Option<u64>,
    /// Primary submissions that fail before one succeeds
    pub submit_failures: u32,
    /// Defaults to the assessment duration plus one second
    pub horizon_secs: Option<u64>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn start_time(&self) -> DateTime<Utc> {
        self.start
            .unwrap_or_else(|| Utc.timestamp_opt(1_704_099_600, 0).single().unwrap_or_default())
    }
}

/// Everything a simulated attempt produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub events: Vec<SessionEvent>,
    /// Operations the controller rejected, as `"t=<secs>: <error>"`
    pub rejections: Vec<String>,
    pub final_state: SessionState,
    pub summary: ViolationSummary,
    pub submitted: Vec<SubmissionPayload>,
    pub best_effort: Vec<SubmissionPayload>,
    pub draft_remaining: bool,
    pub candidate_message: Option<String>,
    pub elapsed_secs: u64,
}

/// Run `scenario` against the built-in question bank
pub fn run_scenario(
    scenario: &Scenario,
    config: ProctorConfig,
) -> Result<SimulationReport, ProctorError> {
    run_scenario_with_bank(scenario, config, WeightedQuestionBank::builtin())
}

pub fn run_scenario_with_bank(
    scenario: &Scenario,
    config: ProctorConfig,
    bank: WeightedQuestionBank,
) -> Result<SimulationReport, ProctorError> {
    let horizon = scenario
        .horizon_secs
        .unwrap_or(config.assessment_duration_secs as u64 + 1);
    let draft_key = crate::draft::DraftPersistence::key_for(&config.assessment_kind);

    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let feed = ScriptedFeed::new();
    let focus = ManualFocusSource::new();
    let drafts = MemoryDraftStore::new();
    let store = MemoryDataStore::new();
    let log = EventLog::new();

    if let Some(failure) = scenario.capture_failure {
        feed.fail_acquire(Some(failure.into()));
    }
    store.fail_submits(scenario.submit_failures);
    let question_ids: Vec<String> = bank.questions().iter().map(|q| q.id.clone()).collect();

    let mut session = SessionController::new(
        config,
        SessionParts {
            capture: Box::new(ScriptedCapture::new(feed.clone())),
            focus: Box::new(focus.clone()),
            drafts: Box::new(drafts.clone()),
            data_store: Box::new(store.clone()),
            questions: Box::new(bank),
            clock: clock.clone(),
        },
    )?
    .with_observer(Box::new(log.clone()))
    .with_identity(Uuid::nil(), "simulation");

    let mut rejections = Vec::new();
    if let Err(e) = session.consent(scenario.candidate.clone()) {
        rejections.push(format!("t=0: {e}"));
    }

    let mut elapsed = 0;
    for t in 0..=horizon {
        elapsed = t;
        if t > 0 {
            clock.advance_secs(1);
        }

        if scenario.capture_recovers_at == Some(t) {
            feed.fail_acquire(None);
            if let Err(e) = session.retry_capture() {
                rejections.push(format!("t={t}: {e}"));
            }
        }
        for step in scenario.presence.iter().filter(|s| s.at == t) {
            feed.set_present(step.present);
        }
        for step in scenario.noise.iter().filter(|s| s.at == t) {
            feed.set_energy(step.energy);
        }
        for step in scenario.focus.iter().filter(|s| s.at == t) {
            focus.fire(step.signal);
        }
        if t == 0 {
            if let Some(choice) = &scenario.answer_all_with {
                for id in &question_ids {
                    if let Err(e) = session.set_answer(id.clone(), choice.clone()) {
                        rejections.push(format!("t={t}: {e}"));
                        break;
                    }
                }
            }
        }
        for step in scenario.answers.iter().filter(|s| s.at == t) {
            if let Err(e) = session.set_answer(step.question.clone(), step.choice.clone()) {
                rejections.push(format!("t={t}: {e}"));
            }
        }

        session.tick();

        if scenario.submit_at == Some(t) {
            if let Err(e) = session.submit() {
                rejections.push(format!("t={t}: {e}"));
            }
        }
        if scenario.close_at == Some(t) {
            session.teardown();
            break;
        }
        if session.phase().is_terminal() {
            break;
        }
    }
    debug!(elapsed, phase = ?session.phase(), "simulation finished");

    Ok(SimulationReport {
        events: log.events(),
        rejections,
        final_state: session.state().clone(),
        summary: session.summary(),
        submitted: store.submitted(),
        best_effort: store.best_effort(),
        draft_remaining: drafts.contains(&draft_key),
        candidate_message: session.candidate_message(),
        elapsed_secs: elapsed,
    })
}
