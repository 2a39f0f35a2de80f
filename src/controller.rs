//! Session controller
//!
//! Owns every piece of per-attempt state and drives the phase machine:
//!
//! ```text
//! Rules -> RequestingCapture -> Active -> Completed | Locked | Errored
//!                 |                          ^
//!                 +--------- abandon --------+ (Errored)
//! ```
//!
//! Detectors, the countdown and the autosave are periodic tasks in a
//! [`Scheduler`] driven by the injected [`Clock`]; focus signals arrive
//! through the [`FocusMonitor`] queue. Everything runs on the caller's thread
//! inside [`SessionController::tick`], one task at a time, so a violation
//! append and its lockout check are never interleaved with another detector.

use crate::capture::{CaptureHandle, CaptureProvider};
use crate::clock::Clock;
use crate::config::ProctorConfig;
use crate::countdown::{Countdown, CountdownTick, Urgency};
use crate::draft::{DraftPersistence, DraftSnapshot, DraftStore};
use crate::error::{DeviceError, ProctorError};
use crate::focus::{FocusEvent, FocusMonitor, FocusSignal, FocusSignalSource};
use crate::ledger::{LockoutPolicy, ViolationLedger};
use crate::noise::NoiseDetector;
use crate::presence::{FrameStats, PresenceDetector, PresenceTransition};
use crate::questions::QuestionBank;
use crate::scheduler::{DueTask, Scheduler};
use crate::submission::{DataStore, PayloadInput, SubmissionFinalizer, SubmissionPayload};
use crate::types::{
    Ack, Answers, CandidateMeta, CompletionStats, LockoutReason, SessionPhase, SessionState,
    SubmitReason, Violation, ViolationKind, ViolationSummary,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shown for timeout, manual completion and lockout alike
pub const COMPLETE_MESSAGE: &str =
    "Assessment complete. Thank you for your time; your responses have been recorded.";

pub const SUBMIT_FAILED_MESSAGE: &str =
    "We could not submit your assessment. Your answers are saved on this device; please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTask {
    Countdown,
    PresenceSample,
    NoiseSample,
    DraftSave,
}

/// Callbacks for the rendering layer. All methods default to no-ops.
pub trait SessionObserver {
    fn on_stats_update(&mut self, _stats: CompletionStats) {}

    fn on_violation(&mut self, _violation: &Violation) {}

    fn on_phase_change(&mut self, _phase: SessionPhase) {}

    /// One-time remaining-time advisory
    fn on_advisory(&mut self, _remaining_secs: u32) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer callback captured as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged { phase: SessionPhase },
    Violation { violation: Violation },
    StatsUpdated { stats: CompletionStats },
    Advisory { remaining_secs: u32 },
}

/// Observer that appends every callback to a shared list
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn phases(&self) -> Vec<SessionPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PhaseChanged { phase } => Some(phase),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for EventLog {
    fn on_stats_update(&mut self, stats: CompletionStats) {
        self.push(SessionEvent::StatsUpdated { stats });
    }

    fn on_violation(&mut self, violation: &Violation) {
        self.push(SessionEvent::Violation {
            violation: violation.clone(),
        });
    }

    fn on_phase_change(&mut self, phase: SessionPhase) {
        self.push(SessionEvent::PhaseChanged { phase });
    }

    fn on_advisory(&mut self, remaining_secs: u32) {
        self.push(SessionEvent::Advisory { remaining_secs });
    }
}

/// Collaborators injected into a controller
pub struct SessionParts {
    pub capture: Box<dyn CaptureProvider>,
    pub focus: Box<dyn FocusSignalSource>,
    pub drafts: Box<dyn DraftStore>,
    pub data_store: Box<dyn DataStore>,
    pub questions: Box<dyn QuestionBank>,
    pub clock: Arc<dyn Clock>,
}

/// One assessment attempt
pub struct SessionController {
    config: ProctorConfig,
    session_id: Uuid,
    state: SessionState,
    answers: Answers,

    capture: Box<dyn CaptureProvider>,
    focus_source: Box<dyn FocusSignalSource>,
    drafts: Box<dyn DraftStore>,
    data_store: Box<dyn DataStore>,
    questions: Box<dyn QuestionBank>,
    clock: Arc<dyn Clock>,
    observer: Box<dyn SessionObserver>,

    handle: Option<CaptureHandle>,
    scheduler: Scheduler<SessionTask>,
    countdown: Option<Countdown>,
    presence: PresenceDetector,
    noise: NoiseDetector,
    focus: FocusMonitor,
    ledger: ViolationLedger,
    last_frame: Option<FrameStats>,

    draft: DraftPersistence,
    restorable: Option<DraftSnapshot>,
    dirty: bool,

    finalizer: SubmissionFinalizer,
    pending: Option<SubmissionPayload>,
    last_ack: Option<Ack>,
    last_device_error: Option<DeviceError>,

    /// Cleared before anything else on the way out; stray ticks check it
    active: bool,
    torn_down: bool,
}

impl SessionController {
    /// Build a controller in the `Rules` phase and look for a restorable draft
    pub fn new(config: ProctorConfig, parts: SessionParts) -> Result<Self, ProctorError> {
        config.validate()?;

        let draft = DraftPersistence::new(
            &config.assessment_kind,
            Duration::seconds(config.draft.ttl_secs),
        );
        let mut controller = Self {
            session_id: Uuid::new_v4(),
            state: SessionState {
                phase: SessionPhase::Rules,
                started_at: None,
                time_remaining_secs: config.assessment_duration_secs,
                candidate: CandidateMeta::default(),
                is_locked: false,
            },
            answers: Answers::new(),
            capture: parts.capture,
            focus_source: parts.focus,
            drafts: parts.drafts,
            data_store: parts.data_store,
            questions: parts.questions,
            clock: parts.clock,
            observer: Box::new(NoopObserver),
            handle: None,
            scheduler: Scheduler::new(),
            countdown: None,
            presence: PresenceDetector::new(),
            noise: NoiseDetector::new(config.noise.clone()),
            focus: FocusMonitor::new(),
            ledger: ViolationLedger::new(LockoutPolicy::from(config.lockout)),
            last_frame: None,
            draft,
            restorable: None,
            dirty: false,
            finalizer: SubmissionFinalizer::new(config.assessment_kind.clone()),
            pending: None,
            last_ack: None,
            last_device_error: None,
            active: false,
            torn_down: false,
            config,
        };

        controller.check_draft();
        info!(
            session = %controller.session_id,
            kind = %controller.config.assessment_kind,
            "session created"
        );
        Ok(controller)
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fix the session and producer ids (reproducible payloads)
    pub fn with_identity(mut self, session_id: Uuid, instance_id: &str) -> Self {
        self.session_id = session_id;
        self.finalizer = SubmissionFinalizer::with_instance_id(
            self.config.assessment_kind.clone(),
            instance_id.to_string(),
        );
        self
    }

    fn check_draft(&mut self) {
        let now = self.clock.now();
        match self.draft.load_restorable(self.drafts.as_mut(), now) {
            Ok(Some(snapshot)) => {
                info!(
                    key = self.draft.key(),
                    age_seconds = snapshot.age_seconds(now),
                    "restorable draft found"
                );
                self.restorable = Some(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "draft lookup failed"),
        }
    }

    // ---- accessors ----

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn is_locked(&self) -> bool {
        self.state.is_locked
    }

    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    pub fn time_remaining(&self) -> u32 {
        self.state.time_remaining_secs
    }

    pub fn urgency(&self) -> Urgency {
        Urgency::for_remaining(self.state.time_remaining_secs)
    }

    /// Latest noise energy sample, for a level meter
    pub fn noise_level(&self) -> Option<f64> {
        self.noise.current_level()
    }

    pub fn last_frame_stats(&self) -> Option<FrameStats> {
        self.last_frame
    }

    pub fn completion(&self) -> CompletionStats {
        self.questions.completion(&self.answers)
    }

    pub fn summary(&self) -> ViolationSummary {
        self.ledger.summary(self.focus.switch_count())
    }

    pub fn violations(&self) -> &[Violation] {
        self.ledger.entries()
    }

    pub fn restorable_draft(&self) -> Option<&DraftSnapshot> {
        self.restorable.as_ref()
    }

    pub fn last_device_error(&self) -> Option<&DeviceError> {
        self.last_device_error.as_ref()
    }

    /// Payload kept after a failed submission
    pub fn pending_payload(&self) -> Option<&SubmissionPayload> {
        self.pending.as_ref()
    }

    pub fn last_ack(&self) -> Option<&Ack> {
        self.last_ack.as_ref()
    }

    pub fn is_monitoring(&self) -> bool {
        self.active
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Candidate-facing status text. Lockout and timeout read the same.
    pub fn candidate_message(&self) -> Option<String> {
        match self.state.phase {
            SessionPhase::Completed | SessionPhase::Locked => Some(COMPLETE_MESSAGE.to_string()),
            SessionPhase::Errored if self.pending.is_some() => {
                Some(SUBMIT_FAILED_MESSAGE.to_string())
            }
            SessionPhase::Errored | SessionPhase::RequestingCapture => self
                .last_device_error
                .as_ref()
                .map(|e| e.remedy().to_string()),
            SessionPhase::Rules | SessionPhase::Active => None,
        }
    }

    // ---- phase transitions ----

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.state.phase == phase {
            return;
        }
        info!(from = ?self.state.phase, to = ?phase, session = %self.session_id, "phase change");
        self.state.phase = phase;
        self.observer.on_phase_change(phase);
    }

    fn expect_phase(&self, expected: SessionPhase) -> Result<(), ProctorError> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(ProctorError::InvalidPhase {
                expected,
                actual: self.state.phase,
            })
        }
    }

    fn expect_active(&self) -> Result<(), ProctorError> {
        self.expect_phase(SessionPhase::Active)?;
        if !self.active {
            return Err(ProctorError::InvalidPhase {
                expected: SessionPhase::Active,
                actual: self.state.phase,
            });
        }
        Ok(())
    }

    /// Apply the restorable draft's answers and candidate details
    pub fn restore_draft(&mut self) -> bool {
        if self.state.phase.is_terminal() {
            return false;
        }
        let Some(snapshot) = self.restorable.take() else {
            return false;
        };
        info!(answered = snapshot.answers.len(), "draft restored");
        self.answers = snapshot.answers;
        self.state.candidate = snapshot.candidate;
        self.dirty = true;
        let stats = self.completion();
        self.observer.on_stats_update(stats);
        true
    }

    /// Drop the restorable draft and delete it from the store
    pub fn decline_draft(&mut self) {
        self.restorable = None;
        self.discard_draft();
    }

    /// Candidate accepted the rules; request capture
    pub fn consent(&mut self, candidate: CandidateMeta) -> Result<(), ProctorError> {
        self.expect_phase(SessionPhase::Rules)?;
        self.state.candidate = candidate;
        self.set_phase(SessionPhase::RequestingCapture);
        self.request_capture()
    }

    /// Try capture again after a device error
    pub fn retry_capture(&mut self) -> Result<(), ProctorError> {
        self.expect_phase(SessionPhase::RequestingCapture)?;
        self.request_capture()
    }

    /// Give up at the capture prompt
    pub fn abandon(&mut self) -> Result<(), ProctorError> {
        if self.state.phase != SessionPhase::Rules {
            self.expect_phase(SessionPhase::RequestingCapture)?;
        }
        info!(session = %self.session_id, "session abandoned before start");
        self.stop_monitoring();
        self.discard_draft();
        self.set_phase(SessionPhase::Errored);
        Ok(())
    }

    fn request_capture(&mut self) -> Result<(), ProctorError> {
        match self.capture.acquire() {
            Ok(handle) => {
                self.last_device_error = None;
                self.activate(handle);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "capture request failed");
                self.last_device_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    fn activate(&mut self, handle: CaptureHandle) {
        let now = self.clock.now();
        info!(handle = %handle.id, label = %handle.label, "capture acquired");
        self.handle = Some(handle);

        let duration = self.config.assessment_duration_secs;
        self.state.started_at = Some(now);
        self.state.time_remaining_secs = duration;
        self.countdown = Some(Countdown::new(duration, &self.config.advisory_marks_secs));

        self.scheduler
            .every(SessionTask::Countdown, Duration::seconds(1), now);
        self.scheduler
            .every(SessionTask::PresenceSample, self.config.presence_interval(), now);
        self.scheduler
            .every(SessionTask::NoiseSample, self.config.noise_interval(), now);
        self.scheduler
            .every(SessionTask::DraftSave, self.config.draft_save_interval(), now);
        self.focus.start(self.focus_source.as_mut(), self.clock.clone());

        self.active = true;
        self.set_phase(SessionPhase::Active);
        let stats = self.completion();
        self.observer.on_stats_update(stats);
    }

    /// Stop timers and listeners and release the capture. Safe to call any
    /// number of times.
    fn stop_monitoring(&mut self) {
        if self.active {
            self.active = false;
            let cancelled = self.scheduler.cancel_all();
            debug!(cancelled, "session tasks cancelled");
        }
        self.focus.stop(self.focus_source.as_mut());
        if let Some(handle) = self.handle.take() {
            self.capture.release(&handle);
            info!(handle = %handle.id, "capture released");
        }
    }

    // ---- answers ----

    pub fn set_answer(
        &mut self,
        question_id: impl Into<String>,
        choice: impl Into<String>,
    ) -> Result<CompletionStats, ProctorError> {
        self.expect_active()?;
        self.answers.insert(question_id.into(), choice.into());
        self.dirty = true;
        let stats = self.completion();
        self.observer.on_stats_update(stats);
        Ok(stats)
    }

    /// Replace candidate details before the session ends
    pub fn update_candidate(&mut self, candidate: CandidateMeta) -> Result<(), ProctorError> {
        if self.state.phase.is_terminal() {
            return Err(ProctorError::InvalidPhase {
                expected: SessionPhase::Active,
                actual: self.state.phase,
            });
        }
        self.state.candidate = candidate;
        self.dirty = self.active;
        Ok(())
    }

    // ---- event loop ----

    /// Run everything due at the clock's current time; returns tasks run
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        self.run_until(now)
    }

    /// Run every task due at or before `now` and every queued focus event,
    /// merged by time so ledger order follows timestamp order
    pub fn run_until(&mut self, now: DateTime<Utc>) -> usize {
        if !self.active {
            return 0;
        }
        let mut events: VecDeque<FocusEvent> = self.focus.drain().into();
        let mut floor = self.ledger.entries().last().map(|v| v.timestamp);
        let mut ran = 0;

        while self.active {
            let next_due = self.scheduler.next_due().filter(|due| *due <= now);
            let take_event = match (events.front(), next_due) {
                (Some(event), Some(due)) => event.at <= due,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_event {
                let Some(event) = events.pop_front() else {
                    break;
                };
                // Never before the previous entry, never after this tick
                let mut at = event.at.min(now);
                if let Some(floor) = floor {
                    at = at.max(floor);
                }
                floor = Some(at);
                self.focus_event(event.signal, at);
            } else {
                let Some(task) = self.scheduler.pop_due(now) else {
                    break;
                };
                floor = Some(floor.map_or(task.due, |f| f.max(task.due)));
                self.run_task(task);
                ran += 1;
            }
        }
        ran
    }

    fn run_task(&mut self, task: DueTask<SessionTask>) {
        if !self.active {
            return;
        }
        match task.kind {
            SessionTask::Countdown => self.countdown_tick(task.due),
            SessionTask::PresenceSample => self.presence_tick(task.due),
            SessionTask::NoiseSample => self.noise_tick(task.due),
            SessionTask::DraftSave => self.autosave(task.due),
        }
    }

    fn countdown_tick(&mut self, at: DateTime<Utc>) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        let tick = countdown.tick();
        self.state.time_remaining_secs = countdown.remaining();

        match tick {
            CountdownTick::Advisory { remaining } => {
                info!(remaining, "time advisory");
                self.observer.on_advisory(remaining);
            }
            CountdownTick::Expired => {
                info!(session = %self.session_id, "time expired; auto-submitting");
                if let Err(e) = self.finish(SubmitReason::Timeout, at) {
                    warn!(error = %e, "auto-submit failed");
                }
            }
            CountdownTick::Running { .. } | CountdownTick::Idle => {}
        }
    }

    fn presence_tick(&mut self, at: DateTime<Utc>) {
        let Some(handle) = self.handle.as_ref() else {
            return;
        };
        let frame = match self.capture.read_frame(handle) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "presence sample skipped");
                return;
            }
        };

        let (stats, transition) = self.presence.sample(&frame, &self.config.presence);
        self.last_frame = Some(stats);
        if transition == Some(PresenceTransition::Lost) {
            let n = self.ledger.count(ViolationKind::PresenceLost) + 1;
            let detail = format!(
                "Face not visible (violation {n}/{})",
                self.config.lockout.presence_lost_limit
            );
            self.record_violation(ViolationKind::PresenceLost, detail, at);
        }
    }

    fn noise_tick(&mut self, at: DateTime<Utc>) {
        let Some(handle) = self.handle.as_ref() else {
            return;
        };
        let energy = match self.capture.sample_energy(handle) {
            Ok(energy) => energy,
            Err(e) => {
                debug!(error = %e, "noise sample skipped");
                return;
            }
        };

        if let Some(alert) = self.noise.observe(energy, at) {
            let detail = format!(
                "Sustained background noise detected - possible conversation or music (level: {:.0})",
                alert.recent_average
            );
            self.record_violation(ViolationKind::SustainedNoise, detail, at);
        }
    }

    fn focus_event(&mut self, signal: FocusSignal, at: DateTime<Utc>) {
        match signal {
            FocusSignal::Hidden => {
                let n = self.focus.switch_count() + 1;
                let detail = format!("Candidate switched tabs/windows (count: {n})");
                self.record_violation(ViolationKind::TabSwitch, detail, at);
            }
            FocusSignal::Blur => self.record_violation(
                ViolationKind::WindowBlur,
                "Window lost focus - candidate may have switched applications",
                at,
            ),
        }
    }

    fn record_violation(&mut self, kind: ViolationKind, detail: impl Into<String>, at: DateTime<Utc>) {
        let outcome = self.ledger.record(kind, detail, at);
        if let Some(violation) = outcome.violation() {
            // Only switches the ledger accepted count, so the summary agrees
            if kind == ViolationKind::TabSwitch {
                self.focus.accept_switch();
            }
            self.observer.on_violation(violation);
        }
        if let Some(reason) = outcome.lockout() {
            self.lock(reason, at);
        }
    }

    fn lock(&mut self, reason: LockoutReason, at: DateTime<Utc>) {
        warn!(?reason, session = %self.session_id, "session locked");
        self.state.is_locked = true;
        if let Err(e) = self.finish(SubmitReason::Lockout, at) {
            warn!(error = %e, "lockout submission failed");
        }
    }

    // ---- drafts ----

    fn snapshot(&self, at: DateTime<Utc>) -> DraftSnapshot {
        DraftSnapshot::new(self.answers.clone(), self.state.candidate.clone(), at)
    }

    fn autosave(&mut self, at: DateTime<Utc>) {
        if !self.dirty {
            return;
        }
        let snapshot = self.snapshot(at);
        match self.draft.save(self.drafts.as_mut(), &snapshot) {
            Ok(()) => self.dirty = false,
            // Stays dirty so the next tick retries
            Err(e) => warn!(error = %e, "autosave failed"),
        }
    }

    fn flush_draft(&mut self, at: DateTime<Utc>) {
        let snapshot = self.snapshot(at);
        match self.draft.save(self.drafts.as_mut(), &snapshot) {
            Ok(()) => self.dirty = false,
            Err(e) => warn!(error = %e, "draft flush failed"),
        }
    }

    fn discard_draft(&mut self) {
        if let Err(e) = self.draft.discard(self.drafts.as_mut()) {
            warn!(error = %e, "draft delete failed");
        }
        self.dirty = false;
    }

    // ---- submission ----

    /// Manual submit; every question must be answered
    pub fn submit(&mut self) -> Result<Ack, ProctorError> {
        let now = self.clock.now();
        // Anything already due (a lockout, the final second) wins over the click
        self.run_until(now);
        self.expect_active()?;

        let unanswered = self.questions.unanswered(&self.answers);
        if unanswered > 0 {
            debug!(unanswered, "manual submit rejected");
            return Err(ProctorError::Validation { unanswered });
        }
        self.finish(SubmitReason::Manual, now)
    }

    fn build_payload(&self, reason: SubmitReason, at: DateTime<Utc>) -> SubmissionPayload {
        self.finalizer.build_payload(
            PayloadInput {
                session_id: self.session_id,
                reason,
                candidate: &self.state.candidate,
                answers: &self.answers,
                violations: self.summary(),
                started_at: self.state.started_at,
                submitted_at: at,
                time_remaining_secs: self.state.time_remaining_secs,
            },
            self.questions.as_ref(),
        )
    }

    fn finish(&mut self, reason: SubmitReason, at: DateTime<Utc>) -> Result<Ack, ProctorError> {
        if self.state.phase.is_terminal() {
            return Err(ProctorError::InvalidPhase {
                expected: SessionPhase::Active,
                actual: self.state.phase,
            });
        }
        self.stop_monitoring();
        let payload = self.build_payload(reason, at);
        self.deliver(payload)
    }

    fn deliver(&mut self, payload: SubmissionPayload) -> Result<Ack, ProctorError> {
        match self.finalizer.submit(self.data_store.as_mut(), &payload) {
            Ok(ack) => {
                self.pending = None;
                self.last_ack = Some(ack.clone());
                self.discard_draft();
                let phase = if self.state.is_locked {
                    SessionPhase::Locked
                } else {
                    SessionPhase::Completed
                };
                self.set_phase(phase);
                Ok(ack)
            }
            Err(e) => {
                // The draft outlives a failed submission so it can be retried
                self.flush_draft(payload.submitted_at);
                self.pending = Some(payload);
                self.set_phase(SessionPhase::Errored);
                Err(e.into())
            }
        }
    }

    /// Re-send the payload kept from a failed submission
    pub fn retry_submission(&mut self) -> Result<Ack, ProctorError> {
        self.expect_phase(SessionPhase::Errored)?;
        let Some(payload) = self.pending.take() else {
            return Err(ProctorError::InvalidPhase {
                expected: SessionPhase::Errored,
                actual: self.state.phase,
            });
        };
        info!(session = %self.session_id, "retrying submission");
        self.deliver(payload)
    }

    /// The page is going away. While active, hand a best-effort payload to
    /// the data store and return at once; in every phase release the capture.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.state.phase == SessionPhase::Active && self.active {
            let now = self.clock.now();
            self.stop_monitoring();
            self.flush_draft(now);
            let payload = self.build_payload(SubmitReason::PageClosedMidAssessment, now);
            self.finalizer
                .submit_on_teardown(self.data_store.as_mut(), &payload);
        } else {
            self.stop_monitoring();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ScriptedCapture, ScriptedFeed};
    use crate::clock::ManualClock;
    use crate::draft::MemoryDraftStore;
    use crate::focus::ManualFocusSource;
    use crate::questions::WeightedQuestionBank;
    use crate::submission::MemoryDataStore;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    struct Rig {
        clock: Arc<ManualClock>,
        feed: ScriptedFeed,
        focus: ManualFocusSource,
        drafts: MemoryDraftStore,
        store: MemoryDataStore,
        log: EventLog,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    fn rig() -> Rig {
        Rig {
            clock: Arc::new(ManualClock::new(start())),
            feed: ScriptedFeed::new(),
            focus: ManualFocusSource::new(),
            drafts: MemoryDraftStore::new(),
            store: MemoryDataStore::new(),
            log: EventLog::new(),
        }
    }

    fn controller(rig: &Rig) -> SessionController {
        SessionController::new(
            ProctorConfig::default(),
            SessionParts {
                capture: Box::new(ScriptedCapture::new(rig.feed.clone())),
                focus: Box::new(rig.focus.clone()),
                drafts: Box::new(rig.drafts.clone()),
                data_store: Box::new(rig.store.clone()),
                questions: Box::new(WeightedQuestionBank::builtin()),
                clock: rig.clock.clone(),
            },
        )
        .unwrap()
        .with_observer(Box::new(rig.log.clone()))
    }

    fn candidate() -> CandidateMeta {
        CandidateMeta {
            name: "Priya".to_string(),
            phone: "9800000000".to_string(),
            email: "priya@example.com".to_string(),
            institution: "City College".to_string(),
        }
    }

    fn step(rig: &Rig, session: &mut SessionController, secs: i64) {
        for _ in 0..secs {
            rig.clock.advance_secs(1);
            session.tick();
        }
    }

    #[test]
    fn test_consent_activates_monitoring() {
        let rig = rig();
        let mut session = controller(&rig);
        assert_eq!(session.phase(), SessionPhase::Rules);

        session.consent(candidate()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(rig.feed.is_live());
        assert_eq!(rig.focus.listener_count(), 2);
        assert_eq!(session.time_remaining(), 1800);
        assert_eq!(
            rig.log.phases(),
            vec![SessionPhase::RequestingCapture, SessionPhase::Active]
        );
    }

    #[test]
    fn test_device_error_keeps_requesting_capture() {
        let rig = rig();
        rig.feed.fail_acquire(Some(DeviceError::Busy));
        let mut session = controller(&rig);

        let err = session.consent(candidate()).unwrap_err();
        assert!(matches!(err, ProctorError::Device(DeviceError::Busy)));
        assert_eq!(session.phase(), SessionPhase::RequestingCapture);
        assert_eq!(
            session.candidate_message().as_deref(),
            Some(DeviceError::Busy.remedy())
        );

        rig.feed.fail_acquire(None);
        session.retry_capture().unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(rig.feed.acquire_calls(), 2);
    }

    #[test]
    fn test_abandon_errors_and_deletes_draft() {
        let rig = rig();
        rig.feed.fail_acquire(Some(DeviceError::PermissionDenied));
        let mut session = controller(&rig);
        let _ = session.consent(candidate());

        session.abandon().unwrap();
        assert_eq!(session.phase(), SessionPhase::Errored);
        assert!(session.retry_capture().is_err());
        assert!(!rig.drafts.contains("campus-hiring-draft"));
    }

    #[test]
    fn test_answers_autosave_on_cadence() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();

        let stats = session.set_answer("Q1", "C").unwrap();
        assert_eq!(stats.completed, 1);
        assert!(!rig.drafts.contains("campus-hiring-draft"));

        step(&rig, &mut session, 2);
        assert!(rig.drafts.contains("campus-hiring-draft"));
        let writes = rig.drafts.write_count();

        // Nothing changed; no rewrite
        step(&rig, &mut session, 4);
        assert_eq!(rig.drafts.write_count(), writes);
    }

    #[test]
    fn test_autosave_failure_does_not_interrupt() {
        let rig = rig();
        rig.drafts.fail_writes(true);
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();
        session.set_answer("Q1", "A").unwrap();

        step(&rig, &mut session, 10);
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.time_remaining(), 1790);
    }

    #[test]
    fn test_blur_is_recorded_but_not_counted_as_switch() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();

        for _ in 0..5 {
            rig.focus.fire_blur();
        }
        session.tick();
        let summary = session.summary();
        assert_eq!(summary.count(ViolationKind::WindowBlur), 5);
        assert_eq!(summary.switch_count, 0);
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_switches_after_lockout_are_not_counted() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();

        for _ in 0..5 {
            rig.focus.fire_hidden();
        }
        session.tick();

        assert_eq!(session.phase(), SessionPhase::Locked);
        let summary = &rig.store.submitted()[0].violations;
        assert_eq!(summary.count(ViolationKind::TabSwitch), 3);
        assert_eq!(summary.switch_count, 3);
        assert_eq!(session.summary(), *summary);
    }

    #[test]
    fn test_ledger_order_follows_timestamps_within_one_tick() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();

        // Hidden fires at t0, the presence loss is sampled at t2
        rig.feed.set_present(false);
        rig.focus.fire_hidden();
        rig.clock.advance_secs(3);
        session.tick();

        rig.feed.set_present(true);
        step(&rig, &mut session, 1);

        // Blur at t4, presence lost again at the t6 sample, hidden at t7;
        // one tick at t7 must still record them in time order
        rig.feed.set_present(false);
        rig.focus.fire_blur();
        rig.clock.advance_secs(3);
        rig.focus.fire_hidden();
        session.tick();

        let kinds: Vec<ViolationKind> = session.violations().iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::TabSwitch,
                ViolationKind::PresenceLost,
                ViolationKind::WindowBlur,
                ViolationKind::PresenceLost,
            ]
        );
        assert_eq!(session.phase(), SessionPhase::Locked);
        let stamps: Vec<DateTime<Utc>> =
            session.violations().iter().map(|v| v.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");
        assert_eq!(stamps[0], start());
        assert_eq!(stamps[1], start() + Duration::seconds(2));
    }

    #[test]
    fn test_noise_violation_carries_level() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();
        rig.feed.set_energy(90.0);

        step(&rig, &mut session, 3);
        assert_eq!(session.noise_level(), Some(90.0));
        let violations = session.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::SustainedNoise);
        assert!(violations[0].detail.contains("level: 90"));
    }

    #[test]
    fn test_advisories_fire_once() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();

        rig.clock.advance_secs(1750);
        session.tick();
        let advisories: Vec<u32> = rig
            .log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Advisory { remaining_secs } => Some(remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(advisories, vec![300, 60]);
        assert_eq!(session.time_remaining(), 50);
    }

    #[test]
    fn test_submit_failure_keeps_draft_and_retry_completes() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();
        for q in ["Q1", "Q2", "Q3", "Q4", "Q5", "Q6"] {
            session.set_answer(q, "B").unwrap();
        }

        rig.store.fail_submits(1);
        let err = session.submit().unwrap_err();
        assert!(matches!(err, ProctorError::Submit(_)));
        assert_eq!(session.phase(), SessionPhase::Errored);
        assert!(rig.drafts.contains("campus-hiring-draft"));
        assert!(!rig.feed.is_live());
        assert_eq!(
            session.candidate_message().as_deref(),
            Some(SUBMIT_FAILED_MESSAGE)
        );

        session.retry_submission().unwrap();
        assert_eq!(session.phase(), SessionPhase::Completed);
        assert!(!rig.drafts.contains("campus-hiring-draft"));
        assert_eq!(rig.store.submitted().len(), 1);
        assert_eq!(rig.store.submitted()[0].reason, SubmitReason::Manual);
    }

    #[test]
    fn test_restore_draft_in_rules_phase() {
        let rig = rig();
        let mut first = controller(&rig);
        first.consent(candidate()).unwrap();
        first.set_answer("Q2", "C").unwrap();
        step(&rig, &mut first, 2);
        drop(first);

        rig.clock.advance_secs(600);
        let mut second = controller(&rig);
        let draft = second.restorable_draft().unwrap();
        assert_eq!(draft.answers.get("Q2").map(String::as_str), Some("C"));

        assert!(second.restore_draft());
        assert_eq!(second.answers().len(), 1);
        assert_eq!(second.state().candidate, candidate());
        assert!(!second.restore_draft());
    }

    #[test]
    fn test_drop_releases_capture() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();
        drop(session);
        assert!(!rig.feed.is_live());
        assert_eq!(rig.feed.release_calls(), 1);
        assert_eq!(rig.focus.listener_count(), 0);
    }

    #[test]
    fn test_operations_rejected_after_terminal() {
        let rig = rig();
        let mut session = controller(&rig);
        session.consent(candidate()).unwrap();
        rig.clock.advance_secs(1800);
        session.tick();
        assert_eq!(session.phase(), SessionPhase::Completed);

        assert!(matches!(
            session.set_answer("Q1", "A"),
            Err(ProctorError::InvalidPhase { .. })
        ));
        assert!(session.submit().is_err());
        assert!(matches!(
            session.consent(candidate()),
            Err(ProctorError::InvalidPhase { .. })
        ));
        assert_eq!(session.candidate_message().as_deref(), Some(COMPLETE_MESSAGE));
    }
}
