//! End-to-end session scenarios driven through the public controller API

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use proctor_flux::draft::DraftPersistence;
use proctor_flux::questions::{QuestionBank, WeightedQuestionBank};
use proctor_flux::{
    CandidateMeta, DeviceError, DraftSnapshot, EventLog, ManualClock, ManualFocusSource,
    MemoryDataStore, MemoryDraftStore, ProctorConfig, ProctorError, ScriptedCapture, ScriptedFeed,
    SessionController, SessionParts, SessionPhase, SubmitReason, ViolationKind,
};

struct Harness {
    clock: Arc<ManualClock>,
    feed: ScriptedFeed,
    focus: ManualFocusSource,
    drafts: MemoryDraftStore,
    store: MemoryDataStore,
    log: EventLog,
}

impl Harness {
    fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::new(start())),
            feed: ScriptedFeed::new(),
            focus: ManualFocusSource::new(),
            drafts: MemoryDraftStore::new(),
            store: MemoryDataStore::new(),
            log: EventLog::new(),
        }
    }

    fn session(&self) -> SessionController {
        SessionController::new(
            ProctorConfig::default(),
            SessionParts {
                capture: Box::new(ScriptedCapture::new(self.feed.clone())),
                focus: Box::new(self.focus.clone()),
                drafts: Box::new(self.drafts.clone()),
                data_store: Box::new(self.store.clone()),
                questions: Box::new(WeightedQuestionBank::builtin()),
                clock: self.clock.clone(),
            },
        )
        .unwrap()
        .with_observer(Box::new(self.log.clone()))
    }

    fn active_session(&self) -> SessionController {
        let mut session = self.session();
        session.consent(candidate()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Active);
        session
    }

    fn advance(&self, session: &mut SessionController, secs: i64) {
        for _ in 0..secs {
            self.clock.advance_secs(1);
            session.tick();
        }
    }

    fn draft_key(&self) -> String {
        DraftPersistence::key_for(&ProctorConfig::default().assessment_kind)
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
}

fn candidate() -> CandidateMeta {
    CandidateMeta {
        name: "Arjun".to_string(),
        phone: "9811111111".to_string(),
        email: "arjun@example.com".to_string(),
        institution: "North Campus".to_string(),
    }
}

fn question_ids() -> Vec<String> {
    WeightedQuestionBank::builtin()
        .questions()
        .iter()
        .map(|q| q.id.clone())
        .collect()
}

#[test]
fn second_presence_loss_locks_and_freezes_ledger() {
    let h = Harness::new();
    let mut session = h.active_session();

    // Presence is sampled every 2s: t=2 lost, t=4 back, t=6 lost again
    h.clock.advance_secs(1);
    session.tick();
    h.feed.set_present(false);
    h.advance(&mut session, 1);
    assert_eq!(session.summary().count(ViolationKind::PresenceLost), 1);
    assert_eq!(session.phase(), SessionPhase::Active);

    h.feed.set_present(true);
    h.advance(&mut session, 2);
    h.feed.set_present(false);
    h.advance(&mut session, 2);

    assert_eq!(session.phase(), SessionPhase::Locked);
    assert!(session.is_locked());
    let presence: Vec<_> = session
        .violations()
        .iter()
        .filter(|v| v.kind == ViolationKind::PresenceLost)
        .map(|v| v.detail.clone())
        .collect();
    assert_eq!(
        presence,
        vec![
            "Face not visible (violation 1/2)".to_string(),
            "Face not visible (violation 2/2)".to_string(),
        ]
    );

    // A third cycle after lockout adds nothing
    h.feed.set_present(true);
    h.advance(&mut session, 2);
    h.feed.set_present(false);
    h.advance(&mut session, 2);
    h.focus.fire_hidden();
    h.advance(&mut session, 1);
    assert_eq!(session.violations().len(), 2);

    let submitted = h.store.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].reason, SubmitReason::Lockout);
    assert_eq!(submitted[0].violations.total, 2);
    assert!(!h.feed.is_live());
}

#[test]
fn third_tab_switch_locks_regardless_of_other_kinds() {
    let h = Harness::new();
    let mut session = h.active_session();

    h.focus.fire_blur();
    h.focus.fire_hidden();
    h.advance(&mut session, 1);
    h.focus.fire_blur();
    h.focus.fire_hidden();
    h.advance(&mut session, 1);
    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(session.summary().count(ViolationKind::WindowBlur), 2);

    h.focus.fire_hidden();
    h.advance(&mut session, 1);

    assert_eq!(session.phase(), SessionPhase::Locked);
    let summary = session.summary();
    assert_eq!(summary.count(ViolationKind::TabSwitch), 3);
    assert_eq!(summary.count(ViolationKind::WindowBlur), 2);
    let last = session.violations().last().unwrap();
    assert_eq!(last.detail, "Candidate switched tabs/windows (count: 3)");

    let sequences: Vec<u64> = session.violations().iter().map(|v| v.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(h.focus.listener_count(), 0);
}

#[test]
fn countdown_expiry_forces_completion_without_answers() {
    let h = Harness::new();
    let mut session = h.active_session();
    assert_eq!(session.time_remaining(), 1800);

    h.advance(&mut session, 1799);
    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(session.time_remaining(), 1);

    h.advance(&mut session, 1);
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert_eq!(session.time_remaining(), 0);
    assert!(!session.is_locked());

    let submitted = h.store.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].reason, SubmitReason::Timeout);
    assert!(submitted[0].answers.is_empty());
    assert_eq!(submitted[0].time_remaining_secs, 0);

    let advisories: Vec<_> = h
        .log
        .events()
        .into_iter()
        .filter_map(|e| match e {
            proctor_flux::SessionEvent::Advisory { remaining_secs } => Some(remaining_secs),
            _ => None,
        })
        .collect();
    assert_eq!(advisories, vec![300, 60]);
}

#[test]
fn manual_submit_rejected_while_questions_unanswered() {
    let h = Harness::new();
    let mut session = h.active_session();
    let ids = question_ids();

    for id in ids.iter().skip(1) {
        session.set_answer(id.clone(), "B").unwrap();
    }
    h.advance(&mut session, 5);

    let err = session.submit().unwrap_err();
    assert!(matches!(err, ProctorError::Validation { unanswered: 1 }));
    assert_eq!(session.phase(), SessionPhase::Active);
    assert!(h.store.submitted().is_empty());
    assert_eq!(h.store.attempts(), 0);
}

#[test]
fn draft_restorable_just_inside_ttl() {
    let h = Harness::new();
    let persistence = DraftPersistence::new(
        &ProctorConfig::default().assessment_kind,
        Duration::seconds(3600),
    );
    let mut answers = proctor_flux::types::Answers::new();
    answers.insert("Q1".to_string(), "C".to_string());
    let snapshot = DraftSnapshot::new(answers, candidate(), start() - Duration::seconds(3599));
    let mut drafts = h.drafts.clone();
    persistence.save(&mut drafts, &snapshot).unwrap();

    let mut session = h.session();
    assert!(session.restorable_draft().is_some());
    assert!(session.restore_draft());
    assert_eq!(session.answers().get("Q1").map(String::as_str), Some("C"));
    assert_eq!(session.state().candidate, candidate());
}

#[test]
fn draft_discarded_just_past_ttl() {
    let h = Harness::new();
    let persistence = DraftPersistence::new(
        &ProctorConfig::default().assessment_kind,
        Duration::seconds(3600),
    );
    let snapshot = DraftSnapshot::new(
        proctor_flux::types::Answers::new(),
        candidate(),
        start() - Duration::seconds(3601),
    );
    let mut drafts = h.drafts.clone();
    persistence.save(&mut drafts, &snapshot).unwrap();
    assert!(h.drafts.contains(&h.draft_key()));

    let session = h.session();
    assert!(session.restorable_draft().is_none());
    assert!(!h.drafts.contains(&h.draft_key()));
}

#[test]
fn answering_everything_then_submitting_completes_and_clears_draft() {
    let h = Harness::new();
    let mut session = h.active_session();

    // 29:50 into the 30 minutes
    h.advance(&mut session, 1790);
    assert_eq!(session.time_remaining(), 10);
    assert!(session.violations().is_empty());
    for id in question_ids() {
        session.set_answer(id, "C").unwrap();
    }
    assert_eq!(session.completion().completed, session.completion().total);

    // Next autosave persists the answers
    h.advance(&mut session, 2);
    assert!(h.drafts.contains(&h.draft_key()));

    let ack = session.submit().unwrap();
    assert_eq!(ack.receipt_id, "mem-1");
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(!h.drafts.contains(&h.draft_key()));

    let payload = &h.store.submitted()[0];
    assert_eq!(payload.reason, SubmitReason::Manual);
    assert_eq!(payload.time_remaining_secs, 8);
    assert_eq!(payload.violations.total, 0);
    assert_eq!(payload.score.total, payload.score.max);
    assert_eq!(payload.candidate, candidate());
    assert!(payload.proctoring_enabled);
    assert_eq!(
        session.candidate_message().as_deref(),
        Some(proctor_flux::controller::COMPLETE_MESSAGE)
    );
}

#[test]
fn permission_denied_never_starts_monitoring() {
    let h = Harness::new();
    h.feed.fail_acquire(Some(DeviceError::PermissionDenied));
    let mut session = h.session();

    let err = session.consent(candidate()).unwrap_err();
    assert!(matches!(err, ProctorError::Device(DeviceError::PermissionDenied)));
    assert_eq!(session.phase(), SessionPhase::RequestingCapture);
    assert_eq!(
        session.last_device_error(),
        Some(&DeviceError::PermissionDenied)
    );

    h.advance(&mut session, 30);
    assert_eq!(session.time_remaining(), 1800);
    assert!(!session.is_monitoring());
    assert!(!h.feed.is_live());
    assert_eq!(h.focus.listener_count(), 0);
    assert!(session.set_answer("Q1", "A").is_err());

    h.feed.fail_acquire(None);
    session.retry_capture().unwrap();
    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(h.feed.acquire_calls(), 2);
}

#[test]
fn teardown_mid_session_sends_best_effort_report_once() {
    let h = Harness::new();
    let mut session = h.active_session();
    session.set_answer("Q1", "A").unwrap();
    h.focus.fire_blur();
    h.advance(&mut session, 42);

    session.teardown();
    session.teardown();

    let sent = h.store.best_effort();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reason, SubmitReason::PageClosedMidAssessment);
    assert_eq!(
        serde_json::to_value(sent[0].reason).unwrap(),
        "page-closed-mid-assessment"
    );
    assert_eq!(sent[0].time_remaining_secs, 1758);
    assert_eq!(sent[0].violations.count(ViolationKind::WindowBlur), 1);
    assert!(h.store.submitted().is_empty());
    assert!(session.is_torn_down());
    assert!(h.drafts.contains(&h.draft_key()));

    drop(session);
    assert_eq!(h.feed.release_calls(), 1);
}

#[test]
fn capture_released_exactly_once_across_lock_and_drop() {
    let h = Harness::new();
    let mut session = h.active_session();
    for _ in 0..3 {
        h.focus.fire_hidden();
    }
    h.advance(&mut session, 1);
    assert_eq!(session.phase(), SessionPhase::Locked);
    assert_eq!(h.feed.release_calls(), 1);

    session.teardown();
    drop(session);
    assert_eq!(h.feed.release_calls(), 1);
    assert!(h.store.best_effort().is_empty());
}

#[test]
fn scripted_scenario_runs_end_to_end() {
    let scenario = proctor_flux::Scenario::from_json(
        r#"{
            "answer_all_with": "B",
            "noise": [{"at": 3, "energy": 90.0}, {"at": 8, "energy": 5.0}],
            "focus": [{"at": 12, "signal": "blur"}],
            "submit_at": 20
        }"#,
    )
    .unwrap();

    let report = proctor_flux::run_scenario(&scenario, ProctorConfig::default()).unwrap();
    assert_eq!(report.final_state.phase, SessionPhase::Completed);
    assert_eq!(report.elapsed_secs, 20);
    assert!(report.rejections.is_empty());
    assert_eq!(report.summary.count(ViolationKind::SustainedNoise), 1);
    assert_eq!(report.summary.count(ViolationKind::WindowBlur), 1);
    assert_eq!(report.submitted.len(), 1);
    assert!(!report.draft_remaining);
}

#[test]
fn burst_of_tab_switches_reports_only_recorded_ones() {
    let h = Harness::new();
    let mut session = h.active_session();
    for _ in 0..5 {
        h.focus.fire_hidden();
    }
    session.tick();

    assert_eq!(session.phase(), SessionPhase::Locked);
    let submitted = h.store.submitted();
    let summary = &submitted[0].violations;
    assert_eq!(summary.count(ViolationKind::TabSwitch), 3);
    assert_eq!(summary.switch_count, 3);
    assert_eq!(summary.total, 3);
}

#[test]
fn violation_timestamps_never_decrease_in_sequence_order() {
    let h = Harness::new();
    let mut session = h.active_session();

    h.feed.set_present(false);
    h.focus.fire_hidden();
    h.clock.advance_secs(3);
    h.focus.fire_blur();
    session.tick();

    h.feed.set_energy(95.0);
    h.clock.advance_secs(4);
    h.focus.fire_blur();
    session.tick();

    let violations = session.violations();
    assert!(violations.len() >= 4);
    for pair in violations.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "{:?} recorded before {:?}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(violations[0].kind, ViolationKind::TabSwitch);
    assert_eq!(violations[1].kind, ViolationKind::PresenceLost);
    assert_eq!(violations[1].timestamp, start() + Duration::seconds(2));
}
