//! Final report assembly and delivery
//!
//! The finalizer shapes one [`SubmissionPayload`] per attempt and hands it to a
//! [`DataStore`]. The primary path waits for an acknowledgement; the teardown
//! path hands the payload over and returns immediately.

use crate::config::ConfigProvider;
use crate::error::SubmitError;
use crate::questions::{QuestionBank, ScoreReport};
use crate::types::{Ack, Answers, CandidateMeta, SubmitReason, ViolationSummary};
use crate::{PROCTOR_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current payload layout version
pub const PAYLOAD_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Report sent to the remote data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub payload_version: String,
    pub producer: SubmissionProducer,
    pub session_id: Uuid,
    pub assessment_kind: String,
    pub reason: SubmitReason,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub time_remaining_secs: u32,
    pub candidate: CandidateMeta,
    pub answers: Answers,
    pub score: ScoreReport,
    pub proctoring_enabled: bool,
    pub violations: ViolationSummary,
}

impl SubmissionPayload {
    pub fn to_json(&self) -> Result<String, SubmitError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Session facts the finalizer turns into a payload
#[derive(Debug, Clone)]
pub struct PayloadInput<'a> {
    pub session_id: Uuid,
    pub reason: SubmitReason,
    pub candidate: &'a CandidateMeta,
    pub answers: &'a Answers,
    pub violations: ViolationSummary,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
    pub time_remaining_secs: u32,
}

/// Remote data store contract
pub trait DataStore {
    /// Deliver and wait for acknowledgement. Transient retries are the
    /// store's own business; an error here is final.
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<Ack, SubmitError>;

    /// Fire-and-forget delivery during teardown; must not block
    fn send_best_effort(&mut self, payload: &SubmissionPayload);
}

/// Builds payloads and drives the two delivery paths
#[derive(Debug, Clone)]
pub struct SubmissionFinalizer {
    assessment_kind: String,
    instance_id: String,
}

impl SubmissionFinalizer {
    pub fn new(assessment_kind: impl Into<String>) -> Self {
        Self {
            assessment_kind: assessment_kind.into(),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Use a fixed instance id (reproducible output)
    pub fn with_instance_id(assessment_kind: impl Into<String>, instance_id: String) -> Self {
        Self {
            assessment_kind: assessment_kind.into(),
            instance_id,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn build_payload(
        &self,
        input: PayloadInput<'_>,
        bank: &dyn QuestionBank,
    ) -> SubmissionPayload {
        SubmissionPayload {
            payload_version: PAYLOAD_VERSION.to_string(),
            producer: SubmissionProducer {
                name: PRODUCER_NAME.to_string(),
                version: PROCTOR_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            session_id: input.session_id,
            assessment_kind: self.assessment_kind.clone(),
            reason: input.reason,
            submitted_at: input.submitted_at,
            started_at: input.started_at,
            time_remaining_secs: input.time_remaining_secs,
            candidate: input.candidate.clone(),
            answers: input.answers.clone(),
            score: bank.score(input.answers),
            proctoring_enabled: true,
            violations: input.violations,
        }
    }

    /// Primary delivery path
    pub fn submit(
        &self,
        store: &mut dyn DataStore,
        payload: &SubmissionPayload,
    ) -> Result<Ack, SubmitError> {
        info!(
            session = %payload.session_id,
            reason = payload.reason.as_str(),
            violations = payload.violations.total,
            "submitting assessment"
        );
        match store.submit(payload) {
            Ok(ack) => {
                info!(receipt = %ack.receipt_id, "submission acknowledged");
                Ok(ack)
            }
            Err(e) => {
                warn!(error = %e, "submission failed");
                Err(e)
            }
        }
    }

    /// Teardown delivery; returns as soon as the store has the payload
    pub fn submit_on_teardown(&self, store: &mut dyn DataStore, payload: &SubmissionPayload) {
        debug!(
            session = %payload.session_id,
            reason = payload.reason.as_str(),
            "best-effort submission on teardown"
        );
        store.send_best_effort(payload);
    }
}

/// Appends one JSON line per payload to a local file
#[derive(Debug, Clone)]
pub struct NdjsonDataStore {
    path: PathBuf,
}

impl NdjsonDataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve `submission_endpoint` from any config source. Only
    /// `file://` URLs and bare paths are deliverable locally.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, SubmitError> {
        let endpoint = provider
            .get("submission_endpoint")
            .ok_or(SubmitError::NotConfigured)?;
        if let Some(path) = endpoint.strip_prefix("file://") {
            return Ok(Self::new(path));
        }
        if endpoint.contains("://") {
            return Err(SubmitError::Rejected(format!(
                "unsupported endpoint scheme: {endpoint}"
            )));
        }
        Ok(Self::new(endpoint))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, payload: &SubmissionPayload) -> Result<(), SubmitError> {
        let line = payload.to_json()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SubmitError::Network(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SubmitError::Network(e.to_string()))
    }
}

impl DataStore for NdjsonDataStore {
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<Ack, SubmitError> {
        self.append(payload)?;
        Ok(Ack {
            receipt_id: Uuid::new_v4().to_string(),
        })
    }

    fn send_best_effort(&mut self, payload: &SubmissionPayload) {
        if let Err(e) = self.append(payload) {
            debug!(error = %e, "best-effort delivery dropped");
        }
    }
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    submitted: Vec<SubmissionPayload>,
    best_effort: Vec<SubmissionPayload>,
    failing_submits: u32,
    attempts: u32,
}

/// Recording store; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryDataStore {
    state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `count` primary submissions with a network error
    pub fn fail_submits(&self, count: u32) {
        self.lock().failing_submits = count;
    }

    pub fn submitted(&self) -> Vec<SubmissionPayload> {
        self.lock().submitted.clone()
    }

    pub fn best_effort(&self) -> Vec<SubmissionPayload> {
        self.lock().best_effort.clone()
    }

    /// Primary submissions attempted, including failures
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }
}

impl DataStore for MemoryDataStore {
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<Ack, SubmitError> {
        let mut state = self.lock();
        state.attempts += 1;
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(SubmitError::Network("connection reset".to_string()));
        }
        state.submitted.push(payload.clone());
        Ok(Ack {
            receipt_id: format!("mem-{}", state.submitted.len()),
        })
    }

    fn send_best_effort(&mut self, payload: &SubmissionPayload) {
        self.lock().best_effort.push(payload.clone());
    }
}
