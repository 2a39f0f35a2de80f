//! Proctor Flux - Integrity monitor for timed, proctored candidate assessments
//!
//! Flux watches a candidate through a capture stream and the host window while
//! they answer a timed questionnaire, and turns what it sees into an ordered
//! violation ledger: camera presence lost, sustained background noise, tab
//! switches, window blur. Crossing a lockout threshold ends the attempt early;
//! otherwise it ends on manual submit or when the countdown reaches zero.
//!
//! ## Modules
//!
//! - **Detection**: [`presence`], [`noise`] and [`focus`] turn raw samples into
//!   edge-triggered findings
//! - **Session**: [`controller`] runs the phase machine over a virtual-time
//!   [`scheduler`], recording into the [`ledger`]
//! - **Persistence & delivery**: [`draft`] snapshots answers, [`submission`]
//!   assembles and delivers the final report
//! - **Tooling**: [`simulation`] replays scripted sessions; [`ffi`] exposes the
//!   frame heuristic and ledger over a C ABI

pub mod capture;
pub mod clock;
pub mod config;
pub mod controller;
pub mod countdown;
pub mod draft;
pub mod error;
pub mod focus;
pub mod ledger;
pub mod noise;
pub mod presence;
pub mod questions;
pub mod scheduler;
pub mod simulation;
pub mod submission;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use capture::{CaptureHandle, CaptureProvider, Frame, ScriptedCapture, ScriptedFeed};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigProvider, EnvConfigProvider, ProctorConfig};
pub use controller::{EventLog, SessionController, SessionEvent, SessionObserver, SessionParts};
pub use draft::{DraftPersistence, DraftSnapshot, DraftStore, FileDraftStore, MemoryDraftStore};
pub use error::{ConfigError, DeviceError, ProctorError, StorageError, SubmitError};
pub use focus::{FocusEvent, FocusMonitor, FocusSignal, FocusSignalSource, ManualFocusSource};
pub use ledger::{LockoutPolicy, RecordOutcome, ViolationLedger};
pub use questions::{QuestionBank, ScoreReport, WeightedQuestionBank};
pub use simulation::{run_scenario, Scenario, SimulationReport};
pub use submission::{
    DataStore, MemoryDataStore, NdjsonDataStore, SubmissionFinalizer, SubmissionPayload,
};
pub use types::{
    CandidateMeta, SessionPhase, SessionState, SubmitReason, Violation, ViolationKind,
    ViolationSummary,
};

/// Library version embedded in every submission payload
pub const PROCTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for submission payloads
pub const PRODUCER_NAME: &str = "proctor-flux";
