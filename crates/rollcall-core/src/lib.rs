//! rollcall-core: Attendance decision engine.
//!
//! Turns per-frame face-matcher output into recognition decisions, gates
//! them through a per-day dedup ledger, and appends one attendance row per
//! person per day to a durable log. Camera and matcher are consumed through
//! traits so the whole loop runs without hardware or a model.

pub mod controller;
pub mod decision;
pub mod ledger;
pub mod reference;
pub mod store;
pub mod types;

pub use controller::{
    Attendance, Clock, ControllerState, Controller, FaceMatcher, FrameSource, RunSwitch,
    SystemClock, TickStats, TickStatus, TransitionError,
};
pub use decision::{decide, recognize};
pub use ledger::DedupLedger;
pub use reference::{ReferenceError, ReferenceIndex};
pub use store::{AttendanceLog, CsvAttendanceStore, StoreError};
pub use types::{
    AttendanceConfig, AttendanceRecord, ConfigError, DedupKey, Identity, IdentityError,
    MatchCandidate, MatcherError, RecognitionResult,
};
