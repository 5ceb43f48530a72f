//! Frame loop controller.
//!
//! One [`Controller::tick`] pulls a frame, runs the matcher, decides, and
//! records attendance through the ledger. Scheduling lives with the caller;
//! the controller only guarantees that a tick is never reentered (`&mut
//! self`) and that results are dropped if the loop was stopped while the
//! matcher was running.

use crate::decision::recognize;
use crate::ledger::DedupLedger;
use crate::reference::{ReferenceError, ReferenceIndex};
use crate::store::{AttendanceLog, StoreError};
use crate::types::{AttendanceRecord, Identity, MatchCandidate, MatcherError, RecognitionResult};
use chrono::{Duration, NaiveDateTime, SubsecRound};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Source of camera frames.
pub trait FrameSource {
    type Frame;

    /// Next frame, or `None` if nothing is available this tick.
    fn read_frame(&mut self) -> Option<Self::Frame>;

    /// Release the underlying device. Called exactly once by the controller.
    fn release(&mut self) {}
}

/// Face-matching capability: compares one frame against the reference database.
pub trait FaceMatcher<F> {
    fn find(&mut self, frame: &F, reference: &ReferenceIndex)
        -> Result<Vec<MatchCandidate>, MatcherError>;
}

/// Local wall-clock time.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("controller is already running")]
    AlreadyRunning,
    #[error("controller is not running")]
    NotRunning,
    #[error("controller has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Stopped,
    Running,
}

/// Run state shared between the loop and whoever starts and stops it.
///
/// Every transition bumps `generation`, which lets a tick notice that the
/// loop was stopped (or restarted) while its matcher call was in flight.
#[derive(Debug, Default)]
pub struct RunSwitch {
    running: AtomicBool,
    shut_down: AtomicBool,
    generation: AtomicU64,
}

impl RunSwitch {
    pub fn start(&self) -> Result<(), TransitionError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransitionError::ShutDown);
        }
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransitionError::AlreadyRunning)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!("recognition started");
        Ok(())
    }

    pub fn stop(&self) -> Result<(), TransitionError> {
        self.running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransitionError::NotRunning)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!("recognition stopped");
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        if self.running.load(Ordering::Acquire) {
            ControllerState::Running
        } else {
            ControllerState::Stopped
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
        if self.running.swap(false, Ordering::AcqRel) {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// What happened to attendance for a recognized face.
#[derive(Debug, Clone, PartialEq)]
pub enum Attendance {
    Recorded(AttendanceRecord),
    AlreadyRecorded,
    WriteFailed(String),
    /// No store attached (it failed to initialize).
    Disabled,
}

/// Result of one tick, for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// Loop stopped or shut down; nothing was done.
    Idle,
    NoFrame,
    /// The loop was stopped while the matcher ran; its result was discarded.
    Stale,
    NoFace,
    Unknown,
    Recognized {
        identity: Identity,
        attendance: Attendance,
    },
    MatcherError(MatcherError),
}

impl fmt::Display for TickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickStatus::Idle => f.write_str("idle"),
            TickStatus::NoFrame | TickStatus::Stale | TickStatus::NoFace => f.write_str("scanning"),
            TickStatus::Unknown => f.write_str("unknown face"),
            TickStatus::Recognized {
                identity,
                attendance: Attendance::Recorded(_),
            } => write!(f, "attendance marked for {identity}"),
            TickStatus::Recognized {
                identity,
                attendance: Attendance::WriteFailed(e),
            } => write!(f, "recognized {identity}; attendance not saved: {e}"),
            TickStatus::Recognized { identity, .. } => write!(f, "recognized {identity}"),
            TickStatus::MatcherError(e) => write!(f, "error: {e}"),
        }
    }
}

/// Per-outcome tick counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    pub ticks: u64,
    pub no_frame: u64,
    pub stale: u64,
    pub no_face: u64,
    pub unknown: u64,
    pub recognized: u64,
    pub recorded: u64,
    pub write_failures: u64,
    pub matcher_errors: u64,
}

impl TickStats {
    fn count(&mut self, status: &TickStatus) {
        if *status == TickStatus::Idle {
            return;
        }
        self.ticks += 1;
        match status {
            TickStatus::Idle => {}
            TickStatus::NoFrame => self.no_frame += 1,
            TickStatus::Stale => self.stale += 1,
            TickStatus::NoFace => self.no_face += 1,
            TickStatus::Unknown => self.unknown += 1,
            TickStatus::MatcherError(_) => self.matcher_errors += 1,
            TickStatus::Recognized { attendance, .. } => {
                self.recognized += 1;
                match attendance {
                    Attendance::Recorded(_) => self.recorded += 1,
                    Attendance::WriteFailed(_) => self.write_failures += 1,
                    Attendance::AlreadyRecorded | Attendance::Disabled => {}
                }
            }
        }
    }
}

/// When the controller rescans the reference database.
struct ReferenceRefresh {
    interval: Option<Duration>,
    last: Option<NaiveDateTime>,
    /// Set at startup, after a failed scan and after the matcher reports an
    /// identity the index does not know.
    due: bool,
}

/// Drives recognition for one camera session.
pub struct Controller<S, M, L, C = SystemClock>
where
    S: FrameSource,
{
    source: Option<S>,
    matcher: M,
    reference: ReferenceIndex,
    threshold: f32,
    ledger: DedupLedger,
    store: Option<L>,
    clock: C,
    switch: Arc<RunSwitch>,
    stats: TickStats,
    refresh: Option<ReferenceRefresh>,
}

impl<S, M, L, C> Controller<S, M, L, C>
where
    S: FrameSource,
    M: FaceMatcher<S::Frame>,
    L: AttendanceLog,
    C: Clock,
{
    /// Create a stopped controller with recording disabled until a store is attached.
    pub fn new(source: S, matcher: M, reference: ReferenceIndex, threshold: f32, clock: C) -> Self {
        Self {
            source: Some(source),
            matcher,
            reference,
            threshold,
            ledger: DedupLedger::new(),
            store: None,
            clock,
            switch: Arc::new(RunSwitch::default()),
            stats: TickStats::default(),
            refresh: None,
        }
    }

    /// Initialize `store` and enable recording into it.
    ///
    /// On failure recording stays disabled; the loop can still run.
    pub fn attach_store(&mut self, mut store: L) -> Result<(), StoreError> {
        store.ensure_initialized()?;
        self.store = Some(store);
        Ok(())
    }

    /// Seed the ledger with today's rows from the attached store, so a
    /// restart does not log the same person twice in one day.
    pub fn reconcile(&mut self) -> Result<usize, StoreError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        let today = self.clock.now().date();
        let seeded = self
            .ledger
            .seed(store.records_on(today)?.iter().map(AttendanceRecord::key));
        tracing::info!(%today, seeded, "ledger reconciled with attendance log");
        Ok(seeded)
    }

    /// Keep the reference index in step with the database on disk.
    ///
    /// The index is rescanned before the next matcher call, after any call
    /// that reported an unknown identity, and every `interval` if given. A
    /// database that cannot be scanned fails that tick with
    /// [`MatcherError::Reference`] instead of stopping the loop.
    pub fn refresh_reference(&mut self, interval: Option<Duration>) {
        self.refresh = Some(ReferenceRefresh {
            interval,
            last: None,
            due: true,
        });
    }

    /// Handle for starting and stopping the loop from elsewhere.
    pub fn switch(&self) -> Arc<RunSwitch> {
        Arc::clone(&self.switch)
    }

    pub fn start(&self) -> Result<(), TransitionError> {
        self.switch.start()
    }

    pub fn stop(&self) -> Result<(), TransitionError> {
        self.switch.stop()
    }

    pub fn state(&self) -> ControllerState {
        self.switch.state()
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn recording_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self) -> TickStatus {
        let status = self.run_tick();
        self.stats.count(&status);
        status
    }

    fn run_tick(&mut self) -> TickStatus {
        if self.switch.state() != ControllerState::Running {
            return TickStatus::Idle;
        }
        let generation = self.switch.generation();

        let Some(source) = self.source.as_mut() else {
            return TickStatus::Idle;
        };
        let Some(frame) = source.read_frame() else {
            return TickStatus::NoFrame;
        };

        if let Err(e) = self.rescan_reference() {
            let e = MatcherError::Reference(e.to_string());
            tracing::warn!(error = %e, "skipping match");
            return TickStatus::MatcherError(e);
        }

        let outcome = self.matcher.find(&frame, &self.reference);
        if let (Err(MatcherError::UnknownIdentity(_)), Some(refresh)) =
            (&outcome, self.refresh.as_mut())
        {
            refresh.due = true;
        }

        if self.switch.state() != ControllerState::Running || self.switch.generation() != generation
        {
            tracing::debug!("discarding matcher result from a stopped session");
            return TickStatus::Stale;
        }

        match recognize(outcome, self.threshold) {
            RecognitionResult::NoFace => TickStatus::NoFace,
            RecognitionResult::Unknown => TickStatus::Unknown,
            RecognitionResult::MatcherError(e) => {
                tracing::warn!(error = %e, "face matcher failed");
                TickStatus::MatcherError(e)
            }
            RecognitionResult::Recognized(identity) => {
                let attendance = self.mark_attendance(&identity);
                TickStatus::Recognized {
                    identity,
                    attendance,
                }
            }
        }
    }

    fn rescan_reference(&mut self) -> Result<(), ReferenceError> {
        let Some(refresh) = self.refresh.as_mut() else {
            return Ok(());
        };
        let now = self.clock.now();
        let elapsed = match (refresh.interval, refresh.last) {
            (Some(interval), Some(last)) => now - last >= interval,
            _ => false,
        };
        if !refresh.due && !elapsed {
            return Ok(());
        }

        refresh.last = Some(now);
        let result = self.reference.refresh();
        refresh.due = result.is_err();
        result
    }

    fn mark_attendance(&mut self, identity: &Identity) -> Attendance {
        let Some(store) = self.store.as_mut() else {
            return Attendance::Disabled;
        };

        let now = self.clock.now().trunc_subsecs(0);
        let record = AttendanceRecord::new(identity.clone(), now.date(), now.time());

        match self
            .ledger
            .record_once(identity, record.date, || store.append(&record))
        {
            Ok(Some(())) => {
                tracing::info!(
                    %identity,
                    date = %record.date,
                    time = %record.time,
                    "attendance marked"
                );
                Attendance::Recorded(record)
            }
            Ok(None) => Attendance::AlreadyRecorded,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "attendance write failed; will retry");
                Attendance::WriteFailed(e.to_string())
            }
        }
    }
}

impl<S, M, L, C> Controller<S, M, L, C>
where
    S: FrameSource,
{
    /// Stop the loop and release the frame source. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.switch.shut_down();
        if let Some(mut source) = self.source.take() {
            source.release();
            tracing::info!("frame source released");
        }
    }
}

impl<S, M, L, C> Drop for Controller<S, M, L, C>
where
    S: FrameSource,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
