use rollcall_core::{
    AttendanceLog, Clock, Controller, ControllerState, FaceMatcher, FrameSource, RunSwitch,
    TickStats, TickStatus, TransitionError,
};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the loop, reported over D-Bus as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub state: ControllerState,
    /// Human-readable outcome of the most recent tick.
    pub last_tick: String,
    pub recording_enabled: bool,
    pub ledger_entries: usize,
    pub stats: TickStats,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    switch: Arc<RunSwitch>,
}

impl EngineHandle {
    /// Begin per-frame recognition. Takes effect before the next tick.
    pub fn start(&self) -> Result<(), EngineError> {
        Ok(self.switch.start()?)
    }

    /// Pause recognition; the camera stays open. A tick already in flight
    /// has its result discarded.
    pub fn stop(&self) -> Result<(), EngineError> {
        Ok(self.switch.stop()?)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stop the loop, release the camera and wait for the thread to finish.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Shutdown { reply: reply_tx })
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the controller on a dedicated OS thread, ticking every `interval`.
///
/// The thread owns the controller, so the matcher is never invoked
/// concurrently with itself. A tick that overruns the interval drops the
/// ticks it missed instead of queueing them.
pub fn spawn_engine<S, M, L, C>(
    controller: Controller<S, M, L, C>,
    interval: Duration,
) -> Result<EngineHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    M: FaceMatcher<S::Frame> + Send + 'static,
    L: AttendanceLog + Send + 'static,
    C: Clock + Send + 'static,
{
    let switch = controller.switch();
    let (tx, rx) = mpsc::channel::<EngineRequest>();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || run_loop(controller, rx, interval))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, switch })
}

fn run_loop<S, M, L, C>(
    mut controller: Controller<S, M, L, C>,
    rx: mpsc::Receiver<EngineRequest>,
    interval: Duration,
) where
    S: FrameSource,
    M: FaceMatcher<S::Frame>,
    L: AttendanceLog,
    C: Clock,
{
    tracing::info!(interval_ms = interval.as_millis() as u64, "engine thread started");

    let mut last = TickStatus::Idle;
    let mut next_tick = Instant::now();

    let shutdown_reply = loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(EngineRequest::Status { reply }) => {
                let _ = reply.send(report(&controller, &last));
                continue;
            }
            Ok(EngineRequest::Shutdown { reply }) => break Some(reply),
            Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let status = controller.tick();
        if status != last {
            tracing::debug!(status = %status, "tick status changed");
        }
        last = status;
        next_tick = next_deadline(next_tick, interval, Instant::now());
    };

    controller.shutdown();
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
    tracing::info!("engine thread exiting");
}

fn report<S, M, L, C>(controller: &Controller<S, M, L, C>, last: &TickStatus) -> StatusReport
where
    S: FrameSource,
    M: FaceMatcher<S::Frame>,
    L: AttendanceLog,
    C: Clock,
{
    StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        state: controller.state(),
        last_tick: last.to_string(),
        recording_enabled: controller.recording_enabled(),
        ledger_entries: controller.ledger().len(),
        stats: controller.stats(),
    }
}

/// Deadline for the tick after one scheduled at `scheduled` finished at `now`.
///
/// Keeps a fixed cadence while ticks fit in the interval; after an overrun
/// the missed ticks are dropped and the next one waits a full interval.
fn next_deadline(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let next = scheduled + interval;
    if next > now {
        next
    } else {
        now + interval
    }
}
