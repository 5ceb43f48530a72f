use crate::engine::{EngineError, EngineHandle};
use rollcall_core::TransitionError;
use std::sync::Arc;
use tokio::sync::Notify;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
pub struct RollcallService {
    pub engine: EngineHandle,
    /// Woken by `Shutdown` so `main` can leave its wait loop.
    pub shutdown: Arc<Notify>,
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Begin per-frame recognition.
    async fn start(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start requested");
        self.engine.start().map_err(to_fdo)
    }

    /// Pause recognition. The camera stays open.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().map_err(to_fdo)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.status().await.map_err(to_fdo)?;
        serde_json::to_string(&report).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop the loop, release the camera and exit the daemon.
    async fn shutdown(&self) -> zbus::fdo::Result<()> {
        tracing::info!("shutdown requested");
        self.engine.shutdown().await.map_err(to_fdo)?;
        self.shutdown.notify_one();
        Ok(())
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Transition(TransitionError::ShutDown) | EngineError::ChannelClosed => {
            zbus::fdo::Error::Failed(err.to_string())
        }
        EngineError::Transition(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        EngineError::Spawn(_) => zbus::fdo::Error::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_errors_map_to_invalid_args() {
        let err = to_fdo(EngineError::Transition(TransitionError::AlreadyRunning));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(ref m) if m.contains("already running")));

        let err = to_fdo(EngineError::Transition(TransitionError::ShutDown));
        assert!(matches!(err, zbus::fdo::Error::Failed(_)));

        let err = to_fdo(EngineError::ChannelClosed);
        assert!(matches!(err, zbus::fdo::Error::Failed(_)));
    }
}
