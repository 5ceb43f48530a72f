use rollcall_core::FrameSource;
use rollcall_hw::{Camera, Frame};

/// Camera adapted to the controller's frame source.
///
/// Capture failures and (optionally) dark frames become "no frame this
/// tick" so the loop never stalls on a flaky device.
pub struct CameraSource {
    camera: Option<Camera>,
    skip_dark: bool,
}

impl CameraSource {
    pub fn new(camera: Camera, skip_dark: bool) -> Self {
        Self {
            camera: Some(camera),
            skip_dark,
        }
    }
}

impl FrameSource for CameraSource {
    type Frame = Frame;

    fn read_frame(&mut self) -> Option<Frame> {
        let camera = self.camera.as_mut()?;
        match camera.capture_frame() {
            Ok(frame) if frame.is_dark && self.skip_dark => {
                tracing::debug!(seq = frame.sequence, "skipping dark frame");
                None
            }
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(device = %camera.device_path, error = %e, "frame capture failed");
                None
            }
        }
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(device = %camera.device_path, "closing camera");
            drop(camera);
        }
    }
}
