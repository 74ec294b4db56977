pub mod v4l2;

pub use v4l2::{V4l2Backend, list_all_cameras, detect_ir_camera};

use crate::common::{GymAuthError, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which camera the caller would like, front (`User`) or rear (`Environment`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

/// A stream of frames from an opened device.
pub trait FrameStream: Send + 'static {
    fn next_frame(&mut self) -> Result<DynamicImage>;

    /// Stops every underlying track. Called exactly once per stream.
    fn stop(&mut self);
}

/// Opens devices. Failing here is a `GymAuthError::Capture`.
pub trait CameraBackend: Send + 'static {
    fn open(&mut self, facing: FacingMode) -> Result<Box<dyn FrameStream>>;
}

/// Where live frames are shown while a handle is held.
pub trait DisplaySurface: Send + Sync {
    fn attach(&self) {}
    fn show(&self, frame: &DynamicImage);
    fn detach(&self) {}
}

/// Surface for headless callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSurface;

impl DisplaySurface for NullSurface {
    fn show(&self, _frame: &DynamicImage) {}
}

/// Exclusive owner of the camera. Hands out at most one live
/// [`CaptureHandle`] at a time.
pub struct CaptureDevice {
    backend: Box<dyn CameraBackend>,
    surface: Arc<dyn DisplaySurface>,
    held: Arc<AtomicBool>,
}

impl CaptureDevice {
    pub fn new(backend: Box<dyn CameraBackend>, surface: Arc<dyn DisplaySurface>) -> Self {
        Self {
            backend,
            surface,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn acquire(&mut self, facing: FacingMode) -> Result<CaptureHandle> {
        if self.held.swap(true, Ordering::AcqRel) {
            return Err(GymAuthError::Capture("Camera is already in use".into()));
        }

        let stream = match self.backend.open(facing) {
            Ok(stream) => stream,
            Err(e) => {
                self.held.store(false, Ordering::Release);
                return Err(match e {
                    GymAuthError::Capture(_) => e,
                    other => GymAuthError::Capture(other.to_string()),
                });
            }
        };

        self.surface.attach();
        tracing::debug!("Camera acquired ({:?} facing)", facing);

        Ok(CaptureHandle {
            stream: Some(stream),
            surface: self.surface.clone(),
            held: self.held.clone(),
        })
    }
}

/// A live camera bound to the device's display surface. Released on drop if
/// not released explicitly.
pub struct CaptureHandle {
    stream: Option<Box<dyn FrameStream>>,
    surface: Arc<dyn DisplaySurface>,
    held: Arc<AtomicBool>,
}

impl CaptureHandle {
    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        let stream = self.stream.as_mut()
            .ok_or_else(|| GymAuthError::Capture("Camera already released".into()))?;
        let frame = stream.next_frame()?;
        self.surface.show(&frame);
        Ok(frame)
    }

    /// Stops the device and detaches the surface. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            self.surface.detach();
            self.held.store(false, Ordering::Release);
            tracing::debug!("Camera released");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}
