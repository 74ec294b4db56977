#![allow(dead_code)]

use gym_auth::camera::{CameraBackend, CaptureDevice, FacingMode, FrameStream, NullSurface};
use gym_auth::common::config::ScanConfig;
use gym_auth::common::{GymAuthError, Result};
use gym_auth::core::{DescriptorExtractor, FaceDescriptor, MatchLoop, ScanState, ScanUpdate};
use gym_auth::storage::AdminRecord;
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Call counts shared between a test and its fakes.
#[derive(Default)]
pub struct Calls {
    pub opens: AtomicUsize,
    pub stops: AtomicUsize,
    pub loads: AtomicUsize,
    pub extracts: AtomicUsize,
    /// Extract calls running right now, and the most seen at once.
    pub in_extract: AtomicUsize,
    pub max_in_extract: AtomicUsize,
}

impl Calls {
    pub fn opens(&self) -> usize { self.opens.load(Ordering::SeqCst) }
    pub fn stops(&self) -> usize { self.stops.load(Ordering::SeqCst) }
    pub fn loads(&self) -> usize { self.loads.load(Ordering::SeqCst) }
    pub fn extracts(&self) -> usize { self.extracts.load(Ordering::SeqCst) }
    pub fn max_in_extract(&self) -> usize { self.max_in_extract.load(Ordering::SeqCst) }
}

pub struct FakeBackend {
    pub calls: Arc<Calls>,
    pub fail_open: bool,
    /// How long `open` blocks before the device comes up.
    pub open_delay: Duration,
}

struct FakeStream {
    calls: Arc<Calls>,
}

impl FrameStream for FakeStream {
    fn next_frame(&mut self) -> Result<DynamicImage> {
        Ok(DynamicImage::new_luma8(8, 8))
    }

    fn stop(&mut self) {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl CameraBackend for FakeBackend {
    fn open(&mut self, _facing: FacingMode) -> Result<Box<dyn FrameStream>> {
        std::thread::sleep(self.open_delay);
        if self.fail_open {
            return Err(GymAuthError::Capture("NotAllowedError: permission denied".into()));
        }
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream { calls: self.calls.clone() }))
    }
}

/// Returns a fixed live descriptor and reads templates as comma separated
/// floats.
pub struct FakeExtractor {
    pub calls: Arc<Calls>,
    pub live: Option<Vec<f32>>,
    pub fail_load: bool,
    /// How long each `extract` call blocks.
    pub delay: Duration,
    loaded: bool,
}

impl FakeExtractor {
    pub fn new(calls: Arc<Calls>, live: Option<Vec<f32>>) -> Self {
        Self { calls, live, fail_load: false, delay: Duration::ZERO, loaded: false }
    }
}

impl DescriptorExtractor for FakeExtractor {
    fn ensure_model_loaded(&mut self) -> Result<()> {
        if self.fail_load {
            return Err(GymAuthError::ModelLoad("weights missing".into()));
        }
        if !self.loaded {
            self.calls.loads.fetch_add(1, Ordering::SeqCst);
            self.loaded = true;
        }
        Ok(())
    }

    fn extract(&mut self, _frame: &DynamicImage) -> Result<Option<FaceDescriptor>> {
        self.calls.extracts.fetch_add(1, Ordering::SeqCst);
        let running = self.calls.in_extract.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.max_in_extract.fetch_max(running, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.calls.in_extract.fetch_sub(1, Ordering::SeqCst);
        Ok(self.live.clone().map(FaceDescriptor::new))
    }

    fn decode_template(&mut self, template: &str) -> Result<Option<FaceDescriptor>> {
        template
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|v| Some(FaceDescriptor::new(v)))
            .map_err(|e| GymAuthError::Template(e.to_string()))
    }
}

pub fn admin(username: &str, template: Option<&str>) -> AdminRecord {
    AdminRecord {
        username: username.to_string(),
        password: Some(format!("{username}-pass")),
        phone: Some(format!("09{username}")),
        face_template: template.map(str::to_string),
        name: username.to_uppercase(),
        ..AdminRecord::default_admin()
    }
}

pub fn fast_scan() -> ScanConfig {
    ScanConfig { tick_interval_ms: 10, match_threshold: 0.6 }
}

pub fn match_loop(calls: &Arc<Calls>, extractor: FakeExtractor, fail_open: bool) -> MatchLoop<FakeExtractor> {
    let backend = FakeBackend { calls: calls.clone(), fail_open, open_delay: Duration::ZERO };
    match_loop_with(backend, extractor)
}

pub fn match_loop_with(backend: FakeBackend, extractor: FakeExtractor) -> MatchLoop<FakeExtractor> {
    let device = CaptureDevice::new(Box::new(backend), Arc::new(NullSurface));
    MatchLoop::new(device, extractor, &fast_scan(), FacingMode::User)
}

/// Waits until the published state satisfies `pred`, or the scan ends.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ScanUpdate>,
    pred: impl Fn(&ScanState) -> bool,
) -> ScanUpdate {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let update = rx.borrow_and_update();
                if pred(&update.state) {
                    return update.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("timed out waiting for scan state")
}

/// Polls `cond` until it holds or five seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
