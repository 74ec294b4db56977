//! Face login scan loop.
//!
//! A scan acquires the camera, makes sure the descriptor model is loaded, then
//! ticks on a fixed interval. Each tick grabs a frame, extracts a descriptor
//! and walks the roster in order looking for the first admin whose stored
//! template is close enough. The loop only ends on a match, a capture or
//! model failure, or cancellation; there is no attempt limit.
//!
//! Tick work runs on the blocking pool. A tick that fires while the previous
//! one is still running is skipped, and once a scan is cancelled any result
//! still in flight is discarded.

use crate::camera::{CaptureDevice, CaptureHandle, FacingMode};
use crate::common::config::ScanConfig;
use crate::common::{GymAuthError, Result};
use crate::core::extractor::{distance, DescriptorExtractor, FaceDescriptor};
use crate::storage::{AdminRecord, Roster};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const MSG_IDLE: &str = "Idle";
pub const MSG_STARTING_CAMERA: &str = "Starting camera...";
pub const MSG_LOADING_MODEL: &str = "Loading model...";
pub const MSG_SCANNING: &str = "Scanning for face...";
pub const MSG_NO_FACE: &str = "No face found...";
pub const MSG_COMPARING: &str = "Comparing...";
pub const MSG_NO_MATCH: &str = "No match. Retrying...";
pub const MSG_MATCHED: &str = "Success!";
pub const MSG_CANCELLED: &str = "Cancelled";

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Initializing,
    Scanning,
    Comparing,
    Matched(AdminRecord),
    /// Still scanning; the last frame had no face in it.
    NoFaceDetected,
    Error(String),
}

impl ScanState {
    /// The loop is live and ticking.
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanState::Scanning | ScanState::Comparing | ScanState::NoFaceDetected)
    }
}

/// State plus the status line shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanUpdate {
    pub state: ScanState,
    pub message: String,
}

impl ScanUpdate {
    fn new(state: ScanState, message: &str) -> Self {
        Self { state, message: message.to_string() }
    }
}

#[derive(Debug)]
pub enum ScanOutcome {
    Matched(AdminRecord),
    Cancelled,
    Failed(GymAuthError),
}

/// Invoked once with the matched admin before the scan reports success.
pub type MatchCallback = Box<dyn FnOnce(&AdminRecord) -> Result<()> + Send + Sync>;

/// First admin, in roster order, whose template is strictly closer than
/// `threshold` to `live`. Admins without a template are skipped, as are
/// templates that fail to decode or contain no face.
pub fn find_match<'a, F>(
    roster: &'a [AdminRecord],
    live: &FaceDescriptor,
    threshold: f32,
    mut decode: F,
) -> Option<&'a AdminRecord>
where
    F: FnMut(&str) -> Result<Option<FaceDescriptor>>,
{
    for admin in roster {
        let Some(template) = admin.stored_template() else {
            continue;
        };

        let stored = match decode(template) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                tracing::debug!("No face in stored template for {}", admin.username);
                continue;
            }
            Err(e) => {
                tracing::warn!("Skipping template for {}: {}", admin.username, e);
                continue;
            }
        };

        let d = distance(live, &stored);
        tracing::debug!("Distance to {}: {:.3}", admin.username, d);
        if d < threshold {
            return Some(admin);
        }
    }

    None
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn joined<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    result.map_err(|e| GymAuthError::Other(anyhow::anyhow!("Scan worker failed: {}", e)))?
}

async fn join_in_flight<T>(job: &mut Option<JoinHandle<T>>) -> std::result::Result<T, JoinError> {
    match job {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Serialises status updates so nothing is published after the scan has
/// reached a terminal state.
struct StatusPublisher {
    tx: watch::Sender<ScanUpdate>,
    closed: Mutex<bool>,
}

impl StatusPublisher {
    fn publish(&self, state: ScanState, message: &str) {
        let closed = lock(&self.closed);
        if *closed {
            return;
        }
        tracing::debug!("Scan status: {}", message);
        self.tx.send_replace(ScanUpdate::new(state, message));
    }

    fn finish(&self, state: ScanState, message: &str) {
        let mut closed = lock(&self.closed);
        if *closed {
            return;
        }
        *closed = true;
        tracing::debug!("Scan finished: {}", message);
        self.tx.send_replace(ScanUpdate::new(state, message));
    }
}

enum TickResult {
    NoFace,
    NoMatch,
    Matched(AdminRecord),
}

/// Face login driver. Owns the camera and the descriptor extractor across
/// scans so the model is only ever loaded once.
pub struct MatchLoop<E: DescriptorExtractor> {
    device: Arc<Mutex<CaptureDevice>>,
    extractor: Arc<Mutex<E>>,
    facing: FacingMode,
    tick_interval: Duration,
    threshold: f32,
}

impl<E: DescriptorExtractor> MatchLoop<E> {
    pub fn new(device: CaptureDevice, extractor: E, config: &ScanConfig, facing: FacingMode) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            extractor: Arc::new(Mutex::new(extractor)),
            facing,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            threshold: config.match_threshold,
        }
    }

    pub fn device_held(&self) -> bool {
        lock(&self.device).is_held()
    }

    /// Spawns a scan on the current tokio runtime.
    pub fn start(&self, roster: Roster, on_match: MatchCallback) -> ScanHandle {
        let (tx, updates) = watch::channel(ScanUpdate::new(ScanState::Idle, MSG_IDLE));
        let (cancel, cancel_rx) = oneshot::channel();

        let task = ScanTask {
            device: self.device.clone(),
            extractor: self.extractor.clone(),
            facing: self.facing,
            tick_interval: self.tick_interval,
            threshold: self.threshold,
            roster,
            publisher: Arc::new(StatusPublisher { tx, closed: Mutex::new(false) }),
            on_match: Some(on_match),
        };

        ScanHandle {
            cancel: Some(cancel),
            updates,
            task: tokio::spawn(task.run(cancel_rx)),
        }
    }
}

/// A running scan. Dropping the handle cancels the scan and releases the
/// camera.
pub struct ScanHandle {
    cancel: Option<oneshot::Sender<()>>,
    updates: watch::Receiver<ScanUpdate>,
    task: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    pub fn current(&self) -> ScanUpdate {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanUpdate> {
        self.updates.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the scan. Resolves once the camera has been released.
    pub async fn cancel(mut self) -> ScanOutcome {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        Self::join(self.task).await
    }

    /// Waits for the scan to end on its own (match or failure).
    pub async fn wait(self) -> ScanOutcome {
        let ScanHandle { cancel, task, .. } = self;
        let outcome = Self::join(task).await;
        drop(cancel);
        outcome
    }

    async fn join(task: JoinHandle<ScanOutcome>) -> ScanOutcome {
        task.await.unwrap_or_else(|e| {
            ScanOutcome::Failed(GymAuthError::Other(anyhow::anyhow!("Scan task failed: {}", e)))
        })
    }
}

struct ScanTask<E: DescriptorExtractor> {
    device: Arc<Mutex<CaptureDevice>>,
    extractor: Arc<Mutex<E>>,
    facing: FacingMode,
    tick_interval: Duration,
    threshold: f32,
    roster: Roster,
    publisher: Arc<StatusPublisher>,
    on_match: Option<MatchCallback>,
}

impl<E: DescriptorExtractor> ScanTask<E> {
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> ScanOutcome {
        self.publisher.publish(ScanState::Initializing, MSG_STARTING_CAMERA);

        let device = self.device.clone();
        let facing = self.facing;
        let mut acquire = tokio::task::spawn_blocking(move || {
            let mut device = lock(&device);
            device.acquire(facing)
        });
        let handle = tokio::select! {
            biased;
            _ = &mut cancel => {
                // The open can't be interrupted; wait for it so the camera is
                // closed before the cancel resolves.
                let opened = joined((&mut acquire).await).ok().map(|h| Arc::new(Mutex::new(h)));
                return cancelled(self.publisher.clone(), opened, None).await;
            }
            res = &mut acquire => match joined(res) {
                Ok(handle) => Arc::new(Mutex::new(handle)),
                Err(e) => return self.failed(e, None),
            },
        };

        self.publisher.publish(ScanState::Initializing, MSG_LOADING_MODEL);
        let extractor = self.extractor.clone();
        let load = tokio::task::spawn_blocking(move || {
            let mut extractor = lock(&extractor);
            extractor.ensure_model_loaded()
        });
        tokio::select! {
            biased;
            _ = &mut cancel => return cancelled(self.publisher.clone(), Some(handle), None).await,
            res = load => {
                if let Err(e) = joined(res) {
                    return self.failed(e, Some(&handle));
                }
            }
        }

        self.publisher.publish(ScanState::Scanning, MSG_SCANNING);
        tracing::info!("Face scan started ({} ms interval)", self.tick_interval.as_millis());

        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<Result<TickResult>>> = None;

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => return cancelled(self.publisher.clone(), Some(handle), in_flight).await,
                res = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    match joined(res) {
                        Ok(TickResult::NoFace) => {
                            self.publisher.publish(ScanState::NoFaceDetected, MSG_NO_FACE);
                        }
                        Ok(TickResult::NoMatch) => {
                            self.publisher.publish(ScanState::Scanning, MSG_NO_MATCH);
                        }
                        Ok(TickResult::Matched(admin)) => {
                            lock(&handle).release();
                            return self.matched(admin);
                        }
                        Err(e @ (GymAuthError::Capture(_) | GymAuthError::ModelLoad(_))) => {
                            return self.failed(e, Some(&handle));
                        }
                        Err(e) => tracing::warn!("Scan tick failed: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        tracing::debug!("Previous tick still running, skipping this one");
                        continue;
                    }
                    in_flight = Some(self.spawn_tick(handle.clone()));
                }
            }
        }
    }

    fn spawn_tick(&self, handle: Arc<Mutex<CaptureHandle>>) -> JoinHandle<Result<TickResult>> {
        let extractor = self.extractor.clone();
        let roster = self.roster.snapshot();
        let threshold = self.threshold;
        let publisher = self.publisher.clone();

        tokio::task::spawn_blocking(move || {
            let frame = lock(&handle).capture_frame()?;
            let mut extractor = lock(&extractor);

            let Some(live) = extractor.extract(&frame)? else {
                return Ok(TickResult::NoFace);
            };

            publisher.publish(ScanState::Comparing, MSG_COMPARING);
            let matched = find_match(&roster, &live, threshold, |t| extractor.decode_template(t));
            Ok(match matched {
                Some(admin) => TickResult::Matched(admin.clone()),
                None => TickResult::NoMatch,
            })
        })
    }

    fn matched(&mut self, admin: AdminRecord) -> ScanOutcome {
        tracing::info!("Face matched admin {}", admin.username);

        if let Some(on_match) = self.on_match.take() {
            if let Err(e) = on_match(&admin) {
                return self.failed(e, None);
            }
        }

        self.publisher.finish(ScanState::Matched(admin.clone()), MSG_MATCHED);
        ScanOutcome::Matched(admin)
    }

    fn failed(&self, error: GymAuthError, handle: Option<&Arc<Mutex<CaptureHandle>>>) -> ScanOutcome {
        if let Some(handle) = handle {
            lock(handle).release();
        }
        tracing::warn!("Face scan failed: {}", error);
        let reason = error.to_string();
        self.publisher.finish(ScanState::Error(reason.clone()), &reason);
        ScanOutcome::Failed(error)
    }
}

async fn cancelled(
    publisher: Arc<StatusPublisher>,
    handle: Option<Arc<Mutex<CaptureHandle>>>,
    in_flight: Option<JoinHandle<Result<TickResult>>>,
) -> ScanOutcome {
    publisher.finish(ScanState::Idle, MSG_CANCELLED);

    if let Some(job) = in_flight {
        // Let the tick finish with the camera, then drop whatever it found
        let _ = job.await;
        tracing::debug!("Discarded in-flight tick after cancel");
    }
    if let Some(handle) = handle {
        lock(&handle).release();
    }

    tracing::info!("Face scan cancelled");
    ScanOutcome::Cancelled
}
