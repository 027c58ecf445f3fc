//! Camera session and per-frame detector loop
//!
//! `VisionSession` owns the capture stream for its whole lifetime. Host
//! facilities (camera, video element, detection models) are reached through
//! the capability traits below so the session logic runs the same against a
//! real device or a test double.

use super::emotion::map_face_to_emotion;
use super::geometry::Landmark;
use super::motion::{MotionDetector, MotionEvent};
use crate::store::{BehaviorStore, Emotion};
use crate::AvatarError;
use crate::utils::{FpsCounter, TimingTracker};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Requested capture format. Values are ideals, the device may pick others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub facing_user: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 30,
            facing_user: true,
        }
    }
}

/// Why the camera could not be acquired
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera found")]
    NotFound,

    #[error("camera is in use by another application")]
    Busy,

    #[error("camera does not support the requested resolution")]
    OverConstrained,

    #[error("camera access requires a secure context")]
    InsecureContext,

    #[error("camera capture is not supported on this host")]
    Unsupported,

    #[error("camera error: {0}")]
    Other(String),
}

impl CaptureError {
    /// Translate a host capture error name
    pub fn from_host_name(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => CaptureError::PermissionDenied,
            "NotFoundError" | "DevicesNotFoundError" => CaptureError::NotFound,
            "NotReadableError" | "TrackStartError" => CaptureError::Busy,
            "OverconstrainedError" => CaptureError::OverConstrained,
            "SecurityError" => CaptureError::InsecureContext,
            "TypeError" => CaptureError::Unsupported,
            _ => CaptureError::Other(if message.is_empty() {
                name.to_string()
            } else {
                message.to_string()
            }),
        }
    }
}

impl From<CaptureError> for AvatarError {
    fn from(e: CaptureError) -> Self {
        AvatarError::DeviceError(e.to_string())
    }
}

/// Error from a single detector invocation. Never surfaced to the user.
#[derive(Error, Debug, Clone)]
#[error("frame processing failed: {0}")]
pub struct FrameError(pub String);

/// One captured video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Presentation time from stream start
    pub timestamp: Duration,
    pub pixels: Arc<Vec<u8>>,
}

/// Host camera
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Ask for a camera stream. May wait on a permission prompt.
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn MediaStream>, CaptureError>;
}

/// A live camera stream
pub trait MediaStream: Send + Sync {
    /// The most recent frame, if one is available yet
    fn current_frame(&self) -> Option<VideoFrame>;

    /// Release every track. Must tolerate repeated calls.
    fn stop_tracks(&self);
}

/// Where the live preview is shown
pub trait VideoSink: Send + Sync {
    fn attach(&self, stream: &Arc<dyn MediaStream>);
    fn detach(&self);
}

pub trait FaceLandmarker: Send {
    /// Landmarks of the most prominent face, `None` when no face is visible
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Vec<Landmark>>, FrameError>;
}

pub trait PoseLandmarker: Send {
    fn detect(&mut self, frame: &VideoFrame) -> Result<Option<Vec<Landmark>>, FrameError>;
}

/// Loads the two detection models. Each load may fail independently.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_face(&self) -> crate::Result<Box<dyn FaceLandmarker>>;
    async fn load_pose(&self) -> crate::Result<Box<dyn PoseLandmarker>>;
}

pub type EmotionCallback = Arc<dyn Fn(Emotion) + Send + Sync>;
pub type MotionCallback = Arc<dyn Fn(MotionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionStatus {
    Idle,
    Initializing,
    Running,
    Error,
    NoCamera,
}

impl fmt::Display for VisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VisionStatus::Idle => "idle",
            VisionStatus::Initializing => "initializing",
            VisionStatus::Running => "running",
            VisionStatus::Error => "error",
            VisionStatus::NoCamera => "no_camera",
        };
        f.write_str(s)
    }
}

#[derive(Clone)]
struct Callbacks {
    on_emotion: EmotionCallback,
    on_motion: Option<MotionCallback>,
}

/// Device handles and status, guarded together
struct Lifecycle {
    status: VisionStatus,
    last_error: Option<String>,
    callbacks: Option<Callbacks>,
    stream: Option<Arc<dyn MediaStream>>,
    sink: Option<Arc<dyn VideoSink>>,
    task: Option<JoinHandle<()>>,
}

/// Per-session detector state, dropped on stop
struct FrameRuntime {
    face: Option<Box<dyn FaceLandmarker>>,
    pose: Option<Box<dyn PoseLandmarker>>,
    detector: MotionDetector,
    fps: FpsCounter,
    frame_time: TimingTracker,
}

#[derive(Debug, Default)]
struct FrameOutput {
    emotion: Option<Emotion>,
    motions: Vec<MotionEvent>,
}

impl FrameRuntime {
    fn new() -> Self {
        Self {
            face: None,
            pose: None,
            detector: MotionDetector::new(),
            fps: FpsCounter::new(loop_clock()),
            frame_time: TimingTracker::new(60),
        }
    }

    /// Run both pipelines on one frame. Detector errors drop only that
    /// pipeline's result for this frame.
    fn process_frame(&mut self, frame: &VideoFrame, now: Instant) -> FrameOutput {
        let started = Instant::now();
        let mut output = FrameOutput::default();

        if let Some(face) = self.face.as_mut() {
            match face.detect(frame) {
                Ok(landmarks) => {
                    output.emotion = Some(map_face_to_emotion(landmarks.as_deref()));
                    if let Some(event) = landmarks
                        .as_deref()
                        .and_then(|lm| self.detector.process_face(lm))
                    {
                        output.motions.push(event);
                    }
                }
                Err(e) => debug!("{}", e),
            }
        }

        if let Some(pose) = self.pose.as_mut() {
            match pose.detect(frame) {
                Ok(Some(landmarks)) => {
                    if let Some(event) = self.detector.process_pose(&landmarks, now) {
                        output.motions.push(event);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("{}", e),
            }
        }

        self.frame_time.record(started.elapsed());
        if let Some(fps) = self.fps.tick(now) {
            debug!(
                fps = fps,
                avg_frame_us = self.frame_time.average().as_micros() as u64,
                max_frame_us = self.frame_time.max().as_micros() as u64,
                "Vision loop rate"
            );
        }
        output
    }

    fn release(&mut self) {
        self.face = None;
        self.pose = None;
        self.detector.reset();
        self.fps.reset(loop_clock());
        self.frame_time.clear();
    }
}

/// Frame timestamps follow the tokio clock so paused-time runs stay consistent
fn loop_clock() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Camera capture plus face/pose detection, one session at a time
pub struct VisionSession {
    capture: Arc<dyn CaptureDevice>,
    models: Arc<dyn ModelLoader>,
    store: BehaviorStore,
    constraints: CaptureConstraints,
    frame_interval: Duration,
    lifecycle: Arc<Mutex<Lifecycle>>,
    runtime: Arc<Mutex<FrameRuntime>>,
    /// Bumped by every stop; a start that sees a different value was cancelled
    epoch: Arc<AtomicU64>,
}

impl VisionSession {
    pub fn new(
        capture: Arc<dyn CaptureDevice>,
        models: Arc<dyn ModelLoader>,
        store: BehaviorStore,
    ) -> Self {
        Self {
            capture,
            models,
            store,
            constraints: CaptureConstraints::default(),
            frame_interval: Duration::from_millis(33),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                status: VisionStatus::Idle,
                last_error: None,
                callbacks: None,
                stream: None,
                sink: None,
                task: None,
            })),
            runtime: Arc::new(Mutex::new(FrameRuntime::new())),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn status(&self) -> VisionStatus {
        self.lifecycle.lock().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.lifecycle.lock().last_error.clone()
    }

    pub fn is_running(&self) -> bool {
        self.status() == VisionStatus::Running
    }

    /// Loop iterations per second over the last measured window
    pub fn fps(&self) -> f32 {
        self.runtime.lock().fps.fps()
    }

    /// Acquire the camera, load the models and start the frame loop.
    ///
    /// Returns `true` once the loop is running. Calling this while running
    /// only swaps the callbacks. Returns `false` while another start is still
    /// in progress, or when the camera or both models are unavailable.
    pub async fn start(
        &self,
        sink: Arc<dyn VideoSink>,
        on_emotion: EmotionCallback,
        on_motion: Option<MotionCallback>,
    ) -> bool {
        let callbacks = Callbacks {
            on_emotion,
            on_motion,
        };
        let epoch = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.status {
                VisionStatus::Running => {
                    debug!("Vision already running, replacing callbacks");
                    lifecycle.callbacks = Some(callbacks);
                    return true;
                }
                VisionStatus::Initializing => {
                    warn!("Vision start already in progress");
                    return false;
                }
                _ => {}
            }
            lifecycle.status = VisionStatus::Initializing;
            lifecycle.last_error = None;
            lifecycle.callbacks = Some(callbacks);
            self.epoch.load(Ordering::SeqCst)
        };
        info!(
            "Requesting camera {}x{}@{}",
            self.constraints.width, self.constraints.height, self.constraints.frame_rate
        );

        let stream = match self.capture.open(&self.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                let reason = e.to_string();
                let err = AvatarError::from(e);
                error!(recoverable = err.is_recoverable(), "{}", err);
                self.fail(epoch, VisionStatus::NoCamera, reason);
                return false;
            }
        };
        sink.attach(&stream);
        {
            // Owned by the session from here on, so `stop` can release them
            // while the models are still loading
            let mut lifecycle = self.lifecycle.lock();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                drop(lifecycle);
                stream.stop_tracks();
                sink.detach();
                return false;
            }
            lifecycle.stream = Some(Arc::clone(&stream));
            lifecycle.sink = Some(Arc::clone(&sink));
        }

        let face = match self.models.load_face().await {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Face model failed to load: {}", e);
                None
            }
        };
        let pose = match self.models.load_pose().await {
            Ok(model) => Some(model),
            Err(e) => {
                warn!("Pose model failed to load: {}", e);
                None
            }
        };

        if face.is_none() && pose.is_none() {
            self.fail(
                epoch,
                VisionStatus::Error,
                "no detection model could be loaded".to_string(),
            );
            return false;
        }

        let mut lifecycle = self.lifecycle.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // Already released by `stop`
            return false;
        }
        {
            let mut runtime = self.runtime.lock();
            runtime.release();
            runtime.face = face;
            runtime.pose = pose;
        }
        lifecycle.task = Some(tokio::spawn(frame_loop(
            Arc::clone(&stream),
            Arc::clone(&self.runtime),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.epoch),
            epoch,
            self.frame_interval,
        )));
        lifecycle.status = VisionStatus::Running;
        info!("Vision running");
        true
    }

    /// Release the camera and reset all detector state. Safe to call at any
    /// time, any number of times.
    pub fn stop(&self) {
        let (task, stream, sink) = {
            let mut lifecycle = self.lifecycle.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if lifecycle.status != VisionStatus::Idle {
                info!("Vision stopped ({})", lifecycle.status);
            }
            lifecycle.status = VisionStatus::Idle;
            lifecycle.callbacks = None;
            (
                lifecycle.task.take(),
                lifecycle.stream.take(),
                lifecycle.sink.take(),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(stream) = stream {
            stream.stop_tracks();
        }
        if let Some(sink) = sink {
            sink.detach();
        }
        self.runtime.lock().release();
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Record a failed start and release whatever it had acquired
    fn fail(&self, epoch: u64, status: VisionStatus, message: String) {
        let (stream, sink) = {
            let mut lifecycle = self.lifecycle.lock();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            lifecycle.status = status;
            lifecycle.last_error = Some(message.clone());
            lifecycle.callbacks = None;
            (lifecycle.stream.take(), lifecycle.sink.take())
        };
        if let Some(stream) = stream {
            stream.stop_tracks();
        }
        if let Some(sink) = sink {
            sink.detach();
        }
        self.store.set_error(Some(message));
    }
}

impl Drop for VisionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn frame_loop(
    stream: Arc<dyn MediaStream>,
    runtime: Arc<Mutex<FrameRuntime>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    epoch: Arc<AtomicU64>,
    started_at: u64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if epoch.load(Ordering::SeqCst) != started_at {
            break;
        }
        let Some(frame) = stream.current_frame() else {
            continue;
        };

        let now = loop_clock();
        let output = runtime.lock().process_frame(&frame, now);

        // Callbacks run without any session lock held
        let callbacks = lifecycle.lock().callbacks.clone();
        let Some(callbacks) = callbacks else {
            continue;
        };
        if let Some(emotion) = output.emotion {
            (callbacks.on_emotion)(emotion);
        }
        if let Some(on_motion) = callbacks.on_motion.as_ref() {
            for event in output.motions {
                on_motion(event);
            }
        }
    }
    debug!("Frame loop exited");
}
