//! Camera-driven perception
//!
//! Landmark geometry, the emotion cascade and the gesture detector are pure
//! and synchronous; `session` owns the camera and drives them once per frame.

pub mod emotion;
pub mod geometry;
pub mod motion;
pub mod session;

pub use emotion::{analyze_face, map_face_to_emotion, EmotionAnalysis};
pub use geometry::{analyze_face_features, FaceFeatures, Landmark};
pub use motion::{MotionDetector, MotionEvent};
pub use session::{
    CaptureConstraints, CaptureDevice, CaptureError, EmotionCallback, FaceLandmarker, FrameError,
    MediaStream, ModelLoader, MotionCallback, PoseLandmarker, VideoFrame, VideoSink,
    VisionSession, VisionStatus,
};
