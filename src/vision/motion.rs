//! Debounced gesture detection over rolling landmark windows
//!
//! Head gestures (nod, shake) come from the face pipeline and upper-body
//! gestures (raise, wave) from the pose pipeline. The two halves keep separate
//! state and make no assumption about the order in which frames arrive.

use super::geometry::{head_pose, wrist_and_shoulder, Landmark, Side};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Samples kept per rolling window
pub const WINDOW_CAPACITY: usize = 20;
/// Head samples needed before a nod/shake is evaluated
pub const MIN_HEAD_SAMPLES: usize = 10;
/// Range on the moving axis that counts as a gesture
pub const HEAD_MOTION_RANGE: f64 = 0.04;
/// Range the other axis must stay under
pub const HEAD_STILL_RANGE: f64 = 0.02;

/// Wrist must be this far above its shoulder to count as raised
pub const WRIST_RAISE_MARGIN: f64 = 0.05;
/// Samples needed before a wrist's x-range is considered
pub const MIN_WAVE_SAMPLES: usize = 5;
/// Horizontal wrist travel that counts as a wave
pub const WAVE_RANGE: f64 = 0.06;
/// Samples of a held raised wrist that count as a raise
pub const RAISE_SAMPLES: usize = 10;
/// Minimum gap between upper-body gesture events
pub const UPPER_BODY_COOLDOWN: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionEvent {
    Nod,
    ShakeHead,
    RaiseHand,
    WaveHand,
}

impl MotionEvent {
    /// Animation the avatar mirrors this gesture with
    pub fn animation(&self) -> &'static str {
        match self {
            MotionEvent::Nod => "nod",
            MotionEvent::ShakeHead => "shakeHead",
            MotionEvent::RaiseHand => "raiseHand",
            MotionEvent::WaveHand => "waveHand",
        }
    }
}

impl fmt::Display for MotionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.animation())
    }
}

/// Fixed-capacity FIFO of scalar samples
#[derive(Debug, Clone)]
struct Window {
    samples: VecDeque<f64>,
}

impl Window {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(WINDOW_CAPACITY),
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() >= WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    /// max - min, or 0 for an empty window
    fn range(&self) -> f64 {
        let mut iter = self.samples.iter().copied();
        let Some(first) = iter.next() else {
            return 0.0;
        };
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        max - min
    }
}

#[derive(Debug, Clone)]
pub struct MotionDetector {
    yaw: Window,
    pitch: Window,
    left_wrist_x: Window,
    right_wrist_x: Window,
    last_upper_body_event: Option<Instant>,
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionDetector {
    pub fn new() -> Self {
        Self {
            yaw: Window::new(),
            pitch: Window::new(),
            left_wrist_x: Window::new(),
            right_wrist_x: Window::new(),
            last_upper_body_event: None,
        }
    }

    /// Feed one frame's face landmarks
    pub fn process_face(&mut self, landmarks: &[Landmark]) -> Option<MotionEvent> {
        let (yaw, pitch) = head_pose(landmarks)?;
        self.push_head_pose(yaw, pitch)
    }

    /// Feed one head pose sample. A detected gesture consumes the window.
    pub fn push_head_pose(&mut self, yaw: f64, pitch: f64) -> Option<MotionEvent> {
        self.yaw.push(yaw);
        self.pitch.push(pitch);

        if self.yaw.len() < MIN_HEAD_SAMPLES || self.pitch.len() < MIN_HEAD_SAMPLES {
            return None;
        }

        let yaw_range = self.yaw.range();
        let pitch_range = self.pitch.range();

        let event = if pitch_range > HEAD_MOTION_RANGE && yaw_range < HEAD_STILL_RANGE {
            MotionEvent::Nod
        } else if yaw_range > HEAD_MOTION_RANGE && pitch_range < HEAD_STILL_RANGE {
            MotionEvent::ShakeHead
        } else {
            return None;
        };

        debug!(yaw_range, pitch_range, "Head gesture: {}", event);
        self.yaw.clear();
        self.pitch.clear();
        Some(event)
    }

    /// Feed one frame's body pose landmarks
    pub fn process_pose(&mut self, landmarks: &[Landmark], now: Instant) -> Option<MotionEvent> {
        let left = wrist_and_shoulder(landmarks, Side::Left);
        let right = wrist_and_shoulder(landmarks, Side::Right);
        self.push_wrists(left, right, now)
    }

    /// Feed (wrist, shoulder) pairs for each side; `None` for an untracked side
    pub fn push_wrists(
        &mut self,
        left: Option<(Landmark, Landmark)>,
        right: Option<(Landmark, Landmark)>,
        now: Instant,
    ) -> Option<MotionEvent> {
        let left_raised = Self::track_wrist(&mut self.left_wrist_x, left);
        let right_raised = Self::track_wrist(&mut self.right_wrist_x, right);

        if !left_raised && !right_raised {
            return None;
        }

        // Cooldown comes before the range checks, so fast repeated waves are
        // swallowed until it expires
        if let Some(last) = self.last_upper_body_event {
            if now.saturating_duration_since(last) < UPPER_BODY_COOLDOWN {
                return None;
            }
        }

        let waved = |w: &Window| w.len() >= MIN_WAVE_SAMPLES && w.range() > WAVE_RANGE;
        let event = if waved(&self.left_wrist_x) || waved(&self.right_wrist_x) {
            MotionEvent::WaveHand
        } else if self.left_wrist_x.len() >= RAISE_SAMPLES
            || self.right_wrist_x.len() >= RAISE_SAMPLES
        {
            MotionEvent::RaiseHand
        } else {
            return None;
        };

        debug!("Upper-body gesture: {}", event);
        self.left_wrist_x.clear();
        self.right_wrist_x.clear();
        self.last_upper_body_event = Some(now);
        Some(event)
    }

    /// Push the wrist x if raised, otherwise clear that side's history
    fn track_wrist(window: &mut Window, pair: Option<(Landmark, Landmark)>) -> bool {
        match pair {
            Some((wrist, shoulder)) if wrist.y < shoulder.y - WRIST_RAISE_MARGIN => {
                window.push(wrist.x);
                true
            }
            _ => {
                window.clear();
                false
            }
        }
    }

    /// Number of buffered head samples (yaw, pitch)
    pub fn head_samples(&self) -> (usize, usize) {
        (self.yaw.len(), self.pitch.len())
    }

    /// Number of buffered wrist samples (left, right)
    pub fn wrist_samples(&self) -> (usize, usize) {
        (self.left_wrist_x.len(), self.right_wrist_x.len())
    }

    /// Drop all windows and the cooldown stamp
    pub fn reset(&mut self) {
        self.yaw.clear();
        self.pitch.clear();
        self.left_wrist_x.clear();
        self.right_wrist_x.clear();
        self.last_upper_body_event = None;
    }
}
