//! Scalar facial and body features from landmark coordinates
//!
//! All functions are pure. Coordinates are normalized to the frame, with y
//! growing downward. Indices follow the 468-point face mesh and the 33-point
//! body pose topology.

use serde::{Deserialize, Serialize};

/// A tracked keypoint in normalized frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Below this many face points the frame is treated as "no confident face"
pub const MIN_FACE_LANDMARKS: usize = 400;

/// Face mesh indices
pub mod face {
    pub const LEFT_MOUTH: usize = 61;
    pub const RIGHT_MOUTH: usize = 291;
    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;

    pub const LEFT_EYE_UPPER: usize = 159;
    pub const LEFT_EYE_LOWER: usize = 145;
    pub const RIGHT_EYE_UPPER: usize = 386;
    pub const RIGHT_EYE_LOWER: usize = 374;
    pub const LEFT_EYE_INNER: usize = 133;
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const RIGHT_EYE_INNER: usize = 362;
    pub const RIGHT_EYE_OUTER: usize = 263;

    pub const LEFT_EYEBROW_INNER: usize = 107;
    pub const RIGHT_EYEBROW_INNER: usize = 336;

    pub const NOSE_TIP: usize = 1;
    pub const FOREHEAD: usize = 10;
    pub const CHIN: usize = 152;
}

/// Body pose indices
pub mod pose {
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_WRIST: usize = 15;
    pub const RIGHT_WRIST: usize = 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Euclidean distance in 3D
pub fn distance(a: &Landmark, b: &Landmark) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Vertical over horizontal eye distance. 0.5 when points are missing.
pub fn eye_openness(landmarks: &[Landmark], side: Side) -> f64 {
    let (upper, lower, inner, outer) = match side {
        Side::Left => (
            face::LEFT_EYE_UPPER,
            face::LEFT_EYE_LOWER,
            face::LEFT_EYE_INNER,
            face::LEFT_EYE_OUTER,
        ),
        Side::Right => (
            face::RIGHT_EYE_UPPER,
            face::RIGHT_EYE_LOWER,
            face::RIGHT_EYE_INNER,
            face::RIGHT_EYE_OUTER,
        ),
    };
    let (Some(upper), Some(lower), Some(inner), Some(outer)) = (
        landmarks.get(upper),
        landmarks.get(lower),
        landmarks.get(inner),
        landmarks.get(outer),
    ) else {
        return 0.5;
    };

    let height = distance(upper, lower);
    let width = distance(inner, outer);
    if width > 0.0 {
        height / width
    } else {
        0.5
    }
}

/// Upper eyelid y minus inner eyebrow y. Positive means raised brows.
pub fn eyebrow_position(landmarks: &[Landmark], side: Side) -> f64 {
    let (brow, eye) = match side {
        Side::Left => (face::LEFT_EYEBROW_INNER, face::LEFT_EYE_UPPER),
        Side::Right => (face::RIGHT_EYEBROW_INNER, face::RIGHT_EYE_UPPER),
    };
    match (landmarks.get(brow), landmarks.get(eye)) {
        (Some(brow), Some(eye)) => eye.y - brow.y,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouthFeatures {
    /// Vertical lip distance over mouth width
    pub openness: f64,
    pub width: f64,
    /// Lip center y minus mean corner y; positive when corners sit above center
    pub corner_pull: f64,
}

pub fn mouth_features(landmarks: &[Landmark]) -> MouthFeatures {
    let (Some(left), Some(right), Some(upper), Some(lower)) = (
        landmarks.get(face::LEFT_MOUTH),
        landmarks.get(face::RIGHT_MOUTH),
        landmarks.get(face::UPPER_LIP),
        landmarks.get(face::LOWER_LIP),
    ) else {
        return MouthFeatures::default();
    };

    let width = distance(left, right);
    let height = distance(upper, lower);
    let openness = if width > 0.0 { height / width } else { 0.0 };

    let center_y = (upper.y + lower.y) / 2.0;
    let corner_y = (left.y + right.y) / 2.0;

    MouthFeatures {
        openness,
        width,
        corner_pull: center_y - corner_y,
    }
}

/// The per-frame features the emotion classifier works on
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceFeatures {
    pub eye_openness: f64,
    pub brow_position: f64,
    pub mouth_openness: f64,
    pub mouth_corner_pull: f64,
}

/// Compute face features, or `None` when too few landmarks are present
pub fn analyze_face_features(landmarks: &[Landmark]) -> Option<FaceFeatures> {
    if landmarks.len() < MIN_FACE_LANDMARKS {
        return None;
    }

    let eye = (eye_openness(landmarks, Side::Left) + eye_openness(landmarks, Side::Right)) / 2.0;
    let brow =
        (eyebrow_position(landmarks, Side::Left) + eyebrow_position(landmarks, Side::Right)) / 2.0;
    let mouth = mouth_features(landmarks);

    Some(FaceFeatures {
        eye_openness: eye,
        brow_position: brow,
        mouth_openness: mouth.openness,
        mouth_corner_pull: mouth.corner_pull,
    })
}

/// Head yaw and pitch proxies: nose offset from the eye midpoint (x) and from
/// the forehead/chin midpoint (y)
pub fn head_pose(landmarks: &[Landmark]) -> Option<(f64, f64)> {
    let nose = landmarks.get(face::NOSE_TIP)?;
    let left_eye = landmarks.get(face::LEFT_EYE_OUTER)?;
    let right_eye = landmarks.get(face::RIGHT_EYE_OUTER)?;
    let forehead = landmarks.get(face::FOREHEAD)?;
    let chin = landmarks.get(face::CHIN)?;

    let mid_eye_x = (left_eye.x + right_eye.x) / 2.0;
    let mid_face_y = (forehead.y + chin.y) / 2.0;
    Some((nose.x - mid_eye_x, nose.y - mid_face_y))
}

/// Wrist and shoulder pair for one side of the body
pub fn wrist_and_shoulder(landmarks: &[Landmark], side: Side) -> Option<(Landmark, Landmark)> {
    let (wrist, shoulder) = match side {
        Side::Left => (pose::LEFT_WRIST, pose::LEFT_SHOULDER),
        Side::Right => (pose::RIGHT_WRIST, pose::RIGHT_SHOULDER),
    };
    Some((*landmarks.get(wrist)?, *landmarks.get(shoulder)?))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A 468-point face with every point at the frame center
    pub fn blank_face() -> Vec<Landmark> {
        vec![Landmark::new(0.5, 0.5, 0.0); 468]
    }

    /// Wide-open eyes (openness 0.4) and an open mouth (openness 0.08)
    pub fn surprised_face() -> Vec<Landmark> {
        let mut lm = blank_face();
        lm[face::LEFT_EYE_UPPER] = Landmark::new(0.40, 0.40, 0.0);
        lm[face::LEFT_EYE_LOWER] = Landmark::new(0.40, 0.44, 0.0);
        lm[face::LEFT_EYE_INNER] = Landmark::new(0.45, 0.42, 0.0);
        lm[face::LEFT_EYE_OUTER] = Landmark::new(0.35, 0.42, 0.0);
        lm[face::RIGHT_EYE_UPPER] = Landmark::new(0.60, 0.40, 0.0);
        lm[face::RIGHT_EYE_LOWER] = Landmark::new(0.60, 0.44, 0.0);
        lm[face::RIGHT_EYE_INNER] = Landmark::new(0.55, 0.42, 0.0);
        lm[face::RIGHT_EYE_OUTER] = Landmark::new(0.65, 0.42, 0.0);
        lm[face::LEFT_MOUTH] = Landmark::new(0.45, 0.70, 0.0);
        lm[face::RIGHT_MOUTH] = Landmark::new(0.55, 0.70, 0.0);
        lm[face::UPPER_LIP] = Landmark::new(0.50, 0.696, 0.0);
        lm[face::LOWER_LIP] = Landmark::new(0.50, 0.704, 0.0);
        lm
    }
}
