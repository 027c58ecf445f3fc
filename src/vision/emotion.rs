//! Single-frame emotion classification
//!
//! A fixed priority cascade over the face features: the first rule that
//! matches decides the emotion. The thresholds are empirical and kept exactly
//! as tuned.

use super::geometry::{analyze_face_features, FaceFeatures, Landmark};
use crate::store::Emotion;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmotionAnalysis {
    pub emotion: Emotion,
    pub confidence: f32,
}

impl EmotionAnalysis {
    const fn new(emotion: Emotion, confidence: f32) -> Self {
        Self {
            emotion,
            confidence,
        }
    }
}

/// Classify one frame's features
pub fn classify(features: &FaceFeatures) -> EmotionAnalysis {
    let FaceFeatures {
        eye_openness,
        brow_position,
        mouth_openness,
        mouth_corner_pull,
    } = *features;

    // Wide eyes with an open mouth
    if eye_openness > 0.35 && mouth_openness > 0.06 {
        return EmotionAnalysis::new(Emotion::Surprised, 0.8);
    }

    // Lowered brows, corners pulled down
    if brow_position < -0.02 && mouth_corner_pull < -0.01 {
        return EmotionAnalysis::new(Emotion::Angry, 0.7);
    }

    // Corners down with inner brows raised
    if mouth_corner_pull < -0.015 && brow_position > 0.01 {
        return EmotionAnalysis::new(Emotion::Sad, 0.7);
    }

    if mouth_corner_pull > 0.01 || mouth_openness > 0.03 {
        return EmotionAnalysis::new(Emotion::Happy, 0.75);
    }

    EmotionAnalysis::new(Emotion::Neutral, 0.9)
}

/// Full analysis for a frame; `None` when no confident face is present
pub fn analyze_face(landmarks: Option<&[Landmark]>) -> Option<EmotionAnalysis> {
    landmarks
        .and_then(analyze_face_features)
        .map(|features| classify(&features))
}

/// Emotion for a frame. Missing or sparse faces read as neutral.
pub fn map_face_to_emotion(landmarks: Option<&[Landmark]>) -> Emotion {
    analyze_face(landmarks)
        .map(|analysis| analysis.emotion)
        .unwrap_or(Emotion::Neutral)
}
