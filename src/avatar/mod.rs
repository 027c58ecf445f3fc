//! Avatar behavior engine
//!
//! Normalizes behavior requests before they reach the store and owns the
//! animation auto-reset task.

pub mod engine;

pub use engine::{animation_duration, behavior_for_animation, AvatarEngine};
