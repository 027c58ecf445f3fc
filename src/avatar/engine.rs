//! Validation layer between behavior producers and the store
//!
//! Voice commands, vision events, dialogue replies and manual controls all go
//! through `AvatarEngine`. Incoming names are checked against the fixed enums;
//! anything unknown is logged and replaced with the neutral/idle default so the
//! store never holds an invalid value.

use crate::store::{Behavior, BehaviorStore, Emotion, Expression};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long an animation plays before reverting to idle.
///
/// `None` means the animation is held until something else replaces it
/// (`speak` is ended by the synthesis session, `idle` never ends).
pub fn animation_duration(name: &str) -> Option<Duration> {
    let ms = match name {
        "wave" | "waveHand" => 3000,
        "greet" => 3000,
        "nod" | "shakeHead" => 1500,
        "raiseHand" => 2000,
        "think" => 4000,
        "dance" => 6000,
        _ => return None,
    };
    Some(Duration::from_millis(ms))
}

/// Behavior committed alongside an animation
pub fn behavior_for_animation(name: &str) -> Behavior {
    match name {
        "wave" | "greet" | "waveHand" => Behavior::Greeting,
        "nod" | "raiseHand" => Behavior::Listening,
        "think" | "shakeHead" => Behavior::Thinking,
        "dance" => Behavior::Excited,
        "speak" => Behavior::Speaking,
        _ => Behavior::Idle,
    }
}

pub struct AvatarEngine {
    store: BehaviorStore,
    /// Pending auto-reset, replaced by every `play_animation`
    reset_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every animation command; a reset only fires for its own generation
    generation: Arc<AtomicU64>,
}

impl AvatarEngine {
    pub fn new(store: BehaviorStore) -> Self {
        Self {
            store,
            reset_task: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &BehaviorStore {
        &self.store
    }

    pub fn play(&self) {
        self.store.play();
    }

    pub fn pause(&self) {
        self.store.pause();
    }

    /// Reset the store and drop any pending animation reset
    pub fn reset(&self) {
        self.cancel_pending_reset();
        self.store.reset();
    }

    /// Apply an emotion by name. Unknown names reset emotion and expression
    /// to neutral.
    pub fn set_emotion(&self, name: &str) -> Emotion {
        match name.parse::<Emotion>() {
            Ok(emotion) => {
                self.apply_emotion(emotion);
                emotion
            }
            Err(e) => {
                warn!("{}, falling back to neutral", e);
                self.store.set_emotion(Emotion::Neutral);
                self.store.set_expression(Expression::Neutral);
                Emotion::Neutral
            }
        }
    }

    /// Commit an emotion and its matching expression
    pub fn apply_emotion(&self, emotion: Emotion) {
        self.store.set_emotion(emotion);
        if let Some(expression) = emotion.matching_expression() {
            self.store.set_expression(expression);
        }
        debug!("Emotion set to {}", emotion);
    }

    pub fn set_expression(&self, name: &str) -> Expression {
        let expression = name.parse::<Expression>().unwrap_or_else(|e| {
            warn!("{}, falling back to neutral", e);
            Expression::Neutral
        });
        self.store.set_expression(expression);
        expression
    }

    pub fn set_expression_intensity(&self, intensity: f32) {
        self.store.set_expression_intensity(intensity);
    }

    pub fn set_behavior(&self, name: &str) -> Behavior {
        let behavior = name.parse::<Behavior>().unwrap_or_else(|e| {
            warn!("{}, falling back to idle", e);
            Behavior::Idle
        });
        self.store.set_behavior(behavior);
        behavior
    }

    /// Play an animation, replacing whatever is playing.
    ///
    /// Any previously scheduled reset is cancelled. With `auto_reset`, a timed
    /// animation reverts animation and behavior to idle once its duration has
    /// elapsed, unless another animation command arrives first.
    pub fn play_animation(&self, name: &str, auto_reset: bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_task();

        let behavior = behavior_for_animation(name);
        self.store.set_animation(name);
        self.store.set_behavior(behavior);
        debug!("Playing animation {} (behavior {})", name, behavior);

        if !auto_reset {
            return;
        }
        let Some(duration) = animation_duration(name) else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime, animation {} will not auto-reset", name);
            return;
        };

        let store = self.store.clone();
        let current = Arc::clone(&self.generation);
        let task = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if current.load(Ordering::SeqCst) == generation {
                debug!("Animation finished, returning to idle");
                store.set_animation("idle");
                store.set_behavior(Behavior::Idle);
            }
        });
        *self.reset_task.lock() = Some(task);
    }

    /// Drop the pending auto-reset without changing the current animation
    pub fn cancel_pending_reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel_task();
    }

    pub fn has_pending_reset(&self) -> bool {
        self.reset_task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn cancel_task(&self) {
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for AvatarEngine {
    fn drop(&mut self) {
        self.cancel_task();
    }
}
