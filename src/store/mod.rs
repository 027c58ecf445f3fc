pub mod behavior;
pub mod session;
pub mod types;

pub use behavior::{BehaviorState, BehaviorStore, RenderState};
pub use session::{FileSessionStorage, MemorySessionStorage, SessionStorage};
pub use types::{Behavior, ChatMessage, ConnectionStatus, Emotion, Expression, Role, UnknownVariant};
