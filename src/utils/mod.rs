pub mod perf;

pub use perf::{FpsCounter, Stopwatch, TimingTracker};
