//! The signal pipeline — message classification and noise filtering.

pub mod cache;
pub mod classifier;
pub mod fallback;
pub mod noise;

pub use classifier::SignalClassifier;
pub use noise::{NoiseFilter, NoiseReason, NoiseVerdict};
