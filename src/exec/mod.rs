//! Execution control
//!
//! Scoped launches with type-state enforced ordering.

pub mod executor;
pub mod launcher;

pub use executor::ScopedLauncher;
pub use launcher::{ImageCachePolicy, Launch, LaunchOutcome, MappingSetup, ProcessObserver};
