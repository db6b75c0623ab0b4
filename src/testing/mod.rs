//! Testing infrastructure
//!
//! A simulated Windows host for exercising scopes, mappings and launches without the OS.

pub mod simulated;

// Re-export commonly used items
pub use simulated::*;
