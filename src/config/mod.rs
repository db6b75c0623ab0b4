//! Configuration and errors
//!
//! Error taxonomy, launch manifests and mapping specifications.

pub mod manifest;
pub mod types;

pub use manifest::{LaunchManifest, MappingPlan, MappingSpec};
