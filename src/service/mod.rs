//! Mapping service client
//!
//! Attach, install, remove and query operations against the redirection service.

pub mod backend;
pub mod client;
pub mod status;

pub use backend::{BindBackend, InstallRequest, MappingSelector, QuerySelector};
pub use client::{AttachResult, MappingClient, QueryOutcome};
