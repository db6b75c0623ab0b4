//! Isolation scopes
//!
//! A scope is an OS process container that bounds process lifetime and can host a private
//! mapping table. Processes join only at creation.

pub mod backend;
pub mod controller;
pub mod process;

pub use backend::{ContainerBackend, ProcessToken, ScopeOptions, ScopeToken};
pub use controller::{Scope, ScopeController};
pub use process::{CommandSpec, LaunchedProcess, StartState};
