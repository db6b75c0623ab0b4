//! Container backend abstraction.
//!
//! A backend owns the OS-level scope primitive (a job object promoted to a silo on Windows)
//! and the processes created inside it. Tokens are opaque to everything outside the backend
//! and are only ever handled through the owning [`Scope`](super::Scope) and
//! [`LaunchedProcess`](super::LaunchedProcess) wrappers.

use crate::config::types::Result;
use crate::scope::process::CommandSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque backend reference to a scope primitive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeToken(usize);

impl ScopeToken {
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Opaque backend reference to a created process and its primary thread
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessToken {
    pub pid: u32,
    pub process: usize,
    pub thread: usize,
}

/// Scope configuration, fixed before any process joins
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Releasing the scope forcibly terminates every process still inside it
    pub terminate_children_on_close: bool,
    /// The scope hosts its own mapping table instead of using the global one
    pub private_mapping_table: bool,
}

impl ScopeOptions {
    /// Configuration used for scoped launches: private table, kill on close
    pub fn launch() -> Self {
        Self {
            terminate_children_on_close: true,
            private_mapping_table: true,
        }
    }
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self::launch()
    }
}

pub trait ContainerBackend: Send + Sync {
    fn backend_name(&self) -> &str;
    fn create_scope(&self) -> Result<ScopeToken>;
    fn configure_scope(&self, scope: ScopeToken, options: &ScopeOptions) -> Result<()>;
    /// Close the scope primitive. With terminate-on-close configured this kills any process
    /// still inside; that is a forced shutdown, not a normal exit.
    fn release_scope(&self, scope: ScopeToken) -> Result<()>;
    /// Create a process bound to `scope` at creation time, primary thread suspended
    fn spawn_suspended(&self, scope: ScopeToken, command: &CommandSpec) -> Result<ProcessToken>;
    /// Directories whose libraries the loader may serve from its image cache
    fn image_cache_roots(&self) -> Vec<PathBuf>;
    fn disable_image_cache_fast_path(&self, process: ProcessToken) -> Result<()>;
    fn resume(&self, process: ProcessToken) -> Result<()>;
    /// Block until the process exits and return its exit code
    fn wait(&self, process: ProcessToken) -> Result<u32>;
    fn close_process(&self, process: ProcessToken);
}
