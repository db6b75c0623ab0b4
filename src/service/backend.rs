//! Redirection service backend abstraction.
//!
//! The service is an external black box; a backend is the thinnest possible call surface
//! over it. Validation, logging and result shaping live in
//! [`MappingClient`](super::MappingClient).

use crate::config::types::Result;
use crate::mapping::{BatchConfig, MappingFlags, Principal, QueryFlags};
use crate::scope::Scope;
use std::path::{Path, PathBuf};

/// Table selector for install/remove; exactly one table per call
#[derive(Clone, Copy, Debug)]
pub enum MappingSelector<'a> {
    /// Machine/volume-wide table
    Global,
    /// Private table of one scope
    Scope(&'a Scope),
    /// Table keyed by a security principal
    Principal(&'a Principal),
}

impl MappingSelector<'_> {
    pub fn describe(&self) -> String {
        match self {
            MappingSelector::Global => "global".to_string(),
            MappingSelector::Scope(scope) => format!("scope {}", scope.id()),
            MappingSelector::Principal(p) => format!("principal {}", p),
        }
    }
}

/// Table selector for queries
#[derive(Clone, Copy, Debug)]
pub enum QuerySelector<'a> {
    /// Global mappings on the volume containing this path
    Volume(&'a Path),
    Scope(&'a Scope),
    Principal(&'a Principal),
}

impl QuerySelector<'_> {
    pub fn flags(&self) -> QueryFlags {
        match self {
            QuerySelector::Volume(_) => QueryFlags::VOLUME,
            QuerySelector::Scope(_) => QueryFlags::SCOPE,
            QuerySelector::Principal(_) => QueryFlags::PRINCIPAL,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            QuerySelector::Volume(p) => format!("volume {}", p.display()),
            QuerySelector::Scope(scope) => format!("scope {}", scope.id()),
            QuerySelector::Principal(p) => format!("principal {}", p),
        }
    }
}

/// One validated install request
#[derive(Clone, Copy, Debug)]
pub struct InstallRequest<'a> {
    pub virtual_root: &'a Path,
    pub target: &'a Path,
    pub flags: MappingFlags,
    pub exceptions: &'a [PathBuf],
}

pub trait BindBackend: Send + Sync {
    fn backend_name(&self) -> &str;
    /// Attach the filter to the volume containing `path`; returns whether it already was
    fn attach(&self, path: &Path) -> Result<bool>;
    fn setup(&self, selector: &MappingSelector<'_>, request: &InstallRequest<'_>) -> Result<()>;
    fn remove(&self, selector: &MappingSelector<'_>, virtual_root: &Path) -> Result<()>;
    /// Fill `buffer` with a packed listing and return the bytes written, or fail with
    /// `BufferTooSmall { required }` when it does not fit
    fn get_mappings(&self, selector: &QuerySelector<'_>, buffer: &mut [u8]) -> Result<usize>;
    fn generate_batch(&self, config: &BatchConfig) -> Result<Vec<u8>>;
    fn setup_batched(
        &self,
        selector: &MappingSelector<'_>,
        batch: &[u8],
        flags: MappingFlags,
        attach_paths: &[PathBuf],
    ) -> Result<()>;
}
