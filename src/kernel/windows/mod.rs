//! Windows backends: job objects promoted to silos, and the bindflt redirection service.

mod bindflt;
mod job;
mod loader;
mod process;

pub use bindflt::BindFltService;

use crate::config::types::Result;
use crate::kernel::wide;
use crate::scope::{CommandSpec, ContainerBackend, ProcessToken, ScopeOptions, ScopeToken};
use std::path::PathBuf;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::SystemInformation::GetSystemDirectoryW;

/// Scope backend over job objects and application silos
#[derive(Debug, Default)]
pub struct JobContainer;

impl JobContainer {
    pub fn new() -> Self {
        Self
    }
}

fn system_directory() -> Option<PathBuf> {
    let mut buffer = vec![0u16; 260];
    // SAFETY: the length passed matches the buffer.
    let len = unsafe { GetSystemDirectoryW(buffer.as_mut_ptr(), buffer.len() as u32) } as usize;
    if len == 0 || len >= buffer.len() {
        return None;
    }
    Some(wide::decode(&buffer[..len]))
}

impl ContainerBackend for JobContainer {
    fn backend_name(&self) -> &str {
        "job-silo"
    }

    fn create_scope(&self) -> Result<ScopeToken> {
        Ok(ScopeToken::new(job::create_job()? as usize))
    }

    fn configure_scope(&self, scope: ScopeToken, options: &ScopeOptions) -> Result<()> {
        job::configure_job(scope.raw() as HANDLE, options)
    }

    fn release_scope(&self, scope: ScopeToken) -> Result<()> {
        job::close_job(scope.raw() as HANDLE)
    }

    fn spawn_suspended(&self, scope: ScopeToken, command: &CommandSpec) -> Result<ProcessToken> {
        process::spawn_in_job(scope.raw() as HANDLE, command)
    }

    fn image_cache_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = system_directory().into_iter().collect();
        if roots.is_empty() {
            roots.push(PathBuf::from("C:\\Windows\\System32"));
        }
        roots
    }

    fn disable_image_cache_fast_path(&self, process: ProcessToken) -> Result<()> {
        // SAFETY: the handle comes from CreateProcessW (full access) and the LaunchedProcess
        // wrapper only allows this call while the primary thread is still suspended.
        unsafe { loader::disable_image_cache_fast_path(process.process as HANDLE, process.pid) }
    }

    fn resume(&self, process: ProcessToken) -> Result<()> {
        process::resume(process)
    }

    fn wait(&self, process: ProcessToken) -> Result<u32> {
        process::wait(process)
    }

    fn close_process(&self, process: ProcessToken) {
        process::close(process)
    }
}
