//! Thin wrappers around Windows primitives.
//!
//! All `unsafe` code is concentrated in `windows` with explicit SAFETY comments; everything
//! above it talks to the [`ContainerBackend`] and [`BindBackend`] traits.

#[cfg(windows)]
pub mod windows;
pub mod wide;

use crate::config::types::Result;
use crate::scope::ContainerBackend;
use crate::service::BindBackend;
use std::sync::Arc;

/// Backends for the host this process runs on
#[derive(Clone)]
pub struct Platform {
    pub container: Arc<dyn ContainerBackend>,
    pub service: Arc<dyn BindBackend>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("container", &self.container.backend_name())
            .field("service", &self.service.backend_name())
            .finish()
    }
}

/// Select the native backends
#[cfg(windows)]
pub fn create_platform() -> Result<Platform> {
    let service = windows::BindFltService::load()?;
    log::info!("Platform selection: job-silo container, bindflt service");
    Ok(Platform {
        container: Arc::new(windows::JobContainer::new()),
        service: Arc::new(service),
    })
}

#[cfg(not(windows))]
pub fn create_platform() -> Result<Platform> {
    Err(crate::config::types::BindError::Unsupported(
        "scoped filesystem redirection requires Windows".to_string(),
    ))
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;
    use crate::config::types::BindError;

    #[test]
    fn test_platform_unsupported_off_windows() {
        assert!(matches!(create_platform(), Err(BindError::Unsupported(_))));
    }
}
