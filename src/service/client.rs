/// Mapping service client
///
/// Validates requests before they reach the redirection service, selects the table each call
/// targets, and shapes the service's packed listing into a typed snapshot. Service policy
/// (replace vs. accumulate, alias resolution, ordering) is surfaced as-is, never overridden.
use crate::config::types::{BindError, Result};
use crate::mapping::listing::{self, HEADER_SIZE};
use crate::mapping::{path, BatchConfig, BatchHandle, MappingFlags, MappingQueryResult};
use crate::scope::Scope;
use crate::service::backend::{BindBackend, InstallRequest, MappingSelector, QuerySelector};
use crate::service::status;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Retries of the size probe before giving up on a table that keeps growing
const QUERY_ATTEMPTS: usize = 8;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachResult {
    /// The filter was already attached before this call
    pub already_attached: bool,
}

/// Outcome of a single query attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    Ready(MappingQueryResult),
    /// The snapshot needs at least this many bytes
    NeedsCapacity(u32),
}

#[derive(Clone)]
pub struct MappingClient {
    backend: Arc<dyn BindBackend>,
}

impl MappingClient {
    pub fn new(backend: Arc<dyn BindBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Attach the redirection service to the volume containing `path`. Idempotent.
    pub fn attach(&self, path: &Path) -> Result<AttachResult> {
        path::segments(path)?;
        let already_attached = self.backend.attach(path)?;
        if already_attached {
            log::debug!("Filter already attached at {}", path.display());
        } else {
            log::info!("Attached filter at {}", path.display());
        }
        Ok(AttachResult { already_attached })
    }

    fn resolve_flags(selector: &MappingSelector<'_>, flags: MappingFlags) -> Result<MappingFlags> {
        match selector {
            MappingSelector::Scope(scope) => {
                if scope.is_released() {
                    return Err(BindError::InvalidParameter(format!(
                        "scope {} is released",
                        scope.id()
                    )));
                }
                if !scope.uses_private_mapping_table() {
                    return Err(BindError::InvalidParameter(format!(
                        "scope {} has no private mapping table",
                        scope.id()
                    )));
                }
                Ok(flags | MappingFlags::USE_SCOPE_LOCAL_TABLE)
            }
            MappingSelector::Global | MappingSelector::Principal(_) => {
                if flags.contains(MappingFlags::USE_SCOPE_LOCAL_TABLE) {
                    return Err(BindError::InvalidParameter(format!(
                        "scope-local flag requires a scope selector, got {}",
                        selector.describe()
                    )));
                }
                Ok(flags)
            }
        }
    }

    /// Install one virtual root → physical target binding.
    ///
    /// `exceptions` are sub-paths of `virtual_root` excluded from redirection; each must be a
    /// strict descendant of the root.
    pub fn install(
        &self,
        selector: MappingSelector<'_>,
        virtual_root: &Path,
        target: &Path,
        flags: MappingFlags,
        exceptions: &[PathBuf],
    ) -> Result<()> {
        path::segments(virtual_root)?;
        path::segments(target)?;
        let flags = Self::resolve_flags(&selector, flags)?;

        if flags.contains(MappingFlags::SKIP_SHARING_CHECK)
            && !flags.contains(MappingFlags::READ_ONLY)
        {
            return Err(BindError::InvalidParameter(
                "skip_sharing_check is only valid on read-only mappings".to_string(),
            ));
        }

        for exception in exceptions {
            if !path::is_strict_descendant(exception, virtual_root, flags.case_insensitive())? {
                return Err(BindError::InvalidParameter(format!(
                    "exception {} is not below {}",
                    exception.display(),
                    virtual_root.display()
                )));
            }
        }

        let request = InstallRequest {
            virtual_root,
            target,
            flags,
            exceptions,
        };
        self.backend.setup(&selector, &request)?;
        log::info!(
            "Mapped {} -> {} in {} table (flags {:?})",
            virtual_root.display(),
            target.display(),
            selector.describe(),
            flags.names()
        );
        Ok(())
    }

    /// Remove a virtual root. An absent mapping is reported as `NotFound`.
    pub fn remove(&self, selector: MappingSelector<'_>, virtual_root: &Path) -> Result<()> {
        path::segments(virtual_root)?;
        if let MappingSelector::Scope(scope) = selector {
            if scope.is_released() {
                return Err(BindError::NotFound(format!("scope {}", scope.id())));
            }
        }
        self.backend.remove(&selector, virtual_root)?;
        log::info!(
            "Removed mapping {} from {} table",
            virtual_root.display(),
            selector.describe()
        );
        Ok(())
    }

    /// Query one table with a buffer of `capacity` bytes.
    ///
    /// A zero capacity is a valid size probe; it yields `NeedsCapacity` with the exact size
    /// the snapshot needs at that moment.
    pub fn query(&self, selector: QuerySelector<'_>, capacity: usize) -> Result<QueryOutcome> {
        let subject = match selector {
            QuerySelector::Volume(p) => {
                path::segments(p)?;
                p.to_path_buf()
            }
            QuerySelector::Scope(scope) => {
                if scope.is_released() {
                    return Err(BindError::NotFound(format!("scope {}", scope.id())));
                }
                PathBuf::from(format!("scope {}", scope.id()))
            }
            QuerySelector::Principal(p) => PathBuf::from(p.to_string()),
        };

        let mut buffer = vec![0u8; capacity];
        let written = match self.backend.get_mappings(&selector, &mut buffer) {
            Ok(n) => n,
            Err(BindError::BufferTooSmall { required }) => {
                log::debug!(
                    "Query of {} needs {} bytes (offered {})",
                    selector.describe(),
                    required,
                    capacity
                );
                return Ok(QueryOutcome::NeedsCapacity(required));
            }
            Err(e) => return Err(e),
        };

        let raw = listing::decode(&buffer[..written.min(buffer.len())])?;
        if raw.status != 0 {
            return match status::from_ntstatus("BfGetMappings", raw.status, &subject, raw.size) {
                BindError::BufferTooSmall { required } => Ok(QueryOutcome::NeedsCapacity(required)),
                e => Err(e),
            };
        }

        log::debug!(
            "Query of {} returned {} mapping(s)",
            selector.describe(),
            raw.result.len()
        );
        Ok(QueryOutcome::Ready(raw.result))
    }

    /// Probe the required size, then fetch the snapshot, retrying if the table grew between
    /// the two calls
    pub fn query_all(&self, selector: QuerySelector<'_>) -> Result<MappingQueryResult> {
        let mut capacity = 0usize;
        for _ in 0..QUERY_ATTEMPTS {
            match self.query(selector, capacity)? {
                QueryOutcome::Ready(result) => return Ok(result),
                QueryOutcome::NeedsCapacity(required) => {
                    capacity = (required as usize).max(capacity + HEADER_SIZE);
                }
            }
        }
        Err(BindError::BufferTooSmall {
            required: capacity as u32,
        })
    }

    /// Full snapshot of a scope's private table
    pub fn snapshot_scope(&self, scope: &Scope) -> Result<MappingQueryResult> {
        self.query_all(QuerySelector::Scope(scope))
    }

    /// Compile a raw batch configuration into the service's opaque form
    pub fn generate_batch(&self, config: &BatchConfig) -> Result<BatchHandle> {
        let blob = self.backend.generate_batch(config)?;
        if blob.is_empty() {
            return Err(BindError::InvalidConfig(
                "service produced an empty batch".to_string(),
            ));
        }
        log::debug!("Generated batch of {} bytes", blob.len());
        Ok(BatchHandle::from_blob(blob))
    }

    /// Install a compiled batch. Either every entry becomes visible or none does.
    pub fn install_batch(
        &self,
        selector: MappingSelector<'_>,
        batch: &BatchHandle,
        flags: MappingFlags,
        attach_paths: &[PathBuf],
    ) -> Result<()> {
        let flags = Self::resolve_flags(&selector, flags)?;
        for p in attach_paths {
            path::segments(p)?;
        }
        self.backend
            .setup_batched(&selector, batch.as_bytes(), flags, attach_paths)?;
        log::info!(
            "Installed batch of {} bytes into {} table",
            batch.len(),
            selector.describe()
        );
        Ok(())
    }
}

impl std::fmt::Debug for MappingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingClient")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}
