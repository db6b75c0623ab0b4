/// Isolation scope controller
///
/// Creates, configures and releases scopes. A scope bounds process lifetime and, when
/// configured with a private table, owns every mapping installed against it: releasing the
/// scope is the single teardown path for both.
use crate::config::types::{BindError, Result};
use crate::scope::backend::{ContainerBackend, ScopeOptions, ScopeToken};
use crate::scope::process::{CommandSpec, LaunchedProcess};
use std::sync::Arc;
use uuid::Uuid;

/// Owned isolation scope. Released on drop if not released explicitly.
pub struct Scope {
    id: Uuid,
    token: ScopeToken,
    backend: Arc<dyn ContainerBackend>,
    options: Option<ScopeOptions>,
    members: usize,
    released: bool,
}

impl Scope {
    /// Correlation id for logs and audit events
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Backend reference used by the mapping service to select this scope's table
    pub fn token(&self) -> ScopeToken {
        self.token
    }

    pub fn options(&self) -> Option<ScopeOptions> {
        self.options
    }

    pub fn terminates_children_on_close(&self) -> bool {
        self.options.map_or(false, |o| o.terminate_children_on_close)
    }

    pub fn uses_private_mapping_table(&self) -> bool {
        self.options.map_or(false, |o| o.private_mapping_table)
    }

    /// Number of processes created inside this scope so far
    pub fn member_count(&self) -> usize {
        self.members
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the scope primitive. Idempotent.
    ///
    /// With terminate-on-close configured, every process still inside is killed. That is a
    /// forced shutdown: the processes do not observe a normal exit.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        // Marked first so a failing release is not retried from Drop
        self.released = true;
        if self.terminates_children_on_close() && self.members > 0 {
            log::warn!(
                "Releasing scope {} with terminate-on-close; {} member process(es) \
                 are force-terminated if still running",
                self.id,
                self.members
            );
        }
        self.backend.release_scope(self.token)?;
        log::info!("Released scope {}", self.id);
        Ok(())
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("Failed to release scope {}: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("backend", &self.backend.backend_name())
            .field("options", &self.options)
            .field("members", &self.members)
            .field("released", &self.released)
            .finish()
    }
}

/// Creates and configures scopes on one container backend
#[derive(Clone)]
pub struct ScopeController {
    backend: Arc<dyn ContainerBackend>,
}

impl ScopeController {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    /// Allocate a new, unconfigured scope. No mapping table is attached yet.
    pub fn create_scope(&self) -> Result<Scope> {
        let token = self.backend.create_scope().map_err(|e| match e {
            BindError::AccessDenied(_) | BindError::ResourceExhausted(_) => e,
            other => BindError::ResourceCreation(other.to_string()),
        })?;
        let scope = Scope {
            id: Uuid::new_v4(),
            token,
            backend: self.backend.clone(),
            options: None,
            members: 0,
            released: false,
        };
        log::info!(
            "Created scope {} on {} backend",
            scope.id,
            self.backend.backend_name()
        );
        Ok(scope)
    }

    /// Fix the scope's behaviour. Rejected once a process has joined or the scope is released.
    pub fn configure(&self, scope: &mut Scope, options: ScopeOptions) -> Result<()> {
        if scope.released {
            return Err(BindError::InvalidParameter(format!(
                "scope {} is already released",
                scope.id
            )));
        }
        if scope.members > 0 {
            return Err(BindError::InvalidParameter(format!(
                "scope {} already hosts {} process(es); configuration is fixed",
                scope.id, scope.members
            )));
        }
        if scope.options.is_some() {
            return Err(BindError::InvalidParameter(format!(
                "scope {} is already configured",
                scope.id
            )));
        }

        self.backend.configure_scope(scope.token, &options)?;
        scope.options = Some(options);
        log::info!(
            "Configured scope {}: terminate_children_on_close={}, private_mapping_table={}",
            scope.id,
            options.terminate_children_on_close,
            options.private_mapping_table
        );
        Ok(())
    }

    /// Create a process inside `scope` with its primary thread suspended.
    /// The scope binding is part of process creation and cannot be added later.
    pub fn spawn_suspended(
        &self,
        scope: &mut Scope,
        command: &CommandSpec,
    ) -> Result<LaunchedProcess> {
        if scope.released {
            return Err(BindError::InvalidParameter(format!(
                "scope {} is already released",
                scope.id
            )));
        }
        if scope.options.is_none() {
            return Err(BindError::InvalidParameter(format!(
                "scope {} must be configured before a process joins",
                scope.id
            )));
        }

        let token = self.backend.spawn_suspended(scope.token, command)?;
        scope.members += 1;
        log::info!(
            "Created pid {} suspended in scope {}: {}",
            token.pid,
            scope.id,
            command.program.display()
        );
        Ok(LaunchedProcess::new(token, self.backend.clone()))
    }

    /// Joining an existing process to a scope is not a supported transition; the binding is
    /// only established at creation. Fails fast instead of leaving the process unmapped.
    pub fn assign_existing(&self, scope: &Scope, pid: u32) -> Result<()> {
        Err(BindError::Unsupported(format!(
            "pid {} cannot join scope {} after creation",
            pid, scope.id
        )))
    }

    /// Release a scope. Idempotent.
    pub fn release(&self, scope: &mut Scope) -> Result<()> {
        scope.release()
    }
}
