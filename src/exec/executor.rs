use crate::config::manifest::LaunchManifest;
use crate::config::types::Result;
use crate::exec::launcher::{
    ImageCachePolicy, Launch, LaunchOutcome, MappingSetup, ProcessObserver,
};
use crate::observability::audit::AuditTrail;
/// Scoped process launcher
use crate::scope::{CommandSpec, ContainerBackend, LaunchedProcess, Scope, ScopeController};
use crate::service::{BindBackend, MappingClient};
use std::sync::Arc;

/// Runs programs inside fresh scopes with caller-supplied mappings
#[derive(Clone)]
pub struct ScopedLauncher {
    controller: ScopeController,
    client: MappingClient,
    audit: Arc<AuditTrail>,
    image_cache: ImageCachePolicy,
    allow_degraded: bool,
}

fn ignore_created(_: &LaunchedProcess, _: &Scope) -> Result<()> {
    Ok(())
}

impl ScopedLauncher {
    pub fn new(container: Arc<dyn ContainerBackend>, service: Arc<dyn BindBackend>) -> Self {
        Self {
            controller: ScopeController::new(container),
            client: MappingClient::new(service),
            audit: Arc::new(AuditTrail::new()),
            image_cache: ImageCachePolicy::Auto,
            allow_degraded: false,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_image_cache_policy(mut self, policy: ImageCachePolicy) -> Self {
        self.image_cache = policy;
        self
    }

    /// Continue without the loader correction when it cannot be applied
    pub fn allow_degraded_loader(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    pub fn client(&self) -> &MappingClient {
        &self.client
    }

    pub fn controller(&self) -> &ScopeController {
        &self.controller
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Launch `command` in a new scope and block until it exits.
    ///
    /// The scope is released on every path. On failure nothing is left running and nothing
    /// installed by `setup` remains mapped.
    pub fn launch(
        &self,
        command: &CommandSpec,
        setup: &mut dyn MappingSetup,
    ) -> Result<LaunchOutcome> {
        self.launch_observed(command, setup, &mut ignore_created)
    }

    pub fn launch_observed(
        &self,
        command: &CommandSpec,
        setup: &mut dyn MappingSetup,
        observer: &mut dyn ProcessObserver,
    ) -> Result<LaunchOutcome> {
        let launch = Launch::new(self.controller.clone(), self.client.clone(), self.audit.clone())?;
        let outcome = launch
            .spawn_suspended(command)?
            .observe(observer)?
            .apply_mappings(setup)?
            .prepare_loader(self.image_cache, self.allow_degraded)?
            .resume_and_wait()?;

        log::info!(
            "Launch {} finished: pid {} exit code {} (loader corrected: {}, degraded: {})",
            outcome.run_id,
            outcome.pid,
            outcome.exit_code,
            outcome.loader_bypass_disabled,
            outcome.degraded
        );
        Ok(outcome)
    }

    /// Launch per manifest. Manifest loader settings override the launcher's.
    ///
    /// When the manifest names an audit log other than the launcher's own, this launch's
    /// events go to a trail appending to that file.
    pub fn launch_manifest(&self, manifest: &LaunchManifest) -> Result<LaunchOutcome> {
        manifest.validate()?;
        let mut launcher = self
            .clone()
            .with_image_cache_policy(manifest.image_cache)
            .allow_degraded_loader(manifest.allow_degraded_loader);
        if let Some(path) = &manifest.audit_log {
            if self.audit.path() != Some(path.as_path()) {
                launcher = launcher.with_audit(Arc::new(AuditTrail::with_file(path)?));
            }
        }
        for volume in &manifest.attach {
            self.client.attach(volume)?;
        }
        launcher.launch(&manifest.command, &mut manifest.plan())
    }
}

impl std::fmt::Debug for ScopedLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedLauncher")
            .field("container", &self.controller.backend().backend_name())
            .field("service", &self.client.backend_name())
            .field("image_cache", &self.image_cache)
            .field("allow_degraded", &self.allow_degraded)
            .finish()
    }
}
