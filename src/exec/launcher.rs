use crate::config::types::{BindError, Result};
use crate::mapping::{path, MappingQueryResult};
use crate::observability::audit::{AuditTrail, CorrelationIds, LaunchEvent, LaunchEventType};
/// Scoped launch ordering enforcement
///
/// The launch sequence is fixed:
/// 1. create the scope and configure it (private table, terminate-on-close)
/// 2. create the process suspended, bound to the scope at creation
/// 3. run the caller's mapping setup against the scope
/// 4. disable the image-cache fast path if a mapping reaches an image-cache root
/// 5. resume, wait for exit
/// 6. release the scope
///
/// Each step consumes the previous state. Dropping a `Launch` at any point releases its
/// scope, which force-terminates the suspended process.
use crate::scope::{CommandSpec, LaunchedProcess, Scope, ScopeController, ScopeOptions};
use crate::service::MappingClient;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Injected strategies
// ============================================================================

/// Installs the launch's mappings into its scope while the process is suspended
pub trait MappingSetup {
    fn configure(&mut self, scope: &Scope, client: &MappingClient) -> Result<()>;
}

impl<F> MappingSetup for F
where
    F: FnMut(&Scope, &MappingClient) -> Result<()>,
{
    fn configure(&mut self, scope: &Scope, client: &MappingClient) -> Result<()> {
        self(scope, client)
    }
}

/// Called once the process exists, before any mapping is installed
pub trait ProcessObserver {
    fn on_created(&mut self, process: &LaunchedProcess, scope: &Scope) -> Result<()>;
}

impl<F> ProcessObserver for F
where
    F: FnMut(&LaunchedProcess, &Scope) -> Result<()>,
{
    fn on_created(&mut self, process: &LaunchedProcess, scope: &Scope) -> Result<()> {
        self(process, scope)
    }
}

/// When to disable the loader's image-cache fast path
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageCachePolicy {
    /// Only when a scope mapping reaches an image-cache root
    #[default]
    Auto,
    Always,
    /// Never; cached libraries bypass the mappings
    Skip,
}

/// Result of a completed launch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub run_id: Uuid,
    pub scope_id: Uuid,
    pub pid: u32,
    pub exit_code: u32,
    /// The image-cache fast path was disabled before resume
    pub loader_bypass_disabled: bool,
    /// The loader correction failed and the caller accepted running without it
    pub degraded: bool,
    /// Scope table as it stood when the process was resumed
    pub mappings: MappingQueryResult,
}

/// Virtual roots that overlap any of `roots` in either direction
pub fn image_cache_overlaps(mappings: &MappingQueryResult, roots: &[PathBuf]) -> Vec<PathBuf> {
    mappings
        .entries
        .iter()
        .filter(|entry| {
            roots.iter().any(|root| {
                matches!(path::remainder(&entry.virtual_root, root, true), Ok(Some(_)))
                    || matches!(path::remainder(root, &entry.virtual_root, true), Ok(Some(_)))
            })
        })
        .map(|entry| entry.virtual_root.clone())
        .collect()
}

// ============================================================================
// Type-State Launch Chain
// ============================================================================

/// Type-state marker: scope created and configured, no process yet
pub struct ScopeReady;

/// Type-state marker: process created suspended inside the scope
pub struct Suspended;

/// Type-state marker: caller's mappings installed and snapshotted
pub struct MappingsApplied;

/// Type-state marker: loader corrected (or deliberately not), ready to resume
pub struct LoaderPrepared;

/// A launch in progress. The type parameter tracks which step has completed.
///
/// The steps chain in one order:
///
/// ```no_run
/// use bindbox::exec::launcher::{ImageCachePolicy, Launch, ScopeReady};
/// use bindbox::scope::{CommandSpec, Scope};
/// use bindbox::service::MappingClient;
/// fn in_order(launch: Launch<ScopeReady>) -> bindbox::Result<u32> {
///     let mut setup = |_: &Scope, _: &MappingClient| -> bindbox::Result<()> { Ok(()) };
///     let outcome = launch
///         .spawn_suspended(&CommandSpec::new("C:\\tools\\app.exe"))?
///         .apply_mappings(&mut setup)?
///         .prepare_loader(ImageCachePolicy::Auto, false)?
///         .resume_and_wait()?;
///     Ok(outcome.exit_code)
/// }
/// ```
///
/// Steps cannot be skipped or reordered:
///
/// ```compile_fail,E0599
/// use bindbox::exec::launcher::{Launch, ScopeReady};
/// fn early_resume(launch: Launch<ScopeReady>) {
///     let _ = launch.resume_and_wait();
/// }
/// ```
///
/// ```compile_fail,E0599
/// use bindbox::exec::launcher::{ImageCachePolicy, Launch, Suspended};
/// fn loader_before_mappings(launch: Launch<Suspended>) {
///     let _ = launch.prepare_loader(ImageCachePolicy::Auto, false);
/// }
/// ```
///
/// ```compile_fail,E0599
/// use bindbox::exec::launcher::{Launch, MappingsApplied};
/// fn skip_loader(launch: Launch<MappingsApplied>) {
///     let _ = launch.resume_and_wait();
/// }
/// ```
///
/// ```compile_fail,E0599
/// use bindbox::exec::launcher::{Launch, LoaderPrepared};
/// use bindbox::scope::Scope;
/// use bindbox::service::MappingClient;
/// fn mappings_after_loader(launch: Launch<LoaderPrepared>) {
///     let mut setup = |_: &Scope, _: &MappingClient| -> bindbox::Result<()> { Ok(()) };
///     let _ = launch.apply_mappings(&mut setup);
/// }
/// ```
///
/// A consumed step cannot be used again:
///
/// ```compile_fail,E0382
/// use bindbox::exec::launcher::{Launch, ScopeReady};
/// use bindbox::scope::CommandSpec;
/// fn reuse(launch: Launch<ScopeReady>) {
///     let command = CommandSpec::new("C:\\tools\\app.exe");
///     let _first = launch.spawn_suspended(&command);
///     let _second = launch.spawn_suspended(&command);
/// }
/// ```
pub struct Launch<S> {
    run_id: Uuid,
    controller: ScopeController,
    client: MappingClient,
    audit: Arc<AuditTrail>,
    scope: Scope,
    process: Option<LaunchedProcess>,
    mappings: MappingQueryResult,
    degraded: bool,
    _state: PhantomData<S>,
}

impl<S> Launch<S> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn process(&self) -> Option<&LaunchedProcess> {
        self.process.as_ref()
    }

    fn correlation(&self) -> CorrelationIds {
        let ids = CorrelationIds::new(self.run_id).with_scope(self.scope.id());
        match &self.process {
            Some(process) => ids.with_pid(process.pid()),
            None => ids,
        }
    }

    fn record(&self, event_type: LaunchEventType, details: impl Into<String>) {
        self.audit
            .record(LaunchEvent::new(event_type, self.correlation(), details));
    }

    fn transition<T>(self) -> Launch<T> {
        Launch {
            run_id: self.run_id,
            controller: self.controller,
            client: self.client,
            audit: self.audit,
            scope: self.scope,
            process: self.process,
            mappings: self.mappings,
            degraded: self.degraded,
            _state: PhantomData,
        }
    }

    /// Tear the launch down after a failed step and hand back the step's error
    fn abort(mut self, event_type: LaunchEventType, err: BindError) -> BindError {
        self.record(event_type, err.to_string());
        // Scope first: terminate-on-close kills the suspended process before its handles go
        if let Err(release_err) = self.controller.release(&mut self.scope) {
            self.record(LaunchEventType::ScopeReleaseFailed, release_err.to_string());
        } else {
            self.record(LaunchEventType::ScopeReleased, "released after failed launch");
        }
        self.process = None;
        err
    }
}

impl Launch<ScopeReady> {
    /// Create and configure the launch scope. Failure here is fatal and never retried.
    pub fn new(
        controller: ScopeController,
        client: MappingClient,
        audit: Arc<AuditTrail>,
    ) -> Result<Self> {
        let run_id = Uuid::new_v4();
        let scope = controller.create_scope().map_err(|e| {
            audit.record(LaunchEvent::new(
                LaunchEventType::LaunchFailed,
                CorrelationIds::new(run_id),
                format!("scope creation failed: {}", e),
            ));
            e
        })?;
        audit.record(LaunchEvent::new(
            LaunchEventType::ScopeCreated,
            CorrelationIds::new(run_id).with_scope(scope.id()),
            format!("backend {}", controller.backend().backend_name()),
        ));

        let mut launch = Launch {
            run_id,
            controller,
            client,
            audit,
            scope,
            process: None,
            mappings: MappingQueryResult::default(),
            degraded: false,
            _state: PhantomData,
        };
        match launch.controller.clone().configure(&mut launch.scope, ScopeOptions::launch()) {
            Ok(()) => {
                launch.record(
                    LaunchEventType::ScopeConfigured,
                    "private table, terminate on close",
                );
                Ok(launch)
            }
            Err(e) => Err(launch.abort(LaunchEventType::LaunchFailed, e)),
        }
    }

    /// Create the process suspended inside the scope
    pub fn spawn_suspended(mut self, command: &CommandSpec) -> Result<Launch<Suspended>> {
        let controller = self.controller.clone();
        match controller.spawn_suspended(&mut self.scope, command) {
            Ok(process) => {
                self.process = Some(process);
                self.record(
                    LaunchEventType::ProcessCreated,
                    format!("suspended: {}", command.command_line()),
                );
                Ok(self.transition())
            }
            Err(e) => Err(self.abort(LaunchEventType::LaunchFailed, e)),
        }
    }
}

impl Launch<Suspended> {
    /// Run the post-creation hook. An error aborts the launch.
    pub fn observe(self, observer: &mut dyn ProcessObserver) -> Result<Launch<Suspended>> {
        let outcome = match &self.process {
            Some(process) => observer.on_created(process, &self.scope),
            None => Err(BindError::Process("no process to observe".to_string())),
        };
        match outcome {
            Ok(()) => Ok(self),
            Err(e) => Err(self.abort(LaunchEventType::LaunchFailed, e)),
        }
    }

    /// Install the caller's mappings into the scope and snapshot the result.
    /// Any setup error aborts the launch and releases the scope.
    pub fn apply_mappings(
        mut self,
        setup: &mut dyn MappingSetup,
    ) -> Result<Launch<MappingsApplied>> {
        if let Err(e) = setup.configure(&self.scope, &self.client) {
            return Err(self.abort(LaunchEventType::MappingSetupFailed, e));
        }
        match self.client.snapshot_scope(&self.scope) {
            Ok(mappings) => {
                self.mappings = mappings;
                self.record(
                    LaunchEventType::MappingsApplied,
                    format!("{} mapping(s) in scope table", self.mappings.len()),
                );
                Ok(self.transition())
            }
            Err(e) => Err(self.abort(LaunchEventType::MappingSetupFailed, e)),
        }
    }
}

impl Launch<MappingsApplied> {
    pub fn mappings(&self) -> &MappingQueryResult {
        &self.mappings
    }

    /// Apply the loader correction according to `policy`.
    ///
    /// A failed correction aborts the launch unless `allow_degraded` is set, in which case
    /// the process runs with cached images bypassing the mappings.
    pub fn prepare_loader(
        mut self,
        policy: ImageCachePolicy,
        allow_degraded: bool,
    ) -> Result<Launch<LoaderPrepared>> {
        let roots = self.controller.backend().image_cache_roots();
        let overlaps = image_cache_overlaps(&self.mappings, &roots);

        let needed = match policy {
            ImageCachePolicy::Always => true,
            ImageCachePolicy::Auto => !overlaps.is_empty(),
            ImageCachePolicy::Skip => {
                if !overlaps.is_empty() {
                    self.record(
                        LaunchEventType::LoaderCorrectionSkipped,
                        format!("cached images under {:?} will bypass the mappings", overlaps),
                    );
                }
                false
            }
        };
        if !needed {
            return Ok(self.transition());
        }

        let result = match self.process.as_mut() {
            Some(process) => process.disable_image_cache_fast_path(),
            None => Err(BindError::Process("no process to correct".to_string())),
        };
        match result {
            Ok(()) => {
                self.record(LaunchEventType::LoaderCorrected, "image-cache fast path disabled");
                Ok(self.transition())
            }
            Err(e) if allow_degraded => {
                self.degraded = true;
                self.record(
                    LaunchEventType::LoaderDegraded,
                    format!("continuing without loader correction: {}", e),
                );
                Ok(self.transition())
            }
            Err(e) => Err(self.abort(LaunchEventType::LaunchFailed, e)),
        }
    }
}

impl Launch<LoaderPrepared> {
    /// Resume the process, block until it exits, then release the scope.
    pub fn resume_and_wait(mut self) -> Result<LaunchOutcome> {
        let mut process = match self.process.take() {
            Some(process) => process,
            None => {
                return Err(self.abort(
                    LaunchEventType::LaunchFailed,
                    BindError::Process("no process to resume".to_string()),
                ))
            }
        };
        let pid = process.pid();

        let exit_code = match process.resume().and_then(|_| {
            self.audit.record(LaunchEvent::new(
                LaunchEventType::ProcessResumed,
                self.correlation().with_pid(pid),
                "resumed",
            ));
            process.wait()
        }) {
            Ok(code) => code,
            Err(e) => {
                self.process = Some(process);
                return Err(self.abort(LaunchEventType::LaunchFailed, e));
            }
        };
        let loader_bypass_disabled = process.loader_bypass_disabled();
        drop(process);

        self.audit.record(
            LaunchEvent::new(
                LaunchEventType::ProcessExited,
                self.correlation().with_pid(pid),
                format!("exit code {}", exit_code),
            )
            .with_exit_code(exit_code),
        );

        let controller = self.controller.clone();
        if let Err(e) = controller.release(&mut self.scope) {
            self.record(LaunchEventType::ScopeReleaseFailed, e.to_string());
            return Err(e);
        }
        self.record(LaunchEventType::ScopeReleased, "released after exit");

        Ok(LaunchOutcome {
            run_id: self.run_id,
            scope_id: self.scope.id(),
            pid,
            exit_code,
            loader_bypass_disabled,
            degraded: self.degraded,
            mappings: std::mem::take(&mut self.mappings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingEntry, MappingFlags};

    #[test]
    fn test_image_cache_overlap_both_directions() {
        let roots = vec![PathBuf::from("C:\\Windows\\System32")];
        let mappings = MappingQueryResult {
            entries: vec![
                MappingEntry::new(
                    "c:\\windows\\system32\\kernelbase.dll",
                    "D:\\p\\k.dll",
                    MappingFlags::empty(),
                ),
                MappingEntry::new("C:\\Windows", "D:\\w", MappingFlags::empty()),
                MappingEntry::new("D:\\data", "D:\\elsewhere", MappingFlags::empty()),
            ],
        };
        let overlaps = image_cache_overlaps(&mappings, &roots);
        assert_eq!(
            overlaps,
            vec![
                PathBuf::from("c:\\windows\\system32\\kernelbase.dll"),
                PathBuf::from("C:\\Windows")
            ]
        );
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(serde_json::to_string(&ImageCachePolicy::Skip).unwrap(), "\"skip\"");
        let parsed: ImageCachePolicy = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(parsed, ImageCachePolicy::Always);
        assert_eq!(ImageCachePolicy::default(), ImageCachePolicy::Auto);
    }
}
