/// In-process model of the container primitive and the redirection service
///
/// `SimulatedHost` implements both [`ContainerBackend`] and [`BindBackend`] over a shared
/// in-memory state: scopes with private tables, a global table, principal tables, an in-memory
/// filesystem and registered programs that run when a process is resumed. It reproduces the
/// service behaviour the rest of the crate depends on, including its quirks:
///
/// - re-installing a merged root appends the target; a non-merged root is replaced
/// - a target that is itself a virtual root resolves to that root's last target
/// - `require_parent` fails with `PathNotFound` when the parent is not mapped
/// - queries follow the two-phase buffer contract
/// - the loader serves image-cache libraries from the cache unless the fast path is disabled
/// - releasing a terminate-on-close scope kills its processes and drops its table
use crate::config::types::{BindError, Result};
use crate::mapping::listing::{self, HEADER_SIZE};
use crate::mapping::{path, BatchConfig, MappingEntry, MappingFlags};
use crate::scope::backend::{ContainerBackend, ProcessToken, ScopeOptions, ScopeToken};
use crate::scope::process::CommandSpec;
use crate::service::backend::{BindBackend, InstallRequest, MappingSelector, QuerySelector};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Program body executed on resume; the return value is the exit code
pub type Program = Arc<dyn Fn(&ProcessView<'_>) -> u32 + Send + Sync>;

/// Exit code recorded for processes killed by scope release
pub const TERMINATED_EXIT_CODE: u32 = 1;

const BATCH_MAGIC: &[u8; 4] = b"SBAT";
const STATUS_BUFFER_TOO_SMALL: i32 = 0xC000_0023u32 as i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimProcessState {
    Suspended,
    Running,
    Exited(u32),
    /// Killed by scope release before it exited on its own
    Terminated,
}

#[derive(Clone, Debug)]
struct SimMapping {
    entry: MappingEntry,
    exceptions: Vec<PathBuf>,
}

impl SimMapping {
    /// Path segments below this mapping's root, unless `path` is outside it or excepted
    fn covers(&self, path: &Path) -> Option<Vec<String>> {
        let ci = self.entry.flags.case_insensitive();
        let rest = path::remainder(path, &self.entry.virtual_root, ci).ok()??;
        let excepted = self
            .exceptions
            .iter()
            .any(|e| matches!(path::remainder(path, e, ci), Ok(Some(_))));
        if excepted {
            None
        } else {
            Some(rest)
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Table {
    mappings: Vec<SimMapping>,
}

impl Table {
    fn position(&self, root: &Path) -> Option<usize> {
        self.mappings.iter().position(|m| m.entry.is_key(root))
    }

    fn entries(&self) -> Vec<MappingEntry> {
        self.mappings.iter().map(|m| m.entry.clone()).collect()
    }

    fn parent_is_mapped(&self, root: &Path) -> Result<bool> {
        let parent = match path::parent(root)? {
            Some(parent) => parent,
            None => return Ok(false),
        };
        Ok(self.mappings.iter().any(|m| m.covers(&parent).is_some()))
    }

    fn install(
        &mut self,
        root: &Path,
        target: &Path,
        flags: MappingFlags,
        exceptions: &[PathBuf],
    ) -> Result<()> {
        let flags = flags - MappingFlags::USE_SCOPE_LOCAL_TABLE;

        if flags.contains(MappingFlags::REQUIRE_PARENT_MAPPED) && !self.parent_is_mapped(root)? {
            return Err(BindError::PathNotFound(root.to_path_buf()));
        }

        // Aliasing another virtual root binds to whatever that root resolves to last
        let target = match self.position(target) {
            Some(i) => match self.mappings[i].entry.targets.last() {
                Some(last) => last.clone(),
                None => target.to_path_buf(),
            },
            None => target.to_path_buf(),
        };

        let existing = match self.position(root) {
            Some(i) => i,
            None => {
                self.mappings.push(SimMapping {
                    entry: MappingEntry::new(root, target, flags),
                    exceptions: exceptions.to_vec(),
                });
                return Ok(());
            }
        };

        let current = &mut self.mappings[existing];
        let was_merged = current.entry.flags.contains(MappingFlags::MERGED);
        match (was_merged, flags.contains(MappingFlags::MERGED)) {
            (true, true) => {
                let single =
                    (current.entry.flags | flags).contains(MappingFlags::SINGLE_TARGET_ONLY);
                if current.entry.targets.contains(&target) {
                    return Ok(());
                }
                if single {
                    return Err(BindError::InvalidParameter(format!(
                        "{} would have multiple targets",
                        root.display()
                    )));
                }
                current.entry.targets.push(target);
                current.exceptions.extend_from_slice(exceptions);
                Ok(())
            }
            (false, false) => {
                *current = SimMapping {
                    entry: MappingEntry::new(root, target, flags),
                    exceptions: exceptions.to_vec(),
                };
                Ok(())
            }
            _ => Err(BindError::AlreadyMapped(root.to_path_buf())),
        }
    }

    fn remove(&mut self, root: &Path) -> Result<()> {
        match self.position(root) {
            Some(i) => {
                self.mappings.remove(i);
                Ok(())
            }
            None => Err(BindError::NotFound(root.display().to_string())),
        }
    }

    /// Most specific mapping covering `path`
    fn lookup(&self, path: &Path) -> Option<(&SimMapping, Vec<String>)> {
        self.mappings
            .iter()
            .filter_map(|m| m.covers(path).map(|rest| (m, rest)))
            .max_by_key(|(m, _)| path::segments(&m.entry.virtual_root).map_or(0, |s| s.len()))
    }
}

struct SimScope {
    options: Option<ScopeOptions>,
    table: Table,
    members: Vec<u32>,
}

struct SimProcess {
    scope: usize,
    command: CommandSpec,
    state: SimProcessState,
    fast_path_disabled: bool,
    closed: bool,
}

#[derive(Default)]
struct HostState {
    attached: HashSet<String>,
    next_token: usize,
    scopes: HashMap<usize, SimScope>,
    global: Table,
    principals: HashMap<Vec<u8>, Table>,
    processes: HashMap<u32, SimProcess>,
    files: HashMap<String, Vec<u8>>,
    programs: HashMap<String, Program>,
}

impl HostState {
    fn scope(&self, token: usize) -> Result<&SimScope> {
        self.scopes
            .get(&token)
            .ok_or_else(|| BindError::NotFound(format!("scope token {}", token)))
    }

    fn table_mut(&mut self, selector: &MappingSelector<'_>) -> Result<&mut Table> {
        match selector {
            MappingSelector::Global => Ok(&mut self.global),
            MappingSelector::Principal(p) => {
                Ok(self.principals.entry(p.as_bytes().to_vec()).or_default())
            }
            MappingSelector::Scope(scope) => {
                let raw = scope.token().raw();
                let sim = self
                    .scopes
                    .get_mut(&raw)
                    .ok_or_else(|| BindError::NotFound(format!("scope {}", scope.id())))?;
                if !sim.options.map_or(false, |o| o.private_mapping_table) {
                    return Err(BindError::InvalidParameter(format!(
                        "scope {} has no private mapping table",
                        scope.id()
                    )));
                }
                Ok(&mut sim.table)
            }
        }
    }

    /// Tables a process in `scope` resolves through, most specific first
    fn tables_for(&self, scope: usize) -> Vec<&Table> {
        let mut tables = Vec::with_capacity(2);
        if let Some(sim) = self.scopes.get(&scope) {
            if sim.options.map_or(false, |o| o.private_mapping_table) {
                tables.push(&sim.table);
            }
        }
        tables.push(&self.global);
        tables
    }

    fn file_exists(&self, path: &Path) -> bool {
        file_key(path).map_or(false, |k| self.files.contains_key(&k))
    }

    fn read_raw(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .get(&file_key(path)?)
            .cloned()
            .ok_or_else(|| BindError::PathNotFound(path.to_path_buf()))
    }

    /// Physical path a read of `path` lands on
    fn resolve_read(&self, scope: Option<usize>, path: &Path) -> PathBuf {
        let tables = match scope {
            Some(scope) => self.tables_for(scope),
            None => vec![&self.global],
        };
        for table in tables {
            if let Some((mapping, rest)) = table.lookup(path) {
                let candidates: Vec<PathBuf> = mapping
                    .entry
                    .targets
                    .iter()
                    .map(|t| path::join(t, &rest))
                    .collect();
                if mapping.entry.flags.contains(MappingFlags::MERGED) {
                    if let Some(hit) = candidates.iter().find(|c| self.file_exists(c)) {
                        return hit.clone();
                    }
                }
                if let Some(first) = candidates.into_iter().next() {
                    return first;
                }
            }
        }
        path.to_path_buf()
    }

    /// Physical path a write to `path` lands on
    fn resolve_write(&self, scope: Option<usize>, path: &Path) -> Result<PathBuf> {
        let tables = match scope {
            Some(scope) => self.tables_for(scope),
            None => vec![&self.global],
        };
        for table in tables {
            if let Some((mapping, rest)) = table.lookup(path) {
                let flags = mapping.entry.flags;
                // Merged mappings take writes on the last target regardless of read-only
                if flags.contains(MappingFlags::MERGED) {
                    if let Some(last) = mapping.entry.targets.last() {
                        return Ok(path::join(last, &rest));
                    }
                }
                if flags.contains(MappingFlags::READ_ONLY) {
                    return Err(BindError::AccessDenied(format!(
                        "{} is mapped read-only",
                        path.display()
                    )));
                }
                if let Some(first) = mapping.entry.targets.first() {
                    return Ok(path::join(first, &rest));
                }
            }
        }
        Ok(path.to_path_buf())
    }
}

fn file_key(path: &Path) -> Result<String> {
    path::key(path, true)
}

/// Simulated Windows host
#[derive(Clone)]
pub struct SimulatedHost {
    state: Arc<Mutex<HostState>>,
    image_cache_roots: Vec<PathBuf>,
    scope_limit: Option<usize>,
    loader_patch_fails: bool,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                next_token: 0x100,
                ..Default::default()
            })),
            image_cache_roots: vec![PathBuf::from("C:\\Windows\\System32")],
            scope_limit: None,
            loader_patch_fails: false,
        }
    }

    /// Fail scope creation with `ResourceExhausted` once `limit` scopes are live
    pub fn with_scope_limit(mut self, limit: usize) -> Self {
        self.scope_limit = Some(limit);
        self
    }

    /// Make every loader correction fail, as on a build with an unexpected process layout
    pub fn with_failing_loader_patch(mut self) -> Self {
        self.loader_patch_fails = true;
        self
    }

    pub fn with_image_cache_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.image_cache_roots = roots;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or overwrite a physical file
    pub fn add_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        if let Ok(key) = file_key(path.as_ref()) {
            self.lock().files.insert(key, contents.into());
        }
    }

    /// Read a physical file, bypassing every mapping
    pub fn read_physical(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.lock().read_raw(path.as_ref())
    }

    /// Read a path as an unscoped process would: through the global table only
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let state = self.lock();
        let physical = state.resolve_read(None, path.as_ref());
        state.read_raw(&physical)
    }

    /// Register the program body run when `program` is resumed
    pub fn register_program<F>(&self, program: impl AsRef<Path>, body: F)
    where
        F: Fn(&ProcessView<'_>) -> u32 + Send + Sync + 'static,
    {
        if let Ok(key) = file_key(program.as_ref()) {
            self.lock().programs.insert(key, Arc::new(body));
        }
    }

    pub fn process_state(&self, pid: u32) -> Option<SimProcessState> {
        self.lock().processes.get(&pid).map(|p| p.state)
    }

    /// Whether the process handles were closed by their owner
    pub fn process_closed(&self, pid: u32) -> Option<bool> {
        self.lock().processes.get(&pid).map(|p| p.closed)
    }

    pub fn live_scopes(&self) -> usize {
        self.lock().scopes.len()
    }

    pub fn is_attached(&self, volume_path: impl AsRef<Path>) -> bool {
        match path::volume(volume_path.as_ref()) {
            Ok(volume) => self.lock().attached.contains(&volume),
            Err(_) => false,
        }
    }

    /// Global table entries, in install order
    pub fn global_entries(&self) -> Vec<MappingEntry> {
        self.lock().global.entries()
    }
}

/// What a running simulated process can do
pub struct ProcessView<'a> {
    host: &'a SimulatedHost,
    pid: u32,
    scope: usize,
    command: CommandSpec,
    fast_path_disabled: bool,
}

impl ProcessView<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn args(&self) -> &[String] {
        &self.command.args
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.command.current_dir.as_deref()
    }

    /// Read through the scope's table, then the global table
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let state = self.host.lock();
        let physical = state.resolve_read(Some(self.scope), path.as_ref());
        state.read_raw(&physical)
    }

    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Result<()> {
        let mut state = self.host.lock();
        let physical = state.resolve_write(Some(self.scope), path.as_ref())?;
        let key = file_key(&physical)?;
        state.files.insert(key, contents.into());
        Ok(())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        let state = self.host.lock();
        let physical = state.resolve_read(Some(self.scope), path.as_ref());
        state.file_exists(&physical)
    }

    /// Load a library image the way the loader does.
    ///
    /// Images under an image-cache root come straight from the cache, which reflects the
    /// unmapped file, unless the fast path was disabled before the process started.
    pub fn load_library(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let cached = self
            .host
            .image_cache_roots
            .iter()
            .any(|root| matches!(path::remainder(path, root, true), Ok(Some(_))));
        if cached && !self.fast_path_disabled {
            return self.host.lock().read_raw(path);
        }
        self.read_file(path)
    }
}

impl ContainerBackend for SimulatedHost {
    fn backend_name(&self) -> &str {
        "simulated"
    }

    fn create_scope(&self) -> Result<ScopeToken> {
        let mut state = self.lock();
        if let Some(limit) = self.scope_limit {
            if state.scopes.len() >= limit {
                return Err(BindError::ResourceExhausted(format!(
                    "{} scopes already live",
                    state.scopes.len()
                )));
            }
        }
        let raw = state.next_token;
        state.next_token += 4;
        state.scopes.insert(
            raw,
            SimScope {
                options: None,
                table: Table::default(),
                members: Vec::new(),
            },
        );
        Ok(ScopeToken::new(raw))
    }

    fn configure_scope(&self, scope: ScopeToken, options: &ScopeOptions) -> Result<()> {
        let mut state = self.lock();
        let sim = state
            .scopes
            .get_mut(&scope.raw())
            .ok_or_else(|| BindError::NotFound(format!("scope token {}", scope.raw())))?;
        sim.options = Some(*options);
        Ok(())
    }

    fn release_scope(&self, scope: ScopeToken) -> Result<()> {
        let mut state = self.lock();
        let sim = state
            .scopes
            .remove(&scope.raw())
            .ok_or_else(|| BindError::NotFound(format!("scope token {}", scope.raw())))?;
        if sim.options.map_or(false, |o| o.terminate_children_on_close) {
            for pid in sim.members {
                if let Some(process) = state.processes.get_mut(&pid) {
                    if matches!(
                        process.state,
                        SimProcessState::Suspended | SimProcessState::Running
                    ) {
                        process.state = SimProcessState::Terminated;
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_suspended(&self, scope: ScopeToken, command: &CommandSpec) -> Result<ProcessToken> {
        let mut state = self.lock();
        let configured = state.scope(scope.raw())?.options.is_some();
        if !configured {
            return Err(BindError::InvalidParameter(format!(
                "scope token {} is not configured",
                scope.raw()
            )));
        }
        if !state.programs.contains_key(&file_key(&command.program)?) {
            return Err(BindError::PathNotFound(command.program.clone()));
        }

        let pid = state.next_token as u32;
        state.next_token += 4;
        state.processes.insert(
            pid,
            SimProcess {
                scope: scope.raw(),
                command: command.clone(),
                state: SimProcessState::Suspended,
                fast_path_disabled: false,
                closed: false,
            },
        );
        if let Some(sim) = state.scopes.get_mut(&scope.raw()) {
            sim.members.push(pid);
        }
        Ok(ProcessToken {
            pid,
            process: pid as usize,
            thread: pid as usize + 1,
        })
    }

    fn image_cache_roots(&self) -> Vec<PathBuf> {
        self.image_cache_roots.clone()
    }

    fn disable_image_cache_fast_path(&self, process: ProcessToken) -> Result<()> {
        if self.loader_patch_fails {
            return Err(BindError::LoaderPatch(format!(
                "unexpected process layout in pid {}",
                process.pid
            )));
        }
        let mut state = self.lock();
        let sim = state
            .processes
            .get_mut(&process.pid)
            .ok_or_else(|| BindError::NotFound(format!("pid {}", process.pid)))?;
        if sim.state != SimProcessState::Suspended {
            return Err(BindError::InvalidParameter(format!(
                "pid {} is no longer suspended",
                process.pid
            )));
        }
        sim.fast_path_disabled = true;
        Ok(())
    }

    fn resume(&self, process: ProcessToken) -> Result<()> {
        let (program, scope, command, fast_path_disabled) = {
            let mut state = self.lock();
            let sim = state
                .processes
                .get(&process.pid)
                .ok_or_else(|| BindError::NotFound(format!("pid {}", process.pid)))?;
            if sim.state != SimProcessState::Suspended {
                return Err(BindError::Process(format!(
                    "pid {} is not suspended ({:?})",
                    process.pid, sim.state
                )));
            }
            let (scope, command, fast_path_disabled) =
                (sim.scope, sim.command.clone(), sim.fast_path_disabled);
            let program = state
                .programs
                .get(&file_key(&command.program)?)
                .cloned()
                .ok_or_else(|| BindError::PathNotFound(command.program.clone()))?;
            if let Some(sim) = state.processes.get_mut(&process.pid) {
                sim.state = SimProcessState::Running;
            }
            (program, scope, command, fast_path_disabled)
        };

        // Runs without the lock so the program can use the host
        let view = ProcessView {
            host: self,
            pid: process.pid,
            scope,
            command,
            fast_path_disabled,
        };
        let code = program(&view);

        let mut state = self.lock();
        if let Some(sim) = state.processes.get_mut(&process.pid) {
            if sim.state == SimProcessState::Running {
                sim.state = SimProcessState::Exited(code);
            }
        }
        Ok(())
    }

    fn wait(&self, process: ProcessToken) -> Result<u32> {
        let state = self.lock();
        let sim = state
            .processes
            .get(&process.pid)
            .ok_or_else(|| BindError::NotFound(format!("pid {}", process.pid)))?;
        match sim.state {
            SimProcessState::Exited(code) => Ok(code),
            SimProcessState::Terminated => Ok(TERMINATED_EXIT_CODE),
            other => Err(BindError::Process(format!(
                "pid {} would block forever in state {:?}",
                process.pid, other
            ))),
        }
    }

    fn close_process(&self, process: ProcessToken) {
        if let Some(sim) = self.lock().processes.get_mut(&process.pid) {
            sim.closed = true;
        }
    }
}

fn parse_batch_line(line: &str) -> Result<MappingEntry> {
    let bad = || BindError::InvalidConfig(format!("malformed batch line: {}", line));
    let mut fields = line.split('|');
    let root = fields.next().filter(|f| !f.is_empty()).ok_or_else(bad)?;
    let targets: Vec<PathBuf> = fields
        .next()
        .ok_or_else(bad)?
        .split(';')
        .filter(|t| !t.is_empty())
        .map(PathBuf::from)
        .collect();
    let bits = u32::from_str_radix(fields.next().ok_or_else(bad)?, 16).map_err(|_| bad())?;
    if targets.is_empty() || fields.next().is_some() {
        return Err(bad());
    }
    path::segments(Path::new(root))?;
    Ok(MappingEntry {
        virtual_root: PathBuf::from(root),
        targets,
        flags: MappingFlags::from_bits_retain(bits),
    })
}

impl BindBackend for SimulatedHost {
    fn backend_name(&self) -> &str {
        "simulated"
    }

    fn attach(&self, path: &Path) -> Result<bool> {
        let volume = path::volume(path)?;
        Ok(!self.lock().attached.insert(volume))
    }

    fn setup(&self, selector: &MappingSelector<'_>, request: &InstallRequest<'_>) -> Result<()> {
        let mut state = self.lock();
        state.table_mut(selector)?.install(
            request.virtual_root,
            request.target,
            request.flags,
            request.exceptions,
        )
    }

    fn remove(&self, selector: &MappingSelector<'_>, virtual_root: &Path) -> Result<()> {
        let mut state = self.lock();
        state.table_mut(selector)?.remove(virtual_root)
    }

    fn get_mappings(&self, selector: &QuerySelector<'_>, buffer: &mut [u8]) -> Result<usize> {
        let state = self.lock();
        let entries: Vec<MappingEntry> = match selector {
            QuerySelector::Volume(p) => {
                let volume = path::volume(p)?;
                state
                    .global
                    .entries()
                    .into_iter()
                    .filter(|e| path::volume(&e.virtual_root).map_or(false, |v| v == volume))
                    .collect()
            }
            QuerySelector::Scope(scope) => state.scope(scope.token().raw())?.table.entries(),
            QuerySelector::Principal(p) => state
                .principals
                .get(p.as_bytes())
                .map(Table::entries)
                .unwrap_or_default(),
        };

        let required = listing::encoded_size(&entries);
        if buffer.len() < HEADER_SIZE {
            return Err(BindError::BufferTooSmall {
                required: required as u32,
            });
        }
        if buffer.len() < required {
            // Header-sized buffers get the failure reported in-band
            buffer[0..4].copy_from_slice(&(required as u32).to_le_bytes());
            buffer[4..8].copy_from_slice(&STATUS_BUFFER_TOO_SMALL.to_le_bytes());
            buffer[8..12].copy_from_slice(&0u32.to_le_bytes());
            return Ok(HEADER_SIZE);
        }

        let encoded = listing::encode(&entries);
        buffer[..encoded.len()].copy_from_slice(&encoded);
        Ok(encoded.len())
    }

    fn generate_batch(&self, config: &BatchConfig) -> Result<Vec<u8>> {
        let entries = config
            .as_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(parse_batch_line)
            .collect::<Result<Vec<_>>>()?;
        let mut blob = BATCH_MAGIC.to_vec();
        let body =
            serde_json::to_vec(&entries).map_err(|e| BindError::InvalidConfig(e.to_string()))?;
        blob.extend(body);
        Ok(blob)
    }

    fn setup_batched(
        &self,
        selector: &MappingSelector<'_>,
        batch: &[u8],
        flags: MappingFlags,
        attach_paths: &[PathBuf],
    ) -> Result<()> {
        let body = batch
            .strip_prefix(BATCH_MAGIC.as_slice())
            .ok_or_else(|| BindError::InvalidParameter("not a compiled batch".to_string()))?;
        let entries: Vec<MappingEntry> =
            serde_json::from_slice(body).map_err(|e| BindError::InvalidParameter(e.to_string()))?;

        let mut state = self.lock();
        let table = state.table_mut(selector)?;
        let mut staged = table.clone();
        for entry in &entries {
            for target in &entry.targets {
                staged.install(&entry.virtual_root, target, entry.flags | flags, &[])?;
            }
        }
        *table = staged;

        for p in attach_paths {
            let volume = path::volume(p)?;
            state.attached.insert(volume);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_merge_and_alias() {
        let mut table = Table::default();
        let merged = MappingFlags::READ_ONLY | MappingFlags::MERGED;
        for t in ["D:\\p1", "D:\\p2", "D:\\p3"] {
            table.install(Path::new("D:\\v"), Path::new(t), merged, &[]).unwrap();
        }
        table.install(Path::new("D:\\alias"), Path::new("D:\\v"), merged, &[]).unwrap();

        let entries = table.entries();
        assert_eq!(entries[0].targets.len(), 3);
        assert_eq!(entries[1].targets, vec![PathBuf::from("D:\\p3")]);
    }

    #[test]
    fn test_table_replace_and_mismatch() {
        let mut table = Table::default();
        table.install(Path::new("D:\\v"), Path::new("D:\\a"), MappingFlags::empty(), &[]).unwrap();
        table.install(Path::new("D:\\v"), Path::new("D:\\b"), MappingFlags::empty(), &[]).unwrap();
        assert_eq!(table.entries()[0].targets, vec![PathBuf::from("D:\\b")]);

        let err = table
            .install(Path::new("D:\\v"), Path::new("D:\\c"), MappingFlags::MERGED, &[])
            .unwrap_err();
        assert!(matches!(err, BindError::AlreadyMapped(_)));
    }

    #[test]
    fn test_table_exceptions_and_specificity() {
        let mut table = Table::default();
        table
            .install(
                Path::new("D:\\v"),
                Path::new("D:\\p"),
                MappingFlags::empty(),
                &[PathBuf::from("D:\\v\\keep")],
            )
            .unwrap();
        table
            .install(Path::new("D:\\v\\deep"), Path::new("E:\\q"), MappingFlags::empty(), &[])
            .unwrap();

        assert!(table.lookup(Path::new("D:\\v\\keep\\x")).is_none());
        let (m, rest) = table.lookup(Path::new("D:\\v\\deep\\f")).unwrap();
        assert_eq!(m.entry.targets[0], PathBuf::from("E:\\q"));
        assert_eq!(rest, vec!["f".to_string()]);
    }

    #[test]
    fn test_batch_line_parsing() {
        let entry = parse_batch_line("D:\\v|D:\\a;D:\\b|00000003").unwrap();
        assert_eq!(entry.targets.len(), 2);
        assert_eq!(entry.flags, MappingFlags::READ_ONLY | MappingFlags::MERGED);
        assert!(parse_batch_line("D:\\v||00000001").is_err());
        assert!(parse_batch_line("D:\\v|D:\\a|zz").is_err());
    }
}
