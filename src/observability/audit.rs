/// Launch event logging for bindbox
/// Records every step of a scoped launch as a structured event, both through the `log` facade
/// and in a bounded in-memory trail that callers (and tests) can inspect afterwards.
///
/// - Correlation ids: run id per launch, scope id, pid once the process exists
/// - Event types: scope lifecycle, mapping setup, loader correction, resume, exit, release
use crate::config::types::{BindError, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaunchSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LaunchEventType {
    // Scope lifecycle
    ScopeCreated,
    ScopeConfigured,
    ScopeReleased,
    ScopeReleaseFailed,

    // Process lifecycle
    ProcessCreated,
    ProcessResumed,
    ProcessExited,

    // Mapping setup
    MappingsApplied,
    MappingSetupFailed,

    // Loader correction
    LoaderCorrected,
    LoaderCorrectionSkipped,
    LoaderDegraded,

    LaunchFailed,
}

impl LaunchEventType {
    pub fn default_severity(&self) -> LaunchSeverity {
        match self {
            LaunchEventType::ScopeCreated
            | LaunchEventType::ScopeConfigured
            | LaunchEventType::ScopeReleased
            | LaunchEventType::ProcessCreated
            | LaunchEventType::ProcessResumed
            | LaunchEventType::ProcessExited
            | LaunchEventType::MappingsApplied
            | LaunchEventType::LoaderCorrected => LaunchSeverity::Low,
            LaunchEventType::LoaderCorrectionSkipped => LaunchSeverity::Medium,
            LaunchEventType::MappingSetupFailed
            | LaunchEventType::LoaderDegraded
            | LaunchEventType::LaunchFailed => LaunchSeverity::High,
            LaunchEventType::ScopeReleaseFailed => LaunchSeverity::Critical,
        }
    }
}

/// Correlation identifiers for one launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationIds {
    pub run_id: Uuid,
    pub scope_id: Option<Uuid>,
    pub pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            scope_id: None,
            pid: None,
        }
    }

    pub fn with_scope(mut self, scope_id: Uuid) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchEvent {
    pub event_type: LaunchEventType,
    pub severity: LaunchSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: CorrelationIds,
    pub exit_code: Option<u32>,
    pub path: Option<PathBuf>,
}

impl LaunchEvent {
    pub fn new(
        event_type: LaunchEventType,
        correlation: CorrelationIds,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation,
            exit_code: None,
            path: None,
        }
    }

    pub fn with_exit_code(mut self, code: u32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_severity(mut self, severity: LaunchSeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Events kept in memory before the oldest are dropped
pub const DEFAULT_RETAINED_EVENTS: usize = 1024;

/// Audit trail kept in memory and optionally appended to a JSON-lines file.
///
/// Only the most recent `retain` events stay in memory. The file, when present, receives
/// every event.
pub struct AuditTrail {
    events: Mutex<VecDeque<LaunchEvent>>,
    retain: usize,
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retain: DEFAULT_RETAINED_EVENTS,
            file: None,
            path: None,
        }
    }
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retain` events in memory
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain;
        self
    }

    /// Also append every event to `path`
    pub fn with_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BindError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| BindError::Config(format!("Failed to open audit log: {}", e)))?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    fn events_lock(&self) -> MutexGuard<'_, VecDeque<LaunchEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, event: LaunchEvent) {
        let entry = serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());

        match event.severity {
            LaunchSeverity::Critical | LaunchSeverity::High => {
                error!("LAUNCH {:?}: {} {}", event.event_type, event.details, entry)
            }
            LaunchSeverity::Medium => warn!("LAUNCH {:?}: {}", event.event_type, event.details),
            LaunchSeverity::Low => info!("LAUNCH {:?}: {}", event.event_type, event.details),
        }

        if let Some(file) = &self.file {
            match file.lock() {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{}", entry).and_then(|_| file.flush()) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(_) => error!("Failed to acquire lock on audit log"),
            }
        }

        let mut events = self.events_lock();
        if self.retain == 0 {
            return;
        }
        while events.len() >= self.retain {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the retained events, oldest first
    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events_lock().iter().cloned().collect()
    }

    /// Events belonging to one launch
    pub fn for_run(&self, run_id: Uuid) -> Vec<LaunchEvent> {
        self.events_lock()
            .iter()
            .filter(|e| e.correlation.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("events", &self.events_lock().len())
            .field("retain", &self.retain)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity() {
        assert_eq!(LaunchEventType::ScopeCreated.default_severity(), LaunchSeverity::Low);
        assert_eq!(LaunchEventType::LoaderDegraded.default_severity(), LaunchSeverity::High);
        assert_eq!(
            LaunchEventType::ScopeReleaseFailed.default_severity(),
            LaunchSeverity::Critical
        );
    }

    #[test]
    fn test_trail_filters_by_run() {
        let trail = AuditTrail::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        trail.record(LaunchEvent::new(LaunchEventType::ScopeCreated, CorrelationIds::new(a), "a"));
        trail.record(LaunchEvent::new(LaunchEventType::ScopeCreated, CorrelationIds::new(b), "b"));
        trail.record(
            LaunchEvent::new(
                LaunchEventType::ProcessExited,
                CorrelationIds::new(a).with_pid(7),
                "a",
            )
            .with_exit_code(0),
        );

        let run_a = trail.for_run(a);
        assert_eq!(run_a.len(), 2);
        assert_eq!(run_a[1].exit_code, Some(0));
        assert_eq!(run_a[1].correlation.pid, Some(7));
        assert_eq!(trail.events().len(), 3);
    }

    #[test]
    fn test_trail_drops_oldest_beyond_retention() {
        let trail = AuditTrail::new().with_retention(2);
        for details in ["first", "second", "third"] {
            trail.record(LaunchEvent::new(
                LaunchEventType::ScopeCreated,
                CorrelationIds::new(Uuid::new_v4()),
                details,
            ));
        }

        let kept: Vec<String> = trail.events().into_iter().map(|e| e.details).collect();
        assert_eq!(kept, vec!["second".to_string(), "third".to_string()]);

        let silent = AuditTrail::new().with_retention(0);
        silent.record(LaunchEvent::new(
            LaunchEventType::ScopeCreated,
            CorrelationIds::new(Uuid::new_v4()),
            "dropped",
        ));
        assert!(silent.events().is_empty());
    }

    #[test]
    fn test_file_receives_events_beyond_retention() {
        let path = std::env::temp_dir().join(format!("bindbox-retain-{}.jsonl", Uuid::new_v4()));
        let trail = AuditTrail::with_file(&path).unwrap().with_retention(1);
        let ids = CorrelationIds::new(Uuid::new_v4());
        trail.record(LaunchEvent::new(LaunchEventType::ScopeCreated, ids.clone(), "a"));
        trail.record(LaunchEvent::new(LaunchEventType::ScopeReleased, ids, "b"));

        assert_eq!(trail.events().len(), 1);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_event_serializes_with_timestamp() {
        let event = LaunchEvent::new(
            LaunchEventType::LoaderCorrected,
            CorrelationIds::new(Uuid::nil()),
            "patched",
        )
        .with_path("C:\\Windows\\System32");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "LoaderCorrected");
        assert!(json["timestamp"].is_string());
        assert_eq!(json["correlation"]["run_id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_file_trail_appends_json_lines() {
        let dir = std::env::temp_dir().join(format!("bindbox-audit-{}", Uuid::new_v4()));
        let path = dir.join("audit.log");
        let trail = AuditTrail::with_file(&path).unwrap();
        trail.record(LaunchEvent::new(
            LaunchEventType::ScopeReleased,
            CorrelationIds::new(Uuid::new_v4()),
            "released",
        ));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("ScopeReleased"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
