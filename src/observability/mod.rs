//! Observability
//!
//! Structured launch events for operational visibility.

pub mod audit;

pub use audit::{AuditTrail, CorrelationIds, LaunchEvent, LaunchEventType, LaunchSeverity};
