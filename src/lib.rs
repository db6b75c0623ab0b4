//! bindbox: scoped filesystem redirection for Windows processes
//! Built on the bind filter, focused on giving one launched process a private view of the
//! filesystem without touching what every other process sees
//!
//! # Architecture
//!
//! ## Mapping Table ([`mapping`])
//! - [`mapping::flags`]: Mapping and query flag sets
//! - [`mapping::entry`]: Entries, query results and principals
//! - [`mapping::listing`]: Self-relative listing decoder
//! - [`mapping::batch`]: Batched configuration and compiled batches
//! - [`mapping::path`]: Path segment validation and matching
//!
//! ## Isolation Scopes ([`scope`])
//! - [`scope::controller`]: Scope lifecycle (create, configure, release)
//! - [`scope::process`]: Processes bound to a scope at creation
//! - [`scope::backend`]: Container backend trait
//!
//! ## Mapping Service ([`service`])
//! - [`service::client`]: Validated attach, install, remove, query and batch calls
//! - [`service::status`]: Status code translation
//! - [`service::backend`]: Redirection service backend trait
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: Type-state ordered launch chain
//! - [`exec::executor`]: One-call scoped launcher
//!
//! ## Kernel Primitives ([`kernel`])
//! - `kernel::windows`: Job objects, silos, process creation, loader correction, bindflt
//! - [`kernel::wide`]: UTF-16 conversions
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured launch events
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error type and classification
//! - [`config::manifest`]: Launch manifests and mapping specs
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::simulated`]: In-process model of the container and the redirection service
//!
//! # Design Principles
//!
//! 1. **Ordering is a type** - mappings and loader correction happen before the first
//!    instruction of the launched process, and the launch chain will not compile otherwise
//! 2. **The service is the truth** - the table is never cached, every answer comes from a query
//! 3. **Scopes own lifetime** - releasing a scope ends everything inside it
//! 4. **Minimal unsafe** - thin wrappers with explicit preconditions, all in `kernel::windows`

// Mapping Table
pub mod mapping;

// Isolation Scopes
pub mod scope;

// Mapping Service
pub mod service;

// Execution Control
pub mod exec;

// Kernel Primitives
pub mod kernel;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint for the bindbox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::{ImageCachePolicy, LaunchOutcome, ScopedLauncher};
pub use mapping::{MappingEntry, MappingFlags, MappingQueryResult};
pub use scope::{CommandSpec, Scope, ScopeController};
pub use service::{MappingClient, MappingSelector, QuerySelector};
