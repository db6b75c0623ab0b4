//! Mapping table model
//!
//! The authoritative table lives in the redirection service; these types describe what is
//! installed into it and what a query returns.

pub mod batch;
pub mod entry;
pub mod flags;
pub mod listing;
pub mod path;

pub use batch::{BatchConfig, BatchHandle};
pub use entry::{MappingEntry, MappingQueryResult, Principal};
pub use flags::{MappingFlags, QueryFlags};
