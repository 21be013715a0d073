//! netfence - declarative nftables policy store
//!
//! Keeps a host's firewall policy (per-chain defaults plus an ordered list of
//! rules) in a SQLite database and compiles it into one nftables script.
//!
//! # Architecture
//!
//! - [`core`] - Data model, script renderer, and nft invocation
//! - [`validators`] - Turns untrusted drafts into validated rules and defaults
//! - [`store`] - Transactional persistence with per-transaction deadlines
//! - [`coordinator`] - System-wide change lock (`flock`)
//! - [`service`] - Role checks, locking, and auditing around every operation
//! - [`audit`] - Audit trail entries
//! - [`snapshot`] - JSON export/import documents
//! - [`config`] - Configuration file and environment overrides
//! - [`utils`] - Directories and host interface lookups
//!
//! # Safety Features
//!
//! - Every mutation is a single transaction that either commits or leaves no trace
//! - Transactions past their deadline are rolled back
//! - Writers are serialized across processes; readers never block
//! - Rendering is deterministic and runs only on validated data
//! - Atomic file operations with secure permissions

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::firewall::{
    Action, Chain, Defaults, DefaultsDraft, Protocol, Rule, RuleDraft, Snapshot, SnapshotDraft,
};
pub use service::{ApplyReport, PolicyService, Role, ServiceOptions};
