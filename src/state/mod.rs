//! Deployment state subsystem.
//!
//! # Data Flow
//! ```text
//! desired CheckSpecs + stored ResourceRecords
//!     → differ.rs (content hash comparison)
//!     → plan: Create / Update / Unchanged / Delete per name
//!     → reconciler (state/store.rs mutated only after remote success)
//! ```
//!
//! # Design Decisions
//! - The store is an injected capability, never a process-wide singleton
//! - Per-name advisory locks give two concurrent runs exclusivity on a
//!   check name
//! - The content hash covers semantic fields only; cosmetic fields never
//!   trigger an Update

pub mod differ;
pub mod store;

pub use differ::{content_hash, plan, DiffAction, PlanEntry};
pub use store::{FileStateStore, MemoryStateStore, ResourceRecord, StateError, StateStore};
