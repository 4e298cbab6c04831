//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! diff plan (state/differ.rs)
//!     → applier.rs (ordered remote calls, retries, per-check isolation)
//!     → payload.rs (check / monitor / SLO bodies)
//!     → state store (records rewritten after confirmed success)
//!     → report.rs (caller-visible results)
//! ```

pub mod applier;
pub mod payload;
pub mod report;

pub use applier::{Applier, ApplyOptions};
pub use report::{ActionTaken, CheckReport, RunReport, Summary};
