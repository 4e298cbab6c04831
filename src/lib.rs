//! Declarative health-check deployer library.
//!
//! Turns declarative HTTP/TCP/DNS/SSL check specifications into live
//! monitoring resources on a remote platform and keeps them synchronized
//! over repeated applies.

pub mod checks;
pub mod config;
pub mod engine;
pub mod reconcile;
pub mod remote;
pub mod resilience;
pub mod state;

pub use config::{CheckSpec, DeployDoc};
pub use engine::{Deployer, DeployerOptions};
pub use reconcile::RunReport;
