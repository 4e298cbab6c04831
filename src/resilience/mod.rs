//! Retry and backoff policies.
//!
//! Two distinct schedules live here:
//! - Probe retries: fixed spacing from the check's `retry {count, interval}`,
//!   applied only to transient probe errors.
//! - Remote apply retries: exponential backoff with jitter, applied to
//!   transient remote API failures.

pub mod backoff;
pub mod retry;

pub use backoff::calculate_backoff;
pub use retry::run_probe;
