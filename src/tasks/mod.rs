//! Background Tasks Module
//!
//! Work that runs on the tokio runtime on behalf of a store.
//!
//! # Tasks
//! - Expiration: one timer per entry, removing it when its time is up
//! - Resolution: follows pending async results until they settle

mod expiration;
mod resolution;

pub use expiration::{ArmOn, ExpirationInfo, ExpirationManager};
pub use resolution::{pending, resolved, Pending, PendingResolver};
