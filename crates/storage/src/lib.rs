//! Relational storage for bridge records.
//!
//! All writes that touch more than one row go through a single transaction so readers never
//! observe a partially applied fetch chunk, rollback or proof update.

mod conversions;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod postgres;
/// Table definitions
pub mod schema;
mod store;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;
pub use messages::*;
pub use postgres::PgStore;
pub use store::{BridgeStore, ProofUpdate, RollbackSummary};
