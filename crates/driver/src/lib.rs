//! Bridge indexer driver: the periodic tasks that follow both chains, survive reorgs and keep
//! withdraw proofs up to date.
#![allow(clippy::cognitive_complexity)]

pub mod batch_info;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod msg_proof;
pub mod timestamp;

pub use driver::Driver;
