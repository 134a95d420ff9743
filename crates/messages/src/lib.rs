//! Bridge records shared across the indexer crates.
#![allow(clippy::uninlined_format_args)]

mod models;
mod types;

pub use models::*;
pub use types::*;
