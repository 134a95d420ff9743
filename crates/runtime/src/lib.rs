//! Runtime utilities for the bridge indexer.
pub mod shutdown;
