//! Core primitives shared by the bridge indexer crates.
/// Block header types
pub mod headers;
/// RPC transport retry policies
pub mod retries;
/// Withdrawal message accumulator
pub mod withdraw_trie;
