use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use messages::{L2SentMessage, Layer, LayerEvents, ProcessedHeights, RollupBatch};

/// Proof computed for one sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofUpdate {
    /// Hash of the message the proof belongs to
    pub msg_hash: B256,
    /// Encoded withdraw trie proof
    pub proof: Bytes,
}

/// Rows soft-deleted by a rollback, per table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// `cross_message` rows
    pub cross_messages: u64,
    /// `relayed_message` rows
    pub relayed_messages: u64,
    /// `l2_sent_message` rows
    pub sent_messages: u64,
}

/// Persistence used by the fetchers and the proof updater.
///
/// Every method that writes more than one row is atomic: either all of its rows become
/// visible or none do.
#[async_trait]
pub trait BridgeStore: Send + Sync + std::fmt::Debug {
    /// Highest live height in each message table of `layer`.
    async fn processed_heights(&self, layer: Layer) -> Result<ProcessedHeights>;

    /// Inserts everything decoded from one block range and stitches message hashes onto the
    /// gateway rows of the same transactions.
    async fn save_layer_events(&self, layer: Layer, events: &LayerEvents) -> Result<()>;

    /// Soft-deletes every message row of `layer` above `height`.
    async fn rollback(&self, layer: Layer, height: u64) -> Result<RollbackSummary>;

    /// Inserts committed batches.
    async fn insert_rollup_batches(&self, batches: &[RollupBatch]) -> Result<()>;

    /// Batch with the highest index.
    async fn latest_rollup_batch(&self) -> Result<Option<RollupBatch>>;

    /// Batch by index.
    async fn rollup_batch_by_index(&self, batch_index: u64) -> Result<Option<RollupBatch>>;

    /// Live sent message with the given nonce.
    async fn l2_sent_message_by_nonce(&self, nonce: u64) -> Result<Option<L2SentMessage>>;

    /// Live sent message with the highest nonce that carries a proof.
    async fn latest_proven_l2_sent_message(&self) -> Result<Option<L2SentMessage>>;

    /// Live sent messages in blocks `start..=end`, ordered by nonce.
    async fn l2_sent_messages_in_blocks(&self, start: u64, end: u64) -> Result<Vec<L2SentMessage>>;

    /// Highest batch index recorded on a live sent message.
    async fn latest_proven_batch_index(&self) -> Result<Option<u64>>;

    /// Stores the proofs of one batch's messages.
    async fn save_message_proofs(&self, batch_index: u64, proofs: &[ProofUpdate]) -> Result<()>;

    /// Lowest live cross message height of `layer` lacking a block timestamp.
    async fn earliest_height_without_timestamp(&self, layer: Layer) -> Result<Option<u64>>;

    /// Sets the block timestamp on every live cross message of `layer` at `height`.
    async fn set_block_timestamp(
        &self,
        layer: Layer,
        height: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<u64>;
}
