use alloy_primitives::{Address, B256, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AssetKind, Layer};

/// Deposit (L1) or withdrawal (L2) emitted by a token gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossMessage {
    /// Layer the message originates from
    pub layer: Layer,
    /// Block number of the emitting transaction
    pub height: u64,
    /// Hash of the emitting transaction
    pub tx_hash: B256,
    /// Position of the gateway log in its block
    pub log_index: u64,
    /// Sender on the origin layer
    pub sender: Address,
    /// Recipient on the counterpart layer
    pub target: Address,
    /// Asset kind
    pub asset: AssetKind,
    /// Transferred amount, zero for non-fungible transfers
    pub amount: U256,
    /// Token address on L1
    pub l1_token: Option<Address>,
    /// Token address on L2
    pub l2_token: Option<Address>,
    /// Token ids of non-fungible transfers
    pub token_ids: Vec<U256>,
    /// Per-id amounts of ERC1155 transfers
    pub token_amounts: Vec<U256>,
    /// Hash of the paired messenger message, stitched in on insert
    pub msg_hash: Option<B256>,
    /// Hash of the transaction that relayed the message on the counterpart layer
    pub counterparty_tx_hash: Option<B256>,
    /// Timestamp of the emitting block, back-filled once confirmed
    pub block_timestamp: Option<DateTime<Utc>>,
}

/// A message finalized on the layer it was relayed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Layer where the message was relayed
    pub layer: Layer,
    /// Hash of the relayed message
    pub msg_hash: B256,
    /// Block number of the relay transaction
    pub height: u64,
    /// Hash of the relay transaction
    pub tx_hash: B256,
}

/// A message sent from L2 through the messenger; the leaves of the withdraw trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2SentMessage {
    /// Messenger nonce, the leaf index in the withdraw trie
    pub nonce: u64,
    /// Message hash, the leaf value in the withdraw trie
    pub msg_hash: B256,
    /// L2 block number
    pub height: u64,
    /// Hash of the sending transaction
    pub tx_hash: B256,
    /// Messenger caller, usually a gateway
    pub sender: Address,
    /// Message recipient on L1
    pub target: Address,
    /// User who initiated the withdrawal through a gateway, if any
    pub original_sender: Option<Address>,
    /// Ether value carried by the message
    pub value: U256,
    /// Message payload
    pub message: Bytes,
    /// Batch the message was committed in
    pub batch_index: Option<u64>,
    /// Encoded withdraw trie proof
    pub merkle_proof: Option<Bytes>,
}

/// Rollup batch committed on L1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupBatch {
    /// Batch index
    pub batch_index: u64,
    /// Batch hash
    pub batch_hash: B256,
    /// L1 block of the commit transaction
    pub commit_height: u64,
    /// First L2 block of the batch
    pub start_block: u64,
    /// Last L2 block of the batch
    pub end_block: u64,
}

/// Pairs a gateway log with the messenger message emitted in the same transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHashLink {
    /// Transaction carrying both events
    pub tx_hash: B256,
    /// Log index of the gateway event
    pub log_index: u64,
    /// Hash of the messenger message
    pub msg_hash: B256,
}

/// Everything decoded from one block range of one layer, persisted atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerEvents {
    /// Gateway deposits or withdrawals
    pub cross_messages: Vec<CrossMessage>,
    /// Messages relayed on this layer
    pub relayed_messages: Vec<RelayedMessage>,
    /// Messages sent from L2, empty on L1
    pub sent_messages: Vec<L2SentMessage>,
    /// Message hashes to stitch onto `cross_messages`
    pub hash_links: Vec<MessageHashLink>,
}

impl LayerEvents {
    /// Returns true if nothing was decoded.
    pub fn is_empty(&self) -> bool {
        self.cross_messages.is_empty()
            && self.relayed_messages.is_empty()
            && self.sent_messages.is_empty()
    }
}

/// Highest live height per message table of one layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessedHeights {
    /// `cross_message`
    pub cross_message: Option<u64>,
    /// `relayed_message`
    pub relayed_message: Option<u64>,
    /// `l2_sent_message`, always `None` on L1
    pub sent_message: Option<u64>,
}

impl ProcessedHeights {
    /// Highest height across all tables, so a partially applied write is never skipped.
    pub fn max(&self) -> Option<u64> {
        [self.cross_message, self.relayed_message, self.sent_message].into_iter().flatten().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_heights_max() {
        let heights = ProcessedHeights {
            cross_message: Some(10),
            relayed_message: Some(15),
            sent_message: Some(12),
        };
        assert_eq!(heights.max(), Some(15));
        assert_eq!(ProcessedHeights::default().max(), None);
        assert_eq!(
            ProcessedHeights { relayed_message: Some(3), ..Default::default() }.max(),
            Some(3)
        );
    }
}
