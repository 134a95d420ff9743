//! In-memory [`BridgeStore`] used by tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, bail};
use messages::{
    CrossMessage, L2SentMessage, Layer, LayerEvents, ProcessedHeights, RelayedMessage,
    RollupBatch,
};
use tokio::sync::Mutex;

use crate::store::{BridgeStore, ProofUpdate, RollbackSummary};

#[derive(Debug, Clone)]
struct Stored<T> {
    value: T,
    deleted: bool,
}

impl<T> Stored<T> {
    const fn live(value: T) -> Self {
        Self { value, deleted: false }
    }
}

#[derive(Debug, Default)]
struct State {
    cross_messages: Vec<Stored<CrossMessage>>,
    relayed_messages: Vec<Stored<RelayedMessage>>,
    sent_messages: Vec<Stored<L2SentMessage>>,
    batches: Vec<RollupBatch>,
}

impl State {
    fn live_sent(&self) -> impl Iterator<Item = &L2SentMessage> {
        self.sent_messages.iter().filter(|m| !m.deleted).map(|m| &m.value)
    }
}

/// Store keeping every row in memory, with the same atomicity as [`crate::PgStore`]: a write
/// either applies fully or not at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next_write: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write fail before touching any row.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            bail!("injected write failure");
        }
        Ok(())
    }

    /// Live cross messages of `layer`.
    pub async fn cross_messages(&self, layer: Layer) -> Vec<CrossMessage> {
        let state = self.state.lock().await;
        state
            .cross_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer)
            .map(|m| m.value.clone())
            .collect()
    }

    /// Live relayed messages of `layer`.
    pub async fn relayed_messages(&self, layer: Layer) -> Vec<RelayedMessage> {
        let state = self.state.lock().await;
        state
            .relayed_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer)
            .map(|m| m.value.clone())
            .collect()
    }

    /// Live sent messages ordered by nonce.
    pub async fn sent_messages(&self) -> Vec<L2SentMessage> {
        let state = self.state.lock().await;
        let mut messages: Vec<_> = state.live_sent().cloned().collect();
        messages.sort_by_key(|m| m.nonce);
        messages
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn processed_heights(&self, layer: Layer) -> Result<ProcessedHeights> {
        let state = self.state.lock().await;
        let cross_message = state
            .cross_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer)
            .map(|m| m.value.height)
            .max();
        let relayed_message = state
            .relayed_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer)
            .map(|m| m.value.height)
            .max();
        let sent_message = match layer {
            Layer::L1 => None,
            Layer::L2 => state.live_sent().map(|m| m.height).max(),
        };
        Ok(ProcessedHeights { cross_message, relayed_message, sent_message })
    }

    async fn save_layer_events(&self, layer: Layer, events: &LayerEvents) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;

        for message in &events.sent_messages {
            if state.live_sent().any(|m| m.nonce == message.nonce || m.msg_hash == message.msg_hash) {
                bail!("duplicate sent message with nonce {}", message.nonce);
            }
        }

        for message in &events.cross_messages {
            let exists = state.cross_messages.iter().any(|m| {
                !m.deleted &&
                    m.value.layer == message.layer &&
                    m.value.tx_hash == message.tx_hash &&
                    m.value.log_index == message.log_index
            });
            if !exists {
                state.cross_messages.push(Stored::live(message.clone()));
            }
        }
        for relayed in &events.relayed_messages {
            let exists = state.relayed_messages.iter().any(|m| {
                !m.deleted && m.value.layer == relayed.layer && m.value.msg_hash == relayed.msg_hash
            });
            if !exists {
                state.relayed_messages.push(Stored::live(relayed.clone()));
            }
            for message in state.cross_messages.iter_mut().filter(|m| {
                !m.deleted && m.value.layer != relayed.layer && m.value.msg_hash == Some(relayed.msg_hash)
            }) {
                message.value.counterparty_tx_hash = Some(relayed.tx_hash);
            }
        }
        for message in &events.sent_messages {
            state.sent_messages.push(Stored::live(message.clone()));
        }
        for link in &events.hash_links {
            for message in state.cross_messages.iter_mut().filter(|m| {
                !m.deleted &&
                    m.value.layer == layer &&
                    m.value.tx_hash == link.tx_hash &&
                    m.value.log_index == link.log_index
            }) {
                message.value.msg_hash = Some(link.msg_hash);
            }
        }
        Ok(())
    }

    async fn rollback(&self, layer: Layer, height: u64) -> Result<RollbackSummary> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let mut summary = RollbackSummary::default();

        let unlinked: Vec<_> = state
            .relayed_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer && m.value.height > height)
            .map(|m| m.value.msg_hash)
            .collect();
        for message in state.cross_messages.iter_mut().filter(|m| {
            !m.deleted && m.value.layer != layer && m.value.msg_hash.is_some_and(|h| unlinked.contains(&h))
        }) {
            message.value.counterparty_tx_hash = None;
        }

        for message in state
            .cross_messages
            .iter_mut()
            .filter(|m| !m.deleted && m.value.layer == layer && m.value.height > height)
        {
            message.deleted = true;
            summary.cross_messages += 1;
        }
        for message in state
            .relayed_messages
            .iter_mut()
            .filter(|m| !m.deleted && m.value.layer == layer && m.value.height > height)
        {
            message.deleted = true;
            summary.relayed_messages += 1;
        }
        if layer == Layer::L2 {
            for message in
                state.sent_messages.iter_mut().filter(|m| !m.deleted && m.value.height > height)
            {
                message.deleted = true;
                summary.sent_messages += 1;
            }
        }
        Ok(summary)
    }

    async fn insert_rollup_batches(&self, batches: &[RollupBatch]) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        for batch in batches {
            if state.batches.iter().any(|b| b.batch_index == batch.batch_index) {
                bail!("duplicate batch {}", batch.batch_index);
            }
        }
        state.batches.extend_from_slice(batches);
        Ok(())
    }

    async fn latest_rollup_batch(&self) -> Result<Option<RollupBatch>> {
        let state = self.state.lock().await;
        Ok(state.batches.iter().max_by_key(|b| b.batch_index).copied())
    }

    async fn rollup_batch_by_index(&self, batch_index: u64) -> Result<Option<RollupBatch>> {
        let state = self.state.lock().await;
        Ok(state.batches.iter().find(|b| b.batch_index == batch_index).copied())
    }

    async fn l2_sent_message_by_nonce(&self, nonce: u64) -> Result<Option<L2SentMessage>> {
        let state = self.state.lock().await;
        Ok(state.live_sent().find(|m| m.nonce == nonce).cloned())
    }

    async fn latest_proven_l2_sent_message(&self) -> Result<Option<L2SentMessage>> {
        let state = self.state.lock().await;
        Ok(state.live_sent().filter(|m| m.merkle_proof.is_some()).max_by_key(|m| m.nonce).cloned())
    }

    async fn l2_sent_messages_in_blocks(&self, start: u64, end: u64) -> Result<Vec<L2SentMessage>> {
        let state = self.state.lock().await;
        let mut messages: Vec<_> =
            state.live_sent().filter(|m| (start..=end).contains(&m.height)).cloned().collect();
        messages.sort_by_key(|m| m.nonce);
        Ok(messages)
    }

    async fn latest_proven_batch_index(&self) -> Result<Option<u64>> {
        let state = self.state.lock().await;
        Ok(state.live_sent().filter(|m| m.merkle_proof.is_some()).filter_map(|m| m.batch_index).max())
    }

    async fn save_message_proofs(&self, batch_index: u64, proofs: &[ProofUpdate]) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let mut positions = Vec::with_capacity(proofs.len());
        for update in proofs {
            let matches: Vec<usize> = state
                .sent_messages
                .iter()
                .enumerate()
                .filter(|(_, m)| !m.deleted && m.value.msg_hash == update.msg_hash)
                .map(|(i, _)| i)
                .collect();
            if matches.len() != 1 {
                bail!(
                    "expected one live message with hash {}, found {}",
                    update.msg_hash,
                    matches.len()
                );
            }
            positions.push(matches[0]);
        }
        for (position, update) in positions.into_iter().zip(proofs) {
            let message = &mut state.sent_messages[position].value;
            message.merkle_proof = Some(update.proof.clone());
            message.batch_index = Some(batch_index);
        }
        Ok(())
    }

    async fn earliest_height_without_timestamp(&self, layer: Layer) -> Result<Option<u64>> {
        let state = self.state.lock().await;
        Ok(state
            .cross_messages
            .iter()
            .filter(|m| !m.deleted && m.value.layer == layer && m.value.block_timestamp.is_none())
            .map(|m| m.value.height)
            .min())
    }

    async fn set_block_timestamp(
        &self,
        layer: Layer,
        height: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for message in state
            .cross_messages
            .iter_mut()
            .filter(|m| !m.deleted && m.value.layer == layer && m.value.height == height)
        {
            message.value.block_timestamp = Some(timestamp);
            updated += 1;
        }
        Ok(updated)
    }
}
