//! Withdraw proofs for L2 sent messages.
//!
//! The updater keeps a [`WithdrawTrie`] in step with committed batches: each batch's messages
//! are appended in nonce order and their proofs, relative to the root after the batch, are
//! persisted in one transaction.
use std::{sync::Arc, time::Duration};

use alloy_primitives::B256;
use eyre::{Result, ensure, eyre};
use primitives::withdraw_trie::{MerkleProof, TrieError, WithdrawTrie};
use storage::{BridgeStore, ProofUpdate, RollupBatch};
use tokio::{
    sync::Notify,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maintains the withdraw trie and the stored proofs.
#[derive(Debug)]
pub struct MsgProofUpdater {
    store: Arc<dyn BridgeStore>,
    interval: Duration,
    notify: Arc<Notify>,
    trie: Option<WithdrawTrie>,
    next_batch: u64,
}

impl MsgProofUpdater {
    /// Create an updater that runs every `interval` and whenever `notify` fires.
    pub fn new(store: Arc<dyn BridgeStore>, interval: Duration, notify: Arc<Notify>) -> Self {
        Self { store, interval, notify, trie: None, next_batch: 1 }
    }

    /// Root of the trie, once it has been recovered.
    pub fn message_root(&self) -> Option<B256> {
        self.trie.as_ref().map(WithdrawTrie::message_root)
    }

    /// Runs until `cancel` is cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let notify = Arc::clone(&self.notify);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Proof updater stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                _ = notify.notified() => debug!("New batches committed"),
            }

            if let Err(err) = self.update().await {
                warn!(err = %err, "Proof update failed, retrying next tick");
            }
        }
    }

    /// Proves every committed batch not proven yet, recovering the trie first if needed.
    pub async fn update(&mut self) -> Result<()> {
        if self.trie.is_none() {
            let Some((trie, replay)) = self.recover().await? else {
                debug!("No sent messages yet, nothing to prove");
                return Ok(());
            };
            self.trie = Some(trie);
            self.next_batch = 1;
            for batch in &replay {
                self.prove(batch).await?;
            }
            info!(
                next_nonce = self.trie.as_ref().map(WithdrawTrie::next_message_nonce),
                replayed = replay.len(),
                "Withdraw trie recovered"
            );
        }

        let Some(latest) = self.store.latest_rollup_batch().await? else { return Ok(()) };
        let proven = self.store.latest_proven_batch_index().await?;
        let start = self.next_batch.max(proven.map_or(1, |index| index + 1));

        for index in start..=latest.batch_index {
            let batch = self
                .store
                .rollup_batch_by_index(index)
                .await?
                .ok_or_else(|| eyre!("committed batch {index} is missing"))?;
            self.prove(&batch).await?;
        }
        Ok(())
    }

    /// Rebuilds the trie from the last stored proof and collects the batches to replay on top
    /// of it, oldest first. Returns `None` when there is nothing to build yet.
    async fn recover(&self) -> Result<Option<(WithdrawTrie, Vec<RollupBatch>)>> {
        let mut trie = WithdrawTrie::new();
        let checkpoint = self.store.latest_proven_l2_sent_message().await?;
        match &checkpoint {
            Some(message) => {
                let encoded = message
                    .merkle_proof
                    .as_ref()
                    .ok_or_else(|| eyre!("proven message {} has no proof", message.nonce))?;
                let proof = MerkleProof::decode(&encoded[..])?;
                trie.initialize(message.nonce, message.msg_hash, &proof)?;
                debug!(nonce = message.nonce, "Resuming withdraw trie from stored proof");
            }
            None => {
                if self.store.l2_sent_message_by_nonce(0).await?.is_none() {
                    return Ok(None);
                }
            }
        }

        let mut replay = Vec::new();
        if let Some(latest) = self.store.latest_rollup_batch().await? {
            let mut index = latest.batch_index;
            while index >= 1 {
                let Some(batch) = self.store.rollup_batch_by_index(index).await? else { break };
                let holds_checkpoint = checkpoint
                    .as_ref()
                    .is_some_and(|m| (batch.start_block..=batch.end_block).contains(&m.height));
                replay.push(batch);
                if holds_checkpoint {
                    break;
                }
                index -= 1;
            }
        }
        replay.reverse();
        Ok(Some((trie, replay)))
    }

    /// Appends one batch's messages and stores their proofs. The trie only advances once the
    /// proofs are stored.
    async fn prove(&mut self, batch: &RollupBatch) -> Result<()> {
        let result = match self.trie.as_mut() {
            Some(trie) => prove_batch(self.store.as_ref(), trie, batch).await,
            None => Err(eyre!("withdraw trie not recovered")),
        };
        match result {
            Ok(count) => {
                if count > 0 {
                    info!(batch_index = batch.batch_index, count, "Stored withdraw proofs");
                }
                self.next_batch = batch.batch_index + 1;
                Ok(())
            }
            Err(err) => {
                if err.downcast_ref::<TrieError>().is_some() {
                    // rebuild from storage on the next pass
                    self.trie = None;
                }
                Err(err.wrap_err(format!("failed to prove batch {}", batch.batch_index)))
            }
        }
    }
}

async fn prove_batch(store: &dyn BridgeStore, trie: &mut WithdrawTrie, batch: &RollupBatch) -> Result<usize> {
    let next_nonce = trie.next_message_nonce();
    let messages: Vec<_> = store
        .l2_sent_messages_in_blocks(batch.start_block, batch.end_block)
        .await?
        .into_iter()
        .filter(|m| m.nonce >= next_nonce)
        .collect();
    if messages.is_empty() {
        return Ok(0);
    }

    for (expected, message) in (next_nonce..).zip(&messages) {
        if message.nonce != expected {
            return Err(TrieError::NonceMismatch { expected, got: message.nonce }.into());
        }
    }

    let leaves: Vec<B256> = messages.iter().map(|m| m.msg_hash).collect();
    let mut updated = trie.clone();
    let proofs = updated.append_messages(next_nonce, &leaves)?;
    ensure!(
        proofs.len() == messages.len(),
        "{} proofs for {} messages in batch {}",
        proofs.len(),
        messages.len(),
        batch.batch_index
    );

    let updates: Vec<_> = messages
        .iter()
        .zip(&proofs)
        .map(|(message, proof)| ProofUpdate { msg_hash: message.msg_hash, proof: proof.encode() })
        .collect();
    store.save_message_proofs(batch.batch_index, &updates).await?;

    *trie = updated;
    Ok(updates.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use storage::{L2SentMessage, Layer, LayerEvents, MemoryStore};

    fn message(nonce: u64, height: u64) -> L2SentMessage {
        L2SentMessage {
            nonce,
            msg_hash: B256::from(U256::from(nonce + 1)),
            height,
            tx_hash: B256::with_last_byte(nonce as u8),
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            original_sender: None,
            value: U256::ZERO,
            message: Bytes::new(),
            batch_index: None,
            merkle_proof: None,
        }
    }

    fn batch(batch_index: u64, start_block: u64, end_block: u64) -> RollupBatch {
        RollupBatch { batch_index, batch_hash: B256::ZERO, commit_height: batch_index, start_block, end_block }
    }

    async fn store_with(messages: Vec<L2SentMessage>, batches: &[RollupBatch]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let events = LayerEvents { sent_messages: messages, ..Default::default() };
        store.save_layer_events(Layer::L2, &events).await.unwrap();
        store.insert_rollup_batches(batches).await.unwrap();
        store
    }

    fn updater(store: Arc<MemoryStore>) -> MsgProofUpdater {
        MsgProofUpdater::new(store, Duration::from_secs(10), Arc::new(Notify::new()))
    }

    fn reference_root(count: u64) -> B256 {
        let mut trie = WithdrawTrie::new();
        let leaves: Vec<_> = (0..count).map(|n| B256::from(U256::from(n + 1))).collect();
        trie.append_messages(0, &leaves).unwrap();
        trie.message_root()
    }

    fn verify(message: &L2SentMessage, root: B256) {
        let proof = MerkleProof::decode(message.merkle_proof.as_deref().unwrap()).unwrap();
        assert_eq!(proof.compute_root(message.msg_hash, message.nonce), root);
    }

    #[tokio::test]
    async fn defers_until_first_message() {
        let store = store_with(vec![], &[batch(1, 1, 10)]).await;
        let mut updater = updater(store);
        updater.update().await.unwrap();
        assert_eq!(updater.message_root(), None);
    }

    #[tokio::test]
    async fn proves_batches_in_order() {
        let messages = vec![message(0, 2), message(1, 5), message(2, 12), message(3, 14)];
        let store = store_with(messages, &[batch(1, 1, 10), batch(2, 11, 20)]).await;
        let mut updater = updater(store.clone());

        updater.update().await.unwrap();
        assert_eq!(updater.message_root(), Some(reference_root(4)));

        let stored = store.sent_messages().await;
        assert_eq!(stored.iter().map(|m| m.batch_index).collect::<Vec<_>>(), vec![Some(1), Some(1), Some(2), Some(2)]);
        // proofs are relative to the root after their batch
        verify(&stored[0], reference_root(2));
        verify(&stored[1], reference_root(2));
        verify(&stored[3], reference_root(4));
        assert_eq!(store.latest_proven_batch_index().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn continues_with_new_batches() {
        let messages = vec![message(0, 2), message(1, 12), message(2, 22)];
        let store = store_with(messages, &[batch(1, 1, 10)]).await;
        let mut updater = updater(store.clone());
        updater.update().await.unwrap();
        assert_eq!(updater.message_root(), Some(reference_root(1)));

        store.insert_rollup_batches(&[batch(2, 11, 20), batch(3, 21, 30)]).await.unwrap();
        updater.update().await.unwrap();
        assert_eq!(updater.message_root(), Some(reference_root(3)));
        verify(&store.sent_messages().await[2], reference_root(3));
    }

    #[tokio::test]
    async fn nonce_gap_is_rejected_and_trie_rebuilt() {
        let messages = vec![message(0, 2), message(2, 12)];
        let store = store_with(messages, &[batch(1, 1, 10), batch(2, 11, 20)]).await;
        let mut updater = updater(store.clone());

        let err = updater.update().await.unwrap_err();
        assert!(err.downcast_ref::<TrieError>().is_some());
        assert_eq!(updater.message_root(), None);

        // batch 1 stays proven, batch 2 is retried on every pass
        assert_eq!(store.latest_proven_batch_index().await.unwrap(), Some(1));
        assert!(updater.update().await.is_err());
    }

    #[tokio::test]
    async fn failed_write_does_not_advance_trie() {
        let store = store_with(vec![message(0, 2), message(1, 3)], &[batch(1, 1, 10)]).await;
        let mut updater = updater(store.clone());

        store.fail_next_write();
        assert!(updater.update().await.is_err());
        assert!(store.sent_messages().await.iter().all(|m| m.merkle_proof.is_none()));

        updater.update().await.unwrap();
        assert_eq!(updater.message_root(), Some(reference_root(2)));
        verify(&store.sent_messages().await[1], reference_root(2));
    }

    #[tokio::test]
    async fn recovers_from_last_stored_proof() {
        let messages = vec![message(0, 2), message(1, 5), message(2, 12), message(3, 14)];
        let batches = [batch(1, 1, 10), batch(2, 11, 20)];
        let store = store_with(messages, &batches).await;
        updater(store.clone()).update().await.unwrap();

        // a restarted updater resumes from nonce 3 and proves batch 3
        store
            .save_layer_events(Layer::L2, &LayerEvents { sent_messages: vec![message(4, 25)], ..Default::default() })
            .await
            .unwrap();
        store.insert_rollup_batches(&[batch(3, 21, 30)]).await.unwrap();

        let mut restarted = updater(store.clone());
        restarted.update().await.unwrap();
        assert_eq!(restarted.message_root(), Some(reference_root(5)));
        verify(&store.sent_messages().await[4], reference_root(5));
    }

    #[tokio::test]
    async fn recovery_skips_deleted_messages() {
        let messages = vec![message(0, 2), message(1, 5), message(2, 12), message(3, 14)];
        let store = store_with(messages, &[batch(1, 1, 10), batch(2, 11, 20)]).await;
        updater(store.clone()).update().await.unwrap();

        // nonce 2 and above are reorged out and sent again
        store.rollback(Layer::L2, 10).await.unwrap();
        let resent = vec![message(2, 13), message(3, 15)];
        store
            .save_layer_events(Layer::L2, &LayerEvents { sent_messages: resent, ..Default::default() })
            .await
            .unwrap();

        let mut restarted = updater(store.clone());
        restarted.update().await.unwrap();
        assert_eq!(restarted.message_root(), Some(reference_root(4)));

        let stored = store.sent_messages().await;
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[2].height, 13);
        verify(&stored[2], reference_root(4));
        verify(&stored[3], reference_root(4));
    }
}
