//! Decoding of messenger, gateway and rollup logs.
//!
//! Logs must be passed in chain order: a gateway event is paired with the `SentMessage` that
//! precedes it in the same transaction.
use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolEvent,
};
use alloy_rpc_types_eth::Log;
use chainio::{
    IL1Gateways, IL2Gateways, IScrollChain::CommitBatch, IScrollMessenger::{RelayedMessage, SentMessage},
    decode_commit_batch_calldata,
};
use eyre::{OptionExt, Result, WrapErr, ensure};
use messages::{
    AssetKind, CrossMessage, L2SentMessage, Layer, LayerEvents, MessageHashLink, RelayedMessage as RelayedRow,
    RollupBatch,
};
use tracing::debug;

use crate::ChainClient;

/// Position of a log in the chain.
#[derive(Debug, Clone, Copy)]
struct LogMeta {
    height: u64,
    tx_hash: B256,
    log_index: u64,
}

impl TryFrom<&Log> for LogMeta {
    type Error = eyre::Report;

    fn try_from(log: &Log) -> Result<Self> {
        Ok(Self {
            height: log.block_number.ok_or_eyre("log without block number")?,
            tx_hash: log.transaction_hash.ok_or_eyre("log without transaction hash")?,
            log_index: log.log_index.ok_or_eyre("log without log index")?,
        })
    }
}

impl LogMeta {
    fn cross_message(self, layer: Layer, sender: Address, target: Address, asset: AssetKind) -> CrossMessage {
        CrossMessage {
            layer,
            height: self.height,
            tx_hash: self.tx_hash,
            log_index: self.log_index,
            sender,
            target,
            asset,
            amount: U256::ZERO,
            l1_token: None,
            l2_token: None,
            token_ids: Vec::new(),
            token_amounts: Vec::new(),
            msg_hash: None,
            counterparty_tx_hash: None,
            block_timestamp: None,
        }
    }
}

fn decode<E: SolEvent>(log: &Log) -> Result<E> {
    Ok(log.log_decode::<E>().wrap_err_with(|| format!("failed to decode {}", E::SIGNATURE))?.inner.data)
}

/// Live logs paired with their topic, skipping removed and anonymous ones.
fn live_logs(logs: &[Log]) -> impl Iterator<Item = (B256, &Log)> {
    logs.iter().filter(|log| !log.removed).filter_map(|log| log.topics().first().map(|t| (*t, log)))
}

fn l1_gateway_message(topic: B256, log: &Log, meta: LogMeta) -> Result<Option<CrossMessage>> {
    use IL1Gateways::{
        BatchDepositERC721, BatchDepositERC1155, DepositERC20, DepositERC721, DepositERC1155, DepositETH,
    };
    let layer = Layer::L1;

    let message = match topic {
        t if t == DepositETH::SIGNATURE_HASH => {
            let e = decode::<DepositETH>(log)?;
            CrossMessage { amount: e.amount, ..meta.cross_message(layer, e.from, e.to, AssetKind::Eth) }
        }
        t if t == DepositERC20::SIGNATURE_HASH => {
            let e = decode::<DepositERC20>(log)?;
            CrossMessage {
                amount: e.amount,
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc20)
            }
        }
        t if t == DepositERC721::SIGNATURE_HASH => {
            let e = decode::<DepositERC721>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: vec![e.tokenId],
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc721)
            }
        }
        t if t == BatchDepositERC721::SIGNATURE_HASH => {
            let e = decode::<BatchDepositERC721>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: e.tokenIds,
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc721)
            }
        }
        t if t == DepositERC1155::SIGNATURE_HASH => {
            let e = decode::<DepositERC1155>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: vec![e.tokenId],
                token_amounts: vec![e.amount],
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc1155)
            }
        }
        t if t == BatchDepositERC1155::SIGNATURE_HASH => {
            let e = decode::<BatchDepositERC1155>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: e.tokenIds,
                token_amounts: e.amounts,
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc1155)
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

fn l2_gateway_message(topic: B256, log: &Log, meta: LogMeta) -> Result<Option<CrossMessage>> {
    use IL2Gateways::{
        BatchWithdrawERC721, BatchWithdrawERC1155, WithdrawERC20, WithdrawERC721, WithdrawERC1155,
        WithdrawETH,
    };
    let layer = Layer::L2;

    let message = match topic {
        t if t == WithdrawETH::SIGNATURE_HASH => {
            let e = decode::<WithdrawETH>(log)?;
            CrossMessage { amount: e.amount, ..meta.cross_message(layer, e.from, e.to, AssetKind::Eth) }
        }
        t if t == WithdrawERC20::SIGNATURE_HASH => {
            let e = decode::<WithdrawERC20>(log)?;
            CrossMessage {
                amount: e.amount,
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc20)
            }
        }
        t if t == WithdrawERC721::SIGNATURE_HASH => {
            let e = decode::<WithdrawERC721>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: vec![e.tokenId],
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc721)
            }
        }
        t if t == BatchWithdrawERC721::SIGNATURE_HASH => {
            let e = decode::<BatchWithdrawERC721>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: e.tokenIds,
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc721)
            }
        }
        t if t == WithdrawERC1155::SIGNATURE_HASH => {
            let e = decode::<WithdrawERC1155>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: vec![e.tokenId],
                token_amounts: vec![e.amount],
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc1155)
            }
        }
        t if t == BatchWithdrawERC1155::SIGNATURE_HASH => {
            let e = decode::<BatchWithdrawERC1155>(log)?;
            CrossMessage {
                l1_token: Some(e.l1Token),
                l2_token: Some(e.l2Token),
                token_ids: e.tokenIds,
                token_amounts: e.amounts,
                ..meta.cross_message(layer, e.from, e.to, AssetKind::Erc1155)
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// Last `SentMessage` seen, as `(tx_hash, msg_hash)`.
type PendingSent = Option<(B256, B256)>;

fn link_to_sent(pending: PendingSent, message: &CrossMessage) -> Option<MessageHashLink> {
    let (tx_hash, msg_hash) = pending?;
    (tx_hash == message.tx_hash).then_some(MessageHashLink {
        tx_hash,
        log_index: message.log_index,
        msg_hash,
    })
}

/// Decodes L1 messenger and deposit logs.
pub fn parse_l1_logs(logs: &[Log]) -> Result<LayerEvents> {
    let mut events = LayerEvents::default();
    let mut pending: PendingSent = None;

    for (topic, log) in live_logs(logs) {
        let meta = LogMeta::try_from(log)?;
        match topic {
            t if t == SentMessage::SIGNATURE_HASH => {
                let event = decode::<SentMessage>(log)?;
                pending = Some((meta.tx_hash, event.message_hash()));
            }
            t if t == RelayedMessage::SIGNATURE_HASH => {
                let event = decode::<RelayedMessage>(log)?;
                events.relayed_messages.push(relayed_row(Layer::L1, event.messageHash, meta));
            }
            _ => {
                if let Some(message) = l1_gateway_message(topic, log, meta)? {
                    events.hash_links.extend(link_to_sent(pending, &message));
                    events.cross_messages.push(message);
                }
            }
        }
    }

    Ok(events)
}

/// Decodes L2 messenger and withdrawal logs.
///
/// Every `SentMessage` becomes an [`L2SentMessage`]; a following withdrawal in the same
/// transaction supplies its original sender.
pub fn parse_l2_logs(logs: &[Log]) -> Result<LayerEvents> {
    let mut events = LayerEvents::default();
    let mut pending: PendingSent = None;

    for (topic, log) in live_logs(logs) {
        let meta = LogMeta::try_from(log)?;
        match topic {
            t if t == SentMessage::SIGNATURE_HASH => {
                let event = decode::<SentMessage>(log)?;
                let msg_hash = event.message_hash();
                pending = Some((meta.tx_hash, msg_hash));
                events.sent_messages.push(L2SentMessage {
                    nonce: u64::try_from(event.messageNonce).wrap_err("message nonce overflows u64")?,
                    msg_hash,
                    height: meta.height,
                    tx_hash: meta.tx_hash,
                    sender: event.sender,
                    target: event.target,
                    original_sender: None,
                    value: event.value,
                    message: event.message,
                    batch_index: None,
                    merkle_proof: None,
                });
            }
            t if t == RelayedMessage::SIGNATURE_HASH => {
                let event = decode::<RelayedMessage>(log)?;
                events.relayed_messages.push(relayed_row(Layer::L2, event.messageHash, meta));
            }
            _ => {
                if let Some(message) = l2_gateway_message(topic, log, meta)? {
                    if let Some(link) = link_to_sent(pending, &message) {
                        if let Some(sent) =
                            events.sent_messages.iter_mut().rev().find(|s| s.msg_hash == link.msg_hash)
                        {
                            sent.original_sender = Some(message.sender);
                        }
                        events.hash_links.push(link);
                    }
                    events.cross_messages.push(message);
                }
            }
        }
    }

    Ok(events)
}

const fn relayed_row(layer: Layer, msg_hash: B256, meta: LogMeta) -> RelayedRow {
    RelayedRow { layer, msg_hash, height: meta.height, tx_hash: meta.tx_hash }
}

/// A `CommitBatch` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitBatchLog {
    /// Committed batch index
    pub batch_index: u64,
    /// Committed batch hash
    pub batch_hash: B256,
    /// Commit transaction
    pub tx_hash: B256,
    /// L1 block of the commit transaction
    pub height: u64,
}

impl CommitBatchLog {
    /// Recovers the L2 block range of the batch from the commit transaction's calldata.
    pub async fn resolve(&self, client: &dyn ChainClient) -> Result<RollupBatch> {
        let input = client.transaction_input(self.tx_hash).await?;
        let range = decode_commit_batch_calldata(&input)
            .wrap_err_with(|| format!("commit transaction {} of batch {}", self.tx_hash, self.batch_index))?;
        ensure!(
            range.batch_index == self.batch_index,
            "calldata of {} commits batch {}, event reports {}",
            self.tx_hash,
            range.batch_index,
            self.batch_index
        );
        debug!(batch_index = self.batch_index, start = range.start_block, end = range.end_block, "Resolved batch");
        Ok(RollupBatch {
            batch_index: self.batch_index,
            batch_hash: self.batch_hash,
            commit_height: self.height,
            start_block: range.start_block,
            end_block: range.end_block,
        })
    }
}

/// Decodes `CommitBatch` logs.
pub fn parse_commit_batch_logs(logs: &[Log]) -> Result<Vec<CommitBatchLog>> {
    live_logs(logs)
        .filter(|(topic, _)| *topic == CommitBatch::SIGNATURE_HASH)
        .map(|(_, log)| {
            let meta = LogMeta::try_from(log)?;
            let event = decode::<CommitBatch>(log)?;
            Ok(CommitBatchLog {
                batch_index: u64::try_from(event.batchIndex).wrap_err("batch index overflows u64")?,
                batch_hash: event.batchHash,
                tx_hash: meta.tx_hash,
                height: meta.height,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, Log as PrimitiveLog};

    fn rpc_log<E: SolEvent>(event: &E, height: u64, tx: u8, log_index: u64) -> Log {
        Log {
            inner: PrimitiveLog { address: Address::repeat_byte(0xaa), data: event.encode_log_data() },
            block_number: Some(height),
            transaction_hash: Some(B256::repeat_byte(tx)),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    fn sent(nonce: u64) -> SentMessage {
        SentMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::from(100),
            messageNonce: U256::from(nonce),
            gasLimit: U256::from(200_000),
            message: Bytes::from_static(b"payload"),
        }
    }

    #[test]
    fn deposit_is_linked_to_preceding_message() {
        let message = sent(4);
        let deposit = IL1Gateways::DepositERC20 {
            l1Token: Address::repeat_byte(3),
            l2Token: Address::repeat_byte(4),
            from: Address::repeat_byte(5),
            to: Address::repeat_byte(6),
            amount: U256::from(42),
            data: Bytes::new(),
        };
        let logs = vec![rpc_log(&message, 10, 1, 0), rpc_log(&deposit, 10, 1, 1)];

        let events = parse_l1_logs(&logs).unwrap();
        assert_eq!(events.cross_messages.len(), 1);
        let row = &events.cross_messages[0];
        assert_eq!(row.asset, AssetKind::Erc20);
        assert_eq!(row.amount, U256::from(42));
        assert_eq!(row.l1_token, Some(Address::repeat_byte(3)));
        assert_eq!(row.sender, Address::repeat_byte(5));
        assert_eq!(
            events.hash_links,
            vec![MessageHashLink { tx_hash: B256::repeat_byte(1), log_index: 1, msg_hash: message.message_hash() }]
        );
        assert!(events.sent_messages.is_empty());
    }

    #[test]
    fn deposit_in_other_transaction_is_not_linked() {
        let deposit = IL1Gateways::DepositETH {
            from: Address::repeat_byte(5),
            to: Address::repeat_byte(6),
            amount: U256::from(1),
            data: Bytes::new(),
        };
        let logs = vec![rpc_log(&sent(0), 10, 1, 0), rpc_log(&deposit, 11, 2, 0)];

        let events = parse_l1_logs(&logs).unwrap();
        assert_eq!(events.cross_messages.len(), 1);
        assert!(events.hash_links.is_empty());
    }

    #[test]
    fn relayed_and_removed_logs() {
        let relayed = RelayedMessage { messageHash: B256::repeat_byte(9) };
        let mut removed = rpc_log(&relayed, 12, 3, 1);
        removed.removed = true;
        let logs = vec![rpc_log(&relayed, 12, 3, 0), removed];

        let events = parse_l1_logs(&logs).unwrap();
        assert_eq!(
            events.relayed_messages,
            vec![RelayedRow { layer: Layer::L1, msg_hash: B256::repeat_byte(9), height: 12, tx_hash: B256::repeat_byte(3) }]
        );
    }

    #[test]
    fn withdrawal_sets_original_sender() {
        let withdraw = IL2Gateways::BatchWithdrawERC1155 {
            l1Token: Address::repeat_byte(3),
            l2Token: Address::repeat_byte(4),
            from: Address::repeat_byte(7),
            to: Address::repeat_byte(8),
            tokenIds: vec![U256::from(1), U256::from(2)],
            amounts: vec![U256::from(10), U256::from(20)],
        };
        let logs = vec![
            rpc_log(&sent(0), 20, 1, 0),
            rpc_log(&sent(1), 20, 2, 1),
            rpc_log(&withdraw, 20, 2, 2),
        ];

        let events = parse_l2_logs(&logs).unwrap();
        assert_eq!(events.sent_messages.len(), 2);
        assert_eq!(events.sent_messages[0].nonce, 0);
        assert_eq!(events.sent_messages[0].original_sender, None);
        assert_eq!(events.sent_messages[1].original_sender, Some(Address::repeat_byte(7)));
        assert_eq!(events.sent_messages[1].msg_hash, sent(1).message_hash());

        let row = &events.cross_messages[0];
        assert_eq!(row.layer, Layer::L2);
        assert_eq!(row.asset, AssetKind::Erc1155);
        assert_eq!(row.token_amounts, vec![U256::from(10), U256::from(20)]);
        assert_eq!(events.hash_links.len(), 1);
        assert_eq!(events.hash_links[0].log_index, 2);
    }

    #[test]
    fn log_without_position_is_rejected() {
        let mut log = rpc_log(&sent(0), 1, 1, 0);
        log.block_number = None;
        assert!(parse_l2_logs(&[log]).is_err());
    }

    #[test]
    fn commit_batch_logs() {
        let commit = CommitBatch { batchIndex: U256::from(7), batchHash: B256::repeat_byte(2) };
        let logs = vec![rpc_log(&commit, 30, 5, 0), rpc_log(&sent(0), 30, 5, 1)];

        let batches = parse_commit_batch_logs(&logs).unwrap();
        assert_eq!(
            batches,
            vec![CommitBatchLog {
                batch_index: 7,
                batch_hash: B256::repeat_byte(2),
                tx_hash: B256::repeat_byte(5),
                height: 30
            }]
        );
    }
}
