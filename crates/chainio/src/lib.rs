//! `ChainIO` holds the contract bindings of the bridge and the helpers that derive data from
//! them.
pub mod gateway;
pub mod rollup;

use alloy::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    providers::{RootProvider, fillers::FillProvider, utils::JoinedRecommendedFillers},
    sol,
    sol_types::{SolCall, SolEvent},
};

pub use gateway::{IL1Gateways, IL2Gateways};
pub use rollup::{BatchRange, CalldataError, IScrollChain, decode_commit_batch_calldata};

/// Alias to the default provider with all recommended fillers (read-only).
pub type DefaultProvider = FillProvider<JoinedRecommendedFillers, RootProvider>;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, Default, PartialEq, Eq)]
    interface IScrollMessenger {
        event SentMessage(
            address indexed sender,
            address indexed target,
            uint256 value,
            uint256 messageNonce,
            uint256 gasLimit,
            bytes message
        );

        event RelayedMessage(bytes32 indexed messageHash);

        function relayMessage(address from, address to, uint256 value, uint256 nonce, bytes message) external;
    }
}

/// Computes the cross-domain message hash, i.e. the hash of the `relayMessage` calldata that
/// finalizes the message on the counterpart chain.
pub fn compute_message_hash(
    sender: Address,
    target: Address,
    value: U256,
    nonce: U256,
    message: Bytes,
) -> B256 {
    let call = IScrollMessenger::relayMessageCall { from: sender, to: target, value, nonce, message };
    keccak256(call.abi_encode())
}

impl IScrollMessenger::SentMessage {
    /// Hash identifying this message on both layers.
    pub fn message_hash(&self) -> B256 {
        compute_message_hash(self.sender, self.target, self.value, self.messageNonce, self.message.clone())
    }
}

/// Topics watched on L1: messenger events plus every deposit event.
pub fn l1_event_signatures() -> Vec<B256> {
    let mut topics =
        vec![IScrollMessenger::SentMessage::SIGNATURE_HASH, IScrollMessenger::RelayedMessage::SIGNATURE_HASH];
    topics.extend(gateway::deposit_signatures());
    topics
}

/// Topics watched on L2: messenger events plus every withdrawal event.
pub fn l2_event_signatures() -> Vec<B256> {
    let mut topics =
        vec![IScrollMessenger::SentMessage::SIGNATURE_HASH, IScrollMessenger::RelayedMessage::SIGNATURE_HASH];
    topics.extend(gateway::withdraw_signatures());
    topics
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    #[test]
    fn test_event_signatures() {
        assert_eq!(
            IScrollMessenger::SentMessage::SIGNATURE,
            "SentMessage(address,address,uint256,uint256,uint256,bytes)"
        );
        assert_eq!(IScrollMessenger::RelayedMessage::SIGNATURE, "RelayedMessage(bytes32)");
        assert_eq!(l1_event_signatures().len(), 8);
        assert_eq!(l2_event_signatures().len(), 8);
    }

    #[test]
    fn test_message_hash_is_hash_of_relay_calldata() {
        let sender = address!("0x1111111111111111111111111111111111111111");
        let target = address!("0x2222222222222222222222222222222222222222");
        let message = Bytes::from_static(b"hello");

        let hash = compute_message_hash(sender, target, U256::from(5), U256::from(9), message.clone());

        let selector = keccak256("relayMessage(address,address,uint256,uint256,bytes)");
        let calldata = IScrollMessenger::relayMessageCall {
            from: sender,
            to: target,
            value: U256::from(5),
            nonce: U256::from(9),
            message,
        }
        .abi_encode();
        assert_eq!(&calldata[..4], &selector[..4]);
        assert_eq!(hash, keccak256(&calldata));
        assert_ne!(hash, b256!("0x0000000000000000000000000000000000000000000000000000000000000000"));
    }

    #[test]
    fn test_sent_message_hash_matches_helper() {
        let event = IScrollMessenger::SentMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::from(10),
            messageNonce: U256::from(3),
            gasLimit: U256::from(200_000),
            message: Bytes::new(),
        };
        assert_eq!(
            event.message_hash(),
            compute_message_hash(event.sender, event.target, event.value, U256::from(3), Bytes::new())
        );
    }
}
