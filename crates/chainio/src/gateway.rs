//! Token gateway events emitted alongside a messenger `SentMessage`.
use alloy::{primitives::B256, sol, sol_types::SolEvent};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, Default, PartialEq, Eq)]
    interface IL1Gateways {
        event DepositETH(address indexed from, address indexed to, uint256 amount, bytes data);

        event DepositERC20(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 amount,
            bytes data
        );

        event DepositERC721(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 tokenId
        );

        event BatchDepositERC721(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256[] tokenIds
        );

        event DepositERC1155(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 tokenId,
            uint256 amount
        );

        event BatchDepositERC1155(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256[] tokenIds,
            uint256[] amounts
        );
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, Default, PartialEq, Eq)]
    interface IL2Gateways {
        event WithdrawETH(address indexed from, address indexed to, uint256 amount, bytes data);

        event WithdrawERC20(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 amount,
            bytes data
        );

        event WithdrawERC721(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 tokenId
        );

        event BatchWithdrawERC721(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256[] tokenIds
        );

        event WithdrawERC1155(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256 tokenId,
            uint256 amount
        );

        event BatchWithdrawERC1155(
            address indexed l1Token,
            address indexed l2Token,
            address indexed from,
            address to,
            uint256[] tokenIds,
            uint256[] amounts
        );
    }
}

pub(crate) fn deposit_signatures() -> [B256; 6] {
    use IL1Gateways::*;
    [
        DepositETH::SIGNATURE_HASH,
        DepositERC20::SIGNATURE_HASH,
        DepositERC721::SIGNATURE_HASH,
        BatchDepositERC721::SIGNATURE_HASH,
        DepositERC1155::SIGNATURE_HASH,
        BatchDepositERC1155::SIGNATURE_HASH,
    ]
}

pub(crate) fn withdraw_signatures() -> [B256; 6] {
    use IL2Gateways::*;
    [
        WithdrawETH::SIGNATURE_HASH,
        WithdrawERC20::SIGNATURE_HASH,
        WithdrawERC721::SIGNATURE_HASH,
        BatchWithdrawERC721::SIGNATURE_HASH,
        WithdrawERC1155::SIGNATURE_HASH,
        BatchWithdrawERC1155::SIGNATURE_HASH,
    ]
}
