use std::fmt;

use serde::{Deserialize, Serialize};

/// Side of the bridge a record was observed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Settlement chain
    L1,
    /// Rollup chain
    L2,
}

impl Layer {
    /// Numeric tag used in storage.
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => f.write_str("L1"),
            Self::L2 => f.write_str("L2"),
        }
    }
}

/// Kind of asset moved by a cross message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    /// Native ether
    Eth,
    /// Fungible token
    Erc20,
    /// Non-fungible token
    Erc721,
    /// Multi token
    Erc1155,
}

impl AssetKind {
    /// Numeric tag used in storage.
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::Eth => 0,
            Self::Erc20 => 1,
            Self::Erc721 => 2,
            Self::Erc1155 => 3,
        }
    }
}
