//! Block header data structures.
use alloy_primitives::{BlockHash, BlockNumber};
use serde::{Deserialize, Serialize};

/// The subset of a block header needed to follow the canonical chain.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: BlockNumber,
    /// Block hash
    pub hash: BlockHash,
    /// Block parent hash
    pub parent_hash: BlockHash,
    /// Block timestamp
    pub timestamp: u64,
}

impl BlockHeader {
    /// Returns true if `child` directly extends this header.
    pub fn is_parent_of(&self, child: &Self) -> bool {
        self.number + 1 == child.number && self.hash == child.parent_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_is_parent_of() {
        let parent = BlockHeader {
            number: 7,
            hash: B256::repeat_byte(7),
            parent_hash: B256::repeat_byte(6),
            timestamp: 70,
        };
        let child = BlockHeader {
            number: 8,
            hash: B256::repeat_byte(8),
            parent_hash: B256::repeat_byte(7),
            timestamp: 82,
        };
        assert!(parent.is_parent_of(&child));
        assert!(!child.is_parent_of(&parent));

        let sibling = BlockHeader { parent_hash: B256::repeat_byte(9), ..child };
        assert!(!parent.is_parent_of(&sibling));
    }
}
