//! Append-only Merkle accumulator over L2 withdrawal message hashes.
//!
//! The layout follows the L2 message queue contract: the tree grows in height as leaves are
//! appended, the root lives at `branches[height]` and the proof of a leaf is the list of its
//! siblings from the leaf level up to the current height. Empty right subtrees hash as the
//! precomputed zero node of their level.
use std::collections::HashMap;

use alloy_primitives::{B256, Bytes, keccak256};
use derive_more::Deref;
use thiserror::Error;

/// Maximum number of levels of the accumulator.
pub const MAX_HEIGHT: usize = 64;

const HASH_LEN: usize = 32;

/// Errors raised by [`WithdrawTrie`] and [`MerkleProof`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    /// The first appended message does not continue the accumulator.
    #[error("message nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch {
        /// Next nonce expected by the accumulator
        expected: u64,
        /// Nonce that was supplied
        got: u64,
    },
    /// Encoded proof is not a whole number of hashes or is too long.
    #[error("invalid proof length of {0} bytes")]
    InvalidProofLength(usize),
    /// The checkpoint proof is shorter than the tree height implied by its nonce.
    #[error("proof of {got} hashes cannot checkpoint nonce {nonce} (need at least {expected})")]
    ProofTooShort {
        /// Nonce of the checkpoint leaf
        nonce: u64,
        /// Minimum number of siblings implied by the nonce
        expected: usize,
        /// Number of siblings in the supplied proof
        got: usize,
    },
    /// Appending would overflow the maximum tree height.
    #[error("withdraw trie is full")]
    Full,
}

/// Hashes two nodes: `keccak256(left || right)`.
pub fn hash_pair(left: B256, right: B256) -> B256 {
    let mut buf = [0u8; 2 * HASH_LEN];
    buf[..HASH_LEN].copy_from_slice(left.as_slice());
    buf[HASH_LEN..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Ordered sibling path of a leaf, from the leaf level upwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref)]
pub struct MerkleProof(Vec<B256>);

impl MerkleProof {
    /// Wraps a list of sibling hashes.
    pub const fn new(siblings: Vec<B256>) -> Self {
        Self(siblings)
    }

    /// Concatenates the siblings into 32-byte words.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.0.len() * HASH_LEN);
        for sibling in &self.0 {
            out.extend_from_slice(sibling.as_slice());
        }
        out.into()
    }

    /// Splits an encoded proof back into sibling hashes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        if bytes.len() % HASH_LEN != 0 || bytes.len() > MAX_HEIGHT * HASH_LEN {
            return Err(TrieError::InvalidProofLength(bytes.len()));
        }
        Ok(Self(bytes.chunks_exact(HASH_LEN).map(B256::from_slice).collect()))
    }

    /// Folds the proof over `leaf` placed at `index` and returns the resulting root.
    pub fn compute_root(&self, leaf: B256, index: u64) -> B256 {
        let mut node = leaf;
        let mut index = index;
        for sibling in &self.0 {
            node = if index & 1 == 0 { hash_pair(node, *sibling) } else { hash_pair(*sibling, node) };
            index >>= 1;
        }
        node
    }
}

/// Incremental Merkle accumulator over withdrawal message hashes.
#[derive(Debug, Clone)]
pub struct WithdrawTrie {
    next_message_nonce: u64,
    height: usize,
    branches: [B256; MAX_HEIGHT],
    zeroes: [B256; MAX_HEIGHT],
}

impl Default for WithdrawTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl WithdrawTrie {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        let mut zeroes = [B256::ZERO; MAX_HEIGHT];
        for level in 1..MAX_HEIGHT {
            zeroes[level] = hash_pair(zeroes[level - 1], zeroes[level - 1]);
        }
        Self { next_message_nonce: 0, height: 0, branches: [B256::ZERO; MAX_HEIGHT], zeroes }
    }

    /// Index of the next leaf, equal to the number of leaves appended so far.
    pub const fn next_message_nonce(&self) -> u64 {
        self.next_message_nonce
    }

    /// Current root, or the zero hash when nothing has been appended.
    pub const fn message_root(&self) -> B256 {
        if self.next_message_nonce == 0 { B256::ZERO } else { self.branches[self.height] }
    }

    /// Rebuilds the accumulator from a known leaf and its proof.
    ///
    /// The proof may be relative to any root at or after `nonce`: only the left siblings are
    /// read, so a proof taken after later leaves were appended still restores the state right
    /// after `nonce`.
    pub fn initialize(&mut self, nonce: u64, leaf: B256, proof: &MerkleProof) -> Result<(), TrieError> {
        let expected = bit_length(nonce);
        if proof.len() < expected {
            return Err(TrieError::ProofTooShort { nonce, expected, got: proof.len() });
        }

        let mut branches = [B256::ZERO; MAX_HEIGHT];
        let mut node = leaf;
        let mut index = nonce;
        let mut level = 0;
        while index > 0 {
            if index & 1 == 0 {
                branches[level] = node;
                node = hash_pair(node, self.zeroes[level]);
            } else {
                branches[level] = proof[level];
                node = hash_pair(proof[level], node);
            }
            index >>= 1;
            level += 1;
        }
        branches[level] = node;

        self.branches = branches;
        self.height = level;
        self.next_message_nonce = nonce + 1;
        Ok(())
    }

    /// Appends `leaves` starting at `first_nonce` and returns one proof per leaf.
    ///
    /// All returned proofs are relative to the root after the whole batch has been appended.
    pub fn append_messages(
        &mut self,
        first_nonce: u64,
        leaves: &[B256],
    ) -> Result<Vec<MerkleProof>, TrieError> {
        if first_nonce != self.next_message_nonce {
            return Err(TrieError::NonceMismatch {
                expected: self.next_message_nonce,
                got: first_nonce,
            });
        }
        if leaves.is_empty() {
            return Ok(Vec::new());
        }
        let count = leaves.len() as u64;
        let last_index = self.next_message_nonce + count - 1;
        if bit_length(last_index) >= MAX_HEIGHT {
            return Err(TrieError::Full);
        }

        // Every node touched by the batch, keyed by level and index.
        let mut nodes: Vec<HashMap<u64, B256>> = vec![HashMap::new(); MAX_HEIGHT + 1];

        // Left siblings already folded into the existing branches.
        if self.next_message_nonce != 0 {
            let mut index = self.next_message_nonce;
            for level in 0..=self.height {
                if index & 1 == 1 {
                    nodes[level].insert(index ^ 1, self.branches[level]);
                }
                index >>= 1;
            }
        }
        for (offset, leaf) in leaves.iter().enumerate() {
            nodes[0].insert(self.next_message_nonce + offset as u64, *leaf);
        }

        let mut min_index = self.next_message_nonce;
        let mut max_index = last_index;
        let mut level = 0;
        while max_index > 0 {
            if min_index & 1 == 1 {
                min_index -= 1;
            }
            if max_index & 1 == 0 {
                nodes[level].insert(max_index ^ 1, self.zeroes[level]);
            }
            let mut index = min_index;
            while index <= max_index {
                let parent = hash_pair(node_at(&nodes, level, index), node_at(&nodes, level, index ^ 1));
                nodes[level + 1].insert(index >> 1, parent);
                index += 2;
            }
            min_index >>= 1;
            max_index >>= 1;
            level += 1;
        }

        for leaf in leaves {
            self.height = self.update_branch(*leaf).len();
            self.next_message_nonce += 1;
        }

        let proofs = (0..count)
            .map(|offset| {
                let mut index = first_nonce + offset;
                let mut siblings = Vec::with_capacity(self.height);
                for level in 0..self.height {
                    siblings.push(node_at(&nodes, level, index ^ 1));
                    index >>= 1;
                }
                MerkleProof::new(siblings)
            })
            .collect();
        Ok(proofs)
    }

    /// Folds a single leaf at `next_message_nonce` into the branches and returns its proof
    /// against the new root.
    fn update_branch(&mut self, leaf: B256) -> Vec<B256> {
        let mut node = leaf;
        let mut index = self.next_message_nonce;
        let mut siblings = Vec::new();
        let mut level = 0;
        while index > 0 {
            if index & 1 == 0 {
                self.branches[level] = node;
                siblings.push(self.zeroes[level]);
                node = hash_pair(node, self.zeroes[level]);
            } else {
                siblings.push(self.branches[level]);
                node = hash_pair(self.branches[level], node);
            }
            index >>= 1;
            level += 1;
        }
        self.branches[level] = node;
        siblings
    }
}

fn node_at(nodes: &[HashMap<u64, B256>], level: usize, index: u64) -> B256 {
    nodes[level].get(&index).copied().unwrap_or(B256::ZERO)
}

const fn bit_length(value: u64) -> usize {
    (u64::BITS - value.leading_zeros()) as usize
}
