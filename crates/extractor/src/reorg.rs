//! Recent canonical headers and the backward search that locates a fork point.
use std::collections::VecDeque;

use eyre::Result;
use primitives::headers::BlockHeader;

use crate::ChainClient;

/// The most recent canonical headers of one chain, oldest first.
///
/// Consecutive entries always form a parent/child chain and the cache never holds more than
/// `capacity` headers.
#[derive(Debug, Clone)]
pub struct HeaderCache {
    headers: VecDeque<BlockHeader>,
    capacity: usize,
}

impl HeaderCache {
    /// Create an empty cache holding at most `capacity` headers (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { headers: VecDeque::with_capacity(capacity), capacity }
    }

    /// Number of cached headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Newest cached header.
    pub fn tip(&self) -> Option<&BlockHeader> {
        self.headers.back()
    }

    /// Appends `header` if it extends the tip, evicting the oldest entry when full.
    ///
    /// Returns false and leaves the cache untouched when `header` does not extend the tip.
    pub fn push(&mut self, header: BlockHeader) -> bool {
        if let Some(tip) = self.tip() {
            if !tip.is_parent_of(&header) {
                return false;
            }
        }
        self.append(header);
        true
    }

    fn append(&mut self, header: BlockHeader) {
        if self.headers.len() == self.capacity {
            self.headers.pop_front();
        }
        self.headers.push_back(header);
    }

    /// Position of the header with `hash`, scanning from the tip.
    pub fn position(&self, hash: alloy::primitives::BlockHash) -> Option<usize> {
        self.headers.iter().rposition(|header| header.hash == hash)
    }

    /// Keeps the headers up to and including `index` and appends `branch` on top.
    ///
    /// `branch` must be a parent/child chain whose first header extends the one at `index`.
    pub fn replace_after(&mut self, index: usize, branch: Vec<BlockHeader>) {
        self.headers.truncate(index + 1);
        for header in branch {
            self.append(header);
        }
    }

    /// Drops every header.
    pub fn clear(&mut self) {
        self.headers.clear();
    }

    /// Iterates the cached headers, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BlockHeader> {
        self.headers.iter()
    }
}

/// Result of [`find_common_ancestor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AncestorSearch {
    /// A cached header is an ancestor of the new head.
    Found {
        /// Position of the ancestor in the cache
        index: usize,
        /// The ancestor itself
        ancestor: BlockHeader,
        /// Headers of the new branch above the ancestor, oldest first
        branch: Vec<BlockHeader>,
    },
    /// The fork point lies below the cached window.
    NotFound,
}

/// Walks parent hashes back from `head` until a header in `cache` is reached.
///
/// At most `cache.len()` parents are fetched.
pub async fn find_common_ancestor(
    client: &dyn ChainClient,
    cache: &HeaderCache,
    head: BlockHeader,
) -> Result<AncestorSearch> {
    let mut branch = vec![head];
    let mut cursor = head;

    for _ in 0..cache.len() {
        let parent = client.header_by_hash(cursor.parent_hash).await?;
        if let Some(index) = cache.position(parent.hash) {
            branch.reverse();
            return Ok(AncestorSearch::Found { index, ancestor: parent, branch });
        }
        branch.push(parent);
        cursor = parent;
    }

    Ok(AncestorSearch::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    async fn cache_from(chain: &MockChain, from: u64, to: u64, capacity: usize) -> HeaderCache {
        let mut cache = HeaderCache::new(capacity);
        for number in from..=to {
            assert!(cache.push(chain.header(number).await.unwrap()));
        }
        cache
    }

    #[tokio::test]
    async fn push_extends_contiguous_chain() {
        let chain = MockChain::new();
        chain.extend(5, 0).await;

        let cache = cache_from(&chain, 1, 5, 10).await;
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.tip().unwrap().number, 5);
    }

    #[tokio::test]
    async fn push_evicts_oldest_when_full() {
        let chain = MockChain::new();
        chain.extend(6, 0).await;

        let cache = cache_from(&chain, 1, 6, 3).await;
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.iter().next().unwrap().number, 4);
        assert_eq!(cache.tip().unwrap().number, 6);
    }

    #[tokio::test]
    async fn push_rejects_discontinuity() {
        let chain = MockChain::new();
        chain.extend(5, 0).await;
        let mut cache = cache_from(&chain, 1, 4, 10).await;

        chain.reorg_from(4, 2, 1).await;
        let fork = chain.header(5).await.unwrap();
        assert!(!cache.push(fork));
        assert_eq!(cache.tip().unwrap().number, 4);

        chain.extend(1, 1).await;
        let gap = chain.header(6).await.unwrap();
        assert!(!cache.push(gap));
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn zero_capacity_keeps_one_header() {
        let chain = MockChain::new();
        chain.extend(3, 0).await;
        let cache = cache_from(&chain, 1, 3, 0).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tip().unwrap().number, 3);
    }

    #[tokio::test]
    async fn finds_ancestor_inside_window() {
        let chain = MockChain::new();
        chain.extend(10, 0).await;
        let cache = cache_from(&chain, 3, 10, 8).await;

        // blocks 8.. are replaced; 7 is the fork point
        chain.reorg_from(8, 4, 1).await;
        let head = chain.header(11).await.unwrap();

        let AncestorSearch::Found { index, ancestor, branch } =
            find_common_ancestor(&chain, &cache, head).await.unwrap()
        else {
            panic!("ancestor not found");
        };
        assert_eq!(ancestor.number, 7);
        assert_eq!(cache.iter().nth(index).unwrap().hash, ancestor.hash);
        assert_eq!(branch.iter().map(|h| h.number).collect::<Vec<_>>(), vec![8, 9, 10, 11]);
        assert!(ancestor.is_parent_of(&branch[0]));
    }

    #[tokio::test]
    async fn replace_after_keeps_window_contiguous() {
        let chain = MockChain::new();
        chain.extend(10, 0).await;
        let mut cache = cache_from(&chain, 5, 10, 6).await;

        chain.reorg_from(9, 3, 1).await;
        let head = chain.header(11).await.unwrap();
        let AncestorSearch::Found { index, branch, .. } =
            find_common_ancestor(&chain, &cache, head).await.unwrap()
        else {
            panic!("ancestor not found");
        };
        cache.replace_after(index, branch);

        assert_eq!(cache.len(), 6);
        assert_eq!(cache.tip().unwrap().hash, head.hash);
        let headers: Vec<_> = cache.iter().copied().collect();
        assert!(headers.windows(2).all(|pair| pair[0].is_parent_of(&pair[1])));
    }

    #[tokio::test]
    async fn reports_fork_below_window() {
        let chain = MockChain::new();
        chain.extend(10, 0).await;
        let cache = cache_from(&chain, 8, 10, 3).await;

        chain.reorg_from(5, 8, 1).await;
        let head = chain.header(12).await.unwrap();

        let result = find_common_ancestor(&chain, &cache, head).await.unwrap();
        assert_eq!(result, AncestorSearch::NotFound);
    }
}
