//! Rollup contract bindings and `commitBatch` calldata decoding.
use alloy::{sol, sol_types::SolCall};
use thiserror::Error;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, Default, PartialEq, Eq)]
    interface IScrollChain {
        event CommitBatch(uint256 indexed batchIndex, bytes32 indexed batchHash);

        function commitBatch(
            uint8 version,
            bytes parentBatchHeader,
            bytes[] chunks,
            bytes skippedL1MessageBitmap
        ) external;
    }
}

/// Bytes of a serialized block context inside a chunk.
const BLOCK_CONTEXT_LEN: usize = 60;

/// `version (1) || batchIndex (8)` prefix of a batch header.
const BATCH_HEADER_PREFIX_LEN: usize = 9;

/// Batch index and covered L2 block range recovered from a `commitBatch` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    /// Index of the committed batch
    pub batch_index: u64,
    /// First L2 block in the batch
    pub start_block: u64,
    /// Last L2 block in the batch
    pub end_block: u64,
}

/// Layout errors in `commitBatch` calldata.
#[derive(Debug, Error)]
pub enum CalldataError {
    /// The calldata is not an ABI encoded `commitBatch` call.
    #[error("failed to decode commitBatch calldata: {0}")]
    Abi(#[from] alloy::sol_types::Error),
    /// The parent batch header is shorter than its fixed prefix.
    #[error("parent batch header too short: {0} bytes")]
    ParentHeaderTooShort(usize),
    /// The call commits no chunks.
    #[error("commitBatch carries no chunks")]
    NoChunks,
    /// A chunk is empty or shorter than its declared block count.
    #[error("chunk {0} is malformed")]
    MalformedChunk(usize),
    /// The parent batch index is the last representable one.
    #[error("parent batch index {0} has no successor")]
    BatchIndexOverflow(u64),
}

/// Decodes `commitBatch` calldata (selector included) into the committed batch range.
pub fn decode_commit_batch_calldata(input: &[u8]) -> Result<BatchRange, CalldataError> {
    let call = IScrollChain::commitBatchCall::abi_decode(input)?;

    let header = call.parentBatchHeader.as_ref();
    if header.len() < BATCH_HEADER_PREFIX_LEN {
        return Err(CalldataError::ParentHeaderTooShort(header.len()));
    }
    let parent_index = read_u64_be(&header[1..BATCH_HEADER_PREFIX_LEN]);
    let batch_index =
        parent_index.checked_add(1).ok_or(CalldataError::BatchIndexOverflow(parent_index))?;

    let (first_chunk, last_chunk) = match (call.chunks.first(), call.chunks.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(CalldataError::NoChunks),
    };
    let (start_block, _) = chunk_block_range(first_chunk).ok_or(CalldataError::MalformedChunk(0))?;
    let (_, end_block) = chunk_block_range(last_chunk)
        .ok_or_else(|| CalldataError::MalformedChunk(call.chunks.len() - 1))?;

    Ok(BatchRange { batch_index, start_block, end_block })
}

/// Returns the first and last block numbers of a chunk.
fn chunk_block_range(chunk: &[u8]) -> Option<(u64, u64)> {
    let (&num_blocks, contexts) = chunk.split_first()?;
    let num_blocks = num_blocks as usize;
    if num_blocks == 0 || contexts.len() < num_blocks * BLOCK_CONTEXT_LEN {
        return None;
    }
    let block_number = |i: usize| read_u64_be(&contexts[i * BLOCK_CONTEXT_LEN..][..8]);
    Some((block_number(0), block_number(num_blocks - 1)))
}

fn read_u64_be(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
