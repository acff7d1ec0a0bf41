//! Truncated-sequence chunking

use ptts_core::{ChunkPos, Sample};

/// Split a sample into ordered, non-overlapping chunks of at most `max_len` steps
pub fn chunk_sample(sample: &Sample, max_len: usize) -> Vec<Sample> {
    let max_len = max_len.max(1);
    let count = sample.len().div_ceil(max_len).max(1);
    if count == 1 {
        let mut whole = sample.clone();
        whole.chunk = ChunkPos::default();
        return vec![whole];
    }
    (0..count)
        .map(|index| sample.slice(index * max_len, max_len, ChunkPos { index, count }))
        .collect()
}
