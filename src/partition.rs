//! Partitioning math shared by every peer.
//!
//! All of this is pure arithmetic over the global record count and the peer
//! id, so every peer computes identical slices, sample shares, and pivot
//! lists without talking to anyone.

use crate::record::Record;

/// Contiguous slice of the input assigned to one peer, in record indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePlan {
    pub start: u64,
    pub end: u64,
}

impl SlicePlan {
    /// Compute peer `id`'s slice of `total` records across `peers` peers.
    ///
    /// Slices are contiguous, non-overlapping, cover the input exactly, and
    /// differ in length by at most one record; the first `total % peers`
    /// peers take the extra record. The same function yields the output
    /// offsets in the shared-file placement, so it must stay deterministic.
    pub fn new(total: u64, peers: usize, id: usize) -> Self {
        let peers = peers as u64;
        let id = id as u64;
        let base = total / peers;
        let remainder = total - base * peers;
        let count = if id < remainder { base + 1 } else { base };
        let start = id * base + id.min(remainder);
        Self { start, end: start + count }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Number of samples peer `id` contributes toward a group-wide budget of
/// `sample_size`. Summed over all ids this is exactly `sample_size`.
pub fn sample_share(sample_size: usize, peers: usize, id: usize) -> usize {
    (sample_size + peers - (id + 1)) / peers
}

/// Reduce the gathered samples to the pivot list every peer will receive.
///
/// Sort, dedup, then take every `stride`-th element starting at index
/// `stride`, where `stride = max(distinct / peers, 1)`. The result holds
/// `min(peers - 1, distinct - 1)` pivots and is strictly ascending. Zero or
/// one distinct sample collapses the list to empty, which routes every
/// record to peer 0.
pub fn select_pivots(mut samples: Vec<Record>, peers: usize) -> Vec<Record> {
    samples.sort_unstable();
    samples.dedup();
    let distinct = samples.len();
    let stride = (distinct / peers).max(1);
    (1..peers.min(distinct)).map(|i| samples[i * stride]).collect()
}
