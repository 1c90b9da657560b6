//! # terasort-rs
//!
//! A distributed sample sort for files of fixed-length 100-byte records
//! (10-byte key, 90-byte value), built around the TeraSort benchmark.
//!
//! A group of T symmetric peers runs the same phase sequence in lock-step:
//!
//! 1. each peer computes its input slice from the global record count;
//! 2. peers sample the heads of their slices; peer 0 reduces the samples
//!    into at most T-1 pivots and broadcasts them;
//! 3. each peer classifies its slice into per-target sub-buckets with a
//!    binary search over the pivots;
//! 4. sub-buckets travel all-to-all to their owning peers, either as one
//!    shipment per pair or streamed while classification is still running;
//! 5. each peer sorts its received bucket in memory;
//! 6. sorted runs reach durable storage through one of three placement
//!    variants (shared file at disjoint offsets, one file per peer, or
//!    token-ordered appends).
//!
//! Coordination runs over a minimal shared-variable runtime on a TCP mesh
//! ([`runtime`]); storage back-ends hide behind the [`record_io`] traits.
//! Concatenating the output partitions in peer order yields the ascending
//! sort of the input under unsigned lexicographic (key, value) order.

pub mod classify;
pub mod config;
pub mod partition;
pub mod placement;
pub mod record;
pub mod record_io;
pub mod reference;
pub mod runtime;
pub mod shuffle;
pub mod sorter;
pub mod test_support;
pub mod worker;

pub use config::{SortConfig, SortTuning};
pub use placement::Placement;
pub use record::Record;
pub use shuffle::ShuffleStrategy;
pub use worker::{Worker, WorkerReport};

use anyhow::{anyhow, Context, Result};
use runtime::{bind_local_group, PeerGroup};
use std::thread;

/// Run a whole sort group inside this process, one OS thread per peer.
///
/// The transport is the real TCP mesh; only the process boundary is
/// collapsed, so the same worker drives single-host and multi-host
/// deployments. Reports come back ordered by peer id.
pub fn run_group(config: &SortConfig) -> Result<Vec<WorkerReport>> {
    let (listeners, addrs) = bind_local_group(config.peers)?;

    let mut handles = Vec::with_capacity(config.peers);
    for (id, listener) in listeners.into_iter().enumerate() {
        let addrs = addrs.clone();
        let config = config.clone();
        handles.push(thread::spawn(move || -> Result<WorkerReport> {
            let group = PeerGroup::connect(id, listener, &addrs)?;
            Worker::new(group, config).run()
        }));
    }

    let mut reports = Vec::with_capacity(handles.len());
    for (id, handle) in handles.into_iter().enumerate() {
        let report = handle
            .join()
            .map_err(|_| anyhow!("peer {id} panicked"))?
            .with_context(|| format!("peer {id} failed"))?;
        reports.push(report);
    }
    Ok(reports)
}
