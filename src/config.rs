//! Run configuration and tunables.

use crate::placement::Placement;
use crate::shuffle::ShuffleStrategy;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_MMAP_ELEMENTS: u64 = 1_000_000;
pub const DEFAULT_SEND_BUCKET_SIZE: usize = 100_000;
pub const DEFAULT_MAX_IN_FLIGHT_SENDS: usize = 16;
pub const DEFAULT_SEND_WORKERS: usize = 2;

pub const ENV_MMAP_ELEMENTS: &str = "TERASORT_MMAP_ELEMENTS";
pub const ENV_SEND_BUCKET_SIZE: &str = "TERASORT_SEND_BUCKET_SIZE";

/// Knobs that shape how a run executes without changing its outcome.
#[derive(Debug, Clone)]
pub struct SortTuning {
    /// Records per memory-map window on both the read and write side.
    pub mmap_elements: u64,
    /// Streamed-shuffle flush threshold, in records.
    pub send_bucket_size: usize,
    /// Bound on shipments queued for a sender thread; a full queue blocks
    /// the classifier.
    pub max_in_flight_sends: usize,
    /// Sender threads per peer in the streamed shuffle.
    pub send_workers: usize,
}

impl Default for SortTuning {
    fn default() -> Self {
        Self {
            mmap_elements: DEFAULT_MMAP_ELEMENTS,
            send_bucket_size: DEFAULT_SEND_BUCKET_SIZE,
            max_in_flight_sends: DEFAULT_MAX_IN_FLIGHT_SENDS,
            send_workers: DEFAULT_SEND_WORKERS,
        }
    }
}

impl SortTuning {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut tuning = Self::default();
        if let Ok(raw) = std::env::var(ENV_MMAP_ELEMENTS) {
            tuning.mmap_elements =
                raw.parse().with_context(|| format!("{ENV_MMAP_ELEMENTS}={raw}"))?;
        }
        if let Ok(raw) = std::env::var(ENV_SEND_BUCKET_SIZE) {
            tuning.send_bucket_size =
                raw.parse().with_context(|| format!("{ENV_SEND_BUCKET_SIZE}={raw}"))?;
        }
        Ok(tuning)
    }

    pub fn with_mmap_elements(mut self, elements: u64) -> Self {
        self.mmap_elements = elements;
        self
    }

    pub fn with_send_bucket_size(mut self, records: usize) -> Self {
        self.send_bucket_size = records;
        self
    }
}

/// Everything one sort run needs.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Record file, or directory of `part*` files.
    pub input: PathBuf,
    /// Output file, or prefix for the per-peer-file placement.
    pub output: PathBuf,
    /// Total pivot samples across all peers.
    pub sample_size: usize,
    /// Group size; the CLI derives it from the nodes file.
    pub peers: usize,
    pub placement: Placement,
    pub shuffle: ShuffleStrategy,
    pub tuning: SortTuning,
}

impl SortConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        sample_size: usize,
        peers: usize,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            sample_size,
            peers,
            placement: Placement::default(),
            shuffle: ShuffleStrategy::default(),
            tuning: SortTuning::default(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_shuffle(mut self, shuffle: ShuffleStrategy) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_tuning(mut self, tuning: SortTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

/// Parse a nodes file: one host per line, blanks and `#` comments skipped.
/// The line count sizes the peer group.
pub fn read_nodes_file(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read nodes file {}", path.display()))?;
    let nodes: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if nodes.is_empty() {
        bail!("nodes file {} lists no hosts", path.display());
    }
    Ok(nodes)
}
