use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;
use terasort_rs::record::Record;
use terasort_rs::record_io::part_path;
use terasort_rs::test_support::{read_records, write_records};
use terasort_rs::{
    run_group, Placement, ShuffleStrategy, SortConfig, SortTuning, WorkerReport,
};

/// A completed in-process sort run plus everything needed to inspect it.
pub struct SortRun {
    #[allow(dead_code)]
    pub dir: TempDir,
    pub output: PathBuf,
    pub reports: Vec<WorkerReport>,
    placement: Placement,
    peers: usize,
}

#[allow(dead_code)]
pub fn run_sort(
    records: &[Record],
    peers: usize,
    sample_size: usize,
    placement: Placement,
    shuffle: ShuffleStrategy,
) -> Result<SortRun> {
    run_sort_with_tuning(records, peers, sample_size, placement, shuffle, SortTuning::default())
}

#[allow(dead_code)]
pub fn run_sort_with_tuning(
    records: &[Record],
    peers: usize,
    sample_size: usize,
    placement: Placement,
    shuffle: ShuffleStrategy,
    tuning: SortTuning,
) -> Result<SortRun> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input");
    write_records(&input, records)?;
    let output = dir.path().join("output");

    let config = SortConfig::new(&input, &output, sample_size, peers)
        .with_placement(placement)
        .with_shuffle(shuffle)
        .with_tuning(tuning);
    let reports = run_group(&config)?;
    Ok(SortRun { dir, output, reports, placement, peers })
}

impl SortRun {
    /// The output as one record sequence, partitions concatenated in peer
    /// order for the per-peer-file placement.
    #[allow(dead_code)]
    pub fn output_records(&self) -> Result<Vec<Record>> {
        match self.placement {
            Placement::SharedFile | Placement::Sequential => read_records(&self.output),
            Placement::PerPeerFiles => {
                let mut all = Vec::new();
                for id in 0..self.peers {
                    all.extend(read_records(&part_path(&self.output, id))?);
                }
                Ok(all)
            }
        }
    }

    #[allow(dead_code)]
    pub fn part(&self, id: usize) -> PathBuf {
        part_path(&self.output, id)
    }

    #[allow(dead_code)]
    pub fn run_lengths(&self) -> Vec<u64> {
        self.reports.iter().map(|report| report.records_written).collect()
    }
}
