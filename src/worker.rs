//! Per-peer phase driver.
//!
//! Every peer runs the same sequence: plan its slice, contribute samples,
//! receive pivots, classify and shuffle, sort its bucket, place the run.
//! Phase completion is printed to stdout as `TL:<id>\t<phase>\t<seconds>`,
//! which downstream tooling scrapes for timelines.

use crate::classify::Classifier;
use crate::config::SortConfig;
use crate::partition::{sample_share, select_pivots, SlicePlan};
use crate::placement::{self, Placement};
use crate::record::{decode_records, encode_records, RECORD_LEN};
use crate::record_io::open_input;
use crate::runtime::{PeerGroup, Var};
use crate::shuffle::{BatchShuffle, ShuffleStrategy, StreamedSender};
use crate::sorter::sort_shipments;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What one peer did during a run.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub id: usize,
    /// Records read from this peer's input slice.
    pub records_read: u64,
    /// Records in this peer's sorted output run.
    pub records_written: u64,
    pub pivot_count: usize,
}

pub struct Worker {
    group: Arc<PeerGroup>,
    config: SortConfig,
    started: Instant,
}

impl Worker {
    pub fn new(group: Arc<PeerGroup>, config: SortConfig) -> Self {
        Self { group, config, started: Instant::now() }
    }

    fn timeline(&self, phase: &str) {
        println!(
            "TL:{}\t{}\t{:.7}",
            self.group.id(),
            phase,
            self.started.elapsed().as_secs_f64()
        );
    }

    pub fn run(self) -> Result<WorkerReport> {
        let id = self.group.id();
        let peers = self.group.size();
        let placement = self.config.placement;

        if id == 0 {
            placement::clean_output(placement, &self.config.output)?;
            if placement == Placement::Sequential {
                // seed the write token before anyone can reach placement
                self.group.put(0, Var::Sequencer, 0, Vec::new())?;
            }
        }

        let mut input = open_input(&self.config.input, self.config.tuning.mmap_elements)?;
        let total = input.len();
        if id == 0 {
            info!(records = total, peers, "starting sort");
            if placement == Placement::SharedFile {
                placement::presize_shared(&self.config.output, input.byte_len())?;
            }
        }

        let plan = SlicePlan::new(total, peers, id);
        debug!(id, start = plan.start, end = plan.end, "input slice");

        // sampling: leading records of the slice, clamped to the file end
        let budget = sample_share(self.config.sample_size, peers, id);
        let budget = (budget as u64).min(total.saturating_sub(plan.start)) as usize;
        let mut samples = Vec::with_capacity(budget);
        input.seek(plan.start)?;
        for _ in 0..budget {
            samples.push(input.read_record()?);
        }
        self.timeline("read_samples");
        self.group.barrier()?;

        if let Some(contributions) =
            self.group.gather(Var::Samples, encode_records(&samples))?
        {
            let mut pool = Vec::new();
            for payload in &contributions {
                pool.extend(decode_records(payload)?);
            }
            let pivots = select_pivots(pool, peers);
            info!(pivots = pivots.len(), "selected pivots");
            self.group.broadcast_put(Var::Pivots, 0, encode_records(&pivots))?;
        }
        let pivot_payload = self.group.wait_indexed(Var::Pivots, 1)?.remove(0).1;
        let pivots = decode_records(&pivot_payload)?;
        self.timeline("get_pivots");

        let mut classifier = Classifier::new(pivots);
        let bucket_count = classifier.bucket_count();

        let shipments = match self.config.shuffle {
            ShuffleStrategy::Batch => {
                // everyone must pass here before shipments can be expected
                let inboxes_ready = self.group.barrier_begin()?;
                input.seek(plan.start)?;
                for _ in plan.start..plan.end {
                    classifier.push(input.read_record()?);
                }
                self.timeline("read_data");
                self.group.barrier_wait(inboxes_ready)?;

                BatchShuffle::dispatch(&self.group, &mut classifier)?;
                self.timeline("sent_data");
                let shipments = BatchShuffle::collect(&self.group, bucket_count)?;
                self.timeline("waitfor_data");
                shipments
            }
            ShuffleStrategy::Streamed => {
                let mut sender = StreamedSender::new(
                    self.group.clone(),
                    self.config.tuning.send_bucket_size,
                    self.config.tuning.max_in_flight_sends,
                    self.config.tuning.send_workers,
                );
                input.seek(plan.start)?;
                for _ in plan.start..plan.end {
                    sender.push(&mut classifier, input.read_record()?)?;
                }
                self.timeline("read_data");
                sender.finish(&mut classifier)?;
                self.timeline("sent_data");
                let shipments = StreamedSender::collect(&self.group)?;
                self.timeline("waitfor_data");
                shipments
            }
        };

        if placement == Placement::SharedFile {
            let run_len: u64 =
                shipments.iter().map(|payload| (payload.len() / RECORD_LEN) as u64).sum();
            placement::announce_run_length(&self.group, run_len)?;
        }

        let run = sort_shipments(shipments).context("sort received bucket")?;
        self.timeline("sorted_data");
        debug!(id, records = run.len(), "bucket sorted");

        match placement {
            Placement::SharedFile => {
                let lengths = placement::collect_run_lengths(&self.group)?;
                self.timeline("waitfor_saving");
                debug_assert_eq!(lengths.iter().sum::<u64>(), total);
                placement::write_shared(
                    &self.group,
                    &self.config.output,
                    &lengths,
                    &run,
                    self.config.tuning.mmap_elements,
                )?;
            }
            Placement::PerPeerFiles => {
                self.timeline("waitfor_saving");
                placement::write_part(&self.config.output, id, &run)?;
            }
            Placement::Sequential => {
                self.group.take_token(Var::Sequencer)?;
                self.timeline("waitfor_saving");
                placement::append_run(&self.config.output, &run)?;
                self.group.put((id + 1) % peers, Var::Sequencer, 0, Vec::new())?;
            }
        }
        self.timeline("saved_data");

        if id == 0 && placement == Placement::Sequential {
            // absorb the wrap-around token so every write has completed
            self.group.take_token(Var::Sequencer)?;
        }
        self.group.barrier()?;
        self.group.shutdown();

        Ok(WorkerReport {
            id,
            records_read: plan.len(),
            records_written: run.len() as u64,
            pivot_count: bucket_count - 1,
        })
    }
}
