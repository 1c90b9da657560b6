//! All-to-all redistribution of classified records.
//!
//! Two interchangeable strategies move sub-buckets to their owning peers.
//! Batch ships one payload per (sender, target) pair after classification
//! finishes; streamed overlaps transmission with classification by flushing
//! any sub-bucket that crosses a threshold. Both agree on the partition
//! function, so the receiving side only differs in how completion is
//! detected.

use crate::classify::Classifier;
use crate::record::{encode_records, Record};
use crate::runtime::{PeerGroup, Var};
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Sender};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// How sub-buckets travel to their owning peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShuffleStrategy {
    /// One shipment per (sender, target) pair after classification.
    #[default]
    Batch,
    /// Threshold-triggered flushes interleaved with classification.
    Streamed,
}

impl FromStr for ShuffleStrategy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "batch" => Ok(Self::Batch),
            "streamed" => Ok(Self::Streamed),
            other => bail!("unknown shuffle strategy '{other}' (expected batch|streamed)"),
        }
    }
}

/// The batch strategy: a single slot write per target, indexed by sender,
/// collected once every sender's slot has arrived.
pub struct BatchShuffle;

impl BatchShuffle {
    /// Ship every sub-bucket, empty ones included, so receivers can count
    /// distinct senders. The self-addressed shipment stays local.
    pub fn dispatch(group: &PeerGroup, classifier: &mut Classifier) -> Result<()> {
        for target in 0..classifier.bucket_count() {
            let records = classifier.take_bucket(target);
            let payload = encode_records(&records);
            group
                .put(target, Var::Buckets, group.id(), payload)
                .with_context(|| format!("ship bucket to peer {target}"))?;
        }
        Ok(())
    }

    /// Collect the inbound shipments. A peer whose id exceeds the pivot
    /// count owns no bucket and expects none, which leaves it immediately
    /// satisfied.
    pub fn collect(group: &PeerGroup, bucket_count: usize) -> Result<Vec<Vec<u8>>> {
        let expected = if group.id() < bucket_count { group.size() } else { 0 };
        let shipments = group.wait_indexed(Var::Buckets, expected)?;
        Ok(shipments.into_iter().map(|(_, payload)| payload).collect())
    }
}

/// The streamed strategy's sending half: a bounded job queue in front of a
/// small pool of sender threads. A full queue blocks the classifier, which
/// is the back-pressure bound on in-flight shipments.
pub struct StreamedSender {
    group: Arc<PeerGroup>,
    jobs: Option<Sender<(usize, Vec<u8>)>>,
    workers: Vec<JoinHandle<Result<()>>>,
    threshold: usize,
}

impl StreamedSender {
    pub fn new(
        group: Arc<PeerGroup>,
        threshold: usize,
        max_in_flight: usize,
        workers: usize,
    ) -> Self {
        let (jobs, queue) = bounded::<(usize, Vec<u8>)>(max_in_flight.max(1));
        let workers = (0..workers.max(1))
            .map(|_| {
                let queue = queue.clone();
                let group = group.clone();
                thread::spawn(move || -> Result<()> {
                    for (target, payload) in queue {
                        group.append(target, Var::Buckets, payload)?;
                    }
                    Ok(())
                })
            })
            .collect();
        Self { group, jobs: Some(jobs), workers, threshold: threshold.max(1) }
    }

    /// Route one record; flushes its sub-bucket once the threshold is hit.
    pub fn push(&mut self, classifier: &mut Classifier, record: Record) -> Result<()> {
        let bucket = classifier.push(record);
        if classifier.bucket_len(bucket) >= self.threshold {
            self.flush_bucket(classifier, bucket)?;
        }
        Ok(())
    }

    fn flush_bucket(&mut self, classifier: &mut Classifier, bucket: usize) -> Result<()> {
        let records = classifier.take_bucket(bucket);
        if records.is_empty() {
            return Ok(());
        }
        let payload = encode_records(&records);
        if bucket == self.group.id() {
            // own inbox: no need to occupy a sender slot
            self.group.append(bucket, Var::Buckets, payload)
        } else {
            let jobs = self.jobs.as_ref().expect("sender still open");
            jobs.send((bucket, payload)).map_err(|_| anyhow!("shuffle send pool closed"))
        }
    }

    /// Flush the remainders, drain the pool, then sign off to every peer.
    /// The sign-off travels on the same links as the shipments, so FIFO
    /// delivery guarantees no shipment arrives after it.
    pub fn finish(mut self, classifier: &mut Classifier) -> Result<()> {
        for bucket in 0..classifier.bucket_count() {
            self.flush_bucket(classifier, bucket)?;
        }
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| anyhow!("shuffle sender thread panicked"))??;
        }
        self.group.broadcast_put(Var::FinishedSending, self.group.id(), Vec::new())
    }

    /// Wait for every peer's sign-off, then drain the inbox.
    pub fn collect(group: &PeerGroup) -> Result<Vec<Vec<u8>>> {
        group.wait_indexed(Var::FinishedSending, group.size())?;
        Ok(group.take_list(Var::Buckets))
    }
}
