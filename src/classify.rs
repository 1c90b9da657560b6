//! Record-to-bucket classification against the broadcast pivot list.

use crate::record::Record;

/// Index of the bucket `record` belongs to: the smallest `b` with
/// `record < pivots[b]`, or `pivots.len()` when no pivot is greater.
///
/// Records equal to a pivot land in the higher bucket. Pivot lists are
/// byte-identical on every peer, so the boundary policy is globally
/// consistent and each record has exactly one owner.
#[inline]
pub fn bucket_for(pivots: &[Record], record: &Record) -> usize {
    pivots.partition_point(|p| p <= record)
}

/// Per-peer classification buffers: one sub-bucket per possible target.
///
/// A peer allocates `pivots.len() + 1` sub-buckets; targets with a higher
/// id never receive a shipment and wait for none.
pub struct Classifier {
    pivots: Vec<Record>,
    sub_buckets: Vec<Vec<Record>>,
}

impl Classifier {
    pub fn new(pivots: Vec<Record>) -> Self {
        debug_assert!(pivots.windows(2).all(|w| w[0] < w[1]));
        let buckets = pivots.len() + 1;
        Self {
            pivots,
            sub_buckets: (0..buckets).map(|_| Vec::new()).collect(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.sub_buckets.len()
    }

    pub fn pivot_count(&self) -> usize {
        self.pivots.len()
    }

    /// Route one record to its sub-bucket; returns the bucket index.
    pub fn push(&mut self, record: Record) -> usize {
        let bucket = bucket_for(&self.pivots, &record);
        self.sub_buckets[bucket].push(record);
        bucket
    }

    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.sub_buckets[bucket].len()
    }

    /// Take the contents of one sub-bucket, leaving it empty.
    pub fn take_bucket(&mut self, bucket: usize) -> Vec<Record> {
        std::mem::take(&mut self.sub_buckets[bucket])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KEY_LEN, VALUE_LEN};

    fn keyed(tail: u8) -> Record {
        let mut key = [0u8; KEY_LEN];
        key[KEY_LEN - 1] = tail;
        Record::new(key, [0u8; VALUE_LEN])
    }

    #[test]
    fn test_bucket_for_splits_on_pivots() {
        let pivots = vec![keyed(10), keyed(20)];
        assert_eq!(bucket_for(&pivots, &keyed(5)), 0);
        assert_eq!(bucket_for(&pivots, &keyed(15)), 1);
        assert_eq!(bucket_for(&pivots, &keyed(25)), 2);
    }

    #[test]
    fn test_boundary_records_go_to_the_higher_bucket() {
        let pivots = vec![keyed(10), keyed(20)];
        assert_eq!(bucket_for(&pivots, &keyed(10)), 1);
        assert_eq!(bucket_for(&pivots, &keyed(20)), 2);
    }

    #[test]
    fn test_no_pivots_means_one_bucket() {
        assert_eq!(bucket_for(&[], &keyed(42)), 0);
        let mut classifier = Classifier::new(Vec::new());
        assert_eq!(classifier.bucket_count(), 1);
        assert_eq!(classifier.push(keyed(42)), 0);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let pivots = vec![keyed(50), keyed(100), keyed(150)];
        let records: Vec<Record> = (0..=200).step_by(7).map(|t| keyed(t as u8)).collect();

        let sizes = |records: &[Record]| -> Vec<usize> {
            let mut classifier = Classifier::new(pivots.clone());
            for record in records {
                classifier.push(*record);
            }
            (0..classifier.bucket_count()).map(|b| classifier.bucket_len(b)).collect()
        };

        let first = sizes(&records);
        let second = sizes(&records);
        assert_eq!(first, second);
        assert_eq!(first.iter().sum::<usize>(), records.len());
    }
}
