//! In-memory sort of the shuffled shipments.

use crate::record::{decode_records, Record, RECORD_LEN};
use anyhow::Result;
use rayon::prelude::*;

/// Decode every shipment and sort the combined run in place.
///
/// The order over records is total (key, then value), so the unstable
/// parallel sort yields the same output as any comparison sort.
pub fn sort_shipments(shipments: Vec<Vec<u8>>) -> Result<Vec<Record>> {
    let total: usize = shipments.iter().map(|payload| payload.len() / RECORD_LEN).sum();
    let mut records = Vec::with_capacity(total);
    for payload in &shipments {
        records.extend(decode_records(payload)?);
    }
    records.par_sort_unstable();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_records;
    use crate::test_support::generate_records;

    #[test]
    fn test_sorts_across_shipment_boundaries() {
        let records = generate_records(1000, 7);
        let shipments: Vec<Vec<u8>> =
            records.chunks(137).map(encode_records).collect();

        let sorted = sort_shipments(shipments).unwrap();

        let mut expected = records;
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_empty_and_duplicate_shipments() {
        assert!(sort_shipments(Vec::new()).unwrap().is_empty());

        let record = generate_records(1, 1)[0];
        let payload = encode_records(&[record, record]);
        let sorted = sort_shipments(vec![payload.clone(), payload]).unwrap();
        assert_eq!(sorted.len(), 4);
        assert!(sorted.iter().all(|r| *r == record));
    }
}
