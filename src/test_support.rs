//! Helpers shared by tests and benchmarks.

use crate::record::{decode_records, encode_records, Record, KEY_LEN, VALUE_LEN};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Deterministic pseudo-random records.
pub fn generate_records(count: usize, seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut key = [0u8; KEY_LEN];
            let mut value = [0u8; VALUE_LEN];
            rng.fill(&mut key[..]);
            rng.fill(&mut value[..]);
            Record::new(key, value)
        })
        .collect()
}

/// A record whose key ends in `key_tail` and whose value is all `value_tag`
/// bytes; handy for crafting boundary scenarios.
pub fn keyed_record(key_tail: u8, value_tag: u8) -> Record {
    let mut key = [0u8; KEY_LEN];
    key[KEY_LEN - 1] = key_tail;
    Record::new(key, [value_tag; VALUE_LEN])
}

pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    std::fs::write(path, encode_records(records))?;
    Ok(())
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let bytes = std::fs::read(path)?;
    decode_records(&bytes)
}

/// A nodes file with one `localhost` line per peer.
pub fn write_nodes_file(path: &Path, peers: usize) -> Result<()> {
    std::fs::write(path, "localhost\n".repeat(peers))?;
    Ok(())
}
