//! Fixed-length record codec.
//!
//! A record is 100 bytes on disk and on the wire: a 10-byte key followed by
//! a 90-byte value. Keys compare as unsigned byte sequences; records compare
//! by key, then by value, so the order over records is total.

use anyhow::{bail, Result};
use std::fmt;

pub const KEY_LEN: usize = 10;
pub const VALUE_LEN: usize = 90;
pub const RECORD_LEN: usize = KEY_LEN + VALUE_LEN;

/// One 100-byte sort record.
///
/// Field order matters: the derived `Ord` compares the key bytes first and
/// falls back to the value bytes, which is exactly the sort order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    key: [u8; KEY_LEN],
    value: [u8; VALUE_LEN],
}

impl Record {
    pub fn new(key: [u8; KEY_LEN], value: [u8; VALUE_LEN]) -> Self {
        Self { key, value }
    }

    /// Decode a record from exactly [`RECORD_LEN`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), RECORD_LEN);
        let mut key = [0u8; KEY_LEN];
        let mut value = [0u8; VALUE_LEN];
        key.copy_from_slice(&bytes[..KEY_LEN]);
        value.copy_from_slice(&bytes[KEY_LEN..RECORD_LEN]);
        Self { key, value }
    }

    /// Write the record image into `out`, which must hold [`RECORD_LEN`] bytes.
    pub fn write_to(&self, out: &mut [u8]) {
        out[..KEY_LEN].copy_from_slice(&self.key);
        out[KEY_LEN..RECORD_LEN].copy_from_slice(&self.value);
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn value(&self) -> &[u8; VALUE_LEN] {
        &self.value
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record{{key=")?;
        for byte in &self.key {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "}}")
    }
}

/// Concatenate records into one contiguous payload (the shipment format).
pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut payload = vec![0u8; records.len() * RECORD_LEN];
    for (record, chunk) in records.iter().zip(payload.chunks_exact_mut(RECORD_LEN)) {
        record.write_to(chunk);
    }
    payload
}

/// Decode a payload of concatenated records.
pub fn decode_records(payload: &[u8]) -> Result<Vec<Record>> {
    if payload.len() % RECORD_LEN != 0 {
        bail!(
            "payload of {} bytes is not a whole number of {}-byte records",
            payload.len(),
            RECORD_LEN
        );
    }
    Ok(payload.chunks_exact(RECORD_LEN).map(Record::from_bytes).collect())
}
