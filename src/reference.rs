//! Single-process reference sort.
//!
//! Reads the whole input, sorts it in memory, streams it out. Slow and
//! RAM-bound, but trivially correct: the distributed engine is validated
//! against it.

use crate::record_io::{open_input, StreamOutput};
use anyhow::Result;
use rayon::prelude::*;
use std::path::Path;

/// Sort `input` into `output` in one process. Returns the record count.
pub fn reference_sort(input: &Path, output: &Path, window_elements: u64) -> Result<u64> {
    let mut source = open_input(input, window_elements)?;
    let total = source.len();

    let mut records = Vec::with_capacity(total as usize);
    source.seek(0)?;
    for _ in 0..total {
        records.push(source.read_record()?);
    }
    records.par_sort_unstable();

    let _ = std::fs::remove_file(output);
    let mut out = StreamOutput::create(output)?;
    out.write_records(&records)?;
    out.close()?;
    Ok(total)
}
