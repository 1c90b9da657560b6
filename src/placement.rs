//! Output placement: how sorted runs reach durable storage.
//!
//! Shared-file writes all runs into one pre-sized file at disjoint offsets;
//! per-peer-file gives every peer its own partition file; sequential
//! circulates a token and appends in peer order. All three produce the same
//! bytes when the partition files are concatenated in id order.

use crate::record::Record;
use crate::record_io::{
    part_path, presize_output, remove_stale_parts, SharedFileOutput, StreamOutput,
};
use crate::runtime::{PeerGroup, Var};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::str::FromStr;

/// Placement variant, chosen at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// One pre-sized output file, concurrently written at disjoint offsets.
    #[default]
    SharedFile,
    /// One `<prefix>-part-NNNNN` file per peer.
    PerPeerFiles,
    /// One output file, appended in id order under a circulating token.
    Sequential,
}

impl FromStr for Placement {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "shared" => Ok(Self::SharedFile),
            "parts" => Ok(Self::PerPeerFiles),
            "sequential" => Ok(Self::Sequential),
            other => bail!("unknown placement '{other}' (expected shared|parts|sequential)"),
        }
    }
}

/// Peer 0's pre-run cleanup: drop whatever a previous run left at the
/// output path and make sure its parent directory exists.
pub fn clean_output(placement: Placement, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }
    }
    match placement {
        Placement::SharedFile | Placement::Sequential => {
            let _ = std::fs::remove_file(output);
        }
        Placement::PerPeerFiles => {
            remove_stale_parts(output)?;
        }
    }
    Ok(())
}

/// Pre-size the shared output on peer 0 before any peer can reach its
/// write phase.
pub fn presize_shared(output: &Path, bytes: u64) -> Result<()> {
    presize_output(output, bytes)
}

/// Announce this peer's sorted-run length to the whole group.
pub fn announce_run_length(group: &PeerGroup, len: u64) -> Result<()> {
    group.broadcast_put(Var::Elements, group.id(), len.to_le_bytes().to_vec())
}

/// Wait for all run lengths; returned ordered by peer id.
pub fn collect_run_lengths(group: &PeerGroup) -> Result<Vec<u64>> {
    let entries = group.wait_indexed(Var::Elements, group.size())?;
    entries
        .into_iter()
        .map(|(_, payload)| {
            let bytes: [u8; 8] = payload
                .as_slice()
                .try_into()
                .context("run-length announcement must be 8 bytes")?;
            Ok(u64::from_le_bytes(bytes))
        })
        .collect()
}

/// First output record owned by `id`, given every peer's run length.
pub fn run_offset(lengths: &[u64], id: usize) -> u64 {
    lengths[..id].iter().sum()
}

/// Write `run` into the shared file at the offset implied by the lengths
/// of the peers before this one.
pub fn write_shared(
    group: &PeerGroup,
    output: &Path,
    lengths: &[u64],
    run: &[Record],
    window_elements: u64,
) -> Result<()> {
    debug_assert_eq!(lengths[group.id()] as usize, run.len());
    let start = run_offset(lengths, group.id());
    let mut out = SharedFileOutput::open(output, start, run.len() as u64, window_elements)?;
    out.write_records(run)?;
    out.close()
}

/// Write `run` to this peer's own partition file.
pub fn write_part(output_prefix: &Path, id: usize, run: &[Record]) -> Result<()> {
    let path = part_path(output_prefix, id);
    let mut out = StreamOutput::create(&path)?;
    out.write_records(run)?;
    out.close()
}

/// Append `run` to the single output file; callers hold the sequencer
/// token across this call.
pub fn append_run(output: &Path, run: &[Record]) -> Result<()> {
    let mut out = StreamOutput::append(output)?;
    out.write_records(run)?;
    out.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RECORD_LEN;

    #[test]
    fn test_run_offsets_are_disjoint_and_cover_the_output() {
        let lengths = [3u64, 0, 7, 1, 12];
        let total: u64 = lengths.iter().sum();

        let ranges: Vec<(u64, u64)> = (0..lengths.len())
            .map(|id| {
                let start = run_offset(&lengths, id) * RECORD_LEN as u64;
                (start, start + lengths[id] * RECORD_LEN as u64)
            })
            .collect();

        for (a, range_a) in ranges.iter().enumerate() {
            for (b, range_b) in ranges.iter().enumerate() {
                if a != b {
                    assert!(
                        range_a.1 <= range_b.0 || range_b.1 <= range_a.0,
                        "byte ranges of peers {a} and {b} overlap"
                    );
                }
            }
        }
        assert_eq!(ranges.last().unwrap().1, total * RECORD_LEN as u64);
    }

    #[test]
    fn test_placement_parses_from_cli_names() {
        assert_eq!("shared".parse::<Placement>().unwrap(), Placement::SharedFile);
        assert_eq!("parts".parse::<Placement>().unwrap(), Placement::PerPeerFiles);
        assert_eq!("sequential".parse::<Placement>().unwrap(), Placement::Sequential);
        assert!("hdfs".parse::<Placement>().is_err());
    }
}
