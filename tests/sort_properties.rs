//! Property checks over randomized inputs: the output must be the sorted
//! permutation of the input, byte for byte, for every placement and
//! shuffle combination.

use tempfile::TempDir;
use terasort_rs::record::RECORD_LEN;
use terasort_rs::reference::reference_sort;
use terasort_rs::test_support::{generate_records, read_records, write_records};
use terasort_rs::{
    run_group, Placement, Record, ShuffleStrategy, SortConfig, SortTuning,
};

mod support;
use support::{run_sort, run_sort_with_tuning};

fn check_sorted_permutation(placement: Placement, shuffle: ShuffleStrategy) {
    let records = generate_records(5_000, 42);
    let run = run_sort(&records, 4, 64, placement, shuffle).unwrap();

    let mut expected = records;
    expected.sort();
    let output = run.output_records().unwrap();
    assert_eq!(output.len(), expected.len());
    assert_eq!(output, expected);
}

#[test]
fn test_shared_file_batch() {
    check_sorted_permutation(Placement::SharedFile, ShuffleStrategy::Batch);
}

#[test]
fn test_shared_file_streamed() {
    check_sorted_permutation(Placement::SharedFile, ShuffleStrategy::Streamed);
}

#[test]
fn test_per_peer_files_batch() {
    check_sorted_permutation(Placement::PerPeerFiles, ShuffleStrategy::Batch);
}

#[test]
fn test_per_peer_files_streamed() {
    check_sorted_permutation(Placement::PerPeerFiles, ShuffleStrategy::Streamed);
}

#[test]
fn test_sequential_batch() {
    check_sorted_permutation(Placement::Sequential, ShuffleStrategy::Batch);
}

#[test]
fn test_sequential_streamed() {
    check_sorted_permutation(Placement::Sequential, ShuffleStrategy::Streamed);
}

#[test]
fn test_distributed_output_matches_the_reference_sort() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input");
    let records = generate_records(10_000, 7);
    write_records(&input, &records).unwrap();

    let oracle = dir.path().join("oracle");
    reference_sort(&input, &oracle, 1_000).unwrap();

    let output = dir.path().join("output");
    let config = SortConfig::new(&input, &output, 200, 5);
    run_group(&config).unwrap();

    let oracle_bytes = std::fs::read(&oracle).unwrap();
    let output_bytes = std::fs::read(&output).unwrap();
    assert_eq!(output_bytes.len(), records.len() * RECORD_LEN);
    assert_eq!(output_bytes, oracle_bytes);
}

#[test]
fn test_output_byte_length_equals_input_byte_length() {
    let records = generate_records(1_234, 3);
    let run =
        run_sort(&records, 3, 30, Placement::SharedFile, ShuffleStrategy::Batch).unwrap();
    let meta = std::fs::metadata(&run.output).unwrap();
    assert_eq!(meta.len(), (records.len() * RECORD_LEN) as u64);
}

#[test]
fn test_tiny_windows_and_flush_thresholds_change_nothing() {
    let records = generate_records(500, 11);
    let tuning = SortTuning::default().with_mmap_elements(13).with_send_bucket_size(7);
    let run = run_sort_with_tuning(
        &records,
        3,
        24,
        Placement::SharedFile,
        ShuffleStrategy::Streamed,
        tuning,
    )
    .unwrap();

    let mut expected = records;
    expected.sort();
    assert_eq!(run.output_records().unwrap(), expected);
}

#[test]
fn test_all_duplicate_keys_sort_by_value() {
    let mut records: Vec<Record> = generate_records(600, 17)
        .into_iter()
        .map(|record| Record::new([9u8; 10], *record.value()))
        .collect();
    let run = run_sort(&records, 4, 32, Placement::SharedFile, ShuffleStrategy::Batch).unwrap();

    records.sort();
    assert_eq!(run.output_records().unwrap(), records);
}

#[test]
fn test_empty_input_produces_empty_output() {
    let run = run_sort(&[], 3, 8, Placement::SharedFile, ShuffleStrategy::Batch).unwrap();
    assert!(run.output_records().unwrap().is_empty());
    assert_eq!(std::fs::metadata(&run.output).unwrap().len(), 0);
}

#[test]
fn test_fewer_records_than_peers() {
    let records = generate_records(2, 23);
    let run = run_sort(&records, 4, 4, Placement::PerPeerFiles, ShuffleStrategy::Batch).unwrap();

    let mut expected = records;
    expected.sort();
    assert_eq!(run.output_records().unwrap(), expected);
}

#[test]
fn test_single_peer_group_degenerates_to_a_local_sort() {
    let records = generate_records(300, 29);
    let run = run_sort(&records, 1, 10, Placement::SharedFile, ShuffleStrategy::Batch).unwrap();

    let mut expected = records;
    expected.sort();
    assert_eq!(run.output_records().unwrap(), expected);
}

#[test]
fn test_directory_input_concatenates_part_files() {
    let dir = TempDir::new().unwrap();
    let input_dir = dir.path().join("staged");
    std::fs::create_dir(&input_dir).unwrap();

    let records = generate_records(900, 31);
    write_records(&input_dir.join("part00000"), &records[..300]).unwrap();
    write_records(&input_dir.join("part00001"), &records[300..650]).unwrap();
    write_records(&input_dir.join("part00002"), &records[650..]).unwrap();

    let output = dir.path().join("output");
    let config = SortConfig::new(&input_dir, &output, 32, 3);
    run_group(&config).unwrap();

    let mut expected = records;
    expected.sort();
    assert_eq!(read_records(&output).unwrap(), expected);
}
