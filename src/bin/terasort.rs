use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use terasort_rs::config::{read_nodes_file, SortConfig, SortTuning};
use terasort_rs::placement::Placement;
use terasort_rs::shuffle::ShuffleStrategy;
use tracing::info;

fn print_usage() {
    eprintln!(
        r#"terasort - distributed sample sort for 100-byte records

USAGE:
    terasort <input-path> <output-path> <sample-size> <nodes-file> [OPTIONS]

ARGS:
    <input-path>     Record file, or directory of part* files
    <output-path>    Output file, or prefix for --placement parts
    <sample-size>    Total pivot samples across all peers
    <nodes-file>     Host list, one line per peer; sizes the group

OPTIONS:
    --placement <shared|parts|sequential>   Output placement [default: shared]
    --shuffle <batch|streamed>              Shuffle strategy [default: batch]
    --mmap-elements <N>                     Records per mmap window [default: 1000000]
    --send-bucket-size <N>                  Streamed flush threshold [default: 100000]
    -h, --help                              Print help

ENVIRONMENT:
    TERASORT_MMAP_ELEMENTS       Records per mmap window
    TERASORT_SEND_BUCKET_SIZE    Streamed flush threshold
"#
    );
}

fn parse_config() -> Result<Option<SortConfig>> {
    let mut placement = Placement::default();
    let mut shuffle = ShuffleStrategy::default();
    let mut tuning = SortTuning::from_env()?;
    let mut positionals: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            "--placement" => {
                placement = args.next().context("--placement needs a value")?.parse()?;
            }
            "--shuffle" => {
                shuffle = args.next().context("--shuffle needs a value")?.parse()?;
            }
            "--mmap-elements" => {
                let raw = args.next().context("--mmap-elements needs a value")?;
                tuning.mmap_elements =
                    raw.parse().with_context(|| format!("--mmap-elements {raw}"))?;
            }
            "--send-bucket-size" => {
                let raw = args.next().context("--send-bucket-size needs a value")?;
                tuning.send_bucket_size =
                    raw.parse().with_context(|| format!("--send-bucket-size {raw}"))?;
            }
            flag if flag.starts_with('-') => {
                print_usage();
                bail!("unknown option {flag}");
            }
            _ => positionals.push(arg),
        }
    }

    if positionals.len() != 4 {
        print_usage();
        bail!("expected 4 positional arguments, got {}", positionals.len());
    }

    let sample_size: usize = positionals[2]
        .parse()
        .with_context(|| format!("sample-size '{}'", positionals[2]))?;
    let nodes = read_nodes_file(Path::new(&positionals[3]))?;

    Ok(Some(SortConfig {
        input: PathBuf::from(&positionals[0]),
        output: PathBuf::from(&positionals[1]),
        sample_size,
        peers: nodes.len(),
        placement,
        shuffle,
        tuning,
    }))
}

fn run() -> Result<()> {
    let Some(config) = parse_config()? else {
        return Ok(());
    };
    info!(
        input = %config.input.display(),
        output = %config.output.display(),
        sample_size = config.sample_size,
        peers = config.peers,
        "launching sort group"
    );

    let reports = terasort_rs::run_group(&config)?;
    let written: u64 = reports.iter().map(|report| report.records_written).sum();
    info!(records = written, "sort complete");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
