use anyhow::{bail, Result};
use std::path::Path;
use std::process::ExitCode;
use terasort_rs::config::SortTuning;
use terasort_rs::reference::reference_sort;
use tracing::info;

fn print_usage() {
    eprintln!(
        r#"terasort_local - single-process reference sort for 100-byte records

USAGE:
    terasort_local <input-path> <output-path>
"#
    );
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_usage();
        return Ok(());
    }
    if args.len() != 2 {
        print_usage();
        bail!("expected 2 positional arguments, got {}", args.len());
    }

    let tuning = SortTuning::from_env()?;
    let total = reference_sort(Path::new(&args[0]), Path::new(&args[1]), tuning.mmap_elements)?;
    info!(records = total, "reference sort complete");
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
