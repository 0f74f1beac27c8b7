use std::error::Error;
use std::path::PathBuf;

use bramcheck_verify::{Backfill, CheckOptions, FRAME_WORDS_7SERIES, check_all, check_design};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bramcheck",
    about = "Check BRAM initialization bits against FASM and bitstream frames."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a single design directory.
    Design {
        dir: PathBuf,
        #[command(flatten)]
        opts: Opts,
    },
    /// Check every design directory under a base directory.
    All {
        base_dir: PathBuf,
        #[command(flatten)]
        opts: Opts,
    },
}

#[derive(Debug, Args)]
struct Opts {
    /// Memory width in bits [default: taken from the MDD file]
    #[arg(short, long)]
    bits: Option<usize>,
    #[arg(short, long, default_value = "mem/ram")]
    mem: String,
    #[arg(short, long)]
    verbose: bool,
    #[arg(short, long)]
    print_mappings: bool,
    /// Do not pad short INIT/INITP sequences with zero lines.
    #[arg(long)]
    no_backfill: bool,
    /// Frame length in 32-bit words.
    #[arg(long, default_value_t = FRAME_WORDS_7SERIES)]
    frame_words: usize,
}

impl From<Opts> for CheckOptions {
    fn from(opts: Opts) -> Self {
        CheckOptions {
            memory: opts.mem,
            width: opts.bits,
            verbose: opts.verbose,
            print_mappings: opts.print_mappings,
            backfill: if opts.no_backfill {
                Backfill::Off
            } else {
                Backfill::Zeros
            },
            frame_words: opts.frame_words,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Design { dir, opts } => {
            let report = check_design(&dir, &opts.into())?;
            println!(
                "{d}: {c} cells, {b} bits checked",
                d = report.design,
                c = report.cells,
                b = report.bits
            );
        }
        Command::All { base_dir, opts } => {
            let reports = check_all(&base_dir, &opts.into())?;
            let bits: usize = reports.iter().map(|r| r.bits).sum();
            println!("{n} designs, {bits} bits checked", n = reports.len());
        }
    }
    Ok(())
}
