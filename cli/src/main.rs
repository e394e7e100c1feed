use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context as _;
use bsdelta::progress::ProgressSink;
use bsdelta::{DiffContext, DiffParams, enc, patch};
use clap::{Args, Parser, Subcommand};
use memmap2::Mmap;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bsdelta", version, about = "bsdiff-family binary delta tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EngineArgs {
    /// Suffix sort width: 0 = sequential, k > 0 = up to k workers,
    /// k < 0 = cores + k
    #[arg(long, default_value_t = 0)]
    suffix_sort_concurrency: i32,

    /// Log resident memory at engine checkpoints
    #[arg(long)]
    measure_memory: bool,

    /// Log parallel-indexing overhead
    #[arg(long)]
    measure_parallel_overhead: bool,
}

impl EngineArgs {
    fn diff_params(&self) -> DiffParams {
        DiffParams {
            suffix_sort_concurrency: self.suffix_sort_concurrency,
            measure_memory: self.measure_memory,
            measure_parallel_overhead: self.measure_parallel_overhead,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Produce a patch that turns OLDER into NEWER
    Diff {
        older: PathBuf,
        newer: PathBuf,
        patch: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Rebuild NEWER from a patch and OLDER
    Patch {
        patch: PathBuf,
        older: PathBuf,
        output: PathBuf,
    },
    /// Diff OLDER against NEWER in memory and verify the stream replays
    Cycle {
        older: PathBuf,
        newer: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn label(&mut self, label: &str) {
        info!("{label}");
    }

    fn progress(&mut self, fraction: f32) {
        info!("{:3.0}%", fraction * 100.0);
    }
}

fn map_file(path: &Path) -> anyhow::Result<Mmap> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let map =
        unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;
    Ok(map)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Diff {
            older,
            newer,
            patch,
            engine,
        } => {
            let start = Instant::now();
            let obuf = map_file(&older)?;
            let nbuf = map_file(&newer)?;

            let out = BufWriter::new(
                File::create(&patch).with_context(|| format!("creating {}", patch.display()))?,
            );
            let mut w = enc::Writer::new(out)?;

            let mut ctx = DiffContext::with_params(engine.diff_params());
            ctx.diff(&obuf[..], &nbuf[..], |c| w.write(c), &mut LogProgress)?;
            w.flush()?;

            let stats = ctx.stats();
            info!(
                "sorted in {:?}, scanned in {:?}, biggest add {}",
                stats.time_spent_sorting, stats.time_spent_scanning, stats.biggest_add
            );
            info!("completed in {:?}", start.elapsed());
        }
        Command::Patch {
            patch,
            older,
            output,
        } => {
            let start = Instant::now();
            let patch_file = BufReader::new(
                File::open(&patch).with_context(|| format!("opening {}", patch.display()))?,
            );
            let obuf = map_file(&older)?;

            let mut out = BufWriter::new(
                File::create(&output).with_context(|| format!("creating {}", output.display()))?,
            );
            let written = patch::apply(patch_file, &obuf[..], &mut out)?;
            out.flush()?;

            info!("wrote {written} bytes in {:?}", start.elapsed());
        }
        Command::Cycle {
            older,
            newer,
            engine,
        } => {
            let obuf = map_file(&older)?;
            let nbuf = map_file(&newer)?;

            let mut ctx = DiffContext::with_params(engine.diff_params());
            bsdelta::assert_cycle_with(&mut ctx, &obuf[..], &nbuf[..]);
            info!("cycle OK");
        }
    }

    Ok(())
}
