use anyhow::{Context, Result};
use clap::Parser;
use riffle::{word_count, JobConfig, MalformedPolicy};
use std::fs;
use std::path::{Path, PathBuf};

/// Count token occurrences across a text corpus.
#[derive(Parser, Debug)]
#[command(name = "wordcount", version)]
struct Args {
    /// Input file or directory, walked recursively
    input: String,
    /// Output directory for the part-*.tsv files
    output: String,
    /// Skip-pattern file with one regular expression per line; matches are
    /// removed from lines before tokenizing (repeatable)
    #[arg(long = "skip", value_name = "FILE")]
    skip: Vec<PathBuf>,
    /// Keep case instead of lower-casing every line
    #[arg(long)]
    case_sensitive: bool,
    /// Number of reduce partitions, one output file each
    #[arg(long, default_value_t = 2)]
    reducers: usize,
    /// Disable in-map pre-aggregation before the shuffle
    #[arg(long)]
    no_combine: bool,
    /// Fail the whole job on a malformed input line instead of skipping it
    #[arg(long)]
    strict: bool,
    /// Remove a pre-existing output directory before starting
    #[arg(long)]
    overwrite: bool,
    /// Print the first N output lines of partition 0 after the run
    #[arg(long, value_name = "N")]
    preview: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    if args.overwrite {
        let out = Path::new(&args.output);
        if out.exists() {
            fs::remove_dir_all(out).with_context(|| format!("remove {}", out.display()))?;
        }
    }

    let config = JobConfig {
        case_sensitive: args.case_sensitive,
        skip_patterns_enabled: !args.skip.is_empty(),
        reduce_partition_count: args.reducers,
        combine_enabled: !args.no_combine,
        malformed_records: if args.strict { MalformedPolicy::Abort } else { MalformedPolicy::Skip },
        ..JobConfig::default()
    };

    let summary = word_count(&[args.input], &args.output, &args.skip, &config)?;

    let mut counters: Vec<_> = summary.counters.iter().collect();
    counters.sort();
    for (name, value) in counters {
        println!("{}={}", name, value);
    }
    for path in &summary.partition_files {
        println!("{}", path.display());
    }

    if let Some(n) = args.preview {
        if let Some(first) = summary.partition_files.first() {
            let content =
                fs::read_to_string(first).with_context(|| format!("read {}", first.display()))?;
            for line in content.lines().take(n) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}
