use anyhow::{Context, Error, Result};
use clap::{Parser, Subcommand};
use log::info;
use rdfpack::adjacency::Encoding;
use rdfpack::{Corpus, IngestConfig, Ingestor, Manifest, TempCompression};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "rdfpack")]
#[command(about = "Build and inspect compacted RDF quad corpora")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest the files listed in a manifest into a corpus directory
    Ingest {
        /// Manifest file: one `<path> <graph-iri>` per line
        #[clap(long, short)]
        manifest: PathBuf,
        /// Corpus directory to create
        #[clap(long, short)]
        output: PathBuf,
        /// Stage to start from; stages before it must have completed earlier
        #[clap(long, default_value = "1")]
        resume_stage: u32,
        /// Compression of intermediate files (none or zstd)
        #[clap(long)]
        temp_compression: Option<TempCompression>,
        /// JSON file with ingestion settings
        #[clap(long, short)]
        config: Option<PathBuf>,
    },
    /// Print a summary of a corpus directory
    Stat {
        /// Corpus directory
        #[clap(long)]
        corpus: PathBuf,
        /// Print the summary as JSON
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

/// Process exit code for a failed command; library errors carry their own.
pub fn exit_code(err: &Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<rdfpack::Error>())
        .map_or(1, |e| e.exit_code())
}

fn execute(cmd: Cli) -> Result<()> {
    // CLI flags for verbosity take precedence. If nothing is set, we default to "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    match cmd.command {
        Commands::Ingest {
            manifest,
            output,
            resume_stage,
            temp_compression,
            config,
        } => ingest(&manifest, &output, resume_stage, temp_compression, config.as_deref()),
        Commands::Stat { corpus, json } => stat(&corpus, json),
    }
}

fn ingest(
    manifest: &Path,
    output: &Path,
    resume_stage: u32,
    temp_compression: Option<TempCompression>,
    config: Option<&Path>,
) -> Result<()> {
    let mut cfg = match config {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(tc) = temp_compression {
        cfg.temp_compression = tc;
    }
    let manifest = Manifest::from_file(manifest)
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    info!(
        "Ingesting {} inputs into {:?}",
        manifest.len(),
        output
    );
    let report = Ingestor::new(output, cfg).run(&manifest, resume_stage)?;
    println!(
        "ingested {} quads from {} files into {} buckets",
        report.quads, report.files_read, report.buckets
    );
    for skipped in &report.files_skipped {
        println!("skipped {}", skipped.display());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct BucketStat {
    predicate: String,
    subject: String,
    object: String,
    encoding: &'static str,
    entries: u64,
    graphs: usize,
}

#[derive(Debug, Serialize)]
struct CorpusStat {
    iris: u64,
    predicates: usize,
    graphs: usize,
    dictionaries: Vec<(String, u64)>,
    buckets: Vec<BucketStat>,
}

fn corpus_stat(corpus: &Corpus) -> CorpusStat {
    let buckets = corpus
        .buckets()
        .map(|b| BucketStat {
            predicate: corpus
                .predicates()
                .get(b.key().predicate as usize)
                .cloned()
                .unwrap_or_default(),
            subject: b.key().subject_kind.dir_name().to_string(),
            object: b.key().object_file_name(),
            encoding: match b.encoding() {
                Encoding::Bitmap => "bitmap",
                Encoding::LongBuffer => "long-buffer",
            },
            entries: b.len(),
            graphs: b.graphs().len(),
        })
        .collect();
    CorpusStat {
        iris: corpus.iris().len(),
        predicates: corpus.predicates().len(),
        graphs: corpus.graphs().len(),
        dictionaries: corpus
            .literal_dictionaries()
            .map(|(g, d)| (g.file_name(), d.len()))
            .collect(),
        buckets,
    }
}

fn stat(dir: &Path, json: bool) -> Result<()> {
    let corpus = Corpus::open(dir)?;
    let stat = corpus_stat(&corpus);
    if json {
        println!("{}", serde_json::to_string_pretty(&stat)?);
        return Ok(());
    }
    println!("corpus: {}", dir.display());
    println!("iris: {}", stat.iris);
    println!("predicates: {}", stat.predicates);
    println!("graphs: {}", stat.graphs);
    for (name, len) in &stat.dictionaries {
        println!("dictionary {}: {} values", name, len);
    }
    for b in &stat.buckets {
        println!(
            "{} [{} -> {}] {}: {} entries, {} graphs",
            b.predicate, b.subject, b.object, b.encoding, b.entries, b.graphs
        );
    }
    Ok(())
}
