//! Operator CLI for a quire history directory.
//!
//! Usage:
//!   quire-admin --root ./histories init projects/pizza
//!   quire-admin --root ./histories commit projects/pizza --author user:amy edits.json
//!   quire-admin --root ./histories log projects/pizza --json
//!   quire-admin --config pool.ron sync-check
//!
//! Every command goes through the same `DocumentPool` the server uses, so a
//! history that loads here loads there.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use quire_history::{ChangeMetadata, DocumentId, Edit, Revision, RevisionLog};
use quire_pool::{DocumentPool, FileBackend, HistoryBackend, PoolConfig};
use tracing_subscriber::{EnvFilter, fmt};

/// Inspect and maintain quire document histories.
#[derive(Parser, Debug)]
#[command(name = "quire-admin")]
#[command(about = "Operator CLI for quire history directories")]
struct Args {
    /// RON pool configuration file
    #[arg(long, conflicts_with = "root")]
    config: Option<PathBuf>,

    /// History directory (overrides the configured root)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty history for a new document
    Init { document: DocumentId },

    /// Print the document's head revision
    Head { document: DocumentId },

    /// Commit a JSON array of edits at the current head
    Commit {
        document: DocumentId,
        /// File holding `[{"add_axiom": "..."}, ...]`
        edits: PathBuf,
        #[arg(long)]
        author: String,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// List every bundle with its metadata
    Log {
        document: DocumentId,
        /// Dump the whole history as JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Print the net changes between two revisions
    Changes {
        document: DocumentId,
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
    },

    /// List every stored document with its head revision
    Revisions,

    /// Write the sub-history `[from, to)` as JSON
    Crop {
        document: DocumentId,
        #[arg(long)]
        from: u64,
        #[arg(long)]
        to: u64,
    },

    /// Load every stored history and report the broken ones
    SyncCheck,
}

fn resolve_config(args: &Args) -> Result<PoolConfig> {
    let mut config = match &args.config {
        Some(path) => PoolConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PoolConfig::default(),
    };
    if let Some(root) = &args.root {
        config.history_root = root.clone();
    }
    Ok(config)
}

fn run(command: Command, config: &PoolConfig, out: &mut impl Write) -> Result<()> {
    let pool: DocumentPool<Edit> = DocumentPool::from_config(config)?;
    let result = dispatch(command, &pool, config, out);
    let disposed = pool.dispose().context("flushing histories");
    result.and(disposed)
}

fn dispatch(
    command: Command,
    pool: &DocumentPool<Edit>,
    config: &PoolConfig,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Init { document } => {
            pool.create_document(&document)?;
            writeln!(out, "created {document} at {}", Revision::ZERO)?;
        }
        Command::Head { document } => {
            writeln!(out, "{}", pool.lookup_head(&document)?)?;
        }
        Command::Commit {
            document,
            edits,
            author,
            comment,
        } => {
            let text = std::fs::read_to_string(&edits)
                .with_context(|| format!("reading {}", edits.display()))?;
            let edits: Vec<Edit> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", edits.display()))?;
            let head = pool.lookup_head(&document)?;
            let metadata = ChangeMetadata::now(author).with_comment(comment);
            let new_head = pool.commit(&document, head, metadata, edits)?;
            writeln!(out, "{document}: {head} -> {new_head}")?;
        }
        Command::Log { document, json } => {
            let log = pool.lookup(&document)?;
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&*log)?)?;
            } else {
                for bundle in log.bundles() {
                    write!(
                        out,
                        "{}  {}  {}  {} change(s)",
                        bundle.revision,
                        bundle.metadata.timestamp_ms,
                        bundle.metadata.author,
                        bundle.changes.len()
                    )?;
                    if !bundle.metadata.comment.is_empty() {
                        write!(out, "  {}", bundle.metadata.comment)?;
                    }
                    writeln!(out)?;
                }
            }
        }
        Command::Changes { document, from, to } => {
            let log = pool.lookup(&document)?;
            let start = from.map(Revision::new).unwrap_or(log.start_revision());
            let end = to.map(Revision::new).unwrap_or(log.end_revision());
            for change in log.crop(start, end)?.changes() {
                writeln!(out, "{}", serde_json::to_string(&change)?)?;
            }
        }
        Command::Revisions => {
            let backend = FileBackend::new(&config.history_root);
            for document in HistoryBackend::<Edit>::list(&backend)? {
                match pool.lookup_head(&document) {
                    Ok(head) => writeln!(out, "{document}\t{head}")?,
                    Err(e) => writeln!(out, "{document}\terror: {e}")?,
                }
            }
        }
        Command::Crop { document, from, to } => {
            let log = pool.lookup(&document)?;
            let cropped: RevisionLog<Edit> = log.crop(Revision::new(from), Revision::new(to))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&cropped)?)?;
        }
        Command::SyncCheck => {
            let backend = FileBackend::new(&config.history_root);
            let mut broken = 0;
            let documents = HistoryBackend::<Edit>::list(&backend)?;
            for document in &documents {
                if let Err(e) = pool.lookup(document) {
                    tracing::error!(document = %document, error = %e, "History failed to load");
                    writeln!(out, "{document}: {e}")?;
                    broken += 1;
                }
            }
            let summary = pool.sync();
            if !summary.is_clean() {
                bail!("{} histories failed to flush", summary.failures.len());
            }
            writeln!(out, "{} histories checked, {broken} broken", documents.len())?;
            if broken > 0 {
                bail!("{broken} broken histories");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    tracing::debug!(root = %config.history_root.display(), "Using history directory");

    let mut stdout = std::io::stdout().lock();
    run(args.command, &config, &mut stdout)
}
