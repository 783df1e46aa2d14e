use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "entopic")]
#[command(about = "Entity-linked topic modeling over tagged document stores", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Extract positional entity occurrences per document (the "docs" artifact).
    ExtractDocs {
        /// Tagged-text store with the entity_linking table.
        sqlite_file: PathBuf,
        /// Output artifact path.
        docs_file: PathBuf,
        /// Number of workers.
        #[arg(long, default_value_t = 4)]
        processes: usize,
        /// Minimum link probability of counted entities (strict threshold).
        #[arg(long, default_value_t = 0.25)]
        min_proba: f64,
        /// Minimum surface length of linked entities.
        #[arg(long, default_value_t = 2)]
        min_surface_len: usize,
        /// Knowledge-base file of the entity linking step (labels).
        #[arg(long)]
        entities_file: Option<PathBuf>,
    },

    /// Extract confidence-weighted term counts per document (the "corpus" artifact).
    ExtractCorpus {
        /// Tagged-text store with the entity_linking table.
        sqlite_file: PathBuf,
        /// Output artifact path.
        corpus_file: PathBuf,
        /// Number of workers.
        #[arg(long, default_value_t = 4)]
        processes: usize,
        /// Minimum link probability of counted entities (strict threshold).
        #[arg(long, default_value_t = 0.25)]
        min_proba: f64,
        /// Minimum surface length of linked entities.
        #[arg(long, default_value_t = 2)]
        min_surface_len: usize,
        /// Knowledge-base file of the entity linking step (labels).
        #[arg(long)]
        entities_file: Option<PathBuf>,
    },

    /// Build the weighted bag of words and train a topic model through the
    /// external trainer hook.
    Train {
        /// Tagged-text store with the entity_linking table.
        sqlite_file: PathBuf,
        /// Path the trainer persists the model to.
        model_file: PathBuf,
        /// Number of topics.
        #[arg(long, default_value_t = 10)]
        num_topics: usize,
        /// Number of workers (extraction and training).
        #[arg(long, default_value_t = 4)]
        processes: usize,
        /// Minimum link probability of counted entities (strict threshold).
        #[arg(long, default_value_t = 0.25)]
        min_proba: f64,
        /// Minimum surface length of linked entities.
        #[arg(long, default_value_t = 2)]
        min_surface_len: usize,
        /// Knowledge-base file of the entity linking step (labels).
        #[arg(long)]
        entities_file: Option<PathBuf>,
        /// Reuse this corpus artifact if it exists; write it after
        /// extraction otherwise. Reuse is gated on existence only.
        #[arg(long)]
        corpus_file: Option<PathBuf>,
        /// External trainer command (env: ENTOPIC_TRAIN_HOOK).
        #[arg(long)]
        train_hook: Option<String>,
    },

    /// Store summary: documents, pages, links, filtered vocabulary size.
    Status {
        sqlite_file: PathBuf,
        /// Minimum link probability (strict threshold).
        #[arg(long, default_value_t = 0.25)]
        min_proba: f64,
        /// Minimum surface length of linked entities.
        #[arg(long, default_value_t = 2)]
        min_surface_len: usize,
        /// Output JSON.
        #[arg(long)]
        json: bool,
    },
}
