mod cli;
mod corpus;
mod dispatch;
mod error;
mod linking;
mod ner;
mod store;
mod topic;
mod worker;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use cli::{Cli, Command};
use corpus::{
    Artifact, concat, label_counts, label_occurrences, load_artifact, make_bow, save_artifact,
};
use dispatch::run_jobs;
use error::Result;
use linking::{LinkFilter, load_link_table};
use store::{CorpusDb, load_entity_labels};
use topic::{TRAIN_HOOK_ENV, TrainRequest, resolve_train_hook, run_train_hook};
use worker::{EntityOccurrence, WeightedCount, WorkerInit, count_weighted, extract_occurrences};

#[derive(Serialize)]
struct StatusReport {
    documents: usize,
    pages: usize,
    links: usize,
    linked_documents: usize,
    vocabulary_terms: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::ExtractDocs {
            sqlite_file,
            docs_file,
            processes,
            min_proba,
            min_surface_len,
            entities_file,
        } => {
            require_store(&sqlite_file);
            let filter = LinkFilter { min_proba, min_surface_len };
            let rows = read_docs(&sqlite_file, &filter, processes, entities_file.as_deref())?;
            save_artifact(&docs_file, &filter, &rows)?;
            eprintln!(
                "[extract] wrote {} occurrence rows to {}",
                rows.len(),
                docs_file.display()
            );
            Ok(())
        }

        Command::ExtractCorpus {
            sqlite_file,
            corpus_file,
            processes,
            min_proba,
            min_surface_len,
            entities_file,
        } => {
            require_store(&sqlite_file);
            let filter = LinkFilter { min_proba, min_surface_len };
            let rows = read_corpus(&sqlite_file, &filter, processes, entities_file.as_deref())?;
            save_artifact(&corpus_file, &filter, &rows)?;
            eprintln!(
                "[extract] wrote {} weighted count rows to {}",
                rows.len(),
                corpus_file.display()
            );
            Ok(())
        }

        Command::Train {
            sqlite_file,
            model_file,
            num_topics,
            processes,
            min_proba,
            min_surface_len,
            entities_file,
            corpus_file,
            train_hook,
        } => {
            require_store(&sqlite_file);
            // Misconfiguration should surface before any extraction work.
            let Some(hook) = resolve_train_hook(train_hook) else {
                eprintln!("No trainer configured: pass --train-hook or set {TRAIN_HOOK_ENV}");
                std::process::exit(2);
            };
            let filter = LinkFilter { min_proba, min_surface_len };

            let rows = match &corpus_file {
                Some(path) if path.exists() => {
                    let artifact: Artifact<WeightedCount> = load_artifact(path)?;
                    eprintln!(
                        "[train] reusing corpus artifact {} (created {}, min_proba {}, min_surface_len {})",
                        path.display(),
                        artifact.created_at,
                        artifact.min_proba,
                        artifact.min_surface_len,
                    );
                    if artifact.min_proba != filter.min_proba
                        || artifact.min_surface_len != filter.min_surface_len
                    {
                        eprintln!(
                            "[train] warning: artifact was extracted with different filter parameters; delete it to re-extract"
                        );
                    }
                    artifact.rows
                }
                _ => {
                    let rows =
                        read_corpus(&sqlite_file, &filter, processes, entities_file.as_deref())?;
                    if let Some(path) = &corpus_file {
                        save_artifact(path, &filter, &rows)?;
                        eprintln!("[train] wrote corpus artifact {}", path.display());
                    }
                    rows
                }
            };

            let (corpus, doc_ids) = make_bow(&rows);
            let id2word = topic::id2word(&rows);
            eprintln!(
                "[train] {} documents, {} terms, {} topics",
                corpus.len(),
                id2word.len(),
                num_topics
            );

            let request = TrainRequest {
                corpus: &corpus,
                doc_ids: &doc_ids,
                id2word: &id2word,
                num_topics,
                workers: processes,
                model_file: &model_file,
            };
            let summary = run_train_hook(&hook, &request)?;
            if !summary.is_empty() {
                println!("{summary}");
            }
            eprintln!("[train] model written to {}", model_file.display());
            Ok(())
        }

        Command::Status { sqlite_file, min_proba, min_surface_len, json } => {
            require_store(&sqlite_file);
            let db = CorpusDb::open(&sqlite_file)?;
            let filter = LinkFilter { min_proba, min_surface_len };
            let (parts, vocabulary) = load_link_table(&db, &filter)?;
            let report = StatusReport {
                documents: db.document_count()?,
                pages: db.page_count()?,
                links: db.link_count()?,
                linked_documents: parts.len(),
                vocabulary_terms: vocabulary.len(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Documents:        {}", report.documents);
                println!("Pages:            {}", report.pages);
                println!("Links:            {}", report.links);
                println!("Linked documents: {}", report.linked_documents);
                println!("Vocabulary terms: {}", report.vocabulary_terms);
            }
            Ok(())
        }
    }
}

fn require_store(path: &Path) {
    if !path.exists() {
        eprintln!("Input database does not exist: {}", path.display());
        std::process::exit(2);
    }
}

/// Shared front half of both extractions: load and filter the link table,
/// build the vocabulary, then fan the per-document parts out to workers.
fn prepare(
    sqlite_file: &Path,
    filter: &LinkFilter,
) -> Result<(Vec<linking::DocPart>, WorkerInit)> {
    eprintln!("[extract] reading entity linking table ...");
    let db = CorpusDb::open(sqlite_file)?;
    let (parts, vocabulary) = load_link_table(&db, filter)?;
    eprintln!(
        "[extract] {} documents, {} vocabulary terms",
        parts.len(),
        vocabulary.len()
    );
    let init = WorkerInit {
        vocabulary: Arc::new(vocabulary),
        db_path: sqlite_file.to_path_buf(),
    };
    Ok((parts, init))
}

fn read_labels(entities_file: Option<&Path>) -> Result<Option<HashMap<String, String>>> {
    match entities_file {
        Some(path) => {
            eprintln!("[extract] reading entity labels from {} ...", path.display());
            Ok(Some(load_entity_labels(path)?))
        }
        None => Ok(None),
    }
}

fn read_docs(
    sqlite_file: &Path,
    filter: &LinkFilter,
    processes: usize,
    entities_file: Option<&Path>,
) -> Result<Vec<EntityOccurrence>> {
    let labels = read_labels(entities_file)?;
    let (parts, init) = prepare(sqlite_file, filter)?;
    let outputs = run_jobs(&parts, &init, processes, extract_occurrences)?;
    let mut rows = concat(outputs);
    if let Some(labels) = &labels {
        label_occurrences(&mut rows, labels);
    }
    Ok(rows)
}

fn read_corpus(
    sqlite_file: &Path,
    filter: &LinkFilter,
    processes: usize,
    entities_file: Option<&Path>,
) -> Result<Vec<WeightedCount>> {
    let labels = read_labels(entities_file)?;
    let (parts, init) = prepare(sqlite_file, filter)?;
    let outputs = run_jobs(&parts, &init, processes, count_weighted)?;
    let mut rows = concat(outputs);
    if let Some(labels) = &labels {
        label_counts(&mut rows, labels);
    }
    Ok(rows)
}
