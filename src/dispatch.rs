//! Parallel dispatch of per-document jobs.
//!
//! A dedicated fixed-size pool runs one job per document. Workers share
//! nothing mutable: the only cross-worker state is the immutable
//! [`WorkerInit`] payload, and every pool thread builds its own
//! [`WorkerContext`] (private store connection included) exactly once, on
//! its first job. The context lives in a thread-local slot and is dropped
//! with the pool's threads, so connections are scoped to worker lifetime
//! with no per-job churn.
//!
//! Results come back in job submission order, which makes a 1-worker run
//! and an N-worker run byte-identical. Any job error fails the whole run;
//! there are no retries and no partial results.

use std::cell::RefCell;

use rayon::ThreadPoolBuilder;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{PipelineError, Result};
use crate::linking::DocPart;
use crate::worker::{WorkerContext, WorkerInit};

thread_local! {
    static CONTEXT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

fn with_context<T>(
    init: &WorkerInit,
    f: impl FnOnce(&WorkerContext) -> Result<T>,
) -> Result<T> {
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        let ctx = match slot.as_mut() {
            Some(ctx) => ctx,
            None => slot.insert(WorkerContext::initialize(init)?),
        };
        f(ctx)
    })
}

/// Run one job per document part across `processes` workers.
///
/// `processes <= 1` runs sequentially in-process with a single context and
/// produces the same outputs as any higher worker count.
pub(crate) fn run_jobs<T, F>(
    parts: &[DocPart],
    init: &WorkerInit,
    processes: usize,
    run: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&WorkerContext, &DocPart) -> Result<T> + Sync,
{
    eprintln!(
        "[dispatch] {} documents across {} worker(s)",
        parts.len(),
        processes.max(1)
    );

    if processes <= 1 {
        let ctx = WorkerContext::initialize(init)?;
        return parts.iter().map(|part| run(&ctx, part)).collect();
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(processes)
        .build()
        .map_err(|e| PipelineError::Pool(e.to_string()))?;

    pool.install(|| {
        parts
            .par_iter()
            .map(|part| with_context(init, |ctx| run(ctx, part)))
            .collect()
    })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::linking::{LinkFilter, load_link_table};
    use crate::store::CorpusDb;
    use crate::store::fixtures::{create_store, link, temp_db_path};
    use crate::worker::count_weighted;

    fn fixture(name: &str) -> (std::path::PathBuf, Vec<DocPart>, WorkerInit) {
        let path = temp_db_path(name);
        let pages: Vec<_> = (1..=6)
            .map(|d| {
                (
                    format!("D{d}"),
                    "p_0001.xml".to_string(),
                    vec![vec![("Berlin", "B-LOC"), ("heute", "O")]],
                )
            })
            .collect();
        let page_refs: Vec<crate::store::fixtures::PageFixture> = pages
            .iter()
            .map(|(d, f, s)| {
                (
                    d.as_str(),
                    f.as_str(),
                    s.iter()
                        .map(|sen| sen.iter().map(|(w, t)| (*w, *t)).collect())
                        .collect(),
                )
            })
            .collect();
        let links: Vec<_> = (1..=6)
            .map(|d| link(&format!("D{d}"), "Berlin-LOC", "Q64", 0.5, "Berlin", 1, 1))
            .collect();
        create_store(&path, &page_refs, &links);

        let db = CorpusDb::open(&path).unwrap();
        let (parts, vocabulary) = load_link_table(&db, &LinkFilter::default()).unwrap();
        let init = WorkerInit {
            vocabulary: Arc::new(vocabulary),
            db_path: path.clone(),
        };
        (path, parts, init)
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let (path, parts, init) = fixture("dispatch_equal");

        let sequential = run_jobs(&parts, &init, 1, count_weighted).unwrap();
        let parallel = run_jobs(&parts, &init, 4, count_weighted).unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(sequential.len(), 6);
        for (part, rows) in parts.iter().zip(&sequential) {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].doc_id, part.doc_id);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_job_error_fails_the_run() {
        let (path, parts, init) = fixture("dispatch_error");

        let result: Result<Vec<()>> = run_jobs(&parts, &init, 4, |_, part| {
            if part.doc_id == "D4" {
                Err(PipelineError::VocabularyMiss("Q0".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(PipelineError::VocabularyMiss(_))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_no_job_is_dropped() {
        let (path, parts, init) = fixture("dispatch_complete");

        let doc_ids = run_jobs(&parts, &init, 3, |_, part| Ok(part.doc_id.clone())).unwrap();
        let expected: Vec<String> = parts.iter().map(|p| p.doc_id.clone()).collect();
        assert_eq!(doc_ids, expected);
        std::fs::remove_file(&path).ok();
    }
}
