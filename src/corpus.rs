//! Corpus-level aggregation, persisted artifacts, and the bag-of-words form.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::linking::LinkFilter;
use crate::worker::{EntityOccurrence, WeightedCount};

// ── Aggregation ──────────────────────────────────────────────────────────

/// Concatenate per-job outputs into one corpus-level table, in job order.
/// Jobs are grouped by unique doc_id upstream, so no doc_id repeats across
/// partitions; doc_id is a grouping key downstream, never a dedup key.
pub(crate) fn concat<T>(outputs: Vec<Vec<T>>) -> Vec<T> {
    outputs.into_iter().flatten().collect()
}

/// Attach human-readable labels to occurrence rows (left join on QID;
/// misses stay unlabeled).
pub(crate) fn label_occurrences(rows: &mut [EntityOccurrence], labels: &HashMap<String, String>) {
    for row in rows {
        row.label = row
            .wikidata
            .as_deref()
            .and_then(|qid| labels.get(qid).cloned());
    }
}

/// Attach human-readable labels to weighted-count rows (left join on QID).
pub(crate) fn label_counts(rows: &mut [WeightedCount], labels: &HashMap<String, String>) {
    for row in rows {
        row.label = labels.get(&row.wikidata).cloned();
    }
}

// ── Artifacts ────────────────────────────────────────────────────────────

/// A persisted "docs" or "corpus" table.
///
/// Reuse of an artifact is gated purely on file existence, not on content
/// or parameter matching: re-running with different extraction parameters
/// against a stale file silently yields stale results. The extraction
/// parameters are recorded here so the tool can at least say what a reused
/// artifact was built with.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Artifact<T> {
    pub(crate) created_at: String,
    pub(crate) min_proba: f64,
    pub(crate) min_surface_len: usize,
    pub(crate) rows: Vec<T>,
}

#[derive(Serialize)]
struct ArtifactRef<'a, T> {
    created_at: String,
    min_proba: f64,
    min_surface_len: usize,
    rows: &'a [T],
}

pub(crate) fn save_artifact<T: Serialize>(
    path: &Path,
    filter: &LinkFilter,
    rows: &[T],
) -> Result<()> {
    let artifact = ArtifactRef {
        created_at: Utc::now().to_rfc3339(),
        min_proba: filter.min_proba,
        min_surface_len: filter.min_surface_len,
        rows,
    };
    let json = serde_json::to_string(&artifact)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn load_artifact<T: DeserializeOwned>(path: &Path) -> Result<Artifact<T>> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

// ── Bag of words ─────────────────────────────────────────────────────────

/// Per-document sparse term weights plus the parallel doc_id list.
///
/// Documents appear in first-appearance order of the aggregated table, and
/// each document's (voc_index, wcount) pairs keep its row order. voc_index
/// is unique within a document because weighted-count grouping already
/// merged duplicates; a repeat here would be an upstream grouping bug.
pub(crate) fn make_bow(rows: &[WeightedCount]) -> (Vec<Vec<(usize, f64)>>, Vec<String>) {
    let mut doc_ids: Vec<String> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut docs: Vec<Vec<(usize, f64)>> = Vec::new();

    for row in rows {
        let slot = match slots.get(row.doc_id.as_str()) {
            Some(&slot) => slot,
            None => {
                slots.insert(row.doc_id.as_str(), docs.len());
                doc_ids.push(row.doc_id.clone());
                docs.push(Vec::new());
                docs.len() - 1
            }
        };
        docs[slot].push((row.voc_index, row.wcount));
    }

    (docs, doc_ids)
}

// ── Tests ────────────────────────────────────────────────────────────────
