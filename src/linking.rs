//! Entity-linking table: loading, filtering, vocabulary, document parts.
//!
//! The `entity_linking` table asserts that a surface form in a document
//! likely refers to a knowledge-base entity, with a confidence probability.
//! Everything downstream (workers, weighted counts, the bag of words) is
//! derived from the filtered view of this table, so the filter and the
//! vocabulary ordering rule live here in one place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::CorpusDb;

/// Knowledge-base ids live in the `Q` namespace; anything else is a
/// linking artifact and is dropped.
pub(crate) const KB_PREFIX: char = 'Q';

// ── LinkRecord ───────────────────────────────────────────────────────────

/// One `entity_linking` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LinkRecord {
    pub(crate) doc_id: String,
    pub(crate) entity_id: String,
    pub(crate) wikidata: String,
    pub(crate) proba: f64,
    pub(crate) page_title: String,
    pub(crate) start_page: i64,
    pub(crate) stop_page: i64,
}

// ── LinkFilter ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkFilter {
    /// Links at or below this probability are dropped (strict threshold).
    pub(crate) min_proba: f64,
    /// Minimum page-title length; entity surface ids must additionally
    /// clear the `-TYPE` suffix, hence the `+ 4` below.
    pub(crate) min_surface_len: usize,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            min_proba: 0.25,
            min_surface_len: 2,
        }
    }
}

impl LinkFilter {
    /// Filter order: probability, surface lengths, then namespace prefix.
    pub(crate) fn accepts(&self, record: &LinkRecord) -> bool {
        if record.proba <= self.min_proba {
            return false;
        }
        if record.page_title.chars().count() <= self.min_surface_len {
            return false;
        }
        if record.entity_id.chars().count() <= self.min_surface_len + 4 {
            return false;
        }
        record.wikidata.starts_with(KB_PREFIX)
    }
}

// ── Vocabulary ───────────────────────────────────────────────────────────

/// Bijection between knowledge-base QIDs and dense term indices.
///
/// Indices are assigned in first-appearance order over the filtered table
/// after its stable sort by doc_id. That rule is load-bearing: topic-model
/// term labels are keyed by these indices, so the assignment must reproduce
/// across runs on identical input. It is not stable under filter-threshold
/// changes. Immutable after construction, shared read-only by all workers.
#[derive(Debug)]
pub(crate) struct Vocabulary {
    index: HashMap<String, usize>,
    terms: Vec<String>,
}

impl Vocabulary {
    pub(crate) fn from_records(records: &[LinkRecord]) -> Self {
        let mut index = HashMap::new();
        let mut terms = Vec::new();
        for record in records {
            if !index.contains_key(&record.wikidata) {
                index.insert(record.wikidata.clone(), terms.len());
                terms.push(record.wikidata.clone());
            }
        }
        Self { index, terms }
    }

    pub(crate) fn index_of(&self, qid: &str) -> Option<usize> {
        self.index.get(qid).copied()
    }

    pub(crate) fn term(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.terms.len()
    }
}

// ── DocPart ──────────────────────────────────────────────────────────────

/// The slice of filtered link records belonging to one document.
#[derive(Debug, Clone)]
pub(crate) struct DocPart {
    pub(crate) doc_id: String,
    pub(crate) records: Vec<LinkRecord>,
}

impl DocPart {
    /// Page window [min(start_page), max(stop_page)] bounding which tagged
    /// pages are read for this document. `None` only for an empty part.
    pub(crate) fn page_window(&self) -> Option<(i64, i64)> {
        let first = self.records.iter().map(|r| r.start_page).min()?;
        let last = self.records.iter().map(|r| r.stop_page).max()?;
        Some((first, last))
    }

    /// Records matching one entity surface id, in part row order.
    pub(crate) fn matches<'a>(&'a self, entity_id: &str) -> Vec<&'a LinkRecord> {
        self.records
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .collect()
    }
}

// ── Loader ───────────────────────────────────────────────────────────────

/// Load, filter, and group the entity-linking table; derive the vocabulary.
///
/// Parts come back sorted by doc_id (stable, in-document row order kept),
/// which fixes both the job order and the vocabulary index assignment.
pub(crate) fn load_link_table(
    db: &CorpusDb,
    filter: &LinkFilter,
) -> Result<(Vec<DocPart>, Vocabulary)> {
    let mut records = db.entity_linking()?;
    records.retain(|r| filter.accepts(r));
    records.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

    let vocabulary = Vocabulary::from_records(&records);

    let mut parts: Vec<DocPart> = Vec::new();
    for record in records {
        match parts.last_mut() {
            Some(part) if part.doc_id == record.doc_id => part.records.push(record),
            _ => parts.push(DocPart {
                doc_id: record.doc_id.clone(),
                records: vec![record],
            }),
        }
    }

    Ok((parts, vocabulary))
}

// ── Tests ────────────────────────────────────────────────────────────────
