//! Per-document workers: span extraction and weighted counting.
//!
//! Both modes replay the same tagged pages through the same span walk; they
//! differ only in what they keep. The span extractor tracks document
//! structure, so its join against the link part is a LEFT join — unmatched
//! positions keep null link fields. The weighted counter only cares about
//! linked entities, so its join is an INNER join. That asymmetry is
//! deliberate and must be preserved.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::linking::{DocPart, Vocabulary};
use crate::ner::{NO_ENTITY, count_entities, parse_sentence};
use crate::store::{CorpusDb, TaggedPage};

// ── Worker state ─────────────────────────────────────────────────────────

/// One-time initializer payload, shared immutably across all workers.
#[derive(Debug, Clone)]
pub(crate) struct WorkerInit {
    pub(crate) vocabulary: Arc<Vocabulary>,
    pub(crate) db_path: PathBuf,
}

/// Per-worker state: the shared vocabulary plus a private store connection.
/// Built exactly once per worker and dropped with it; jobs never open their
/// own connections.
pub(crate) struct WorkerContext {
    pub(crate) vocabulary: Arc<Vocabulary>,
    db: CorpusDb,
}

impl WorkerContext {
    pub(crate) fn initialize(init: &WorkerInit) -> Result<Self> {
        Ok(Self {
            vocabulary: Arc::clone(&init.vocabulary),
            db: CorpusDb::open(&init.db_path)?,
        })
    }

    /// The document's tagged pages restricted to the part's page window,
    /// in ascending page order (stable; duplicate page numbers are kept in
    /// store row order, not deduplicated).
    fn pages_in_window(&self, part: &DocPart) -> Result<Vec<TaggedPage>> {
        let Some((first, last)) = part.page_window() else {
            return Ok(Vec::new());
        };
        let mut pages = self.db.tagged_pages(&part.doc_id)?;
        pages.retain(|p| p.page >= first && p.page <= last);
        pages.sort_by_key(|p| p.page);
        Ok(pages)
    }
}

// ── Output rows ──────────────────────────────────────────────────────────

/// Mode A output: one row per entity token position in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EntityOccurrence {
    pub(crate) doc_id: String,
    /// Monotone counter over non-sentinel entity tokens in page order; a
    /// structural position, not a byte offset.
    pub(crate) pos: usize,
    pub(crate) entity_id: String,
    pub(crate) wikidata: Option<String>,
    pub(crate) proba: Option<f64>,
    pub(crate) page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) label: Option<String>,
}

/// Mode B output: one row per (wikidata, page_title) group in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WeightedCount {
    pub(crate) doc_id: String,
    pub(crate) wikidata: String,
    pub(crate) page_title: String,
    /// Σ raw count × link probability over the group.
    pub(crate) wcount: f64,
    pub(crate) voc_index: usize,
    /// Total token count over the document's window pages; constant per
    /// document, repeated on every row.
    pub(crate) doc_len: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) label: Option<String>,
}

// ── Mode A: span extractor ───────────────────────────────────────────────

/// Replay a document's pages into positional entity occurrences,
/// left-joined against its link part on entity surface id.
pub(crate) fn extract_occurrences(
    ctx: &WorkerContext,
    part: &DocPart,
) -> Result<Vec<EntityOccurrence>> {
    let pages = ctx.pages_in_window(part)?;

    let mut rows = Vec::new();
    let mut pos = 0usize;
    for page in &pages {
        for sentence in &page.sentences {
            for entity_id in parse_sentence(sentence).entity_ids {
                if entity_id == NO_ENTITY {
                    continue;
                }
                let matches = part.matches(&entity_id);
                if matches.is_empty() {
                    rows.push(EntityOccurrence {
                        doc_id: part.doc_id.clone(),
                        pos,
                        entity_id,
                        wikidata: None,
                        proba: None,
                        page_title: None,
                        label: None,
                    });
                } else {
                    // merge semantics: several link rows for one surface id
                    // multiply the occurrence row
                    for record in matches {
                        rows.push(EntityOccurrence {
                            doc_id: part.doc_id.clone(),
                            pos,
                            entity_id: entity_id.clone(),
                            wikidata: Some(record.wikidata.clone()),
                            proba: Some(record.proba),
                            page_title: Some(record.page_title.clone()),
                            label: None,
                        });
                    }
                }
                pos += 1;
            }
        }
    }
    Ok(rows)
}

// ── Mode B: weighted counter ─────────────────────────────────────────────

/// Replay a document's pages into confidence-weighted term counts.
pub(crate) fn count_weighted(ctx: &WorkerContext, part: &DocPart) -> Result<Vec<WeightedCount>> {
    let pages = ctx.pages_in_window(part)?;

    let mut doc_len = 0usize;
    // (wikidata, page_title) groups in first-appearance order; accumulation
    // order is part-row order within page order, so sums are reproducible
    // bit for bit across runs and worker counts.
    let mut group_keys: Vec<(String, String)> = Vec::new();
    let mut group_index: std::collections::HashMap<(String, String), usize> =
        std::collections::HashMap::new();
    let mut totals: Vec<f64> = Vec::new();

    for page in &pages {
        doc_len += page.token_count();
        let counts = count_entities(&page.sentences, 0);

        // inner join against the part on entity surface id
        for record in &part.records {
            let Some(&count) = counts.get(record.entity_id.as_str()) else {
                continue;
            };
            let key = (record.wikidata.clone(), record.page_title.clone());
            let slot = *group_index.entry(key.clone()).or_insert_with(|| {
                group_keys.push(key);
                totals.push(0.0);
                totals.len() - 1
            });
            totals[slot] += count as f64 * record.proba;
        }
    }

    let mut rows = Vec::with_capacity(group_keys.len());
    for ((wikidata, page_title), wcount) in group_keys.into_iter().zip(totals) {
        let voc_index = ctx
            .vocabulary
            .index_of(&wikidata)
            .ok_or_else(|| PipelineError::VocabularyMiss(wikidata.clone()))?;
        rows.push(WeightedCount {
            doc_id: part.doc_id.clone(),
            wikidata,
            page_title,
            wcount,
            voc_index,
            doc_len,
            label: None,
        });
    }

    // descending by weight; stable, so ties keep first-appearance order
    rows.sort_by(|a, b| {
        b.wcount
            .partial_cmp(&a.wcount)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(rows)
}

// ── Tests ────────────────────────────────────────────────────────────────
