//! Token-level NER tag replay.
//!
//! The tagging pipeline upstream stores one row per page with parallel
//! token/tag sequences in BIO form (`B-PER`, `I-LOC`, `O`, ...). This module
//! re-derives entity spans from those sequences. The per-token view returned
//! by [`parse_sentence`] uses `-` as the sentinel id for non-entity tokens;
//! callers filter it out. A multi-token entity repeats its id on every one
//! of its tokens, so position counters advance per token, not per span.

use std::collections::HashMap;

/// Sentinel entity id for tokens outside any entity span.
pub(crate) const NO_ENTITY: &str = "-";

/// Per-token parallel lists for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedSentence {
    pub(crate) entity_ids: Vec<String>,
    pub(crate) entities: Vec<String>,
    pub(crate) entity_types: Vec<String>,
}

/// One maximal run of entity tokens, or a gap of outside tokens.
#[derive(Debug, PartialEq)]
enum Piece {
    Outside,
    Span { text: String, kind: String, tokens: usize },
}

/// Surface id of an entity span: the joined token text plus its type.
fn span_id(text: &str, kind: &str) -> String {
    format!("{text}-{kind}")
}

/// Walk one sentence of (token, tag) pairs into pieces, in token order.
///
/// A span is flushed when the tag goes outside, a fresh `B-` starts, or the
/// entity type changes mid-run. An `I-` with no open span opens one (lenient
/// handling of dangling continuations, matching the tagger's output).
fn sentence_pieces(sentence: &[(String, String)]) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut run_kind = "";

    let flush = |run: &mut Vec<&str>, run_kind: &mut &str, pieces: &mut Vec<Piece>| {
        if run.is_empty() {
            return;
        }
        pieces.push(Piece::Span {
            text: run.join(" "),
            kind: (*run_kind).to_string(),
            tokens: run.len(),
        });
        run.clear();
        *run_kind = "";
    };

    for (word, tag) in sentence {
        let inside = tag.starts_with("B-") || tag.starts_with("I-");
        let kind = if inside { &tag[2..] } else { "" };

        if !run.is_empty() && (!inside || tag.starts_with("B-") || kind != run_kind) {
            flush(&mut run, &mut run_kind, &mut pieces);
        }

        if inside {
            if run.is_empty() {
                run_kind = kind;
            }
            run.push(word.as_str());
        } else {
            pieces.push(Piece::Outside);
        }
    }
    flush(&mut run, &mut run_kind, &mut pieces);

    pieces
}

/// Replay one sentence into per-token parallel lists.
///
/// Output lists have exactly one entry per input token; non-entity tokens
/// carry the [`NO_ENTITY`] sentinel id and empty text/type.
pub(crate) fn parse_sentence(sentence: &[(String, String)]) -> ParsedSentence {
    let mut parsed = ParsedSentence {
        entity_ids: Vec::with_capacity(sentence.len()),
        entities: Vec::with_capacity(sentence.len()),
        entity_types: Vec::with_capacity(sentence.len()),
    };

    for piece in sentence_pieces(sentence) {
        match piece {
            Piece::Outside => {
                parsed.entity_ids.push(NO_ENTITY.to_string());
                parsed.entities.push(String::new());
                parsed.entity_types.push(String::new());
            }
            Piece::Span { text, kind, tokens } => {
                for _ in 0..tokens {
                    parsed.entity_ids.push(span_id(&text, &kind));
                    parsed.entities.push(text.clone());
                    parsed.entity_types.push(kind.clone());
                }
            }
        }
    }

    parsed
}

/// Raw occurrence counts per entity surface id over a page of sentences.
///
/// One maximal span counts once, however many tokens it covers; spans whose
/// surface text is shorter than `min_len` characters are skipped. The span
/// derivation is the same walk [`parse_sentence`] uses, so the key set here
/// always equals the sentinel-filtered id set of the parsed view.
pub(crate) fn count_entities(
    sentences: &[Vec<(String, String)>],
    min_len: usize,
) -> HashMap<String, u64> {
    let mut counter = HashMap::new();
    for sentence in sentences {
        for piece in sentence_pieces(sentence) {
            let Piece::Span { text, kind, .. } = piece else {
                continue;
            };
            if text.chars().count() < min_len {
                continue;
            }
            *counter.entry(span_id(&text, &kind)).or_insert(0) += 1;
        }
    }
    counter
}

// ── Tests ────────────────────────────────────────────────────────────────
