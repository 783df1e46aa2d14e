//! SQLite access to the tagged-text store.
//!
//! The store is produced upstream (tagging + entity linking pipelines) and
//! is strictly read-only here. Three tables are consumed:
//!   - `tagged`         — one row per physical page: doc_id, file_name, and
//!                        the token/tag sequences as JSON (array of sentences,
//!                        each an array of strings, tokens and tags parallel)
//!   - `entity_linking` — probabilistic links from entity surface ids to
//!                        knowledge-base QIDs
//!   - `entities`       — optional second database file mapping QID to a
//!                        human-readable label
//!
//! Every worker opens its own connection; connections never cross workers.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};

use crate::error::{PipelineError, Result};
use crate::linking::LinkRecord;

// ── TaggedPage ───────────────────────────────────────────────────────────

/// One decoded `tagged` row.
#[derive(Debug, Clone)]
pub(crate) struct TaggedPage {
    pub(crate) page: i64,
    /// Sentences of (token, tag) pairs.
    pub(crate) sentences: Vec<Vec<(String, String)>>,
}

impl TaggedPage {
    /// Total token count across all sentences on this page.
    pub(crate) fn token_count(&self) -> usize {
        self.sentences.iter().map(Vec::len).sum()
    }
}

/// Page number of a scan file: the first run of digits not starting with a
/// leading zero. `None` when the name carries no such run.
pub(crate) fn page_number(file_name: &str) -> Option<i64> {
    let start = file_name.bytes().position(|b| b.is_ascii_digit() && b != b'0')?;
    let digits: String = file_name[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn decode_sentences(
    file_name: &str,
    text_json: &str,
    tags_json: &str,
) -> Result<Vec<Vec<(String, String)>>> {
    let malformed = |reason: String| PipelineError::MalformedPage {
        file_name: file_name.to_string(),
        reason,
    };

    let tokens: Vec<Vec<String>> =
        serde_json::from_str(text_json).map_err(|e| malformed(format!("text column: {e}")))?;
    let tags: Vec<Vec<String>> =
        serde_json::from_str(tags_json).map_err(|e| malformed(format!("tags column: {e}")))?;

    if tokens.len() != tags.len() {
        return Err(malformed(format!(
            "{} sentences of tokens vs {} of tags",
            tokens.len(),
            tags.len()
        )));
    }

    let mut sentences = Vec::with_capacity(tokens.len());
    for (i, (sen_tokens, sen_tags)) in tokens.into_iter().zip(tags).enumerate() {
        if sen_tokens.len() != sen_tags.len() {
            return Err(malformed(format!("token/tag length mismatch in sentence {i}")));
        }
        sentences.push(sen_tokens.into_iter().zip(sen_tags).collect());
    }
    Ok(sentences)
}

// ── CorpusDb ─────────────────────────────────────────────────────────────

pub(crate) struct CorpusDb {
    conn: Connection,
}

impl CorpusDb {
    /// Open an existing store read-only. Errors if the file doesn't exist.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingDatabase(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// All tagged pages of one document, decoded. Unparseable page numbers
    /// or malformed token/tag JSON are fatal; downstream aggregation cannot
    /// proceed with partial per-document data.
    pub(crate) fn tagged_pages(&self, doc_id: &str) -> Result<Vec<TaggedPage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_name, text, tags FROM tagged WHERE doc_id = ?1")?;
        let rows = stmt.query_map(params![doc_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut pages = Vec::new();
        for row in rows {
            let (file_name, text_json, tags_json) = row?;
            let page = page_number(&file_name).ok_or_else(|| PipelineError::MalformedPage {
                file_name: file_name.clone(),
                reason: "no page number in file name".to_string(),
            })?;
            pages.push(TaggedPage {
                page,
                sentences: decode_sentences(&file_name, &text_json, &tags_json)?,
            });
        }
        Ok(pages)
    }

    /// Full entity-linking table, in rowid order.
    pub(crate) fn entity_linking(&self) -> Result<Vec<LinkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT doc_id, entity_id, wikidata, proba, page_title, start_page, stop_page
             FROM entity_linking ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LinkRecord {
                doc_id: row.get(0)?,
                entity_id: row.get(1)?,
                wikidata: row.get(2)?,
                proba: row.get(3)?,
                page_title: row.get(4)?,
                start_page: row.get(5)?,
                stop_page: row.get(6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ── Status counters ──────────────────────────────────────────────

    pub(crate) fn document_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(DISTINCT doc_id) FROM tagged")
    }

    pub(crate) fn page_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM tagged")
    }

    pub(crate) fn link_count(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM entity_linking")
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

/// QID → label map from the optional knowledge-base file. Rows with a null
/// label are skipped; lookups that miss stay unlabeled downstream.
pub(crate) fn load_entity_labels(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Err(PipelineError::MissingDatabase(path.to_path_buf()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let mut stmt = conn.prepare("SELECT qid, label FROM entities")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut labels = HashMap::new();
    for row in rows {
        let (qid, label) = row?;
        if let Some(label) = label {
            labels.insert(qid, label);
        }
    }
    Ok(labels)
}

// ── Test fixtures ────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::PathBuf;

    use rusqlite::{Connection, params};

    use crate::linking::LinkRecord;

    pub(crate) fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("entopic_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_{}_{name}.sqlite", std::process::id()))
    }

    /// A tagged page for fixtures: (doc_id, file_name, sentences).
    pub(crate) type PageFixture<'a> = (&'a str, &'a str, Vec<Vec<(&'a str, &'a str)>>);

    pub(crate) fn link(
        doc_id: &str,
        entity_id: &str,
        wikidata: &str,
        proba: f64,
        page_title: &str,
        start_page: i64,
        stop_page: i64,
    ) -> LinkRecord {
        LinkRecord {
            doc_id: doc_id.to_string(),
            entity_id: entity_id.to_string(),
            wikidata: wikidata.to_string(),
            proba,
            page_title: page_title.to_string(),
            start_page,
            stop_page,
        }
    }

    pub(crate) fn create_store(path: &PathBuf, pages: &[PageFixture], links: &[LinkRecord]) {
        let _ = std::fs::remove_file(path);
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE tagged (doc_id TEXT, file_name TEXT, text TEXT, tags TEXT);
             CREATE TABLE entity_linking (
                 doc_id TEXT, entity_id TEXT, wikidata TEXT, proba REAL,
                 page_title TEXT, start_page INTEGER, stop_page INTEGER
             );",
        )
        .unwrap();

        for (doc_id, file_name, sentences) in pages {
            let tokens: Vec<Vec<&str>> = sentences
                .iter()
                .map(|s| s.iter().map(|(w, _)| *w).collect())
                .collect();
            let tags: Vec<Vec<&str>> = sentences
                .iter()
                .map(|s| s.iter().map(|(_, t)| *t).collect())
                .collect();
            conn.execute(
                "INSERT INTO tagged (doc_id, file_name, text, tags) VALUES (?1, ?2, ?3, ?4)",
                params![
                    doc_id,
                    file_name,
                    serde_json::to_string(&tokens).unwrap(),
                    serde_json::to_string(&tags).unwrap()
                ],
            )
            .unwrap();
        }

        for r in links {
            conn.execute(
                "INSERT INTO entity_linking
                 (doc_id, entity_id, wikidata, proba, page_title, start_page, stop_page)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    r.doc_id,
                    r.entity_id,
                    r.wikidata,
                    r.proba,
                    r.page_title,
                    r.start_page,
                    r.stop_page
                ],
            )
            .unwrap();
        }
    }

    pub(crate) fn create_labels(path: &PathBuf, labels: &[(&str, Option<&str>)]) {
        let _ = std::fs::remove_file(path);
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE entities (qid TEXT, label TEXT);")
            .unwrap();
        for (qid, label) in labels {
            conn.execute(
                "INSERT INTO entities (qid, label) VALUES (?1, ?2)",
                params![qid, label],
            )
            .unwrap();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::fixtures::{create_labels, create_store, link, temp_db_path};
    use super::*;

    #[test]
    fn test_page_number_extraction() {
        assert_eq!(page_number("PPN123-0001.xml"), Some(123));
        assert_eq!(page_number("scan_0042.tif"), Some(42));
        assert_eq!(page_number("p7.json"), Some(7));
        assert_eq!(page_number("cover.xml"), None);
        assert_eq!(page_number("0000"), None);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let path = temp_db_path("missing");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            CorpusDb::open(&path),
            Err(PipelineError::MissingDatabase(_))
        ));
    }

    #[test]
    fn test_tagged_pages_roundtrip() {
        let path = temp_db_path("pages");
        create_store(
            &path,
            &[
                ("D1", "p_0001.xml", vec![vec![("Berlin", "B-LOC"), (".", "O")]]),
                ("D1", "p_0002.xml", vec![vec![("leer", "O")]]),
                ("D2", "p_0001.xml", vec![]),
            ],
            &[],
        );

        let db = CorpusDb::open(&path).unwrap();
        let pages = db.tagged_pages("D1").unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[0].token_count(), 2);
        assert_eq!(pages[0].sentences[0][0], ("Berlin".to_string(), "B-LOC".to_string()));
        assert_eq!(pages[1].page, 2);

        assert!(db.tagged_pages("D3").unwrap().is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_page_is_fatal() {
        let path = temp_db_path("malformed");
        create_store(&path, &[], &[]);
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "INSERT INTO tagged (doc_id, file_name, text, tags) VALUES ('D1', 'p_0001.xml', 'not json', '[]')",
            [],
        )
        .unwrap();
        drop(conn);

        let db = CorpusDb::open(&path).unwrap();
        assert!(matches!(
            db.tagged_pages("D1"),
            Err(PipelineError::MalformedPage { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_entity_linking_row_order() {
        let path = temp_db_path("linking");
        create_store(
            &path,
            &[],
            &[
                link("D2", "Berlin-LOC", "Q64", 0.9, "Berlin", 1, 5),
                link("D1", "Paris-LOC", "Q90", 0.8, "Paris", 2, 3),
            ],
        );

        let db = CorpusDb::open(&path).unwrap();
        let rows = db.entity_linking().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].doc_id, "D2");
        assert_eq!(rows[1].wikidata, "Q90");
        assert_eq!(db.link_count().unwrap(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_entity_labels_skip_null() {
        let path = temp_db_path("labels");
        create_labels(&path, &[("Q64", Some("Berlin")), ("Q90", None)]);
        let labels = load_entity_labels(&path).unwrap();
        assert_eq!(labels.get("Q64").map(String::as_str), Some("Berlin"));
        assert!(!labels.contains_key("Q90"));
        std::fs::remove_file(&path).ok();
    }
}
