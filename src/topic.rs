//! External topic-model trainer seam.
//!
//! Training itself is not implemented here. The bag-of-words corpus is
//! handed to an external hook command (stdio JSON): the hook receives a
//! [`TrainRequest`] on stdin, trains its model, persists it at
//! `model_file`, and may print a JSON summary on stdout which is passed
//! through. The command string comes from `--train-hook` or the
//! `ENTOPIC_TRAIN_HOOK` environment variable and is split with shlex.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::worker::WeightedCount;

pub(crate) const TRAIN_HOOK_ENV: &str = "ENTOPIC_TRAIN_HOOK";

#[derive(Debug, Serialize)]
pub(crate) struct TrainRequest<'a> {
    pub(crate) corpus: &'a [Vec<(usize, f64)>],
    pub(crate) doc_ids: &'a [String],
    pub(crate) id2word: &'a BTreeMap<usize, String>,
    pub(crate) num_topics: usize,
    pub(crate) workers: usize,
    pub(crate) model_file: &'a Path,
}

/// Term labels for the trainer, keyed by vocabulary index: `QID(label)`
/// when a label is known, plain `QID` otherwise.
pub(crate) fn id2word(rows: &[WeightedCount]) -> BTreeMap<usize, String> {
    let mut map = BTreeMap::new();
    for row in rows {
        map.entry(row.voc_index).or_insert_with(|| match &row.label {
            Some(label) => format!("{}({})", row.wikidata, label),
            None => row.wikidata.clone(),
        });
    }
    map
}

/// Hook command: CLI flag wins over the environment.
pub(crate) fn resolve_train_hook(cli_command: Option<String>) -> Option<String> {
    cli_command.or_else(|| std::env::var(TRAIN_HOOK_ENV).ok())
}

/// Spawn the hook, feed it the request, and require the model file to
/// exist afterwards. Returns the hook's (possibly empty) stdout.
pub(crate) fn run_train_hook(command: &str, request: &TrainRequest) -> Result<String> {
    let parts = shlex::split(command)
        .ok_or_else(|| PipelineError::Hook(format!("unparseable hook command: {command}")))?;
    if parts.is_empty() {
        return Err(PipelineError::Hook("hook command is empty".to_string()));
    }

    let payload = serde_json::to_vec(request)?;
    let mut child = Command::new(&parts[0])
        .args(&parts[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("ENTOPIC_HOOK", "train")
        .spawn()
        .map_err(|e| PipelineError::Hook(format!("spawn failed: {e}")))?;

    // feed stdin from a thread so a chatty hook can't deadlock the pipe
    let writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || stdin.write_all(&payload).and_then(|_| stdin.flush()))
    });

    let output = child
        .wait_with_output()
        .map_err(|e| PipelineError::Hook(format!("hook wait failed: {e}")))?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            return Err(PipelineError::Hook("hook exited with error".to_string()));
        }
        return Err(PipelineError::Hook(format!("hook error: {stderr}")));
    }

    if !request.model_file.exists() {
        return Err(PipelineError::Hook(format!(
            "hook did not write model file {}",
            request.model_file.display()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn row(wikidata: &str, voc_index: usize, label: Option<&str>) -> WeightedCount {
        WeightedCount {
            doc_id: "D1".to_string(),
            wikidata: wikidata.to_string(),
            page_title: wikidata.to_string(),
            wcount: 1.0,
            voc_index,
            doc_len: 1,
            label: label.map(str::to_string),
        }
    }

    fn request<'a>(
        corpus: &'a [Vec<(usize, f64)>],
        doc_ids: &'a [String],
        id2word: &'a BTreeMap<usize, String>,
        model_file: &'a Path,
    ) -> TrainRequest<'a> {
        TrainRequest {
            corpus,
            doc_ids,
            id2word,
            num_topics: 10,
            workers: 1,
            model_file,
        }
    }

    #[test]
    fn test_id2word_formats_and_dedups() {
        let rows = vec![
            row("Q64", 0, Some("Berlin")),
            row("Q64", 0, Some("Berlin")),
            row("Q90", 1, None),
        ];
        let map = id2word(&rows);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&0], "Q64(Berlin)");
        assert_eq!(map[&1], "Q90");
    }

    #[test]
    fn test_hook_writes_model_file() {
        let model = crate::store::fixtures::temp_db_path("train_ok").with_extension("model");
        let _ = std::fs::remove_file(&model);

        let corpus = vec![vec![(0, 0.5)]];
        let doc_ids = vec!["D1".to_string()];
        let id2word = BTreeMap::from([(0, "Q64(Berlin)".to_string())]);
        let req = request(&corpus, &doc_ids, &id2word, &model);

        let command = format!("sh -c 'cat > {} && echo trained'", model.display());
        let stdout = run_train_hook(&command, &req).unwrap();
        assert_eq!(stdout, "trained");

        // the hook received the full request on stdin
        let written = std::fs::read_to_string(&model).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["num_topics"], 10);
        assert_eq!(value["doc_ids"][0], "D1");

        std::fs::remove_file(&model).ok();
    }

    #[test]
    fn test_hook_failure_is_fatal() {
        let model = crate::store::fixtures::temp_db_path("train_fail").with_extension("model");
        let corpus = vec![];
        let doc_ids = vec![];
        let id2word = BTreeMap::new();
        let req = request(&corpus, &doc_ids, &id2word, &model);

        assert!(matches!(
            run_train_hook("sh -c 'echo broken >&2; exit 3'", &req),
            Err(PipelineError::Hook(_))
        ));
    }

    #[test]
    fn test_missing_model_file_is_fatal() {
        let model = crate::store::fixtures::temp_db_path("train_missing").with_extension("model");
        let _ = std::fs::remove_file(&model);
        let corpus = vec![];
        let doc_ids = vec![];
        let id2word = BTreeMap::new();
        let req = request(&corpus, &doc_ids, &id2word, &model);

        let err = run_train_hook("sh -c 'cat > /dev/null'", &req);
        assert!(matches!(err, Err(PipelineError::Hook(_))));
    }

    #[test]
    fn test_resolve_prefers_cli_over_env() {
        assert_eq!(
            resolve_train_hook(Some("my-hook".to_string())).as_deref(),
            Some("my-hook")
        );
    }
}
