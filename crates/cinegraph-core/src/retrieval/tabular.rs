//! Case-insensitive keyword search across every column of a CSV file with a header row.

use super::{Record, RetrievalOutcome};
use crate::tools::ToolOutput;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_PER_COLUMN_CAP: usize = 5;
pub const NO_MATCHES: &str = "[CSV] No matches found.";

#[derive(Debug, thiserror::Error)]
pub enum TabularError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Csv(#[from] csv::Error),

    #[error("search worker failed: {0}")]
    Worker(String),
}

impl TabularError {
    pub fn category(&self) -> &'static str {
        match self {
            TabularError::Io(_) => "Io",
            TabularError::Csv(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => "Io",
            TabularError::Csv(_) => "Parse",
            TabularError::Worker(_) => "Worker",
        }
    }
}

/// File is re-read on every query; the adapter keeps no state besides its path.
#[derive(Debug, Clone)]
pub struct TabularSearch {
    path: PathBuf,
    per_column_cap: usize,
}

impl TabularSearch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            per_column_cap: DEFAULT_PER_COLUMN_CAP,
        }
    }

    pub fn with_per_column_cap(mut self, cap: usize) -> Self {
        self.per_column_cap = cap.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn search(&self, query: &str) -> RetrievalOutcome {
        let query = query.trim();
        if query.is_empty() {
            return RetrievalOutcome::NoMatch;
        }

        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            warn!(target: "cinegraph::retrieval", path = %self.path.display(), "CSV source missing");
            return RetrievalOutcome::Unavailable(format!(
                "File not found: {}",
                self.path.display()
            ));
        }

        let path = self.path.clone();
        let needle = query.to_lowercase();
        let cap = self.per_column_cap;
        let scanned = tokio::task::spawn_blocking(move || scan(&path, &needle, cap))
            .await
            .map_err(|e| TabularError::Worker(e.to_string()))
            .and_then(|r| r);

        match scanned {
            Ok(records) if records.is_empty() => RetrievalOutcome::NoMatch,
            Ok(records) => {
                debug!(target: "cinegraph::retrieval", %query, matches = records.len(), "CSV search matched");
                RetrievalOutcome::Matches(records)
            }
            Err(e) => {
                warn!(target: "cinegraph::retrieval", category = e.category(), error = %e, "CSV search failed");
                RetrievalOutcome::Failed {
                    category: e.category().to_string(),
                    message: e.to_string(),
                }
            }
        }
    }

    /// Router-facing text for an outcome of this adapter.
    pub fn render(outcome: &RetrievalOutcome) -> ToolOutput {
        match outcome {
            RetrievalOutcome::Matches(records) => {
                let lines: Vec<String> = records
                    .iter()
                    .map(|r| format!("[{}] {}", r.label, r.text))
                    .collect();
                ToolOutput::ok(format!(
                    "[CSV] {} matching rows:\n{}",
                    records.len(),
                    lines.join("\n")
                ))
            }
            RetrievalOutcome::NoMatch => ToolOutput::empty(NO_MATCHES),
            RetrievalOutcome::Unavailable(message) => {
                ToolOutput::unavailable(format!("[CSV tool error] {}", message))
            }
            RetrievalOutcome::Failed { category, message } => {
                ToolOutput::error(format!("[CSV tool error] {}: {}", category, message))
            }
        }
    }
}

/// Up to `cap` matching rows per column, grouped in column order.
fn scan(path: &Path, needle: &str, cap: usize) -> Result<Vec<Record>, TabularError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let rows = reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;

    let mut records = Vec::new();
    for (col, name) in headers.iter().enumerate() {
        let matching = rows
            .iter()
            .filter(|row| {
                row.get(col)
                    .map_or(false, |v| v.to_lowercase().contains(needle))
            })
            .take(cap);
        for row in matching {
            let metadata: serde_json::Map<String, serde_json::Value> = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), serde_json::Value::String(v.to_string())))
                .collect();
            records.push(Record {
                label: name.to_string(),
                text: serde_json::Value::Object(metadata.clone()).to_string(),
                metadata,
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolStatus;
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("character_sentiment.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const SENTIMENT: &str = "movie,character,dominant_emotion\n\
        Inside Out,Joy,joy\n\
        Inside Out,Sadness,sadness\n\
        Amelie,Amelie,JOY\n\
        Heat,Neil,anger\n";

    #[tokio::test]
    async fn matches_every_column_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let search = TabularSearch::new(write_csv(&dir, SENTIMENT));
        let outcome = search.search("joy").await;
        let records = outcome.records();
        // "Joy" in character, "joy" and "JOY" in dominant_emotion.
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].label, "character");
        assert_eq!(records[1].label, "dominant_emotion");
        assert_eq!(records[2].metadata["movie"], "Amelie");
    }

    #[tokio::test]
    async fn caps_rows_per_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("title,note\n");
        for i in 0..12 {
            body.push_str(&format!("Movie {},classic\n", i));
        }
        let search = TabularSearch::new(write_csv(&dir, &body));
        assert_eq!(search.search("classic").await.records().len(), 5);
        let search = search.with_per_column_cap(2);
        // Only the title column contains "movie".
        assert_eq!(search.search("movie").await.records().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let search = TabularSearch::new("/nonexistent/dir/character_sentiment.csv");
        let outcome = search.search("joy").await;
        assert!(matches!(outcome, RetrievalOutcome::Unavailable(_)));
        let output = TabularSearch::render(&outcome);
        assert_eq!(output.status, ToolStatus::Unavailable);
        assert_eq!(
            output.text,
            "[CSV tool error] File not found: /nonexistent/dir/character_sentiment.csv"
        );
    }

    #[tokio::test]
    async fn no_match_and_blank_query() {
        let dir = tempfile::tempdir().unwrap();
        let search = TabularSearch::new(write_csv(&dir, SENTIMENT));
        assert_eq!(search.search("disgust").await, RetrievalOutcome::NoMatch);
        assert_eq!(search.search("   ").await, RetrievalOutcome::NoMatch);
        assert_eq!(
            TabularSearch::render(&RetrievalOutcome::NoMatch).text,
            NO_MATCHES
        );
    }

    #[tokio::test]
    async fn repeated_queries_are_identical() {
        let dir = tempfile::tempdir().unwrap();
        let search = TabularSearch::new(write_csv(&dir, SENTIMENT));
        let first = TabularSearch::render(&search.search("inside").await);
        let second = TabularSearch::render(&search.search("inside").await);
        assert_eq!(first, second);
        assert!(first.text.starts_with("[CSV] 2 matching rows:"));
    }

    #[tokio::test]
    async fn malformed_utf8_is_a_tagged_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        std::fs::write(&path, b"name,value\nok,\xff\xfe\n").unwrap();
        let outcome = TabularSearch::new(path).search("ok").await;
        let output = TabularSearch::render(&outcome);
        assert_eq!(output.status, ToolStatus::Error);
        assert!(output.text.starts_with("[CSV tool error] Parse:"));
    }
}
