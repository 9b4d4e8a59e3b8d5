//! Neo4j over the HTTP transactional endpoint (`POST {url}/db/{database}/tx/commit`).

use super::{GraphError, GraphStore, Row, SchemaSnapshot};
use crate::config::GraphConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const LABELS: &str = "CALL db.labels() YIELD label RETURN label ORDER BY label";
const RELATIONSHIP_TYPES: &str =
    "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType ORDER BY relationshipType";
const PROPERTY_KEYS: &str =
    "CALL db.propertyKeys() YIELD propertyKey RETURN propertyKey ORDER BY propertyKey";

#[derive(Serialize)]
struct CommitRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    #[serde(rename = "resultDataContents")]
    result_data_contents: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    #[serde(default)]
    message: String,
}

impl StatementResult {
    fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.data
            .into_iter()
            .map(|d| columns.iter().cloned().zip(d.row).collect())
            .collect()
    }

    /// First column as strings (schema procedures).
    fn first_column(self) -> Vec<String> {
        self.data
            .into_iter()
            .filter_map(|d| d.row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

/// Maps a Neo4j status code (`Neo.ClientError.Statement.SyntaxError`, …) to a typed error.
fn classify(code: String, message: String) -> GraphError {
    if code.ends_with("SyntaxError") {
        GraphError::Syntax(message)
    } else if code.starts_with("Neo.TransientError") || code.contains("DatabaseUnavailable") {
        GraphError::Unavailable(format!("{}: {}", code, message))
    } else {
        GraphError::Store { code, message }
    }
}

fn transport_error(e: reqwest::Error) -> GraphError {
    if e.is_connect() || e.is_timeout() {
        GraphError::Unavailable(e.to_string())
    } else {
        GraphError::Protocol(e.to_string())
    }
}

/// Read-only Neo4j client with basic auth.
pub struct Neo4jHttpStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jHttpStore {
    pub fn new(config: &GraphConfig) -> Result<Self, GraphError> {
        let client = reqwest::Client::builder()
            // Executor enforces the query timeout; this only bounds a hung connection.
            .timeout(Duration::from_secs(config.query_timeout_secs.saturating_mul(2).max(5)))
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                config.url.trim_end_matches('/'),
                config.database
            ),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn commit(&self, statements: &[&str]) -> Result<Vec<StatementResult>, GraphError> {
        let body = CommitRequest {
            statements: statements
                .iter()
                .map(|s| Statement {
                    statement: s,
                    result_data_contents: ["row"],
                })
                .collect(),
        };

        let res = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                GraphError::Unavailable(format!("HTTP {}: {}", status.as_u16(), text))
            } else {
                GraphError::Store {
                    code: format!("HTTP {}", status.as_u16()),
                    message: text,
                }
            });
        }

        let parsed: CommitResponse = res
            .json()
            .await
            .map_err(|e| GraphError::Protocol(e.to_string()))?;
        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(classify(err.code, err.message));
        }
        Ok(parsed.results)
    }
}

#[async_trait::async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn schema(&self) -> Result<SchemaSnapshot, GraphError> {
        let mut results = self
            .commit(&[LABELS, RELATIONSHIP_TYPES, PROPERTY_KEYS])
            .await?
            .into_iter();
        let mut next = || {
            results
                .next()
                .map(StatementResult::first_column)
                .ok_or_else(|| GraphError::Protocol("schema response missing a result".into()))
        };
        let schema = SchemaSnapshot {
            node_labels: next()?,
            relationship_types: next()?,
            property_keys: next()?,
        };
        debug!(
            target: "cinegraph::graph",
            labels = schema.node_labels.len(),
            relationships = schema.relationship_types.len(),
            properties = schema.property_keys.len(),
            "Fetched graph schema"
        );
        Ok(schema)
    }

    async fn run(&self, query: &str) -> Result<Vec<Row>, GraphError> {
        let result = self
            .commit(&[query])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Protocol("commit response has no result".into()))?;
        Ok(result.into_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_body_matches_transactional_api() {
        let body = CommitRequest {
            statements: vec![Statement {
                statement: "MATCH (m:Movie) RETURN m.title",
                result_data_contents: ["row"],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["statements"][0]["statement"], "MATCH (m:Movie) RETURN m.title");
        assert_eq!(json["statements"][0]["resultDataContents"][0], "row");
    }

    #[test]
    fn rows_zip_columns_with_values() {
        let raw = r#"{
            "results": [{
                "columns": ["title", "genre"],
                "data": [
                    {"row": ["Inception", "Sci-Fi"], "meta": [null, null]},
                    {"row": ["Heat", "Crime"], "meta": [null, null]}
                ]
            }],
            "errors": []
        }"#;
        let parsed: CommitResponse = serde_json::from_str(raw).unwrap();
        let rows = parsed.results.into_iter().next().unwrap().into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["genre"], "Sci-Fi");
        assert_eq!(rows[1]["title"], "Heat");
    }

    #[test]
    fn error_codes_are_classified() {
        assert!(matches!(
            classify("Neo.ClientError.Statement.SyntaxError".into(), "bad".into()),
            GraphError::Syntax(_)
        ));
        assert!(matches!(
            classify("Neo.TransientError.General.DatabaseUnavailable".into(), "down".into()),
            GraphError::Unavailable(_)
        ));
        assert!(matches!(
            classify("Neo.ClientError.Security.Unauthorized".into(), "no".into()),
            GraphError::Store { .. }
        ));
    }

    #[test]
    fn endpoint_includes_database() {
        let config = GraphConfig {
            url: "http://localhost:7474/".into(),
            database: "moviesdb".into(),
            ..GraphConfig::default()
        };
        let store = Neo4jHttpStore::new(&config).unwrap();
        assert_eq!(store.endpoint(), "http://localhost:7474/db/moviesdb/tx/commit");
    }
}
