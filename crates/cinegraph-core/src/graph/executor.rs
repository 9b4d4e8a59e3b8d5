//! Read-only execution of translated queries with a per-query timeout.

use super::{FailureCategory, GraphStore, QueryResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static MUTATION_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^.:\w$])(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP|FOREACH|LOAD\s+CSV)\b")
        .expect("mutation pattern")
});

static WRITE_PROCEDURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bCALL\s+((?:dbms\.|db\.create|db\.clear|db\.drop|apoc\.(?:create|merge|refactor|periodic|trigger|atomic|nodes\.delete|schema\.assert)|gds\.[\w.]*\.(?:write|mutate))[\w.]*)",
    )
    .expect("write procedure pattern")
});

/// Blanks string literals, backtick identifiers and comments so keywords inside them are ignored.
fn strip_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                while let Some(n) = chars.next() {
                    if n == '\\' && c != '`' {
                        chars.next();
                        continue;
                    }
                    if n == c {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// `Err` names the first mutating clause or write procedure found outside literals.
pub fn check_read_only(query: &str) -> Result<(), String> {
    let bare = strip_literals(query);
    if let Some(m) = MUTATION_CLAUSE.captures(&bare).and_then(|c| c.get(1)) {
        return Err(format!(
            "write clause {} is not allowed",
            m.as_str().to_ascii_uppercase()
        ));
    }
    if let Some(m) = WRITE_PROCEDURE.captures(&bare).and_then(|c| c.get(1)) {
        return Err(format!("write procedure {} is not allowed", m.as_str()));
    }
    Ok(())
}

/// Runs queries against the injected store; every failure becomes `QueryResult::Error`.
pub struct GraphQueryExecutor {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl GraphQueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn execute(&self, query: &str) -> QueryResult {
        let query = query.trim();
        if query.is_empty() {
            return QueryResult::Error {
                category: FailureCategory::Syntax,
                message: "empty query".into(),
            };
        }

        if let Err(reason) = check_read_only(query) {
            warn!(target: "cinegraph::graph", %query, %reason, "Refusing non read-only query");
            return QueryResult::Error {
                category: FailureCategory::Forbidden,
                message: reason,
            };
        }

        match tokio::time::timeout(self.timeout, self.store.run(query)).await {
            Err(_) => {
                warn!(target: "cinegraph::graph", %query, timeout = ?self.timeout, "Graph query timed out");
                QueryResult::Error {
                    category: FailureCategory::Timeout,
                    message: format!("query exceeded {:?}", self.timeout),
                }
            }
            Ok(Err(e)) => {
                warn!(target: "cinegraph::graph", %query, category = %e.category(), error = %e, "Graph query failed");
                QueryResult::Error {
                    category: e.category(),
                    message: e.to_string(),
                }
            }
            Ok(Ok(rows)) if rows.is_empty() => {
                debug!(target: "cinegraph::graph", %query, "Graph query returned no rows");
                QueryResult::Empty
            }
            Ok(Ok(rows)) => {
                debug!(target: "cinegraph::graph", %query, rows = rows.len(), "Graph query returned rows");
                QueryResult::Rows(rows)
            }
        }
    }
}
