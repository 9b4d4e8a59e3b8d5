//! Vector similarity search over dialogue/character embeddings.
//!
//! [`VectorSearch`] embeds the query with an injected [`Embedder`] and asks a [`VectorIndex`]
//! for the k nearest documents. Two indexes ship:
//! - [`ChromaIndex`]: a Chroma collection over its REST API (`/api/v1`).
//! - [`InMemoryVectorIndex`]: cosine similarity over vectors held in process.

use super::{Record, RetrievalOutcome};
use crate::config::VectorConfig;
use crate::llm::Embedder;
use crate::tools::ToolOutput;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Exact marker returned when nothing relevant was retrieved.
pub const NO_RELEVANT_CONTEXT: &str = "[VectorDB] No relevant context found.";

/// all-MiniLM-L6-v2 output size.
pub const DEFAULT_DIMENSION: usize = 384;

type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("{0}")]
    Embedding(String),

    #[error("{0}")]
    Connection(String),

    #[error("{0}")]
    Query(String),

    #[error("expected {expected}-dimensional vector, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("collection {0} does not exist")]
    CollectionNotFound(String),
}

impl VectorError {
    pub fn category(&self) -> &'static str {
        match self {
            VectorError::Embedding(_) => "Embedding",
            VectorError::Connection(_) => "Connection",
            VectorError::Query(_) => "Query",
            VectorError::DimensionMismatch { .. } => "Dimension",
            VectorError::CollectionNotFound(_) => "CollectionNotFound",
        }
    }
}

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub document: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Smaller is closer.
    pub distance: Option<f32>,
}

#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` hits, nearest first.
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, VectorError>;

    /// Human-readable name used in logs (backend + namespace).
    fn describe(&self) -> String;
}

/// In-process cosine index. Used when no external vector database is configured, and in tests.
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: RwLock<Vec<(Vec<f32>, VectorHit)>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn insert(
        &self,
        embedding: Vec<f32>,
        document: impl Into<String>,
        metadata: Metadata,
    ) -> Result<(), VectorError> {
        if embedding.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        self.entries.write().await.push((
            embedding,
            VectorHit {
                document: document.into(),
                metadata,
                distance: None,
            },
        ));
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait::async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, VectorError> {
        if embedding.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        let entries = self.entries.read().await;
        let mut scored: Vec<VectorHit> = entries
            .iter()
            .map(|(vector, hit)| VectorHit {
                distance: Some(1.0 - cosine_similarity(embedding, vector)),
                ..hit.clone()
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn describe(&self) -> String {
        format!("in-memory(dim={})", self.dimension)
    }
}

#[derive(Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Serialize)]
struct ChromaQuery<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Deserialize)]
struct ChromaQueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

fn first_query<T>(batch: Option<Vec<Vec<T>>>) -> Vec<T> {
    batch
        .and_then(|outer| outer.into_iter().next())
        .unwrap_or_default()
}

impl ChromaQueryResponse {
    /// First (only) query's hits; documents without text are skipped.
    fn into_hits(self) -> Vec<VectorHit> {
        let documents = first_query(self.documents);
        let metadatas = first_query(self.metadatas);
        let distances = first_query(self.distances);
        documents
            .into_iter()
            .enumerate()
            .filter_map(|(i, doc)| {
                Some(VectorHit {
                    document: doc?,
                    metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
                    distance: distances.get(i).copied().flatten(),
                })
            })
            .collect()
    }
}

/// Chroma collection (namespace = collection name). The collection id is resolved once.
pub struct ChromaIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

impl ChromaIndex {
    pub fn new(config: &VectorConfig) -> Result<Self, VectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VectorError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
        })
    }

    fn transport(e: reqwest::Error) -> VectorError {
        if e.is_connect() || e.is_timeout() {
            VectorError::Connection(e.to_string())
        } else {
            VectorError::Query(e.to_string())
        }
    }

    async fn resolve_collection(&self) -> Result<&str, VectorError> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
                let res = self.client.get(&url).send().await.map_err(Self::transport)?;
                let status = res.status();
                if !status.is_success() {
                    let body = res.text().await.unwrap_or_default();
                    return Err(if status.as_u16() == 404 || body.contains("does not exist") {
                        VectorError::CollectionNotFound(self.collection.clone())
                    } else {
                        VectorError::Query(format!("HTTP {}: {}", status.as_u16(), body))
                    });
                }
                let collection: ChromaCollection = res
                    .json()
                    .await
                    .map_err(|e| VectorError::Query(e.to_string()))?;
                info!(
                    target: "cinegraph::retrieval",
                    collection = %self.collection,
                    id = %collection.id,
                    "Resolved Chroma collection"
                );
                Ok::<_, VectorError>(collection.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait::async_trait]
impl VectorIndex for ChromaIndex {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, VectorError> {
        let id = self.resolve_collection().await?;
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
        let body = ChromaQuery {
            query_embeddings: [embedding],
            n_results: k,
            include: ["documents", "metadatas", "distances"],
        };
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(VectorError::Query(format!("HTTP {}: {}", status.as_u16(), body)));
        }
        let parsed: ChromaQueryResponse = res
            .json()
            .await
            .map_err(|e| VectorError::Query(e.to_string()))?;
        Ok(parsed.into_hits())
    }

    fn describe(&self) -> String {
        format!("chroma({}/{})", self.base_url, self.collection)
    }
}

/// Embed-then-search adapter.
pub struct VectorSearch {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    k: usize,
}

impl VectorSearch {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, k: usize) -> Self {
        Self {
            embedder,
            index,
            k: k.max(1),
        }
    }

    pub async fn search(&self, query: &str) -> RetrievalOutcome {
        let query = query.trim();
        if query.is_empty() {
            return RetrievalOutcome::NoMatch;
        }

        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                let e = VectorError::Embedding(e.to_string());
                warn!(target: "cinegraph::retrieval", error = %e, "Query embedding failed");
                return RetrievalOutcome::Failed {
                    category: e.category().to_string(),
                    message: e.to_string(),
                };
            }
        };

        match self.index.query(&embedding, self.k).await {
            Ok(hits) if hits.is_empty() => RetrievalOutcome::NoMatch,
            // A collection nobody has written to yet is an empty index.
            Err(VectorError::CollectionNotFound(name)) => {
                debug!(target: "cinegraph::retrieval", collection = %name, "Collection not created yet");
                RetrievalOutcome::NoMatch
            }
            Ok(hits) => {
                debug!(
                    target: "cinegraph::retrieval",
                    index = %self.index.describe(),
                    hits = hits.len(),
                    "Vector search matched"
                );
                RetrievalOutcome::Matches(hits.into_iter().map(hit_to_record).collect())
            }
            Err(e) => {
                warn!(
                    target: "cinegraph::retrieval",
                    index = %self.index.describe(),
                    category = e.category(),
                    error = %e,
                    "Vector search failed"
                );
                match e {
                    VectorError::Connection(message) => RetrievalOutcome::Unavailable(message),
                    other => RetrievalOutcome::Failed {
                        category: other.category().to_string(),
                        message: other.to_string(),
                    },
                }
            }
        }
    }

    /// `[movie :: character]` header + document, pieces separated by `---`.
    pub fn render(outcome: &RetrievalOutcome) -> ToolOutput {
        match outcome {
            RetrievalOutcome::Matches(records) => {
                let pieces: Vec<String> = records
                    .iter()
                    .map(|r| format!("[{}]\n{}", r.label, r.text))
                    .collect();
                ToolOutput::ok(pieces.join("\n\n---\n\n"))
            }
            RetrievalOutcome::NoMatch => ToolOutput::empty(NO_RELEVANT_CONTEXT),
            RetrievalOutcome::Unavailable(message) => {
                ToolOutput::unavailable(format!("[VectorDB tool error] Connection: {}", message))
            }
            RetrievalOutcome::Failed { category, message } => {
                ToolOutput::error(format!("[VectorDB tool error] {}: {}", category, message))
            }
        }
    }
}

fn hit_to_record(hit: VectorHit) -> Record {
    let field = |key: &str| {
        hit.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    let label = format!("{} :: {}", field("movie"), field("character"));
    let mut metadata = hit.metadata.clone();
    if let Some(distance) = hit.distance {
        metadata.insert("distance".into(), serde_json::json!(distance));
    }
    Record {
        label,
        text: hit.document,
        metadata,
    }
}
