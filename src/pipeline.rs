//! RAG Pipeline Orchestrator
//!
//! A session-scoped object composing the loader, chunker, embedding service,
//! vector index, and generation service. Each pipeline owns its index; there
//! is no process-wide state, so multiple sessions can coexist.
//!
//! Mutating operations (`create_index`, `add_documents`, `restore_index`)
//! serialize on an internal writer lock and publish a fully built index in a
//! final synchronous step; queries read an `Arc` snapshot and therefore never
//! observe a half-built index. Dropping an in-flight operation cancels its
//! outstanding service calls and leaves the last consistent state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, Settings};
use crate::documents::{self, chunk_document, Document, DocumentSource, LoadOutcome};
use crate::gemini::GeminiClient;
use crate::index::{IndexEntry, ScoredChunk, VectorIndex};
use crate::provider::{Embedder, GenerationOutcome, Generator, ServiceError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("pipeline is not ready: {0}")]
    NotReady(&'static str),
    #[error("index build failed: {0}")]
    IndexBuild(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Lifecycle of a pipeline session. `Ready` behaves identically to `Indexed`
/// for every operation; it only records that a query has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Uninitialized,
    Initialized,
    Indexed,
    Ready,
}

/// A per-document failure during an incremental add.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFailure {
    pub source: String,
    pub reason: String,
}

/// Result of `create_index`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    pub embedding_dimension: usize,
}

/// Result of `add_documents`: the subset that succeeded plus the failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReport {
    pub documents_added: usize,
    pub chunks_added: usize,
    pub failures: Vec<DocumentFailure>,
}

/// Answer to a query with its supporting chunks, most relevant first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub answer: Option<String>,
    pub blocked: bool,
    pub block_message: Option<String>,
    pub sources: Vec<ScoredChunk>,
}

/// Read-only snapshot of the session returned by `stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub state: PipelineState,
    pub documents: usize,
    pub chunks: usize,
    pub embedding_dimension: Option<usize>,
    pub model_name: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,
}

/// Retrieval-augmented generation session.
pub struct RagPipeline {
    settings: Settings,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    state: RwLock<PipelineState>,
    index: RwLock<Option<Arc<VectorIndex>>>,
    /// Serializes index-mutating operations.
    mutate: Mutex<()>,
}

impl RagPipeline {
    /// Build a session with injected service providers.
    pub fn new(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        RagPipeline {
            settings,
            embedder,
            generator,
            state: RwLock::new(PipelineState::Uninitialized),
            index: RwLock::new(None),
            mutate: Mutex::new(()),
        }
    }

    /// Build a session backed by the Gemini API for both embedding and
    /// generation.
    pub fn with_gemini(settings: Settings) -> Self {
        let client = Arc::new(GeminiClient::new(&settings));
        RagPipeline::new(settings, client.clone(), client)
    }

    /// Validate configuration and verify the service credentials.
    ///
    /// An invalid API key is fatal (`Auth`); transient network failures
    /// surface as `Init` after the client's retries and the call may simply
    /// be repeated.
    pub async fn initialize(&self) -> Result<(), PipelineError> {
        self.settings.validate()?;
        self.embedder.verify().await.map_err(|e| match e {
            ServiceError::Auth(message) => PipelineError::Auth(message),
            other => PipelineError::Init(other.to_string()),
        })?;

        let mut state = self.state.write();
        if *state == PipelineState::Uninitialized {
            *state = PipelineState::Initialized;
        }
        info!(model = %self.settings.model_name, "Pipeline initialized");
        Ok(())
    }

    /// Load documents from paths or uploaded buffers. Stateless; per-item
    /// failures are reported alongside the successes.
    pub fn load_documents(&self, sources: &[DocumentSource]) -> LoadOutcome {
        documents::load_documents(sources)
    }

    /// Chunk, embed, and index the given documents, replacing any existing
    /// index. Atomic: on failure the prior index (if any) and the session
    /// state are left untouched.
    pub async fn create_index(
        &self,
        documents: Vec<Document>,
    ) -> Result<IndexReport, PipelineError> {
        if *self.state.read() == PipelineState::Uninitialized {
            return Err(PipelineError::NotReady("initialize the pipeline first"));
        }
        let _guard = self.mutate.lock().await;

        info!(documents = documents.len(), "Building index");
        let entries = self.embed_documents(&documents).await?;
        let index =
            VectorIndex::build(entries).map_err(|e| PipelineError::IndexBuild(e.to_string()))?;

        let report = IndexReport {
            documents_indexed: documents.len(),
            chunks_indexed: index.len(),
            embedding_dimension: index.dimension(),
        };

        // Publish the replacement only once it is fully built
        *self.index.write() = Some(Arc::new(index));
        *self.state.write() = PipelineState::Indexed;
        info!(chunks = report.chunks_indexed, "Index ready");
        Ok(report)
    }

    /// Extend the index with new documents without discarding prior entries.
    /// Best-effort: each document chunks and embeds independently, the index
    /// grows by the subset that succeeded, and failures are reported
    /// per document.
    pub async fn add_documents(
        &self,
        documents: Vec<Document>,
    ) -> Result<AddReport, PipelineError> {
        if !self.has_index() {
            return Err(PipelineError::NotReady("no index to extend"));
        }
        let _guard = self.mutate.lock().await;
        let base = self
            .index
            .read()
            .clone()
            .ok_or(PipelineError::NotReady("no index to extend"))?;

        let mut report = AddReport {
            documents_added: 0,
            chunks_added: 0,
            failures: Vec::new(),
        };
        let mut new_entries = Vec::new();

        for document in &documents {
            match self.embed_one(document).await {
                Ok(entries) => {
                    report.documents_added += 1;
                    report.chunks_added += entries.len();
                    new_entries.extend(entries);
                }
                Err(reason) => {
                    warn!(source = %document.source, reason = %reason, "Skipping document");
                    report.failures.push(DocumentFailure {
                        source: document.source.clone(),
                        reason,
                    });
                }
            }
        }

        if !new_entries.is_empty() {
            let merged = base
                .extended(new_entries)
                .map_err(|e| PipelineError::IndexBuild(e.to_string()))?;
            *self.index.write() = Some(Arc::new(merged));
        }

        info!(
            added = report.documents_added,
            failed = report.failures.len(),
            "Extended index"
        );
        Ok(report)
    }

    /// Answer a question against the indexed corpus. Valid once an index
    /// exists; otherwise rejects with `NotReady` and no state change.
    pub async fn query(&self, question: &str) -> Result<QueryResult, PipelineError> {
        let snapshot = self
            .index
            .read()
            .clone()
            .ok_or(PipelineError::NotReady("load documents and create an index first"))?;

        debug!(len = question.len(), "Embedding query");
        let vectors = self
            .embedder
            .embed(&[question.to_string()])
            .await
            .map_err(Self::query_error)?;
        let query_vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Query("no embedding returned".to_string()))?;

        let sources = snapshot
            .search(&query_vector, self.settings.retrieval_top_k)
            .map_err(|e| PipelineError::Query(e.to_string()))?;

        let prompt = build_prompt(question, &sources);
        let outcome = self
            .generator
            .generate(&prompt)
            .await
            .map_err(Self::query_error)?;

        // First successful query: Indexed -> Ready (observational only)
        {
            let mut state = self.state.write();
            if *state == PipelineState::Indexed {
                *state = PipelineState::Ready;
            }
        }

        match outcome {
            GenerationOutcome::Answer(text) => Ok(QueryResult {
                answer: Some(text),
                blocked: false,
                block_message: None,
                sources,
            }),
            GenerationOutcome::Blocked { reason } => {
                info!(reason = %reason, "Query blocked by the safety filter");
                Ok(QueryResult {
                    answer: None,
                    blocked: true,
                    block_message: Some(format!(
                        "The answer was withheld by the provider's safety filter ({}).",
                        reason
                    )),
                    sources,
                })
            }
        }
    }

    /// Install a previously saved index. Requires an initialized session.
    pub fn restore_index(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError> {
        if *self.state.read() == PipelineState::Uninitialized {
            return Err(PipelineError::NotReady("initialize the pipeline first"));
        }
        let index =
            VectorIndex::build(entries).map_err(|e| PipelineError::IndexBuild(e.to_string()))?;
        *self.index.write() = Some(Arc::new(index));
        *self.state.write() = PipelineState::Indexed;
        Ok(())
    }

    /// Current configuration and index size. Never mutates state.
    pub fn stats(&self) -> PipelineStats {
        let state = *self.state.read();
        let snapshot = self.index.read().clone();
        PipelineStats {
            state,
            documents: snapshot.as_ref().map(|i| i.document_count()).unwrap_or(0),
            chunks: snapshot.as_ref().map(|i| i.len()).unwrap_or(0),
            embedding_dimension: snapshot.map(|i| i.dimension()),
            model_name: self.settings.model_name.clone(),
            embedding_model: self.settings.embedding_model.clone(),
            chunk_size: self.settings.chunk_size,
            chunk_overlap: self.settings.chunk_overlap,
            retrieval_top_k: self.settings.retrieval_top_k,
        }
    }

    /// Stable snapshot of the current index, if one exists.
    pub fn index_snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.index.read().clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    fn has_index(&self) -> bool {
        self.index.read().is_some()
    }

    fn query_error(e: ServiceError) -> PipelineError {
        match e {
            ServiceError::Auth(message) => PipelineError::Auth(message),
            other => PipelineError::Query(other.to_string()),
        }
    }

    fn build_error(e: ServiceError) -> PipelineError {
        match e {
            ServiceError::Auth(message) => PipelineError::Auth(message),
            other => PipelineError::IndexBuild(other.to_string()),
        }
    }

    /// Chunk and embed all documents for a from-scratch build. Any failure
    /// aborts the whole batch.
    async fn embed_documents(
        &self,
        documents: &[Document],
    ) -> Result<Vec<IndexEntry>, PipelineError> {
        let mut chunks = Vec::new();
        for document in documents {
            let mut document_chunks = chunk_document(
                document,
                self.settings.chunk_size,
                self.settings.chunk_overlap,
            )
            .map_err(|e| PipelineError::IndexBuild(e.to_string()))?;
            chunks.append(&mut document_chunks);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(Self::build_error)?;
        if vectors.len() != chunks.len() {
            return Err(PipelineError::IndexBuild(
                "embedding count does not match chunk count".to_string(),
            ));
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect())
    }

    /// Chunk and embed a single document for an incremental add.
    async fn embed_one(&self, document: &Document) -> Result<Vec<IndexEntry>, String> {
        let chunks = chunk_document(
            document,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        )
        .map_err(|e| e.to_string())?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await.map_err(|e| e.to_string())?;
        if vectors.len() != chunks.len() {
            return Err("embedding count does not match chunk count".to_string());
        }

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect())
    }
}

/// Render the generation prompt: retrieved chunks in rank order, each tagged
/// with its source for citation, then the question.
fn build_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let mut prompt = String::from("Context information is below.\n---------------------\n");
    for hit in context {
        prompt.push_str(&format!(
            "[source: {} #{}]\n{}\n\n",
            hit.chunk.source, hit.chunk.index, hit.chunk.content
        ));
    }
    prompt.push_str(
        "---------------------\nGiven the context information and not prior knowledge, \
         answer the question.\n",
    );
    prompt.push_str(&format!("Question: {}\nAnswer:", question));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentFormat;
    use async_trait::async_trait;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::BTreeSet;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicU32, Ordering};

    const DIM: usize = 64;

    /// Deterministic embedding via feature hashing: each token is hashed to
    /// a fixed bucket and the vector is L2-normalized, so the same text
    /// always produces the same vector.
    fn hash_embedding(text: &str) -> Vec<f32> {
        let mut tf = vec![0.0f32; DIM];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            tf[(hasher.finish() as usize) % DIM] += 1.0;
        }
        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }

    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Ok(texts.iter().map(|t| hash_embedding(t)).collect())
        }
    }

    /// Succeeds for a fixed number of embed calls, then times out forever.
    struct FlakyEmbedder {
        calls_left: AtomicU32,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            let left = self.calls_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(ServiceError::Timeout);
            }
            self.calls_left.store(left - 1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| hash_embedding(t)).collect())
        }
    }

    /// Fails per-input when the text carries a poison marker.
    struct SelectiveEmbedder;

    #[async_trait]
    impl Embedder for SelectiveEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            if texts.iter().any(|t| t.contains("POISON")) {
                return Err(ServiceError::Status {
                    status: 500,
                    message: "refused".to_string(),
                });
            }
            Ok(texts.iter().map(|t| hash_embedding(t)).collect())
        }
    }

    /// Rejects credential verification.
    struct BadKeyEmbedder;

    #[async_trait]
    impl Embedder for BadKeyEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Err(ServiceError::Auth("API key not valid".to_string()))
        }

        async fn verify(&self) -> Result<(), ServiceError> {
            Err(ServiceError::Auth("API key not valid".to_string()))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<GenerationOutcome, ServiceError> {
            Ok(GenerationOutcome::Answer(format!(
                "answer based on {} prompt chars",
                prompt.len()
            )))
        }
    }

    struct BlockedGenerator;

    #[async_trait]
    impl Generator for BlockedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GenerationOutcome, ServiceError> {
            Ok(GenerationOutcome::Blocked {
                reason: "SAFETY".to_string(),
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GenerationOutcome, ServiceError> {
            Err(ServiceError::Timeout)
        }
    }

    fn test_settings() -> Settings {
        Settings {
            api_key: "test-key".to_string(),
            chunk_size: 128,
            chunk_overlap: 16,
            retrieval_top_k: 3,
            ..Settings::default()
        }
    }

    fn doc(source: &str, content: &str) -> Document {
        Document {
            id: ulid::Ulid::new().to_string(),
            source: source.to_string(),
            format: DocumentFormat::Text,
            content: content.to_string(),
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc(
                "rust.txt",
                "Rust ownership and borrowing guarantee memory safety. \
                 The borrow checker enforces ownership rules at compile time.",
            ),
            doc(
                "pasta.txt",
                "Cooking pasta requires salted boiling water. \
                 Drain the noodles and toss them with sauce.",
            ),
        ]
    }

    fn pipeline(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> RagPipeline {
        RagPipeline::new(test_settings(), embedder, generator)
    }

    fn chunk_set(pipeline: &RagPipeline) -> BTreeSet<(String, u32, String)> {
        pipeline
            .index_snapshot()
            .map(|index| {
                index
                    .entries()
                    .iter()
                    .map(|e| (e.chunk.source.clone(), e.chunk.index, e.chunk.content.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_query_without_index_is_rejected() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        assert!(matches!(
            p.query("anything").await,
            Err(PipelineError::NotReady(_))
        ));

        p.initialize().await.unwrap();
        assert!(matches!(
            p.query("anything").await,
            Err(PipelineError::NotReady(_))
        ));
        assert_eq!(p.state(), PipelineState::Initialized);
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_key() {
        let p = pipeline(Arc::new(BadKeyEmbedder), Arc::new(EchoGenerator));
        assert!(matches!(
            p.initialize().await,
            Err(PipelineError::Auth(_))
        ));
        assert_eq!(p.state(), PipelineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_create_index_requires_initialize() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        assert!(matches!(
            p.create_index(corpus()).await,
            Err(PipelineError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_index_and_query_flow() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        p.initialize().await.unwrap();

        let report = p.create_index(corpus()).await.unwrap();
        assert_eq!(report.documents_indexed, 2);
        assert_eq!(report.chunks_indexed, 2);
        assert_eq!(report.embedding_dimension, DIM);
        assert_eq!(p.state(), PipelineState::Indexed);

        let result = p.query("how does rust ownership work").await.unwrap();
        assert!(!result.blocked);
        assert!(result.answer.is_some());
        assert!(!result.sources.is_empty());
        assert_eq!(result.sources[0].chunk.source, "rust.txt");

        // Retrieved chunks come from the indexed corpus, scores non-increasing
        for pair in result.sources.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for hit in &result.sources {
            assert!(["rust.txt", "pasta.txt"].contains(&hit.chunk.source.as_str()));
        }

        // First successful query is observational only
        assert_eq!(p.state(), PipelineState::Ready);
        let again = p.query("pasta water").await.unwrap();
        assert!(!again.blocked);
    }

    #[tokio::test]
    async fn test_create_index_failure_leaves_prior_index() {
        let embedder = Arc::new(FlakyEmbedder {
            calls_left: AtomicU32::new(1),
        });
        let p = pipeline(embedder, Arc::new(EchoGenerator));
        p.initialize().await.unwrap();

        p.create_index(vec![doc("a.txt", "alpha body text")])
            .await
            .unwrap();
        let before = chunk_set(&p);

        // The embedder now times out on every call; the rebuild must fail
        // without touching the existing index.
        let result = p.create_index(vec![doc("b.txt", "beta body text")]).await;
        assert!(matches!(result, Err(PipelineError::IndexBuild(_))));
        assert_eq!(chunk_set(&p), before);
        assert_eq!(p.stats().documents, 1);
    }

    #[tokio::test]
    async fn test_add_documents_requires_index() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        p.initialize().await.unwrap();
        assert!(matches!(
            p.add_documents(corpus()).await,
            Err(PipelineError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_add_documents_is_best_effort() {
        let p = pipeline(Arc::new(SelectiveEmbedder), Arc::new(EchoGenerator));
        p.initialize().await.unwrap();
        p.create_index(vec![doc("a.txt", "alpha content")])
            .await
            .unwrap();

        let report = p
            .add_documents(vec![
                doc("b.txt", "beta content"),
                doc("c.txt", "POISON content"),
            ])
            .await
            .unwrap();

        assert_eq!(report.documents_added, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, "c.txt");

        let sources: Vec<String> = chunk_set(&p).into_iter().map(|(s, _, _)| s).collect();
        assert!(sources.contains(&"a.txt".to_string()));
        assert!(sources.contains(&"b.txt".to_string()));
        assert!(!sources.contains(&"c.txt".to_string()));
    }

    #[tokio::test]
    async fn test_add_documents_matches_single_create() {
        let extra = "Incremental indexing adds new material without rebuilds.";

        let combined = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        combined.initialize().await.unwrap();
        let mut all = corpus();
        all.push(doc("extra.txt", extra));
        combined.create_index(all).await.unwrap();

        let incremental = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        incremental.initialize().await.unwrap();
        incremental.create_index(corpus()).await.unwrap();
        incremental
            .add_documents(vec![doc("extra.txt", extra)])
            .await
            .unwrap();

        assert_eq!(chunk_set(&combined), chunk_set(&incremental));
    }

    #[tokio::test]
    async fn test_blocked_generation_is_not_an_error() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(BlockedGenerator));
        p.initialize().await.unwrap();
        p.create_index(corpus()).await.unwrap();

        let result = p.query("anything at all").await.unwrap();
        assert!(result.blocked);
        assert!(result.answer.is_none());
        let message = result.block_message.unwrap();
        assert!(message.contains("safety filter"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_query_error() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(FailingGenerator));
        p.initialize().await.unwrap();
        p.create_index(corpus()).await.unwrap();
        assert!(matches!(
            p.query("anything").await,
            Err(PipelineError::Query(_))
        ));
    }

    #[tokio::test]
    async fn test_stats_is_idempotent() {
        let p = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        p.initialize().await.unwrap();
        p.create_index(corpus()).await.unwrap();

        let first = p.stats();
        let second = p.stats();
        assert_eq!(first.state, second.state);
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(first.documents, second.documents);
        assert_eq!(first.model_name, second.model_name);
        assert_eq!(first.chunk_size, second.chunk_size);
    }

    #[tokio::test]
    async fn test_restore_index_round_trip() {
        let saver = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        saver.initialize().await.unwrap();
        saver.create_index(corpus()).await.unwrap();
        let entries: Vec<IndexEntry> =
            saver.index_snapshot().unwrap().entries().to_vec();

        let restored = pipeline(Arc::new(HashEmbedder), Arc::new(EchoGenerator));
        assert!(matches!(
            restored.restore_index(entries.clone()),
            Err(PipelineError::NotReady(_))
        ));

        restored.initialize().await.unwrap();
        restored.restore_index(entries).unwrap();
        assert_eq!(restored.state(), PipelineState::Indexed);

        let result = restored.query("rust borrow checker").await.unwrap();
        assert_eq!(result.sources[0].chunk.source, "rust.txt");
    }

    #[test]
    fn test_prompt_tags_sources_in_rank_order() {
        let sources = vec![
            ScoredChunk {
                chunk: crate::documents::Chunk {
                    doc_id: "d1".to_string(),
                    source: "first.txt".to_string(),
                    index: 0,
                    content: "top ranked".to_string(),
                    start_token: 0,
                    end_token: 2,
                    token_count: 2,
                },
                score: 0.9,
            },
            ScoredChunk {
                chunk: crate::documents::Chunk {
                    doc_id: "d2".to_string(),
                    source: "second.txt".to_string(),
                    index: 3,
                    content: "runner up".to_string(),
                    start_token: 0,
                    end_token: 2,
                    token_count: 2,
                },
                score: 0.5,
            },
        ];

        let prompt = build_prompt("what ranks highest?", &sources);
        let first = prompt.find("[source: first.txt #0]").unwrap();
        let second = prompt.find("[source: second.txt #3]").unwrap();
        assert!(first < second);
        assert!(prompt.contains("Question: what ranks highest?"));
    }
}
