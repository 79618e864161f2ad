//! Chat orchestration: session bookkeeping, retrieval, model call.

use crate::models::{ChatMessage, ChatQuery, ChatResponse, Citation, SessionResponse};
use crate::services::knowledge::{KnowledgeHit, Retriever};
use crate::services::metrics;
use crate::services::providers::{ChatProvider, GenerationParams, ProviderError};
use crate::services::session_store::SessionStore;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Instant;

pub const SYSTEM_PROMPT: &str = "You are GenTaxAI, a precise and helpful Indian tax assistant.\n\
You specialize in Indian taxation including Income Tax, GST, MSME, RBI, SEBI \
and related compliance.\n\
Use the provided CONTEXT snippets as the primary source of truth. If a user asks \
for something covered in context, quote or paraphrase that accurately. If the answer \
is not in context, answer from your knowledge carefully and clearly say when you are not certain.\n\
Always prefer official wording in the snippets when giving definitions or rules.\n\
Keep responses concise but comprehensive.";

pub struct ChatService {
    provider: Arc<dyn ChatProvider>,
    retriever: Arc<dyn Retriever>,
    sessions: Arc<SessionStore>,
    params: GenerationParams,
    top_k: usize,
}

impl ChatService {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        retriever: Arc<dyn Retriever>,
        sessions: Arc<SessionStore>,
        params: GenerationParams,
        top_k: usize,
    ) -> Self {
        Self {
            provider,
            retriever,
            sessions,
            params,
            top_k,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Answer one question within a session.
    ///
    /// A session id that was never seen before (or none at all) starts a new
    /// conversation. Retrieval failures degrade to an answer without context;
    /// provider failures are returned to the caller and leave the question in
    /// the history.
    #[tracing::instrument(skip_all, fields(session_id))]
    pub async fn ask(&self, query: ChatQuery) -> Result<ChatResponse, AppError> {
        let question = query.question.trim();
        if question.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Empty question")));
        }

        let session_id = query
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::Span::current().record("session_id", session_id.as_str());

        let hits = self.retrieve(question).await;
        let (context, citations) = build_context(&hits);

        let history = self
            .sessions
            .begin_turn(
                &session_id,
                SYSTEM_PROMPT,
                context.map(ChatMessage::assistant),
                ChatMessage::user(question),
            )
            .await;

        let started = Instant::now();
        let result = self.provider.complete(&history, &self.params).await;
        let latency = started.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => {
                metrics::record_completion(
                    self.provider.name(),
                    self.provider.model(),
                    "success",
                    latency,
                );
                metrics::record_tokens(
                    self.provider.model(),
                    response.input_tokens,
                    response.output_tokens,
                );
                response
            }
            Err(e) => {
                metrics::record_completion(
                    self.provider.name(),
                    self.provider.model(),
                    e.kind(),
                    latency,
                );
                tracing::error!(error = %e, provider = self.provider.name(), "LLM call failed");
                return Err(provider_error(e));
            }
        };

        tracing::info!(
            history_len = history.len(),
            citations = citations.len(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            finish_reason = response.finish_reason.as_str(),
            latency_secs = latency,
            "Answered question"
        );

        self.sessions
            .record_answer(&session_id, ChatMessage::assistant(response.text.clone()))
            .await;

        if let Err(e) = self.sessions.persist().await {
            tracing::error!(error = %e, "Error saving sessions");
        }

        Ok(ChatResponse {
            answer: response.text,
            session_id,
            citations,
        })
    }

    /// Hand out a fresh session id. The conversation itself is created on
    /// the first question.
    pub fn new_session(&self) -> SessionResponse {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %session_id, "New session created");
        SessionResponse {
            session_id,
            message: "New session created".to_string(),
        }
    }

    async fn retrieve(&self, question: &str) -> Vec<KnowledgeHit> {
        let retriever = Arc::clone(&self.retriever);
        let query = question.to_string();
        let k = self.top_k;

        match tokio::task::spawn_blocking(move || retriever.retrieve(&query, k)).await {
            Ok(Ok(hits)) => {
                metrics::record_retrieval("ok", hits.len());
                hits
            }
            Ok(Err(e)) => {
                metrics::record_retrieval("error", 0);
                tracing::warn!(error = %e, "Retriever error");
                Vec::new()
            }
            Err(e) => {
                metrics::record_retrieval("error", 0);
                tracing::warn!(error = %e, "Retriever task failed");
                Vec::new()
            }
        }
    }
}

/// Format retrieved snippets into the `CONTEXT:` message and its citations.
///
/// Each snippet is tagged `[i] {source}#chunk{chunk_id}` with `i` starting
/// at 1; no hits means no context message.
pub fn build_context(hits: &[KnowledgeHit]) -> (Option<String>, Vec<Citation>) {
    if hits.is_empty() {
        return (None, Vec::new());
    }

    let mut entries = Vec::with_capacity(hits.len());
    let mut citations = Vec::with_capacity(hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let rank = i + 1;
        entries.push(format!(
            "[{}] {}#chunk{}\n{}",
            rank,
            hit.source,
            hit.chunk_id,
            hit.text.trim()
        ));
        citations.push(Citation {
            id: rank.to_string(),
            source: hit.source.clone(),
            chunk_id: hit.chunk_id.clone(),
        });
    }

    (
        Some(format!("CONTEXT:\n{}", entries.join("\n\n"))),
        citations,
    )
}

fn provider_error(err: ProviderError) -> AppError {
    match err {
        ProviderError::RateLimited => AppError::TooManyRequests(
            "LLM error: the model provider is rate limiting requests".to_string(),
            None,
        ),
        other => AppError::BadGateway(format!("LLM error: {}", other)),
    }
}
