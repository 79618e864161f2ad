//! Application startup and lifecycle management.
//!
//! Wires the provider, knowledge base and session store into the HTTP
//! router and runs it until SIGINT/SIGTERM.

use crate::config::GentaxConfig;
use crate::handlers::{
    app::{health_check, index},
    chat::{chat, new_session},
    metrics::metrics,
};
use crate::services::metrics::init_metrics;
use crate::services::providers::groq::GroqChatProvider;
use crate::services::providers::{ChatProvider, GenerationParams};
use crate::services::{ChatService, KnowledgeBase, SessionStore};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, ClientIpSource, IpRateLimit},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub static_dir: PathBuf,
}

/// Build the HTTP router.
///
/// `chat_limiter` guards `/api/chat` only; the health probe and the UI are
/// never rate limited.
pub fn build_router(state: AppState, chat_limiter: Option<IpRateLimit>) -> Router {
    let mut chat_route = post(chat);
    if let Some(limiter) = chat_limiter {
        chat_route = chat_route.layer(from_fn_with_state(limiter, ip_rate_limit_middleware));
    }

    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(index))
        .route("/api/chat", chat_route)
        .route("/api/new-session", post(new_session))
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest_service("/static", static_files)
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the Groq provider from `config`.
    pub async fn build(config: GentaxConfig) -> Result<Self, AppError> {
        let provider = GroqChatProvider::new((&config.groq).into())
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

        tracing::info!(
            model = %config.groq.model,
            base_url = %config.groq.base_url,
            "Initialized Groq chat provider"
        );

        Self::build_with_provider(config, Arc::new(provider)).await
    }

    /// Build the application around an explicit provider.
    pub async fn build_with_provider(
        config: GentaxConfig,
        provider: Arc<dyn ChatProvider>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let knowledge_dir = config.knowledge.dir.clone();
        let knowledge = tokio::task::spawn_blocking(move || KnowledgeBase::load(&knowledge_dir))
            .await
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;

        let sessions = SessionStore::open(&config.storage.sessions_file).await;

        let params = GenerationParams {
            temperature: Some(config.groq.temperature),
            max_tokens: Some(config.groq.max_tokens),
        };

        let chat = ChatService::new(
            provider,
            Arc::new(knowledge),
            Arc::new(sessions),
            params,
            config.knowledge.top_k,
        );

        let state = AppState {
            chat: Arc::new(chat),
            static_dir: config.storage.static_dir.clone(),
        };

        let ip_source = if config.rate_limit.trust_forwarded_for {
            ClientIpSource::ForwardedFor
        } else {
            ClientIpSource::Peer
        };
        let chat_limiter = (config.rate_limit.chat_per_min > 0)
            .then(|| IpRateLimit::new(config.rate_limit.chat_per_min, 60, ip_source));

        let router = build_router(state, chat_limiter);

        // Port 0 = random port for testing
        let addr = config.common.bind_addr()?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(host = %config.common.host, port, "GenTax service listening");

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
