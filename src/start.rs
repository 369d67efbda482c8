//! Startup helpers for the InsightOps client.

use std::sync::Arc;

use crate::api::{AuthApi, ChatApi, DecayApi, DocumentsApi};
use crate::cache::QueryCache;
use crate::chat::ChatEngine;
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::http::{ApiClient, ReqwestTransport, Transport};
use crate::session::{SessionManager, SessionStorage, SqliteSessionStorage};

/// Install the global `tracing` subscriber (`RUST_LOG` aware, `INFO` by default).
pub fn init_tracing() {
    // A second call keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything a front end needs, wired around one hydrated session.
#[derive(Debug)]
pub struct App {
    /// Effective configuration.
    pub config: ClientConfig,
    /// Session-aware HTTP client.
    pub client: Arc<ApiClient>,
    /// Account flows.
    pub auth: AuthApi,
    /// Conversation state and calls.
    pub chat: ChatEngine,
    /// Document library.
    pub documents: DocumentsApi,
    /// Decay reports and dashboard counters.
    pub decay: DecayApi,
}

impl App {
    /// Open the session database at `config.storage_path` and connect over HTTP.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the database cannot be opened.
    pub async fn connect(config: ClientConfig) -> ApiResult<Self> {
        config.validate()?;
        let storage = SqliteSessionStorage::open(&config.storage_path).await?;
        let transport = ReqwestTransport::new(&config)?;
        Self::assemble(config, Arc::new(transport), Arc::new(storage)).await
    }

    /// Wire the app from explicit collaborators and hydrate the session.
    ///
    /// # Errors
    /// Returns an error if the config is invalid.
    pub async fn assemble(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
    ) -> ApiResult<Self> {
        config.validate()?;

        let session = Arc::new(SessionManager::new(storage));
        session.hydrate().await;
        tracing::info!(
            "Session hydrated ({})",
            if session.is_authenticated() { "signed in" } else { "signed out" }
        );

        let cache = Arc::new(QueryCache::from_config(&config.cache));
        let client = Arc::new(ApiClient::new(transport, session, cache));
        let chat = ChatEngine::new(ChatApi::new(Arc::clone(&client), &config), config.chat_expiry)?;

        Ok(Self {
            auth: AuthApi::new(Arc::clone(&client), &config),
            documents: DocumentsApi::new(Arc::clone(&client), &config),
            decay: DecayApi::new(Arc::clone(&client), &config),
            chat,
            client,
            config,
        })
    }

    /// The process-wide session.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        self.client.session()
    }
}
