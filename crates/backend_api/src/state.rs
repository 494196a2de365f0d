use line_client::{LineClient, LineClientConfig};
use notion_client::{NotionClient, NotionClientConfig};
use settings_loader::{Settings, StoreSettings};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::line_auth::LineAuthProvider;
use crate::repository::{KaimemoRepository, MemoryKaimemoRepository, NotionKaimemoRepository};
use crate::service::KaimemoService;
use crate::session::SessionStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KaimemoService>,
    pub sessions: Arc<SessionStore>,
    pub line: Option<Arc<dyn LineAuthProvider>>,
    pub cookie_secure: bool,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn KaimemoRepository>,
        broadcaster: Arc<Broadcaster>,
        sessions: Arc<SessionStore>,
        line: Option<Arc<dyn LineAuthProvider>>,
        cookie_secure: bool,
    ) -> Self {
        Self {
            service: Arc::new(KaimemoService::new(repo, broadcaster)),
            sessions,
            line,
            cookie_secure,
        }
    }

    /// Wires the record store, OAuth client and session store from settings.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.outbound_timeout_secs);

        let repo: Arc<dyn KaimemoRepository> = match &settings.store {
            StoreSettings::Notion(notion) => {
                let client = NotionClient::new(
                    NotionClientConfig::new(notion.api_key.clone()).with_timeout(timeout),
                )?;
                info!("Using Notion record store");
                Arc::new(NotionKaimemoRepository::new(
                    client,
                    notion.kaimemo_database_id.clone(),
                    notion.summary_database_id.clone(),
                ))
            }
            StoreSettings::Memory => {
                info!("Using in-memory record store");
                Arc::new(MemoryKaimemoRepository::new())
            }
        };

        let line: Option<Arc<dyn LineAuthProvider>> = match &settings.line {
            Some(line) => {
                let mut config = LineClientConfig::new(
                    line.client_id.clone(),
                    line.client_secret.clone(),
                    line.redirect_uri.clone(),
                );
                config.timeout = timeout;
                Some(Arc::new(LineClient::new(config)?))
            }
            None => {
                info!("LINE login is not configured, /line routes are disabled");
                None
            }
        };

        let ttl = i64::try_from(settings.session_ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| anyhow::anyhow!("SESSION_TTL_HOURS {} is too large", settings.session_ttl_hours))?;

        Ok(Self::new(
            repo,
            Arc::new(Broadcaster::new(settings.broadcast_scope)),
            Arc::new(SessionStore::new(ttl)),
            line,
            settings.cookie_secure,
        ))
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        self.service.broadcaster()
    }
}
