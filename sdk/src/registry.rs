use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::network::GatewayConnector;
use crate::session::{VoiceServerUpdate, VoiceSession};

/// Live voice sessions keyed by guild id.
pub struct SessionRegistry {
    connector: Arc<dyn GatewayConnector>,
    config: SessionConfig,
    sessions: DashMap<u64, Arc<VoiceSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(connector: Arc<dyn GatewayConnector>, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Route a voice server update to its guild's session, creating the
    /// session on first use or when the previous one has shut down.
    pub fn voice_update(&self, update: VoiceServerUpdate) -> Arc<VoiceSession> {
        let guild_id = update.guild_id;
        let session = {
            let mut entry = self
                .sessions
                .entry(guild_id)
                .or_insert_with(|| self.spawn(guild_id));
            if entry.is_disposed() {
                debug!("[guild {}] Replacing closed voice session", guild_id);
                *entry = self.spawn(guild_id);
            }
            entry.value().clone()
        };

        session.connect(update);
        session
    }

    fn spawn(&self, guild_id: u64) -> Arc<VoiceSession> {
        info!("[guild {}] Creating voice session", guild_id);
        Arc::new(VoiceSession::spawn(guild_id, self.connector.clone(), self.config.clone()))
    }

    #[must_use]
    pub fn get(&self, guild_id: u64) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Dispose and forget the guild's session. Returns whether one existed.
    pub fn destroy(&self, guild_id: u64) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, session)) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every session and wait for their teardown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        self.sessions.clear();

        for session in &sessions {
            session.dispose();
        }
        for session in sessions {
            session.closed().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
