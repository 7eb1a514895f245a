//! The Pool Manager: allocates Sessions and Stream Sessions under a global connection cap,
//! sharing one Session's `streamSessionId` across any number of attached Stream Sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::session::{Mode, Session};
use crate::stream_session::StreamSession;

struct StreamSessionEntry {
    stream_session: Arc<StreamSession>,
    parent_name: String,
}

/// Owns every Session and Stream Session a caller has requested, enforcing
/// `config.connection.max_connections` across both kinds combined.
pub struct PoolManager {
    config: Config,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    stream_sessions: Mutex<HashMap<String, StreamSessionEntry>>,
    next_session_id: AtomicUsize,
    next_stream_id: AtomicUsize,
}

impl PoolManager {
    pub fn new(config: Config) -> Self {
        PoolManager {
            config,
            sessions: Mutex::new(HashMap::new()),
            stream_sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicUsize::new(0),
            next_stream_id: AtomicUsize::new(0),
        }
    }

    async fn total_connections(&self) -> usize {
        self.sessions.lock().await.len() + self.stream_sessions.lock().await.len()
    }

    /// Return any `active` Session for `mode`; otherwise create one if under the global cap;
    /// otherwise fail with `CapacityExhausted`.
    #[tracing::instrument(skip(self, credentials))]
    pub async fn provide_session(&self, mode: Mode, credentials: Credentials) -> Result<Arc<Session>> {
        self.provide_session_named(mode, credentials)
            .await
            .map(|(_, session)| session)
    }

    async fn provide_session_named(
        &self,
        mode: Mode,
        credentials: Credentials,
    ) -> Result<(String, Arc<Session>)> {
        {
            let sessions = self.sessions.lock().await;
            for (name, session) in sessions.iter() {
                if session.mode() == mode && session.is_active().await {
                    return Ok((name.clone(), session.clone()));
                }
            }
        }

        if self.total_connections().await >= self.config.connection.max_connections {
            return Err(Error::CapacityExhausted(format!(
                "max_connections ({}) reached",
                self.config.connection.max_connections
            )));
        }

        let session = Session::open(mode, credentials, &self.config).await?;
        let name = format!("DH_{}", self.next_session_id.fetch_add(1, Ordering::SeqCst));
        self.sessions.lock().await.insert(name.clone(), session.clone());
        Ok((name, session))
    }

    /// Return any `active` Stream Session for `mode` whose subscription count is under
    /// `MAX_STREAMS_PER_SESSION`; otherwise attach a new one to a Session obtained via
    /// [`PoolManager::provide_session`].
    #[tracing::instrument(skip(self, credentials))]
    pub async fn provide_stream_session(
        &self,
        mode: Mode,
        credentials: Credentials,
    ) -> Result<Arc<StreamSession>> {
        let cap = self.config.connection.max_streams_per_session();
        {
            let stream_sessions = self.stream_sessions.lock().await;
            for entry in stream_sessions.values() {
                let stream_session = &entry.stream_session;
                if stream_session.is_active().await && stream_session.subscription_count().await < cap {
                    let parent_mode_matches = self
                        .sessions
                        .lock()
                        .await
                        .get(&entry.parent_name)
                        .map(|session| session.mode() == mode)
                        .unwrap_or(false);
                    if parent_mode_matches {
                        return Ok(stream_session.clone());
                    }
                }
            }
        }

        if self.total_connections().await >= self.config.connection.max_connections {
            return Err(Error::CapacityExhausted(format!(
                "max_connections ({}) reached",
                self.config.connection.max_connections
            )));
        }

        let (parent_name, parent) = self.provide_session_named(mode, credentials).await?;

        let stream_session = StreamSession::open(&parent, &self.config).await?;
        let name = format!("SH_{}", self.next_stream_id.fetch_add(1, Ordering::SeqCst));
        self.stream_sessions.lock().await.insert(
            name,
            StreamSessionEntry {
                stream_session: stream_session.clone(),
                parent_name,
            },
        );
        Ok(stream_session)
    }

    /// Delete every Stream Session, then every Session. Stream Sessions attached to a Session are
    /// always removed before that Session, per the ownership rule in §3.
    pub async fn delete_all(&self) {
        let stream_sessions: Vec<_> = self.stream_sessions.lock().await.drain().collect();
        for (_, entry) in stream_sessions {
            entry.stream_session.delete().await;
        }

        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (_, session) in sessions {
            session.delete().await;
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
