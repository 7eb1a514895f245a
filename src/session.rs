//! The Session (Data handler): a logged-in Request Channel that serializes login/reconnect
//! against the keepalive ping, and exposes the broker's request/response surface.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::channel::RequestChannel;
use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::keepalive::{Keepalive, PingTarget};
use crate::transport::{FramedTransport, TransportOptions};
use crate::wire::{InboundReply, OutboundEnvelope};

/// Which of the broker's two environments a Session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Demo,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Initializing,
    Active,
    Inactive,
    Deleted,
}

/// A logged-in Request Channel: owns its transport, its keepalive worker, and the
/// `streamSessionId` every attached Stream Session needs.
pub struct Session {
    mode: Mode,
    credentials: Credentials,
    host: String,
    port: u16,
    options: TransportOptions,
    channel: RequestChannel,
    status: RwLock<Status>,
    stream_session_id: RwLock<Option<String>>,
    reconnect_lock: Mutex<()>,
    keepalive: Mutex<Option<Keepalive>>,
    /// Set once, right after construction, so `reconnect` (which only has `&self`) can still
    /// hand a fresh `Arc<Self>` to a restarted keepalive worker.
    weak_self: RwLock<Weak<Session>>,
}

impl Session {
    /// Resolve the endpoint for `mode` out of `config`, connect, log in, and start the keepalive
    /// worker. Returns a `Session` already in the `active` state.
    pub async fn open(mode: Mode, credentials: Credentials, config: &Config) -> Result<Arc<Session>> {
        let (host, port) = match mode {
            Mode::Demo => (config.socket.host.clone(), config.socket.port_demo),
            Mode::Real => (config.socket.host.clone(), config.socket.port_real),
        };
        let options = production_transport_options(config);

        let transport = FramedTransport::connect(&host, port, options.clone()).await?;

        let session = Arc::new(Session {
            mode,
            credentials,
            host,
            port,
            options,
            channel: RequestChannel::new(transport),
            status: RwLock::new(Status::Initializing),
            stream_session_id: RwLock::new(None),
            reconnect_lock: Mutex::new(()),
            keepalive: Mutex::new(None),
            weak_self: RwLock::new(Weak::new()),
        });
        *session.weak_self.write().await = Arc::downgrade(&session);

        session.login().await?;
        session.spawn_keepalive().await;
        Ok(session)
    }

    #[tracing::instrument(skip(self), fields(mode = ?self.mode))]
    async fn login(&self) -> Result<()> {
        let envelope = OutboundEnvelope::new("login").with_arguments(serde_json::json!({
            "userId": self.credentials.user_id,
            "password": self.credentials.password,
        }));

        match self.channel.request(&envelope).await {
            Ok(reply) => {
                let ssid = reply
                    .stream_session_id
                    .ok_or_else(|| Error::Protocol("login reply is missing streamSessionId".into()))?;
                *self.stream_session_id.write().await = Some(ssid);
                *self.status.write().await = Status::Active;
                tracing::info!("session logged in");
                Ok(())
            }
            Err(error) => {
                *self.status.write().await = Status::Inactive;
                tracing::error!(%error, "login failed");
                Err(error)
            }
        }
    }

    async fn spawn_keepalive(self: &Arc<Self>) {
        let keepalive = Keepalive::start(self.clone());
        *self.keepalive.lock().await = Some(keepalive);
    }

    async fn is_healthy(&self) -> bool {
        matches!(*self.status.read().await, Status::Active)
    }

    /// Whether this session is logged in and serving requests. Used by the Pool Manager to
    /// decide whether a session can be reused.
    pub async fn is_active(&self) -> bool {
        self.is_healthy().await
    }

    /// The broker `streamSessionId` issued at login. Re-read on every use: it changes across
    /// reconnects, so callers must never cache it.
    pub async fn stream_session_id(&self) -> Result<String> {
        self.stream_session_id
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::InvalidState("session has no streamSessionId (not logged in)".into()))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    async fn ensure_not_deleted(&self) -> Result<()> {
        if *self.status.read().await == Status::Deleted {
            Err(Error::InvalidState("session has been deleted".into()))
        } else {
            Ok(())
        }
    }

    /// Issue one request, reconnecting and retrying once on a retryable transport failure.
    #[tracing::instrument(skip(self, arguments), fields(command = %command))]
    pub async fn request(
        &self,
        command: &str,
        arguments: Option<Value>,
        tag: Option<String>,
    ) -> Result<InboundReply> {
        self.ensure_not_deleted().await?;

        let mut envelope = OutboundEnvelope::new(command);
        if let Some(arguments) = arguments {
            envelope = envelope.with_arguments(arguments);
        }
        if let Some(tag) = tag {
            envelope = envelope.with_tag(tag);
        }

        match self.channel.request(&envelope).await {
            Ok(reply) => Ok(reply),
            Err(error) if error.is_retryable() => {
                tracing::warn!(%error, "request failed, reconnecting and retrying once");
                self.reconnect().await?;
                self.channel.request(&envelope).await
            }
            Err(error) => Err(error),
        }
    }

    /// Serialized by `reconnect_lock`: a no-op if the session is already healthy, otherwise
    /// reopens the transport, re-logs-in, and restarts the keepalive worker.
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        let _guard = self.reconnect_lock.lock().await;
        if self.is_healthy().await {
            return Ok(());
        }

        tracing::info!("reconnecting session");
        let transport = FramedTransport::connect(&self.host, self.port, self.options.clone()).await?;
        self.channel.replace_transport(transport).await;
        self.login().await?;

        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.shutdown().await;
        }
        if let Some(strong_self) = self.weak_self.read().await.upgrade() {
            strong_self.spawn_keepalive().await;
        }
        Ok(())
    }

    /// Acquire the channel's send-mutex, send `logout`, and swallow any error — teardown must
    /// always complete.
    pub async fn logout(&self) {
        let envelope = OutboundEnvelope::new("logout");
        if let Err(error) = self.channel.send_only(&envelope).await {
            tracing::debug!(%error, "logout send failed, ignoring");
        }
        *self.stream_session_id.write().await = None;
        *self.status.write().await = Status::Inactive;
    }

    /// Log out, stop the keepalive worker, and mark the session permanently deleted.
    pub async fn delete(&self) {
        self.logout().await;
        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.shutdown().await;
        }
        *self.status.write().await = Status::Deleted;
    }
}

#[async_trait]
impl PingTarget for Session {
    async fn ping(&self) -> Result<()> {
        let envelope = OutboundEnvelope::new("ping");
        self.channel.request(&envelope).await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        Session::reconnect(self).await
    }
}

fn production_transport_options(config: &Config) -> TransportOptions {
    TransportOptions {
        encrypted: config.connection.encrypted,
        max_send_chunk: config.connection.max_send_data,
        max_receive_chunk: config.connection.max_receive_data,
        send_interval: std::time::Duration::from_millis(config.connection.send_interval),
        connect_cooldown: std::time::Duration::from_millis(config.connection.max_reaction_time),
        max_connection_fails: config.connection.max_connection_fails,
    }
}
