//! The Stream Session: a Stream Channel attached to a parent Session for authentication, tracking
//! its own subscriptions so they can be replayed after a reconnect.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::channel::{DeliveryQueue, StreamChannel};
use crate::config::Config;
use crate::defaults;
use crate::error::{Error, Result};
use crate::keepalive::{Keepalive, PingTarget};
use crate::session::{Mode, Session};
use crate::transport::{FramedTransport, TransportOptions};
use crate::wire::StreamCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Inactive,
    Deleted,
}

#[derive(Clone)]
struct SubscriptionRecord {
    command: StreamCommand,
    key: Option<String>,
    arguments: Value,
    queue: Arc<DeliveryQueue<Value>>,
}

/// A Stream Channel attached to a parent `Session` for authentication. Holds only a
/// lookup-only `Weak` reference to the parent: the Pool Manager owns Sessions, never the
/// other way around.
pub struct StreamSession {
    parent: Weak<Session>,
    host: String,
    port: u16,
    options: TransportOptions,
    channel: RwLock<StreamChannel>,
    subscriptions: Mutex<Vec<SubscriptionRecord>>,
    status: RwLock<Status>,
    reconnect_lock: Mutex<()>,
    keepalive: Mutex<Option<Keepalive>>,
    /// Set once, right after construction, so `reconnect` (which only has `&self`) can still
    /// hand a fresh `Arc<Self>` to a restarted keepalive worker.
    weak_self: RwLock<Weak<StreamSession>>,
}

impl StreamSession {
    /// Open a stream socket attached to `parent`, subscribe `KeepAlive` (within the broker's
    /// one-second initial-contact window), and start this Stream Session's own keepalive worker.
    pub async fn open(parent: &Arc<Session>, config: &Config) -> Result<Arc<StreamSession>> {
        let port = match parent.mode() {
            Mode::Demo => config.socket.port_demo_stream,
            Mode::Real => config.socket.port_real_stream,
        };
        let host = config.socket.host.clone();
        let options = TransportOptions {
            encrypted: config.connection.encrypted,
            max_send_chunk: config.connection.max_send_data,
            max_receive_chunk: config.connection.max_receive_data,
            send_interval: std::time::Duration::from_millis(config.connection.send_interval),
            connect_cooldown: std::time::Duration::from_millis(config.connection.max_reaction_time),
            max_connection_fails: config.connection.max_connection_fails,
        };

        let transport = FramedTransport::connect(&host, port, options.clone()).await?;
        let channel = StreamChannel::spawn(transport);

        let stream_session = Arc::new(StreamSession {
            parent: Arc::downgrade(parent),
            host,
            port,
            options,
            channel: RwLock::new(channel),
            subscriptions: Mutex::new(Vec::new()),
            status: RwLock::new(Status::Active),
            reconnect_lock: Mutex::new(()),
            keepalive: Mutex::new(None),
            weak_self: RwLock::new(Weak::new()),
        });
        *stream_session.weak_self.write().await = Arc::downgrade(&stream_session);

        stream_session
            .subscribe(StreamCommand::KeepAlive, None, Value::Null)
            .await?;
        stream_session.spawn_keepalive().await;
        Ok(stream_session)
    }

    async fn spawn_keepalive(self: &Arc<Self>) {
        let keepalive = Keepalive::start(self.clone());
        *self.keepalive.lock().await = Some(keepalive);
    }

    async fn is_healthy(&self) -> bool {
        matches!(*self.status.read().await, Status::Active)
    }

    /// Whether this stream session is open and can accept more subscriptions. Used by the Pool
    /// Manager to decide whether it can be reused.
    pub async fn is_active(&self) -> bool {
        self.is_healthy().await
    }

    fn parent(&self) -> Result<Arc<Session>> {
        self.parent
            .upgrade()
            .ok_or_else(|| Error::InvalidState("parent session has been dropped".into()))
    }

    /// Register a new subscription and send its `"get"+Command` envelope. Rejects a duplicate
    /// `(command, key)` identity with `InvalidState`.
    #[tracing::instrument(skip(self, arguments), fields(command = %command))]
    pub async fn subscribe(
        &self,
        command: StreamCommand,
        key: Option<String>,
        arguments: Value,
    ) -> Result<Arc<DeliveryQueue<Value>>> {
        {
            let subscriptions = self.subscriptions.lock().await;
            if subscriptions
                .iter()
                .any(|record| record.command == command && record.key == key)
            {
                return Err(Error::InvalidState(format!(
                    "subscription {:?}/{:?} already exists",
                    command, key
                )));
            }
        }

        let queue = Arc::new(DeliveryQueue::new(defaults::delivery_queue_capacity()));
        let record = SubscriptionRecord {
            command,
            key: key.clone(),
            arguments: arguments.clone(),
            queue: queue.clone(),
        };

        match self.send_subscribe(&record).await {
            Ok(()) => {}
            Err(error) if error.is_retryable() => {
                tracing::warn!(%error, "subscribe failed, reconnecting and retrying once");
                *self.status.write().await = Status::Inactive;
                self.reconnect().await?;
                self.send_subscribe(&record).await?;
            }
            Err(error) => return Err(error),
        }

        self.subscriptions.lock().await.push(record);
        Ok(queue)
    }

    async fn send_subscribe(&self, record: &SubscriptionRecord) -> Result<()> {
        let ssid = self.parent()?.stream_session_id().await?;
        self.channel
            .read()
            .await
            .subscribe(
                record.command,
                record.key.clone(),
                record.queue.clone(),
                record.arguments.clone(),
                &ssid,
            )
            .await
    }

    /// Send the `"stop"+Command` envelope and remove the subscription's registration.
    pub async fn unsubscribe(&self, command: StreamCommand, key: Option<String>) -> Result<()> {
        let ssid = self.parent()?.stream_session_id().await?;
        self.channel
            .read()
            .await
            .unsubscribe(command, key.clone(), &ssid)
            .await?;
        self.subscriptions
            .lock()
            .await
            .retain(|record| !(record.command == command && record.key == key));
        Ok(())
    }

    /// Non-reentrant via `try_lock`: the first caller reconnects both the parent Session (if
    /// needed) and this Stream Session's own transport, replaying every registered subscription
    /// in registration order; later callers block on the same lock and, once it's free, find the
    /// session already healthy.
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        let _guard = match self.reconnect_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _guard = self.reconnect_lock.lock().await;
                return Ok(());
            }
        };

        self.parent()?.reconnect().await?;

        if self.is_healthy().await {
            return Ok(());
        }

        tracing::info!("reconnecting stream session");
        let transport = FramedTransport::connect(&self.host, self.port, self.options.clone()).await?;
        let new_channel = StreamChannel::spawn(transport);
        let old_channel = std::mem::replace(&mut *self.channel.write().await, new_channel);
        old_channel.shutdown().await;

        let ssid = self.parent()?.stream_session_id().await?;
        let records = self.subscriptions.lock().await.clone();
        for record in &records {
            self.channel
                .read()
                .await
                .subscribe(
                    record.command,
                    record.key.clone(),
                    record.queue.clone(),
                    record.arguments.clone(),
                    &ssid,
                )
                .await?;
        }

        *self.status.write().await = Status::Active;

        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.shutdown().await;
        }
        if let Some(strong_self) = self.weak_self.read().await.upgrade() {
            strong_self.spawn_keepalive().await;
        }
        Ok(())
    }

    /// Stop every subscription (including `KeepAlive`), stop the keepalive worker, close the
    /// transport, and mark this Stream Session permanently deleted.
    pub async fn delete(&self) {
        let records = self.subscriptions.lock().await.clone();
        for record in records {
            if let Err(error) = self.unsubscribe(record.command, record.key).await {
                tracing::debug!(%error, "unsubscribe during delete failed, ignoring");
            }
        }
        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.shutdown().await;
        }
        *self.status.write().await = Status::Deleted;
    }

    /// How many subscriptions (including `KeepAlive`) are currently registered, used by the Pool
    /// Manager to enforce `MAX_STREAMS_PER_SESSION`.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }
}

#[async_trait]
impl PingTarget for StreamSession {
    async fn ping(&self) -> Result<()> {
        let ssid = self.parent()?.stream_session_id().await?;
        let result = self.channel.read().await.send_ping(&ssid).await;
        if let Err(error) = &result {
            if error.is_retryable() {
                *self.status.write().await = Status::Inactive;
            }
        }
        result
    }

    async fn reconnect(&self) -> Result<()> {
        StreamSession::reconnect(self).await
    }
}
