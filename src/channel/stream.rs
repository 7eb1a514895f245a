//! The Stream channel: a single long-running dispatcher that demultiplexes inbound frames to
//! per-subscription delivery queues, fed by an outbound command queue for subscribe/unsubscribe.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::channel::queue::DeliveryQueue;
use crate::defaults;
use crate::error::{Error, Result};
use crate::transport::FramedTransport;
use crate::wire::{InboundStreamFrame, OutboundEnvelope, StreamCommand};

/// Identifies one subscription: the stream command, plus the value it is keyed on (e.g. a symbol
/// for `tickPrices`/`candle`), or `None` for commands with a single global subscription.
pub type SubscriptionKey = (StreamCommand, Option<String>);

type Registry = Arc<Mutex<HashMap<SubscriptionKey, Arc<DeliveryQueue<Value>>>>>;

enum Outbound {
    Envelope(OutboundEnvelope),
}

/// A running Stream channel: one dispatcher task owns the transport for its whole lifetime.
pub struct StreamChannel {
    command_tx: mpsc::Sender<Outbound>,
    registry: Registry,
    dispatcher: JoinHandle<()>,
}

impl StreamChannel {
    /// Spawn a dispatcher task over an already-connected stream transport.
    pub fn spawn(transport: FramedTransport) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let dispatcher = tokio::spawn(run_dispatcher(transport, command_rx, registry.clone()));
        StreamChannel {
            command_tx,
            registry,
            dispatcher,
        }
    }

    /// Register `queue` under `(command, key)` and send the `"get" + Command` envelope for it.
    ///
    /// The queue is supplied by the caller (a `StreamSession`) rather than created here, so the
    /// same queue identity survives a reconnect that replaces this `StreamChannel` outright: the
    /// caller re-registers the queue it already handed out on the freshly spawned channel.
    pub async fn subscribe(
        &self,
        command: StreamCommand,
        key: Option<String>,
        queue: Arc<DeliveryQueue<Value>>,
        arguments: Value,
        stream_session_id: &str,
    ) -> Result<()> {
        self.registry.lock().await.insert((command, key), queue);

        let envelope = OutboundEnvelope::new(format!("get{}", command))
            .with_ssid(stream_session_id.to_owned())
            .with_arguments(arguments);
        self.send(envelope).await
    }

    /// Unregister a subscription and send the `"stop" + Command` envelope for it, forwarding the
    /// matching symbol argument when `command` is keyed and `key` is present.
    pub async fn unsubscribe(
        &self,
        command: StreamCommand,
        key: Option<String>,
        stream_session_id: &str,
    ) -> Result<()> {
        self.registry.lock().await.remove(&(command, key.clone()));
        let arguments = match (command.is_keyed_by_symbol(), &key) {
            (true, Some(symbol)) => serde_json::json!({ "symbol": symbol }),
            _ => Value::Null,
        };
        let envelope = OutboundEnvelope::new(format!("stop{}", command))
            .with_ssid(stream_session_id.to_owned())
            .with_arguments(arguments);
        self.send(envelope).await
    }

    // The dispatcher only ever exits its own accord because its transport died (or because the
    // channel was dropped via `shutdown`, which no caller races against a `subscribe`/`ping`
    // call). Map a closed command channel to `ConnectionLost` so callers retry/reconnect exactly
    // as they would for a live transport error, rather than treating it as a terminal state.
    async fn send(&self, envelope: OutboundEnvelope) -> Result<()> {
        self.command_tx
            .send(Outbound::Envelope(envelope))
            .await
            .map_err(|_| {
                Error::ConnectionLost(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "stream dispatcher has already exited",
                ))
            })
    }

    /// Send a keepalive `ping` carrying this channel's `streamSessionId`. Unlike the Request
    /// Channel's ping, no reply is awaited: stream sockets don't answer `ping` with an envelope.
    pub async fn send_ping(&self, stream_session_id: &str) -> Result<()> {
        let envelope = OutboundEnvelope::new("ping").with_ssid(stream_session_id.to_owned());
        self.send(envelope).await
    }

    /// The subscription keys currently registered, in no particular order. Used by a
    /// `StreamSession` to know what to replay after a reconnect of its own.
    pub async fn subscription_keys(&self) -> Vec<SubscriptionKey> {
        self.registry.lock().await.keys().cloned().collect()
    }

    /// Stop the dispatcher task and drop the underlying transport.
    pub async fn shutdown(self) {
        drop(self.command_tx);
        let _ = self.dispatcher.await;
    }
}

async fn run_dispatcher(
    mut transport: FramedTransport,
    mut command_rx: mpsc::Receiver<Outbound>,
    registry: Registry,
) {
    let deadline = tokio::time::sleep(defaults::initial_contact_deadline());
    tokio::pin!(deadline);
    let mut contacted = false;

    loop {
        tokio::select! {
            biased;

            command = command_rx.recv() => {
                match command {
                    Some(Outbound::Envelope(envelope)) => {
                        contacted = true;
                        if let Err(error) = transport.send(&envelope).await {
                            tracing::warn!(%error, "stream channel send failed, dispatcher exiting");
                            return;
                        }
                    }
                    None => {
                        tracing::debug!("stream channel closed, dispatcher exiting");
                        return;
                    }
                }
            }

            frame = transport.receive() => {
                match frame {
                    Ok(value) => dispatch(value, &registry).await,
                    Err(error) => {
                        tracing::warn!(%error, "stream channel receive failed, dispatcher exiting");
                        return;
                    }
                }
            }

            _ = &mut deadline, if !contacted => {
                tracing::warn!("no subscription issued within the initial contact deadline, dispatcher exiting");
                return;
            }
        }
    }
}

async fn dispatch(value: Value, registry: &Registry) {
    let frame: InboundStreamFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::debug!(%error, "dropping stream frame that is not a recognized envelope");
            return;
        }
    };

    let command = match StreamCommand::from_broker_command(&frame.command) {
        Some(command) => command,
        None => {
            tracing::debug!(command = %frame.command, "dropping stream frame with unknown command");
            return;
        }
    };

    // keepAlive frames exist only to hold the socket open; they carry no data subscribers want.
    if command == StreamCommand::KeepAlive {
        return;
    }

    let key = if command.is_keyed_by_symbol() {
        frame
            .data
            .get("symbol")
            .and_then(Value::as_str)
            .map(str::to_owned)
    } else {
        None
    };

    let queue = registry.lock().await.get(&(command, key)).cloned();
    match queue {
        Some(queue) => queue.push(frame.data).await,
        None => tracing::debug!(%command, "dropping stream frame with no matching subscription"),
    }
}
