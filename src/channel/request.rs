//! The Data channel: a strictly synchronous request/reply conversation with the broker.

use tokio::sync::Mutex;

use crate::error::Result;
use crate::transport::FramedTransport;
use crate::wire::{InboundReply, OutboundEnvelope};

/// Wraps a [`FramedTransport`] with the invariant that only one request is ever in flight at a
/// time. The same lock serializes keepalive pings against caller requests, so a ping can never be
/// interleaved with (and mistaken for the reply to) a pending request.
pub struct RequestChannel {
    transport: Mutex<FramedTransport>,
}

impl RequestChannel {
    pub fn new(transport: FramedTransport) -> Self {
        RequestChannel {
            transport: Mutex::new(transport),
        }
    }

    /// Send `envelope` and wait for its reply. Holds the channel's lock for the full
    /// request/reply round trip.
    #[tracing::instrument(skip(self, envelope), fields(command = %envelope.command))]
    pub async fn request(&self, envelope: &OutboundEnvelope) -> Result<InboundReply> {
        let mut transport = self.transport.lock().await;
        tracing::debug!(envelope = ?envelope.redacted_for_log(), "sending request");
        transport.send(envelope).await?;
        let value = transport.receive().await?;
        InboundReply::from_value(value)
    }

    /// Send `envelope` without waiting for a reply, still serialized against pings and other
    /// requests. Used for `logout`, which the broker never acknowledges.
    #[tracing::instrument(skip(self, envelope), fields(command = %envelope.command))]
    pub async fn send_only(&self, envelope: &OutboundEnvelope) -> Result<()> {
        let mut transport = self.transport.lock().await;
        tracing::debug!(envelope = ?envelope.redacted_for_log(), "sending request (no reply expected)");
        transport.send(envelope).await
    }

    /// Swap in a freshly-reconnected transport, discarding the old one. Callers must hold no
    /// outstanding `request()` call across a reconnect; the Session state machine enforces this
    /// via its own reconnection mutex.
    pub async fn replace_transport(&self, transport: FramedTransport) {
        *self.transport.lock().await = transport;
    }

    pub async fn host(&self) -> String {
        self.transport.lock().await.host().to_owned()
    }

    pub async fn port(&self) -> u16 {
        self.transport.lock().await.port()
    }
}
