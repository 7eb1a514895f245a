//! Envelope types exchanged on the wire, and the stream-command translation table.
//!
//! Every broker message is a self-delimited JSON object. This module defines the three envelope
//! shapes (outbound request, inbound reply, inbound stream frame) and the table that maps the
//! broker's lowercase-camel stream command names to the subscribe commands callers use.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A command accepted by `subscribe`/`unsubscribe`, and the name the broker uses for the
/// corresponding inbound stream frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamCommand {
    Balance,
    Candles,
    KeepAlive,
    News,
    Profits,
    TickPrices,
    Trades,
    TradeStatus,
}

impl StreamCommand {
    /// The suffix appended to `get`/`stop` when building the subscribe/unsubscribe envelope.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamCommand::Balance => "Balance",
            StreamCommand::Candles => "Candles",
            StreamCommand::KeepAlive => "KeepAlive",
            StreamCommand::News => "News",
            StreamCommand::Profits => "Profits",
            StreamCommand::TickPrices => "TickPrices",
            StreamCommand::Trades => "Trades",
            StreamCommand::TradeStatus => "TradeStatus",
        }
    }

    /// Translate the broker's lowercase-camel inbound frame command to the subscribe command it
    /// corresponds to. Returns `None` for unrecognized commands, which the dispatcher drops.
    pub fn from_broker_command(command: &str) -> Option<StreamCommand> {
        Some(match command {
            "balance" => StreamCommand::Balance,
            "candle" => StreamCommand::Candles,
            "keepAlive" => StreamCommand::KeepAlive,
            "news" => StreamCommand::News,
            "profit" => StreamCommand::Profits,
            "tickPrices" => StreamCommand::TickPrices,
            "trade" => StreamCommand::Trades,
            "tradeStatus" => StreamCommand::TradeStatus,
            _ => return None,
        })
    }

    /// Whether subscriptions for this command key on the data frame's `symbol` field.
    pub fn is_keyed_by_symbol(self) -> bool {
        matches!(self, StreamCommand::TickPrices | StreamCommand::Candles)
    }
}

impl fmt::Display for StreamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound envelope: `{command, streamSessionId?, arguments?, customTag?}`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    pub command: String,
    #[serde(rename = "streamSessionId", skip_serializing_if = "Option::is_none")]
    pub stream_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(rename = "customTag", skip_serializing_if = "Option::is_none")]
    pub custom_tag: Option<String>,
}

impl OutboundEnvelope {
    pub fn new(command: impl Into<String>) -> Self {
        OutboundEnvelope {
            command: command.into(),
            stream_session_id: None,
            arguments: None,
            custom_tag: None,
        }
    }

    pub fn with_ssid(mut self, ssid: impl Into<String>) -> Self {
        self.stream_session_id = Some(ssid.into());
        self
    }

    /// A no-op for `Value::Null`, so callers that only sometimes have arguments can pass
    /// `Value::Null` unconditionally without forcing a literal `"arguments":null` onto the wire.
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        if !arguments.is_null() {
            self.arguments = Some(arguments);
        }
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.custom_tag = Some(tag.into());
        self
    }

    /// A copy of this envelope's JSON value with `userId`/`password` masked, suitable for logs.
    /// A no-op for any envelope whose `arguments` do not contain those fields.
    pub fn redacted_for_log(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(arguments) = value.get_mut("arguments") {
            if let Some(map) = arguments.as_object_mut() {
                if map.contains_key("userId") {
                    map.insert("userId".into(), Value::String("*****".into()));
                }
                if map.contains_key("password") {
                    map.insert("password".into(), Value::String("*****".into()));
                }
            }
        }
        value
    }
}

/// An inbound reply envelope: `{status, returnData?, streamSessionId?, errorCode?, errorDescr?,
/// customTag?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundReply {
    pub status: bool,
    #[serde(rename = "returnData")]
    pub return_data: Option<Value>,
    #[serde(rename = "streamSessionId")]
    pub stream_session_id: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "errorDescr")]
    pub error_descr: Option<String>,
    #[serde(rename = "customTag")]
    pub custom_tag: Option<String>,
}

impl InboundReply {
    /// Parse a raw inbound JSON value as a reply, and apply `status`/error validation.
    ///
    /// Returns `ProtocolError` if `status` is absent, and `RequestRejected` if `status == false`.
    pub fn from_value(value: Value) -> Result<InboundReply> {
        if value.get("status").is_none() {
            return Err(Error::Protocol("reply is missing `status`".into()));
        }
        let reply: InboundReply = serde_json::from_value(value).map_err(Error::Decoding)?;
        if !reply.status {
            return Err(Error::RequestRejected {
                error_code: reply.error_code.unwrap_or_default(),
                error_descr: reply.error_descr.unwrap_or_default(),
            });
        }
        Ok(reply)
    }
}

/// An inbound stream frame: `{command, data}`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundStreamFrame {
    pub command: String,
    pub data: Value,
}
