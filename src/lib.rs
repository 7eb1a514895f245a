//! The connection fabric for a client of the XTB brokerage JSON-over-TLS API: paired Data/Stream
//! socket state machines, a connection-pool manager, a ping-keepalive supervisor, a reconnection
//! protocol that re-authenticates and re-subscribes streams transparently, and the framing/dispatch
//! layer that demultiplexes stream messages to subscribers.
//!
//! This crate is deliberately narrow: it does not catalog the broker's user-facing commands, does
//! not source credentials, and does not interpret payload semantics beyond what dispatch requires.
//! Those are the job of a thin wrapper built on top of [`Session::request`] and
//! [`StreamSession::subscribe`].

pub mod channel;
pub mod config;
pub mod defaults;
pub mod error;
pub mod keepalive;
pub mod pool;
pub mod session;
pub mod stream_session;
mod timeout;
pub mod transport;
pub mod wire;

pub use config::{Config, ConnectionConfig, Credentials, SocketConfig};
pub use error::{Error, Result};
pub use pool::PoolManager;
pub use session::{Mode, Session};
pub use stream_session::StreamSession;
pub use timeout::WithTimeout;
pub use wire::StreamCommand;
