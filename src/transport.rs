//! The transport layer: TLS/plain socket setup, address failover, streaming JSON framing, and
//! rate-paced writes.

mod address;
mod decoder;
mod framed;
mod stream;

pub use address::AddressCandidates;
pub use framed::{FramedTransport, TransportOptions};
pub use stream::TransportStream;
