//! The two channel kinds that sit on top of a [`FramedTransport`](crate::transport::FramedTransport):
//! the synchronous request/reply Data channel, and the asynchronous, demultiplexing Stream channel.

mod queue;
mod request;
mod stream;

pub use queue::DeliveryQueue;
pub use request::RequestChannel;
pub use stream::StreamChannel;
