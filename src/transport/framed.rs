//! A single paced, self-framing JSON socket to one broker endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, webpki::DNSNameRef, TlsConnector};

use crate::error::{Error, Result};
use crate::transport::address::AddressCandidates;
use crate::transport::decoder::StreamDecoder;
use crate::transport::stream::TransportStream;

/// Tuning for a [`FramedTransport`]: chunk/pacing limits and whether to wrap the socket in TLS.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub encrypted: bool,
    pub max_send_chunk: usize,
    pub max_receive_chunk: usize,
    pub send_interval: Duration,
    pub connect_cooldown: Duration,
    pub max_connection_fails: usize,
}

/// A connected socket to one broker endpoint, framing outbound JSON values and decoding inbound
/// ones, with writes paced to respect the broker's per-connection rate limit.
pub struct FramedTransport {
    stream: TransportStream,
    decoder: StreamDecoder,
    options: TransportOptions,
    host: String,
    port: u16,
}

impl FramedTransport {
    /// Resolve `host:port`, try each candidate address in turn, and establish a (optionally TLS)
    /// connection to the first one that accepts.
    pub async fn connect(host: &str, port: u16, options: TransportOptions) -> Result<FramedTransport> {
        let mut candidates =
            AddressCandidates::resolve(host, port, options.connect_cooldown).await?;

        let mut attempts = 0usize;
        let mut last_io_error = None;
        loop {
            let addrs = candidates.ordered();
            let mut connected = None;
            for addr in &addrs {
                match TcpStream::connect(addr).await {
                    Ok(tcp_stream) => {
                        let _ = tcp_stream.set_nodelay(true);
                        candidates.mark_succeeded(*addr);
                        connected = Some(tcp_stream);
                        break;
                    }
                    Err(e) => {
                        candidates.mark_failed(*addr);
                        last_io_error = Some(e);
                    }
                }
            }

            match connected {
                Some(tcp_stream) => {
                    let stream = if options.encrypted {
                        let tls_stream = connect_tls(host, tcp_stream).await?;
                        TransportStream::from(tls_stream)
                    } else {
                        TransportStream::from(tcp_stream)
                    };
                    return Ok(FramedTransport {
                        stream,
                        decoder: StreamDecoder::new(),
                        options,
                        host: host.to_owned(),
                        port,
                    });
                }
                None => {
                    attempts += 1;
                    if attempts >= options.max_connection_fails {
                        return Err(last_io_error
                            .map(Error::ConnectionLost)
                            .unwrap_or(Error::TransportUnavailable {
                                host: host.to_owned(),
                                port,
                            }));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    /// Serialize `value` to JSON and write it out in rate-limited chunks.
    pub async fn send<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(Error::Encoding)?;
        for chunk in bytes.chunks(self.options.max_send_chunk.max(1)) {
            self.stream
                .write_all(chunk)
                .await
                .map_err(Error::ConnectionLost)?;
            if chunk.len() == self.options.max_send_chunk {
                tokio::time::sleep(self.options.send_interval).await;
            }
        }
        self.stream.flush().await.map_err(Error::ConnectionLost)?;
        Ok(())
    }

    /// Read from the socket until one complete JSON value can be decoded, returning it.
    ///
    /// Returns `Error::ConnectionLost` if the peer closes the socket mid-frame.
    pub async fn receive(&mut self) -> Result<Value> {
        loop {
            if let Some(value) = self.decoder.try_decode()? {
                return Ok(value);
            }
            let mut buf = vec![0u8; self.options.max_receive_chunk.max(1)];
            let n = self
                .stream
                .read(&mut buf)
                .await
                .map_err(Error::ConnectionLost)?;
            if n == 0 {
                return Err(Error::ConnectionLost(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                )));
            }
            self.decoder.push(&buf[..n]);
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await.map_err(Error::ConnectionLost)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

async fn connect_tls(
    host: &str,
    tcp_stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut tls_config = rustls::ClientConfig::new();
    tls_config
        .root_store
        .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);
    let connector = TlsConnector::from(Arc::new(tls_config));
    let domain = DNSNameRef::try_from_ascii_str(host).map_err(|_| {
        Error::Config(format!("{} is not a valid DNS name for TLS verification", host))
    })?;
    connector
        .connect(domain, tcp_stream)
        .await
        .map_err(Error::ConnectionLost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn test_options() -> TransportOptions {
        TransportOptions {
            encrypted: false,
            max_send_chunk: 1024,
            max_receive_chunk: 1024,
            send_interval: Duration::from_millis(1),
            connect_cooldown: Duration::from_secs(1),
            max_connection_fails: 3,
        }
    }

    #[tokio::test]
    async fn round_trips_one_json_value_over_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let value: Value = serde_json::from_slice(&buf[..n]).unwrap();
            assert_eq!(value["command"], "ping");
            socket
                .write_all(br#"{"status":true}"#)
                .await
                .unwrap();
        });

        let mut transport = FramedTransport::connect(
            addr.ip().to_string().as_str(),
            addr.port(),
            test_options(),
        )
        .await
        .unwrap();

        transport
            .send(&serde_json::json!({"command": "ping"}))
            .await
            .unwrap();
        let reply = transport.receive().await.unwrap();
        assert_eq!(reply["status"], true);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn decodes_frames_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(br#"{"a":1}"#).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(br#"{"b":2}"#).await.unwrap();
        });

        let mut transport = FramedTransport::connect(
            addr.ip().to_string().as_str(),
            addr.port(),
            test_options(),
        )
        .await
        .unwrap();

        let first = transport.receive().await.unwrap();
        let second = transport.receive().await.unwrap();
        assert_eq!(first["a"], 1);
        assert_eq!(second["b"], 2);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
        });

        let mut transport = FramedTransport::connect(
            addr.ip().to_string().as_str(),
            addr.port(),
            test_options(),
        )
        .await
        .unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));

        server.await.unwrap();
    }
}
