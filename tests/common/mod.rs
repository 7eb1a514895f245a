//! A minimal in-process plain-TCP mock broker, speaking the same self-delimited JSON protocol as
//! the real XTB endpoints, for exercising the fabric end-to-end without TLS certificates.

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One accepted connection to a mock broker, with helpers to read/write whole JSON frames.
pub struct MockConn {
    socket: TcpStream,
    buffer: Vec<u8>,
}

impl MockConn {
    pub async fn accept(listener: &TcpListener) -> MockConn {
        let (socket, _) = listener.accept().await.unwrap();
        MockConn {
            socket,
            buffer: Vec::new(),
        }
    }

    /// Read bytes until one complete JSON value can be parsed off the front of the buffer.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            if let Some((value, consumed)) = try_decode(&self.buffer) {
                self.buffer.drain(..consumed);
                return value;
            }
            let mut chunk = [0u8; 1024];
            let n = self.socket.read(&mut chunk).await.unwrap();
            assert_ne!(n, 0, "mock broker peer closed while a frame was expected");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn send_json(&mut self, value: &Value) {
        let bytes = serde_json::to_vec(value).unwrap();
        self.socket.write_all(&bytes).await.unwrap();
    }

    /// Close the socket out from under the client, to exercise reconnect paths.
    pub async fn close(mut self) {
        let _ = self.socket.shutdown().await;
    }
}

fn try_decode(buffer: &[u8]) -> Option<(Value, usize)> {
    if buffer.is_empty() {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some((value, stream.byte_offset())),
        _ => None,
    }
}

pub async fn bind_loopback() -> (TcpListener, String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.ip().to_string(), addr.port())
}

pub fn test_config(host: &str, data_port: u16, stream_port: u16) -> xwrpr_core::Config {
    xwrpr_core::Config {
        socket: xwrpr_core::SocketConfig {
            host: host.to_owned(),
            port_demo: data_port,
            port_demo_stream: stream_port,
            port_real: data_port,
            port_real_stream: stream_port,
        },
        connection: xwrpr_core::ConnectionConfig {
            send_interval: 10,
            max_connections: 50,
            max_connection_fails: 3,
            max_send_data: 1024,
            max_receive_data: 1024,
            max_reaction_time: 1000,
            encrypted: false,
        },
    }
}

pub fn test_credentials() -> xwrpr_core::Credentials {
    xwrpr_core::Credentials::new("12345", "hunter2")
}

pub async fn accept_and_login(listener: &TcpListener, ssid: &str) -> MockConn {
    let mut conn = MockConn::accept(listener).await;
    let login = conn.recv_json().await;
    assert_eq!(login["command"], "login");
    conn.send_json(&serde_json::json!({
        "status": true,
        "streamSessionId": ssid,
    }))
    .await;
    conn
}
