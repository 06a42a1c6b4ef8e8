//! Helpers for driving a running controller over HTTP
#![allow(dead_code, reason = "Not every helper is used by every test binary")]
#![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests")]

use std::{net::SocketAddr, time::Duration};

use cadence::{Cadence, Running};
use cadence_common::Signal;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::broadcast,
};

/// A controller started from a RON snippet, listening on an ephemeral port
pub struct TestServer {
    running: Running,
    shutdown: broadcast::Sender<Signal>,
}

impl TestServer {
    pub async fn start(dispatch: &str) -> Self {
        let config = format!(
            "Cadence(store: Memory(capacity: None), dispatch: {dispatch}, api: (listen_address: \"127.0.0.1:0\"))"
        );
        let cadence: Cadence = ron::from_str(&config).expect("invalid test configuration");

        let (shutdown, _) = broadcast::channel(8);
        let running = cadence.start(&shutdown).await.expect("controller failed to start");

        Self { running, shutdown }
    }

    pub fn addr(&self) -> SocketAddr {
        self.running.local_addr()
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        request(self.addr(), "GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> (u16, Value) {
        request(self.addr(), "POST", path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> (u16, Value) {
        request(self.addr(), "PUT", path, Some(body)).await
    }

    /// Poll `path` until `done` holds for the response body
    pub async fn wait_until(&self, path: &str, done: impl Fn(&Value) -> bool) -> Value {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let (_, body) = self.get(path).await;
                if done(&body) {
                    return body;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    pub async fn shutdown(self) {
        self.shutdown.send(Signal::Shutdown).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.running.wait())
            .await
            .expect("controller did not stop")
            .expect("controller stopped with an error");
    }
}

/// Issue a single HTTP/1.1 request and decode the JSON response
async fn request(addr: SocketAddr, method: &str, path: &str, body: Option<&Value>) -> (u16, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let payload = body.map(ToString::to_string).unwrap_or_default();

    let head = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(payload.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();

    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    };

    (status, body)
}
