//! In-process SPJS stand-in speaking the real WebSocket dialect over
//! loopback, for driving the transport end to end.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockSpjs {
    listener: TcpListener,
}

impl MockSpjs {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.listener.local_addr().unwrap())
    }

    /// Wait for the client to (re)connect.
    pub async fn accept(&self) -> SpjsConn {
        let (stream, _) = timeout(RECV_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        SpjsConn { ws }
    }
}

pub struct SpjsConn {
    ws: WebSocketStream<TcpStream>,
}

impl SpjsConn {
    pub async fn send(&mut self, frame: &str) {
        self.ws.send(Message::text(frame)).await.unwrap();
    }

    pub async fn send_json(&mut self, frame: Value) {
        self.send(&frame.to_string()).await;
    }

    /// Next text frame, whatever it is.
    pub async fn recv(&mut self) -> String {
        loop {
            let msg = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            match msg {
                Message::Text(text) => return text.to_string(),
                Message::Close(_) => panic!("connection closed"),
                _ => {}
            }
        }
    }

    /// Next frame that is not a bare `list` poll.
    pub async fn recv_command(&mut self) -> String {
        loop {
            let frame = self.recv().await;
            if frame != "list" {
                return frame;
            }
        }
    }

    /// Next `sendjson` frame, body decoded.
    pub async fn recv_sendjson(&mut self) -> Value {
        loop {
            let frame = self.recv_command().await;
            if let Some(body) = frame.strip_prefix("sendjson ") {
                return serde_json::from_str(body).unwrap();
            }
        }
    }

    /// Read and discard frames until the line has been quiet for `window`.
    pub async fn drain(&mut self, window: Duration) {
        loop {
            match timeout(window, self.ws.next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("connection closed"),
                Err(_) => return,
            }
        }
    }

    /// Assert that nothing but `list` polls arrives for `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return,
                msg = self.ws.next() => {
                    let msg = msg.expect("connection closed").unwrap();
                    if let Message::Text(text) = msg {
                        assert_eq!(text.as_str(), "list", "unexpected frame: {text}");
                    }
                }
            }
        }
    }
}

/// Port-list frame for `(name, vid, pid, is_open)` tuples.
pub fn port_list(ports: &[(&str, &str, &str, bool)]) -> Value {
    json!({
        "Version": "1.96",
        "Commands": ["list", "open", "sendjson"],
        "Hostname": "testbench",
        "SerialPorts": ports
            .iter()
            .map(|(name, vid, pid, is_open)| {
                json!({
                    "Name": name,
                    "Friendly": "USB serial device",
                    "IsOpen": is_open,
                    "SerialNumber": "0001",
                    "UsbVid": vid,
                    "UsbPid": pid,
                })
            })
            .collect::<Vec<_>>(),
    })
}
