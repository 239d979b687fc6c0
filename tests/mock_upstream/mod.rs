//! Mock Realtime API Server
//!
//! A plain `ws://` server speaking the realtime event protocol. Every accepted
//! connection is handed to the test as an [`UpstreamConnection`], which
//! records the events the relay sent and lets the test push server events
//! back.

// Allow dead code in test infrastructure - not every test uses every helper
#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound instructions for one mock connection
enum Outbound {
    Event(Value),
    Close,
}

/// The test's view of one upstream connection opened by the relay.
pub struct UpstreamConnection {
    received: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl UpstreamConnection {
    /// Next event sent by the relay, or `None` once the relay hung up.
    pub async fn next_event(&mut self) -> Option<Value> {
        timeout(EVENT_TIMEOUT, self.received.recv())
            .await
            .expect("timed out waiting for upstream event")
    }

    /// Skip events until one of type `event_type` arrives.
    pub async fn expect_event(&mut self, event_type: &str) -> Value {
        loop {
            let event = self
                .next_event()
                .await
                .unwrap_or_else(|| panic!("upstream closed before {event_type}"));
            if event["type"] == event_type {
                return event;
            }
        }
    }

    /// Wait until the relay closes this connection.
    pub async fn expect_closed(&mut self) {
        while self.next_event().await.is_some() {}
    }

    /// Push a server event to the relay.
    pub fn send(&self, event: Value) {
        let _ = self.outbound.send(Outbound::Event(event));
    }

    /// Close the connection from the upstream side.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Mock realtime server bound to an ephemeral local port.
pub struct MockUpstream {
    pub url: String,
    connections: mpsc::UnboundedReceiver<UpstreamConnection>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_tx).await {
                        eprintln!("mock upstream connection error: {e}");
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            connections,
        }
    }

    /// The next connection the relay opens.
    pub async fn accept(&mut self) -> UpstreamConnection {
        timeout(EVENT_TIMEOUT, self.connections.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("mock upstream listener stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_tx: mpsc::UnboundedSender<UpstreamConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (received_tx, received) = mpsc::unbounded_channel();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();
    let _ = conn_tx.send(UpstreamConnection { received, outbound });

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(event) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = received_tx.send(event);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            out = outbound_rx.recv() => match out {
                Some(Outbound::Event(event)) => {
                    write.send(Message::Text(event.to_string().into())).await?;
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    Ok(())
}
