#![allow(dead_code)]

use async_trait::async_trait;
use feedwire::core::config::StreamConfig;
use feedwire::core::errors::ExchangeError;
use feedwire::core::kernel::WsSession;
use feedwire::core::types::{ConnectionSignal, StreamEvent};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

enum Inbound {
    Frame(Message),
    PeerClose,
}

#[derive(Default)]
struct Shared {
    sent: Vec<String>,
    connect_attempts: usize,
    connects: usize,
    closes: usize,
    fail_connects: usize,
}

/// In-memory `WsSession` driven by a [`MockRemote`]
pub struct MockSession {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    connected: bool,
}

/// Test side of a [`MockSession`]: script inbound frames, inspect outbound
#[derive(Clone)]
pub struct MockRemote {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

pub fn mock_session() -> (MockSession, MockRemote) {
    let shared = Arc::new(Mutex::new(Shared::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    let session = MockSession {
        shared: Arc::clone(&shared),
        inbound: rx,
        connected: false,
    };
    (session, MockRemote { shared, inbound: tx })
}

#[async_trait]
impl WsSession for MockSession {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let mut shared = self.shared.lock().unwrap();
        shared.connect_attempts += 1;
        if shared.fail_connects > 0 {
            shared.fail_connects -= 1;
            return Err(ExchangeError::NetworkError("connection refused".to_string()));
        }
        shared.connects += 1;
        self.connected = true;
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NetworkError("not connected".to_string()));
        }
        if let Message::Text(text) = msg {
            self.shared.lock().unwrap().sent.push(text);
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(message)) => Some(Ok(message)),
            Some(Inbound::PeerClose) => {
                self.connected = false;
                None
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.connected = false;
        self.shared.lock().unwrap().closes += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl MockRemote {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Frame(Message::Text(text.into())));
    }

    /// Protocol-level keepalive from the peer
    pub fn push_ping(&self) {
        let _ = self.inbound.send(Inbound::Frame(Message::Ping(Vec::new())));
    }

    /// The peer closes the socket
    pub fn drop_connection(&self) {
        let _ = self.inbound.send(Inbound::PeerClose);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.shared.lock().unwrap().fail_connects = count;
    }

    pub fn sent(&self) -> Vec<String> {
        self.shared.lock().unwrap().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.shared.lock().unwrap().sent)
    }

    /// Outbound JSON messages; plain-text frames such as `ping` are skipped
    pub fn take_sent_json(&self) -> Vec<Value> {
        self.take_sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.shared.lock().unwrap().connects
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.lock().unwrap().connect_attempts
    }

    pub fn closes(&self) -> usize {
        self.shared.lock().unwrap().closes
    }
}

/// Fast, deterministic tuning: 1s backoff base, no subscribe hold
pub fn test_config() -> StreamConfig {
    StreamConfig::new()
        .with_reconnect_delay(Duration::from_secs(1))
        .with_max_reconnect_delay(Duration::from_secs(8))
        .with_subscribe_throttle(4, Duration::ZERO)
}

/// Let every spawned task run until it blocks, advancing the paused clock
/// by one millisecond
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(events: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn signals(events: &[StreamEvent]) -> Vec<ConnectionSignal> {
    events
        .iter()
        .filter_map(StreamEvent::connection_signal)
        .collect()
}

pub fn data_events(events: &[StreamEvent]) -> Vec<&StreamEvent> {
    events
        .iter()
        .filter(|event| event.connection_signal().is_none())
        .collect()
}

/// `(method, symbol)` of outbound HitBTC JSON-RPC calls
pub fn rpc_calls(messages: &[Value]) -> Vec<(String, String)> {
    messages
        .iter()
        .map(|message| {
            (
                message["method"].as_str().unwrap_or_default().to_string(),
                message["params"]["symbol"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            )
        })
        .collect()
}

pub fn hitbtc_book(method: &str, symbol: &str, sequence: u64) -> String {
    format!(
        r#"{{"jsonrpc":"2.0","method":"{}","params":{{"ask":[{{"price":"0.054588","size":"0.245"}}],"bid":[{{"price":"0.054558","size":"0.500"}}],"symbol":"{}","sequence":{}}}}}"#,
        method, symbol, sequence
    )
}
