//! Shared fixtures for tests: an in-memory broker, a canned history source
//! and env serialization.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::client::history::{HistoryError, HistoryGateway};
use crate::domain::conversation::{ConversationSummary, Expert};
use crate::domain::message::{ChatMessage, UserId};
use crate::transport::dialer::{BoxedBrokerIo, BrokerDialer};
use crate::transport::frame::{Command, Frame, FrameDecoder};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that touch process-wide state: environment variables
/// and the global tracing subscriber.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().expect("env lock should not be poisoned")
}

/// Dialer handing out in-memory pipes. Every dial yields a fresh pipe; the
/// far end is delivered through the receiver returned by `new`.
pub struct PipeDialer {
    accepted_tx: UnboundedSender<DuplexStream>,
}

impl PipeDialer {
    pub fn new() -> (Self, UnboundedReceiver<DuplexStream>) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        (Self { accepted_tx }, accepted_rx)
    }
}

#[async_trait]
impl BrokerDialer for PipeDialer {
    async fn dial(&self) -> std::io::Result<BoxedBrokerIo> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.accepted_tx.send(server).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nothing listening")
        })?;
        Ok(Box::new(client))
    }
}

/// Scripted peer for the far end of a [`PipeDialer`] pipe. Tests drive the
/// broker side of the protocol frame by frame.
pub struct BrokerSim {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl BrokerSim {
    pub async fn accept(accepted: &mut UnboundedReceiver<DuplexStream>) -> Self {
        let stream = accepted.recv().await.expect("session should dial");
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    /// Reads the connect frame and acknowledges it. Returns the connect
    /// frame so tests can assert its headers.
    pub async fn complete_handshake(&mut self) -> Frame {
        let connect = self.expect_frame().await;
        assert_eq!(connect.command, Command::Connect, "expected a connect frame");
        self.send_frame(&Frame {
            command: Command::Connected,
            headers: vec![("version".to_owned(), "1.2".to_owned())],
            body: String::new(),
        })
        .await;
        connect
    }

    pub async fn expect_frame(&mut self) -> Frame {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next().expect("scripted side should decode") {
                return frame;
            }
            let n = self
                .stream
                .read(&mut buf)
                .await
                .expect("scripted side read");
            assert!(n > 0, "stream closed while waiting for a frame");
            self.decoder.feed(&buf[..n]);
        }
    }

    pub async fn send_frame(&mut self, frame: &Frame) {
        self.send_raw(&frame.encode()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("scripted side write");
        self.stream.flush().await.expect("scripted side flush");
    }

    pub async fn send_message(&mut self, destination: &str, subscription: &str, body: &str) {
        self.send_frame(&Frame {
            command: Command::Message,
            headers: vec![
                ("destination".to_owned(), destination.to_owned()),
                ("subscription".to_owned(), subscription.to_owned()),
                ("message-id".to_owned(), "m-1".to_owned()),
            ],
            body: body.to_owned(),
        })
        .await;
    }

    pub async fn send_error(&mut self, message: &str) {
        self.send_frame(&Frame {
            command: Command::Error,
            headers: vec![("message".to_owned(), message.to_owned())],
            body: String::new(),
        })
        .await;
    }
}

/// In-memory history source with scriptable payloads. Fetches can be made
/// to fail wholesale, gated open per counterpart, or observed through a
/// probe channel that reports each served route.
#[derive(Default)]
pub struct CannedHistoryGateway {
    community: Mutex<Vec<ChatMessage>>,
    private: Mutex<HashMap<UserId, Vec<ChatMessage>>>,
    summaries: Mutex<Vec<ConversationSummary>>,
    experts: Mutex<Vec<Expert>>,
    failing: Mutex<bool>,
    gates: Mutex<HashMap<UserId, watch::Receiver<bool>>>,
    served_tx: Mutex<Option<UnboundedSender<String>>>,
}

impl CannedHistoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_community(&self, messages: Vec<ChatMessage>) {
        *lock(&self.community) = messages;
    }

    pub fn set_private(&self, other: UserId, messages: Vec<ChatMessage>) {
        lock(&self.private).insert(other, messages);
    }

    pub fn set_summaries(&self, summaries: Vec<ConversationSummary>) {
        *lock(&self.summaries) = summaries;
    }

    pub fn set_experts(&self, experts: Vec<Expert>) {
        *lock(&self.experts) = experts;
    }

    /// Every subsequent fetch fails with a 503.
    pub fn fail_all(&self) {
        *lock(&self.failing) = true;
    }

    /// Holds the private fetch for `other` until the returned sender flips
    /// the gate to `true`.
    pub fn gate_private(&self, other: UserId) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        lock(&self.gates).insert(other, rx);
        tx
    }

    /// Reports the label of every served route, in service order.
    pub fn served_probe(&self) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.served_tx) = Some(tx);
        rx
    }

    fn serve<T>(&self, label: &str, data: T) -> Result<T, HistoryError> {
        let failing = *lock(&self.failing);
        if let Some(probe) = lock(&self.served_tx).as_ref() {
            let _ = probe.send(label.to_owned());
        }
        if failing {
            return Err(HistoryError::Status {
                status: 503,
                endpoint: label.to_owned(),
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl HistoryGateway for CannedHistoryGateway {
    async fn community_history(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        let data = lock(&self.community).clone();
        self.serve("community", data)
    }

    async fn conversation_summaries(
        &self,
        _me: UserId,
    ) -> Result<Vec<ConversationSummary>, HistoryError> {
        let data = lock(&self.summaries).clone();
        self.serve("conversations", data)
    }

    async fn private_messages(
        &self,
        _me: UserId,
        other: UserId,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let gate = lock(&self.gates).get(&other).cloned();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        let data = lock(&self.private).get(&other).cloned().unwrap_or_default();
        self.serve(&format!("private:{other}"), data)
    }

    async fn expert_roster(&self) -> Result<Vec<Expert>, HistoryError> {
        let data = lock(&self.experts).clone();
        self.serve("experts", data)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("fixture lock poisoned")
}
