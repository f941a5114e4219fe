use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::domain::events::{ConnectionState, SessionFault};
use crate::transport::dialer::{BoxedBrokerIo, BrokerDialer};
use crate::transport::frame::{Command, Frame, FrameDecodeError, FrameDecoder};

const SESSION_CONNECTED: &str = "BROKER_SESSION_CONNECTED";
const SESSION_CONNECT_FAILED: &str = "BROKER_SESSION_CONNECT_FAILED";
const SESSION_CLOSED: &str = "BROKER_SESSION_CLOSED";
const SESSION_FAULT: &str = "BROKER_SESSION_FAULT";
const SESSION_SUBSCRIBED: &str = "BROKER_SESSION_SUBSCRIBED";
const SESSION_ROUTE_REPLACED: &str = "BROKER_SESSION_ROUTE_REPLACED";
const SESSION_READ_FAILED: &str = "BROKER_SESSION_READ_FAILED";
const SESSION_READER_STOPPED: &str = "BROKER_SESSION_READER_STOPPED";
const SESSION_UNROUTED_MESSAGE: &str = "BROKER_SESSION_UNROUTED_MESSAGE";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to reach the broker: {0}")]
    Dial(#[source] std::io::Error),
    #[error("broker rejected the session: {message}")]
    HandshakeRejected { message: String },
    #[error("broker closed the stream during the handshake")]
    HandshakeClosed,
    #[error("frame error: {0}")]
    Frame(#[from] FrameDecodeError),
    #[error("not connected to the broker")]
    NotConnected,
    #[error("failed to write to the broker: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to read from the broker: {0}")]
    Read(#[source] std::io::Error),
}

pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;
pub type FaultHandler = Arc<dyn Fn(SessionFault) + Send + Sync>;

type SharedWriter = Arc<AsyncMutex<Option<WriteHalf<BoxedBrokerIo>>>>;
type RouteTable = Arc<Mutex<HashMap<String, Route>>>;
type FaultHandlerSlot = Arc<Mutex<Option<FaultHandler>>>;

struct Route {
    id: String,
    handler: FrameHandler,
}

/// One frame-level session over a dialed stream. Owns the connect handshake,
/// the subscription registry and the background read loop. The session never
/// reconnects by itself; after a fault the owner decides whether to connect
/// again.
pub struct TransportSession {
    dialer: Box<dyn BrokerDialer>,
    host: String,
    state_tx: watch::Sender<ConnectionState>,
    writer: SharedWriter,
    routes: RouteTable,
    fault_handler: FaultHandlerSlot,
    reader_stop: Option<watch::Sender<bool>>,
    next_subscription: u64,
}

impl TransportSession {
    pub fn new(dialer: Box<dyn BrokerDialer>, host: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            dialer,
            host: host.into(),
            state_tx,
            writer: Arc::new(AsyncMutex::new(None)),
            routes: Arc::new(Mutex::new(HashMap::new())),
            fault_handler: Arc::new(Mutex::new(None)),
            reader_stop: None,
            next_subscription: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Registers the callback invoked from the read loop when the session
    /// fails. Replaces any previous handler.
    pub fn set_fault_handler(&self, handler: FaultHandler) {
        *lock(&self.fault_handler) = Some(handler);
    }

    /// Dials, performs the connect handshake and starts the read loop.
    /// Calling this while connecting or connected is a no-op.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        match self.establish().await {
            Ok(()) => {
                tracing::info!(code = SESSION_CONNECTED, host = %self.host, "broker session established");
                Ok(())
            }
            Err(error) => {
                self.state_tx.send_replace(ConnectionState::Failed);
                tracing::warn!(code = SESSION_CONNECT_FAILED, error = %error, "broker session connect failed");
                Err(error)
            }
        }
    }

    async fn establish(&mut self) -> Result<(), TransportError> {
        let stream = self.dialer.dial().await.map_err(TransportError::Dial)?;
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        write_frame(&mut write_half, &Frame::connect(&self.host)).await?;

        // The decoder survives the handshake so frames the broker piggybacks
        // after CONNECTED are not lost.
        let mut decoder = FrameDecoder::new();
        await_connected(&mut read_half, &mut decoder).await?;

        *self.writer.lock().await = Some(write_half);
        self.state_tx.send_replace(ConnectionState::Connected);

        let (stop_tx, stop_rx) = watch::channel(false);
        self.reader_stop = Some(stop_tx);
        tokio::spawn(run_read_loop(ReadLoop {
            reader: read_half,
            decoder,
            routes: Arc::clone(&self.routes),
            writer: Arc::clone(&self.writer),
            state_tx: self.state_tx.clone(),
            fault_handler: Arc::clone(&self.fault_handler),
            stop_rx,
        }));

        Ok(())
    }

    /// Installs a handler for one destination. The first call per destination
    /// sends a subscription frame; later calls only swap the handler, so
    /// re-opening a screen never duplicates broker-side subscriptions.
    pub async fn subscribe(
        &mut self,
        destination: &str,
        handler: FrameHandler,
    ) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }

        if let Some(route) = lock(&self.routes).get_mut(destination) {
            route.handler = handler;
            tracing::debug!(code = SESSION_ROUTE_REPLACED, destination, "subscription handler replaced");
            return Ok(());
        }

        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.write(&Frame::subscribe(&id, destination)).await?;
        lock(&self.routes).insert(destination.to_owned(), Route { id, handler });
        tracing::info!(code = SESSION_SUBSCRIBED, destination, "subscription installed");
        Ok(())
    }

    /// Sends one application frame to a destination.
    pub async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        publish_frame(&self.writer, self.state(), destination, body).await
    }

    /// Detached publish handle for background tasks. Shares the session's
    /// writer and observes its connection state.
    pub fn publisher(&self) -> Publisher {
        Publisher {
            writer: Arc::clone(&self.writer),
            state_rx: self.state_tx.subscribe(),
        }
    }

    /// Graceful teardown: goodbye frame, writer shutdown, read loop stop.
    /// Safe to call in any state; repeated calls are no-ops.
    pub async fn disconnect(&mut self) {
        let Some(stop_tx) = self.reader_stop.take() else {
            return;
        };
        let _ = stop_tx.send(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.write_all(&Frame::disconnect().encode()).await;
            let _ = writer.flush().await;
            let _ = writer.shutdown().await;
        }
        lock(&self.routes).clear();

        if self.state() != ConnectionState::Failed {
            self.state_tx.send_replace(ConnectionState::Closed);
        }
        tracing::info!(code = SESSION_CLOSED, "broker session closed");
    }

    async fn write(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        write_frame(writer, frame).await
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.reader_stop.take() {
            let _ = stop_tx.send(true);
            tracing::debug!(code = SESSION_READER_STOPPED, "read loop stop signal sent on drop");
        }
    }
}

/// Cloneable publish handle detached from the session's lifetime.
#[derive(Clone)]
pub struct Publisher {
    writer: SharedWriter,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Publisher {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub async fn publish(&self, destination: &str, body: String) -> Result<(), TransportError> {
        publish_frame(&self.writer, self.state(), destination, body).await
    }
}

async fn publish_frame(
    writer: &SharedWriter,
    state: ConnectionState,
    destination: &str,
    body: String,
) -> Result<(), TransportError> {
    if state != ConnectionState::Connected {
        return Err(TransportError::NotConnected);
    }
    let mut slot = writer.lock().await;
    let Some(writer) = slot.as_mut() else {
        return Err(TransportError::NotConnected);
    };
    write_frame(writer, &Frame::send(destination, body)).await
}

async fn write_frame(
    writer: &mut WriteHalf<BoxedBrokerIo>,
    frame: &Frame,
) -> Result<(), TransportError> {
    writer
        .write_all(&frame.encode())
        .await
        .map_err(TransportError::Write)?;
    writer.flush().await.map_err(TransportError::Write)
}

async fn await_connected(
    reader: &mut ReadHalf<BoxedBrokerIo>,
    decoder: &mut FrameDecoder,
) -> Result<(), TransportError> {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(frame) = decoder.next()? {
            return match frame.command {
                Command::Connected => Ok(()),
                Command::Error => Err(TransportError::HandshakeRejected {
                    message: error_message(&frame),
                }),
                other => Err(TransportError::HandshakeRejected {
                    message: format!("unexpected {} before CONNECTED", other.as_str()),
                }),
            };
        }

        let n = reader.read(&mut buf).await.map_err(TransportError::Read)?;
        if n == 0 {
            return Err(TransportError::HandshakeClosed);
        }
        decoder.feed(&buf[..n]);
    }
}

struct ReadLoop {
    reader: ReadHalf<BoxedBrokerIo>,
    decoder: FrameDecoder,
    routes: RouteTable,
    writer: SharedWriter,
    state_tx: watch::Sender<ConnectionState>,
    fault_handler: FaultHandlerSlot,
    stop_rx: watch::Receiver<bool>,
}

async fn run_read_loop(mut ctx: ReadLoop) {
    // The handshake read may have pulled application frames along.
    if let Some(fault) = drain_frames(&mut ctx) {
        fail(&ctx, fault).await;
        return;
    }

    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            changed = ctx.stop_rx.changed() => {
                if changed.is_err() || *ctx.stop_rx.borrow() {
                    tracing::debug!(code = SESSION_READER_STOPPED, "read loop stopped");
                    return;
                }
            }
            read = ctx.reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        fail(&ctx, SessionFault::ConnectionLost).await;
                        return;
                    }
                    Ok(n) => {
                        ctx.decoder.feed(&buf[..n]);
                        if let Some(fault) = drain_frames(&mut ctx) {
                            fail(&ctx, fault).await;
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(code = SESSION_READ_FAILED, error = %error, "socket read failed");
                        fail(&ctx, SessionFault::ConnectionLost).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Dispatches every complete frame in the decoder. Returns the fault that
/// should end the session, if any.
fn drain_frames(ctx: &mut ReadLoop) -> Option<SessionFault> {
    loop {
        match ctx.decoder.next() {
            Ok(Some(frame)) => match frame.command {
                Command::Message => dispatch_message(&ctx.routes, frame),
                Command::Error => {
                    return Some(SessionFault::Broker {
                        message: error_message(&frame),
                    });
                }
                Command::Receipt | Command::Connected => {
                    tracing::debug!(command = frame.command.as_str(), "frame ignored");
                }
                other => {
                    return Some(SessionFault::Protocol {
                        detail: format!("broker sent a {} frame", other.as_str()),
                    });
                }
            },
            Ok(None) => return None,
            Err(error) => {
                return Some(SessionFault::Protocol {
                    detail: error.to_string(),
                });
            }
        }
    }
}

fn dispatch_message(routes: &RouteTable, frame: Frame) {
    let handler = {
        let routes = lock(routes);
        let subscription = frame.header("subscription");
        let destination = frame.destination();
        routes
            .iter()
            .find(|(route_destination, route)| {
                subscription == Some(route.id.as_str())
                    || destination == Some(route_destination.as_str())
            })
            .map(|(_, route)| Arc::clone(&route.handler))
    };

    match handler {
        Some(handler) => handler(frame),
        None => {
            tracing::debug!(
                code = SESSION_UNROUTED_MESSAGE,
                destination = frame.destination().unwrap_or_default(),
                "message frame without a matching subscription dropped"
            );
        }
    }
}

async fn fail(ctx: &ReadLoop, fault: SessionFault) {
    ctx.writer.lock().await.take();
    lock(&ctx.routes).clear();
    ctx.state_tx.send_replace(ConnectionState::Failed);
    tracing::warn!(code = SESSION_FAULT, fault = %fault, "session entered failed state");

    let handler = lock(&ctx.fault_handler).clone();
    if let Some(handler) = handler {
        handler(fault);
    }
}

fn error_message(frame: &Frame) -> String {
    if let Some(message) = frame.header("message") {
        return message.to_owned();
    }
    if !frame.body.is_empty() {
        return frame.body.clone();
    }
    "broker error without message".to_owned()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
