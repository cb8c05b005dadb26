//! The bidirectional execution channel backing one run
//!
//! A [`Connection`] is opened without blocking: the WebSocket handshake and
//! frame pumping happen on a spawned task, and everything the caller needs to
//! know arrives as [`ConnectionEvent`]s on the owner's event queue, tagged with
//! the [`RunId`] the connection was opened for.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::session::RunId;

/// What a connection reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed; the channel accepts payloads
    Opened,
    /// One chunk of program output
    Data(String),
    /// The remote end finished the run
    Closed(Termination),
    /// The channel failed to open or broke; no further events follow
    Error(String),
}

/// A [`ConnectionEvent`] tagged with the run of the connection that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub run: RunId,
    pub event: ConnectionEvent,
}

pub type EventSender = mpsc::UnboundedSender<Envelope>;

/// How a run ended, read off the channel's closing handshake.
///
/// The wire protocol carries no exit status, so this is all the client can
/// know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Close frame with the normal status (or no status at all)
    Normal { reason: Option<String> },
    /// Close frame with any other status
    Abnormal { code: u16, reason: Option<String> },
    /// The stream ended without a closing handshake
    Dropped,
    /// This client closed the channel before the run ended
    Cancelled,
}

impl Termination {
    /// Classify a close frame by status code and reason.
    pub fn from_close(code: Option<u16>, reason: &str) -> Self {
        let reason = (!reason.is_empty()).then(|| reason.to_string());
        match code {
            None | Some(1000) => Termination::Normal { reason },
            Some(code) => Termination::Abnormal { code, reason },
        }
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::from_close(Some(u16::from(frame.code)), frame.reason.as_str()),
            None => Self::from_close(None, ""),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Termination::Normal { reason } | Termination::Abnormal { reason, .. } => {
                reason.as_deref()
            }
            Termination::Dropped | Termination::Cancelled => None,
        }
    }

    /// The service hit its execution deadline
    pub fn is_timeout(&self) -> bool {
        self.reason() == Some(playground_protocol::TIMEOUT_REASON)
    }

    /// The run ended through a normal closing handshake, not a timeout
    pub fn is_clean(&self) -> bool {
        matches!(self, Termination::Normal { .. }) && !self.is_timeout()
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Normal { reason: None } => write!(f, "finished"),
            Termination::Normal { reason: Some(reason) } => write!(f, "finished ({reason})"),
            Termination::Abnormal { code, reason: None } => write!(f, "closed with status {code}"),
            Termination::Abnormal {
                code,
                reason: Some(reason),
            } => write!(f, "closed with status {code} ({reason})"),
            Termination::Dropped => write!(f, "stream ended without closing handshake"),
            Termination::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A client-to-service frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(data) => Message::Binary(data.into()),
        }
    }
}

/// The owner's side of an execution channel
pub trait Channel: Send {
    /// The run this channel was opened for
    fn run(&self) -> RunId;

    /// Queue a payload. Fails with [`Error::ChannelNotOpen`] before `Opened` or
    /// after close.
    fn send(&mut self, payload: Payload) -> Result<()>;

    /// Release the channel. Idempotent; no events are delivered afterwards.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens execution channels
pub trait Connector: Send + Sync {
    fn open(&self, run: RunId, endpoint: &Url, events: EventSender) -> Box<dyn Channel>;
}

/// [`Connector`] speaking WebSocket through tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn open(&self, run: RunId, endpoint: &Url, events: EventSender) -> Box<dyn Channel> {
        Box::new(Connection::open(run, endpoint, self.connect_timeout, events))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone)]
struct SharedPhase(Arc<Mutex<Phase>>);

impl SharedPhase {
    fn get(&self) -> Phase {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, phase: Phase) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Move from `Pending` to `Open`; false if the channel was closed meanwhile.
    fn open(&self) -> bool {
        let mut phase = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Pending {
            *phase = Phase::Open;
            true
        } else {
            false
        }
    }
}

/// A WebSocket execution channel.
///
/// Must be opened from within a tokio runtime.
#[derive(Debug)]
pub struct Connection {
    run: RunId,
    phase: SharedPhase,
    outbound: mpsc::UnboundedSender<Payload>,
    cancel: CancellationToken,
}

impl Connection {
    /// Start connecting to `endpoint`. Returns immediately; completion is
    /// reported as `Opened` or `Error` on `events`.
    pub fn open(run: RunId, endpoint: &Url, connect_timeout: Duration, events: EventSender) -> Self {
        let phase = SharedPhase(Arc::new(Mutex::new(Phase::Pending)));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tracing::debug!(run = %run, endpoint = %endpoint, "opening execution channel");

        let pump = Pump {
            run,
            phase: phase.clone(),
            events,
            cancel: cancel.clone(),
        };
        tokio::spawn(pump.drive(endpoint.to_string(), connect_timeout, outbound_rx));

        Self {
            run,
            phase,
            outbound,
            cancel,
        }
    }
}

impl Channel for Connection {
    fn run(&self) -> RunId {
        self.run
    }

    fn send(&mut self, payload: Payload) -> Result<()> {
        if self.phase.get() != Phase::Open {
            return Err(Error::ChannelNotOpen);
        }
        self.outbound
            .send(payload)
            .map_err(|_| Error::ChannelNotOpen)
    }

    fn close(&mut self) {
        if self.phase.get() == Phase::Closed && self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!(run = %self.run, "closing execution channel");
        self.phase.set(Phase::Closed);
        self.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.phase.get() == Phase::Open
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// The task half of a [`Connection`]
struct Pump {
    run: RunId,
    phase: SharedPhase,
    events: EventSender,
    cancel: CancellationToken,
}

impl Pump {
    fn emit(&self, event: ConnectionEvent) {
        if self.cancel.is_cancelled() {
            tracing::debug!(run = %self.run, ?event, "dropping event after close");
            return;
        }
        // The owner is gone when this fails; nobody is left to tell.
        let _ = self.events.send(Envelope {
            run: self.run,
            event,
        });
    }

    /// Report a terminal event, then mark the channel closed.
    fn finish(&self, event: ConnectionEvent) {
        self.emit(event);
        self.phase.set(Phase::Closed);
    }

    async fn drive(
        self,
        endpoint: String,
        connect_timeout: Duration,
        mut outbound: mpsc::UnboundedReceiver<Payload>,
    ) {
        let connect = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(endpoint.as_str()),
        );

        let stream = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(run = %self.run, "channel closed before handshake completed");
                return;
            }
            result = connect => match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    tracing::info!(run = %self.run, endpoint = %endpoint, error = %e, "failed to open execution channel");
                    self.finish(ConnectionEvent::Error(format!("failed to connect to {endpoint}: {e}")));
                    return;
                }
                Err(_) => {
                    tracing::info!(run = %self.run, endpoint = %endpoint, "timed out opening execution channel");
                    self.finish(ConnectionEvent::Error(format!(
                        "timed out after {connect_timeout:?} connecting to {endpoint}"
                    )));
                    return;
                }
            }
        };

        let (mut sink, mut source) = stream.split();

        if !self.phase.open() {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
        tracing::info!(run = %self.run, endpoint = %endpoint, "execution channel open");
        self.emit(ConnectionEvent::Opened);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(run = %self.run, error = %e, "close frame not delivered");
                    }
                    break;
                }

                Some(payload) = outbound.recv() => {
                    if let Err(e) = sink.send(payload.into()).await {
                        tracing::info!(run = %self.run, error = %e, "execution channel write failed");
                        self.finish(ConnectionEvent::Error(format!("failed to send: {e}")));
                        break;
                    }
                }

                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(run = %self.run, len = text.len(), "output chunk");
                        self.emit(ConnectionEvent::Data(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(run = %self.run, len = data.len(), "binary output chunk");
                        self.emit(ConnectionEvent::Data(String::from_utf8_lossy(&data).into_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let termination = Termination::from_frame(frame);
                        tracing::info!(run = %self.run, %termination, "execution channel closed by service");
                        self.finish(ConnectionEvent::Closed(termination));
                        break;
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::info!(run = %self.run, error = %e, "execution channel broke");
                        self.finish(ConnectionEvent::Error(e.to_string()));
                        break;
                    }
                    None => {
                        self.finish(ConnectionEvent::Closed(Termination::Dropped));
                        break;
                    }
                },
            }
        }

        self.phase.set(Phase::Closed);
    }
}
