//! The client-side owner of the interactive execution session
//!
//! [`Playground`] holds the single execution channel of a client, feeds
//! connection events through [`transition`] and carries out the resulting
//! effects. All events are applied in order from one queue, so the output log
//! and the session state are only ever mutated from the caller's task.

use std::sync::Arc;

use playground_protocol::Source;
use tokio::sync::{mpsc, watch};

use crate::connection::{Channel, ConnectionEvent, Connector, Envelope, EventSender, Payload, Termination, WsConnector};
use crate::endpoints::Endpoints;
use crate::error::{Error, Result};
use crate::output_log::{LogReader, OutputLog};
use crate::session::{Effect, RunId, Session, SessionState, transition};

/// What observers see of the session after each applied event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub run: Option<RunId>,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub termination: Option<Termination>,
    /// Number of chunks in the output log
    pub output_len: usize,
}

/// One client instance: at most one session, at most one open channel.
pub struct Playground {
    endpoints: Endpoints,
    connector: Arc<dyn Connector>,

    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<Envelope>,

    last_run: RunId,
    session: Option<Session>,
    channel: Option<Box<dyn Channel>>,
    output: OutputLog,

    status: watch::Sender<SessionStatus>,
}

impl Playground {
    /// A client speaking WebSocket to `endpoints`
    pub fn new(endpoints: Endpoints) -> Self {
        let connector = WsConnector::new(endpoints.connect_timeout());
        Self::with_connector(endpoints, Arc::new(connector))
    }

    pub fn with_connector(endpoints: Endpoints, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            endpoints,
            connector,
            events_tx,
            events_rx,
            last_run: RunId::new(0),
            session: None,
            channel: None,
            output: OutputLog::new(),
            status,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Start a new run of `code`.
    ///
    /// Any previous channel is closed first; its late events are discarded.
    /// The output log and the last error are cleared.
    pub fn run(&mut self, language: &str, code: &str) -> RunId {
        if let Some(previous) = self.session.as_ref() {
            tracing::info!(run = %previous.run(), state = ?previous.state(), "replacing session");
        }
        self.release();

        self.output.clear();
        let run = self.last_run.next();
        self.last_run = run;
        self.session = Some(Session::connecting(run, Source::new(language, code)));

        tracing::info!(run = %run, language, endpoint = %self.endpoints.execute_url(), "starting run");
        self.channel = Some(
            self.connector
                .open(run, self.endpoints.execute_url(), self.events_tx.clone()),
        );
        self.publish();
        run
    }

    /// Forward one line of interactive input, verbatim.
    ///
    /// Only allowed while the session is `Running`; otherwise nothing is sent.
    ///
    /// When the service ends the run, the channel stops accepting payloads
    /// before the closing event has been applied. Input submitted in that
    /// window fails with [`Error::ChannelNotOpen`] while the state still reads
    /// `Running`; the next applied event moves the session on.
    pub fn submit_input(&mut self, line: &str) -> Result<()> {
        let state = self.state();
        let channel = match (state, self.channel.as_mut()) {
            (SessionState::Running, Some(channel)) => channel,
            _ => {
                tracing::warn!(state = ?state, "input rejected: not connected");
                return Err(Error::ForwardingRejected { state });
            }
        };
        tracing::debug!(run = %channel.run(), len = line.len(), "forwarding input");
        channel.send(Payload::Text(line.to_string()))
    }

    /// Wait for one event and apply it. Returns the run the event belonged to,
    /// or `None` when no channel is open.
    pub async fn next_event(&mut self) -> Option<RunId> {
        self.channel.as_ref()?;
        let envelope = self.events_rx.recv().await?;
        let run = envelope.run;
        self.handle(envelope);
        Some(run)
    }

    /// Apply events until the current run leaves `Connecting`/`Running`, or
    /// until it is cancelled.
    pub async fn wait_for_completion(&mut self) -> SessionState {
        while self.channel.is_some() {
            if self.next_event().await.is_none() {
                break;
            }
        }
        self.state()
    }

    /// Close the current channel.
    ///
    /// An active session ends as `Closed` with [`Termination::Cancelled`];
    /// no further events for it are honoured.
    pub fn cancel(&mut self) {
        let Some(run) = self.channel.as_ref().map(|channel| channel.run()) else {
            return;
        };
        tracing::info!(run = %run, state = ?self.state(), "cancelling run");
        self.handle(Envelope {
            run,
            event: ConnectionEvent::Closed(Termination::Cancelled),
        });
        self.release();
        self.publish();
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(Session::state)
            .unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.as_ref().and_then(Session::last_error)
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.session.as_ref().and_then(Session::termination)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn current_run(&self) -> Option<RunId> {
        self.session.as_ref().map(Session::run)
    }

    /// Snapshot of the output log
    pub fn output(&self) -> Vec<String> {
        self.output.snapshot()
    }

    /// Read-only handle on the output log, valid across runs
    pub fn output_reader(&self) -> LogReader {
        self.output.reader()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    fn handle(&mut self, Envelope { run, event }: Envelope) {
        let from = match self.session.as_ref() {
            Some(session) if session.run() == run && self.channel.is_some() => session.state(),
            current => {
                tracing::warn!(
                    run = %run,
                    current = ?current.map(Session::run),
                    ?event,
                    "discarding event from superseded connection"
                );
                return;
            }
        };

        let step = transition(from, &event);
        if step.is_ignored(from) {
            tracing::debug!(run = %run, state = ?from, ?event, "event has no effect");
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.set_state(step.next);
        }
        if step.next != from {
            tracing::info!(run = %run, from = ?from, to = ?step.next, "session transition");
        }
        for effect in step.effects {
            self.apply(effect);
        }
        self.publish();
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::SendRequest => {
                if let Err(reason) = self.send_request() {
                    tracing::warn!(run = ?self.current_run(), %reason, "failed to send request");
                    self.apply(Effect::Fail(reason));
                    self.apply(Effect::Release);
                }
            }
            Effect::Append(chunk) => self.output.append(chunk),
            Effect::Fail(reason) => {
                if let Some(session) = self.session.as_mut() {
                    tracing::info!(run = %session.run(), %reason, "run failed");
                    session.fail(reason);
                }
            }
            Effect::Finish(termination) => {
                if let Some(session) = self.session.as_mut() {
                    tracing::info!(run = %session.run(), %termination, "run finished");
                    session.finish(termination);
                }
            }
            Effect::Release => self.release(),
        }
    }

    fn send_request(&mut self) -> std::result::Result<(), String> {
        let (Some(session), Some(channel)) = (self.session.as_ref(), self.channel.as_mut()) else {
            return Err("no channel for the request".to_string());
        };
        let request = serde_json::to_string(session.source()).map_err(|e| e.to_string())?;
        channel
            .send(Payload::Text(request))
            .map_err(|e| e.to_string())
    }

    fn release(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn publish(&self) {
        let status = SessionStatus {
            run: self.current_run(),
            state: self.state(),
            last_error: self.last_error().map(str::to_string),
            termination: self.termination().cloned(),
            output_len: self.output.len(),
        };
        self.status.send_replace(status);
    }
}

impl Drop for Playground {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct Wire {
        opened: Vec<(RunId, EventSender)>,
        sent: Vec<(RunId, Payload)>,
        closed: Vec<RunId>,
        hung_up: Vec<RunId>,
    }

    /// Records what the session does to its channels instead of connecting
    #[derive(Default, Clone)]
    struct RecordingConnector {
        wire: Arc<Mutex<Wire>>,
    }

    impl RecordingConnector {
        fn emit(&self, run: RunId, event: ConnectionEvent) {
            let wire = self.wire.lock().unwrap();
            let (_, events) = wire.opened.iter().find(|(r, _)| *r == run).unwrap();
            events.send(Envelope { run, event }).unwrap();
        }

        fn sent(&self) -> Vec<(RunId, Payload)> {
            self.wire.lock().unwrap().sent.clone()
        }

        fn closed(&self) -> Vec<RunId> {
            self.wire.lock().unwrap().closed.clone()
        }

        /// The remote end goes away; the channel refuses payloads from now on
        fn hang_up(&self, run: RunId) {
            self.wire.lock().unwrap().hung_up.push(run);
        }
    }

    struct RecordingChannel {
        run: RunId,
        open: bool,
        wire: Arc<Mutex<Wire>>,
    }

    impl Channel for RecordingChannel {
        fn run(&self) -> RunId {
            self.run
        }

        fn send(&mut self, payload: Payload) -> Result<()> {
            let mut wire = self.wire.lock().unwrap();
            if !self.open || wire.hung_up.contains(&self.run) {
                return Err(Error::ChannelNotOpen);
            }
            wire.sent.push((self.run, payload));
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.wire.lock().unwrap().closed.push(self.run);
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    impl Connector for RecordingConnector {
        fn open(&self, run: RunId, _endpoint: &Url, events: EventSender) -> Box<dyn Channel> {
            self.wire.lock().unwrap().opened.push((run, events));
            Box::new(RecordingChannel {
                run,
                open: true,
                wire: Arc::clone(&self.wire),
            })
        }
    }

    fn playground() -> (Playground, RecordingConnector) {
        let connector = RecordingConnector::default();
        let endpoints = Endpoints::new("localhost:8080", false).unwrap();
        let playground = Playground::with_connector(endpoints, Arc::new(connector.clone()));
        (playground, connector)
    }

    #[test_log::test(tokio::test)]
    async fn opened_sends_the_snapshot_first() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "print(1)");
        assert_eq!(pg.state(), SessionState::Connecting);

        wire.emit(run, ConnectionEvent::Opened);
        pg.next_event().await;
        assert_eq!(pg.state(), SessionState::Running);
        assert_eq!(
            wire.sent(),
            vec![(
                run,
                Payload::Text(r#"{"language":"python3","code":"print(1)"}"#.to_string())
            )]
        );
    }

    #[test_log::test(tokio::test)]
    async fn data_is_logged_in_arrival_order() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "x");
        wire.emit(run, ConnectionEvent::Opened);
        for chunk in ["a", "b", "a", ""] {
            wire.emit(run, ConnectionEvent::Data(chunk.into()));
        }
        wire.emit(
            run,
            ConnectionEvent::Closed(Termination::Normal { reason: None }),
        );

        assert_eq!(pg.wait_for_completion().await, SessionState::Closed);
        assert_eq!(pg.output(), vec!["a", "b", "a", ""]);
        assert_eq!(wire.closed(), vec![run]);
    }

    #[test_log::test(tokio::test)]
    async fn new_run_closes_previous_and_ignores_its_late_data() {
        let (mut pg, wire) = playground();
        let first = pg.run("python3", "first");
        wire.emit(first, ConnectionEvent::Opened);
        pg.next_event().await;
        wire.emit(first, ConnectionEvent::Data("old".into()));
        pg.next_event().await;

        let second = pg.run("python3", "second");
        assert_eq!(wire.closed(), vec![first]);
        assert!(pg.output().is_empty());

        wire.emit(first, ConnectionEvent::Data("late".into()));
        wire.emit(second, ConnectionEvent::Opened);
        wire.emit(second, ConnectionEvent::Data("new".into()));
        wire.emit(
            second,
            ConnectionEvent::Closed(Termination::Normal { reason: None }),
        );

        assert_eq!(pg.wait_for_completion().await, SessionState::Closed);
        assert_eq!(pg.output(), vec!["new"]);
        assert_eq!(pg.current_run(), Some(second));
    }

    #[test_log::test(tokio::test)]
    async fn input_is_forwarded_only_while_running() {
        let (mut pg, wire) = playground();

        // Idle
        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Idle
            })
        ));

        let run = pg.run("python3", "input()");
        let sent_before = wire.sent().len();
        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Connecting
            })
        ));
        assert_eq!(wire.sent().len(), sent_before);

        wire.emit(run, ConnectionEvent::Opened);
        pg.next_event().await;
        pg.submit_input("42").unwrap();
        assert_eq!(wire.sent().last(), Some(&(run, Payload::Text("42".into()))));

        wire.emit(
            run,
            ConnectionEvent::Closed(Termination::Normal { reason: None }),
        );
        pg.wait_for_completion().await;
        let sent_before = wire.sent().len();
        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Closed
            })
        ));
        assert_eq!(wire.sent().len(), sent_before);

        let run = pg.run("python3", "input()");
        wire.emit(run, ConnectionEvent::Error("refused".into()));
        pg.wait_for_completion().await;
        let sent_before = wire.sent().len();
        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Failed
            })
        ));
        assert_eq!(wire.sent().len(), sent_before);
    }

    #[test_log::test(tokio::test)]
    async fn error_before_open_fails_with_empty_log() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "print(1)");
        wire.emit(run, ConnectionEvent::Error("connection refused".into()));

        assert_eq!(pg.wait_for_completion().await, SessionState::Failed);
        assert_eq!(pg.last_error(), Some("connection refused"));
        assert!(pg.output().is_empty());
        assert_eq!(wire.closed(), vec![run]);
    }

    #[test_log::test(tokio::test)]
    async fn a_new_run_clears_the_last_error() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "x");
        wire.emit(run, ConnectionEvent::Error("boom".into()));
        pg.wait_for_completion().await;
        assert!(pg.last_error().is_some());

        pg.run("python3", "x");
        assert_eq!(pg.last_error(), None);
        assert_eq!(pg.state(), SessionState::Connecting);
    }

    #[test_log::test(tokio::test)]
    async fn cancel_closes_the_session_and_ignores_later_events() {
        let (mut pg, wire) = playground();
        let mut status = pg.subscribe();
        let run = pg.run("python3", "while True: pass");
        wire.emit(run, ConnectionEvent::Opened);
        pg.next_event().await;

        pg.cancel();
        pg.cancel();
        assert_eq!(wire.closed(), vec![run]);
        assert_eq!(pg.state(), SessionState::Closed);
        assert!(pg.state().is_terminal());
        assert_eq!(pg.termination(), Some(&Termination::Cancelled));

        let seen = status.borrow_and_update().clone();
        assert_eq!(seen.state, SessionState::Closed);
        assert_eq!(seen.termination, Some(Termination::Cancelled));

        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Closed
            })
        ));

        wire.emit(run, ConnectionEvent::Data("late".into()));
        assert_eq!(pg.next_event().await, None);
        assert_eq!(pg.wait_for_completion().await, SessionState::Closed);
        assert!(pg.output().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn cancel_while_connecting_closes_the_session() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "print(1)");

        pg.cancel();
        assert_eq!(pg.state(), SessionState::Closed);
        assert_eq!(pg.termination(), Some(&Termination::Cancelled));
        assert_eq!(wire.closed(), vec![run]);
        assert!(wire.sent().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn input_racing_the_remote_close_is_refused_then_rejected() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "input()");
        wire.emit(run, ConnectionEvent::Opened);
        pg.next_event().await;

        // The service has gone but its closing event is still queued
        wire.hang_up(run);
        wire.emit(
            run,
            ConnectionEvent::Closed(Termination::Normal { reason: None }),
        );
        assert_eq!(pg.state(), SessionState::Running);
        assert!(matches!(pg.submit_input("x"), Err(Error::ChannelNotOpen)));

        pg.next_event().await;
        assert!(matches!(
            pg.submit_input("x"),
            Err(Error::ForwardingRejected {
                state: SessionState::Closed
            })
        ));
        assert_eq!(wire.sent().len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn observers_see_each_transition() {
        let (mut pg, wire) = playground();
        let mut status = pg.subscribe();
        let run = pg.run("python3", "print(1)");
        assert_eq!(status.borrow_and_update().state, SessionState::Connecting);

        wire.emit(run, ConnectionEvent::Opened);
        wire.emit(run, ConnectionEvent::Data("1".into()));
        pg.next_event().await;
        pg.next_event().await;

        let seen = status.borrow_and_update().clone();
        assert_eq!(seen.run, Some(run));
        assert_eq!(seen.state, SessionState::Running);
        assert_eq!(seen.output_len, 1);
    }

    #[test_log::test(tokio::test)]
    async fn dropping_the_client_closes_the_channel() {
        let (mut pg, wire) = playground();
        let run = pg.run("python3", "x");
        drop(pg);
        assert_eq!(wire.closed(), vec![run]);
    }
}
