//! Connection driver task.
//!
//! One task per connection owns the TLS socket, the response parser and the
//! ordered list of in-flight request contexts. Callers never touch any of it;
//! they send a [`Command`] and wait on its completion handle.
//!
//! ```text
//!            ┌──────────────── failure / EOF (backoff) ───────────────┐
//!            │  ┌──────────── `Connection: close` (immediate) ────────┤
//!            ▼  ▼                                                     │
//!      Disconnected ──▶ Connecting ──▶ Connected ──▶ serve loop ──────┘
//!            ▲              │
//!            └─ cap reached ┘  (queued requests rejected, idle until next command)
//!
//!      shutdown at any point ──▶ Destroyed (every pending request rejected)
//! ```

use bytes::BytesMut;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::client::TlsStream;

use crate::error::{ConnectError, TunnelError, TunnelResult};
use crate::http::decode::ResponseAccumulator;
use crate::http::parser::{ParseEvent, ResponseParser};
use crate::http::Response;
use crate::lifecycle::ShutdownSignal;
use crate::net::connect::establish;
use crate::net::connection::{ConnectionId, ConnectionSettings, ConnectionState};
use crate::observability::metrics;
use crate::resilience::ReconnectPolicy;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A framed request handed to the driver.
#[derive(Debug)]
pub struct Command {
    pub seq: u64,
    pub frame: Vec<u8>,
    pub bodyless: bool,
    pub parse_json: bool,
    pub evaluate_headers: bool,
    pub completion: oneshot::Sender<TunnelResult<Response>>,
}

impl Command {
    fn reject(self, err: TunnelError) {
        let _ = self.completion.send(Err(err));
    }
}

/// Response assembly state for one written request.
struct RequestContext {
    seq: u64,
    parse_json: bool,
    evaluate_headers: bool,
    /// The server announced it closes the connection after this response.
    close: bool,
    accumulator: Option<ResponseAccumulator>,
    completion: oneshot::Sender<TunnelResult<Response>>,
}

impl RequestContext {
    fn new(command: Command) -> Self {
        Self {
            seq: command.seq,
            parse_json: command.parse_json,
            evaluate_headers: command.evaluate_headers,
            close: false,
            accumulator: None,
            completion: command.completion,
        }
    }

    fn complete(self, id: ConnectionId) {
        if self.completion.is_closed() {
            tracing::debug!(connection_id = %id, seq = self.seq, "Discarding late response");
            return;
        }
        let result = match self.accumulator {
            Some(accumulator) => accumulator.finish(self.parse_json),
            None => Err(ConnectError::Protocol("message completed without a head".into()).into()),
        };
        let _ = self.completion.send(result);
    }

    fn fail(self, err: TunnelError) {
        let _ = self.completion.send(Err(err));
    }
}

enum ServeOutcome {
    Lost(ConnectError),
    /// The server ended the connection after a complete response.
    Closed,
    Shutdown,
}

pub struct Driver {
    id: ConnectionId,
    settings: Arc<ConnectionSettings>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    shutdown: ShutdownSignal,
    policy: ReconnectPolicy,
    /// Commands picked up while idle, written first once connected.
    backlog: VecDeque<Command>,
}

impl Driver {
    pub fn new(
        id: ConnectionId,
        settings: Arc<ConnectionSettings>,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let policy = ReconnectPolicy::new(&settings.reconnect);
        Self {
            id,
            settings,
            commands,
            state,
            shutdown,
            policy,
            backlog: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            let Some(stream) = self.connect().await else {
                break;
            };
            match self.serve(stream).await {
                ServeOutcome::Shutdown => break,
                ServeOutcome::Lost(err) => {
                    tracing::warn!(connection_id = %self.id, error = %err, "Connection lost, reconnecting");
                    metrics::record_reconnect();
                    // A connection that drops right after connecting must not spin.
                    self.policy.record_failure();
                }
                ServeOutcome::Closed => {
                    tracing::debug!(connection_id = %self.id, "Server closed connection, reconnecting");
                    metrics::record_reconnect();
                }
            }
        }
        self.teardown();
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(connection_id = %self.id, state = ?state, "Connection state changed");
        }
    }

    /// Connect with backoff. `None` means shutdown was requested.
    async fn connect(&mut self) -> Option<TlsStream<TcpStream>> {
        loop {
            let delay = self.policy.next_delay();
            if delay > Duration::ZERO {
                tokio::select! {
                    _ = self.shutdown.wait() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(ConnectionState::Connecting);
            let attempt = self.policy.attempts() + 1;
            tracing::debug!(connection_id = %self.id, attempt, "Connecting through proxy");

            let result = tokio::select! {
                _ = self.shutdown.wait() => return None,
                result = establish(&self.settings) => result,
            };

            match result {
                Ok(stream) => {
                    self.policy.reset();
                    self.set_state(ConnectionState::Connected);
                    tracing::info!(
                        connection_id = %self.id,
                        endpoint = %self.settings.target.authority(),
                        "Tunnel connected"
                    );
                    return Some(stream);
                }
                Err(err) => {
                    metrics::record_connect_failure(&err);
                    self.set_state(ConnectionState::Disconnected);
                    tracing::warn!(connection_id = %self.id, attempt, error = %err, "Connect attempt failed");

                    if !self.policy.record_failure() {
                        let exhausted = ConnectError::Exhausted {
                            attempts: self.policy.attempts(),
                            last: Box::new(err),
                        };
                        tracing::error!(connection_id = %self.id, error = %exhausted, "Giving up on connect cycle");
                        self.policy.reset();
                        self.reject_waiting(exhausted.into());

                        // Idle until someone asks again.
                        tokio::select! {
                            _ = self.shutdown.wait() => return None,
                            command = self.commands.recv() => match command {
                                Some(command) => self.backlog.push_back(command),
                                None => return None,
                            },
                        }
                    }
                }
            }
        }
    }

    /// Reject everything not yet written.
    fn reject_waiting(&mut self, err: TunnelError) {
        for command in self.backlog.drain(..) {
            command.reject(err.clone());
        }
        while let Ok(command) = self.commands.try_recv() {
            command.reject(err.clone());
        }
    }

    async fn serve(&mut self, mut stream: TlsStream<TcpStream>) -> ServeOutcome {
        let mut parser = ResponseParser::new();
        let mut in_flight: VecDeque<RequestContext> = VecDeque::new();
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        metrics::record_connection_up();

        let mut outcome = None;
        while let Some(command) = self.backlog.pop_front() {
            if let Err(err) = dispatch(self.id, &mut stream, &mut parser, &mut in_flight, command).await {
                outcome = Some(ServeOutcome::Lost(err));
                break;
            }
        }

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => loop {
                tokio::select! {
                    _ = self.shutdown.wait() => break ServeOutcome::Shutdown,
                    command = self.commands.recv() => match command {
                        Some(command) => {
                            if let Err(err) = dispatch(self.id, &mut stream, &mut parser, &mut in_flight, command).await {
                                break ServeOutcome::Lost(err);
                            }
                        }
                        None => break ServeOutcome::Shutdown,
                    },
                    read = stream.read_buf(&mut read_buf) => {
                        let step = match read {
                            Ok(0) => self.end_of_stream(&mut parser, &mut in_flight),
                            // rustls reports a TCP close without close_notify this way.
                            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                                self.end_of_stream(&mut parser, &mut in_flight)
                            }
                            Ok(_) => {
                                let events = parser.execute(&read_buf);
                                read_buf.clear();
                                events.and_then(|events| self.apply(events, &mut in_flight))
                            }
                            Err(e) => Err(ConnectError::Socket(e.to_string())),
                        };
                        match step {
                            Ok(false) => {}
                            // Nothing more may be written once the server said it will close.
                            Ok(true) => break ServeOutcome::Closed,
                            Err(err) => break ServeOutcome::Lost(err),
                        }
                    }
                }
            },
        };

        metrics::record_connection_down();
        let reason = match &outcome {
            ServeOutcome::Lost(err) => TunnelError::Connect(err.clone()),
            ServeOutcome::Closed => TunnelError::Connect(ConnectError::Closed),
            ServeOutcome::Shutdown => TunnelError::Destroyed,
        };
        if !in_flight.is_empty() {
            tracing::debug!(
                connection_id = %self.id,
                in_flight = in_flight.len(),
                error = %reason,
                "Rejecting in-flight requests"
            );
        }
        for context in in_flight.drain(..) {
            context.fail(reason.clone());
        }
        if !matches!(outcome, ServeOutcome::Shutdown) {
            self.set_state(ConnectionState::Disconnected);
        }
        drop(stream);
        outcome
    }

    /// The peer closed the stream. A close-delimited body completes here;
    /// anything still pending is lost.
    fn end_of_stream(
        &self,
        parser: &mut ResponseParser,
        in_flight: &mut VecDeque<RequestContext>,
    ) -> Result<bool, ConnectError> {
        let events = parser.finish()?;
        if self.apply(events, in_flight)? {
            Ok(true)
        } else {
            Err(ConnectError::Closed)
        }
    }

    /// Route parser events to the front in-flight context.
    ///
    /// Returns true once a response marked `close` has completed.
    fn apply(
        &self,
        events: Vec<ParseEvent>,
        in_flight: &mut VecDeque<RequestContext>,
    ) -> Result<bool, ConnectError> {
        for event in events {
            match event {
                ParseEvent::Head { status, headers, close } => {
                    let context = in_flight.front_mut().ok_or_else(|| {
                        ConnectError::Protocol("response received with no request in flight".into())
                    })?;
                    context.close = close;
                    context.accumulator = Some(ResponseAccumulator::begin(
                        status,
                        &headers,
                        context.evaluate_headers,
                    ));
                }
                ParseEvent::Body(chunk) => {
                    if let Some(accumulator) =
                        in_flight.front_mut().and_then(|c| c.accumulator.as_mut())
                    {
                        accumulator.push(&chunk);
                    }
                }
                ParseEvent::Complete => {
                    let context = in_flight.pop_front().ok_or_else(|| {
                        ConnectError::Protocol("response completed with no request in flight".into())
                    })?;
                    let close = context.close;
                    context.complete(self.id);
                    if close {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    fn teardown(&mut self) {
        self.commands.close();
        self.reject_waiting(TunnelError::Destroyed);
        self.set_state(ConnectionState::Destroyed);
        tracing::debug!(connection_id = %self.id, "Driver stopped");
    }
}

/// Write one request frame and register its context.
async fn dispatch(
    id: ConnectionId,
    stream: &mut TlsStream<TcpStream>,
    parser: &mut ResponseParser,
    in_flight: &mut VecDeque<RequestContext>,
    mut command: Command,
) -> Result<(), ConnectError> {
    if command.completion.is_closed() {
        tracing::debug!(connection_id = %id, seq = command.seq, "Caller gone before write, skipping");
        return Ok(());
    }

    tracing::trace!(connection_id = %id, seq = command.seq, bytes = command.frame.len(), "Writing request");
    parser.expect_response(command.bodyless);
    let frame = std::mem::take(&mut command.frame);
    in_flight.push_back(RequestContext::new(command));

    stream
        .write_all(&frame)
        .await
        .map_err(|e| ConnectError::Socket(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| ConnectError::Socket(e.to_string()))
}
