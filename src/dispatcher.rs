//! Command dispatcher - the single owner of a connection's command pipeline.
//!
//! One task per connection owns the FIFO of pending commands, the pacing
//! gate, the keepalive ticker and the connection state. Callers talk to it
//! only through [`DispatcherHandle`]:
//!
//! ```text
//! submit ─► mpsc ─┐
//! reader ─► mpsc ─┼─► Dispatcher task ─► WriterHandle ─► TCP
//! timers ─────────┘         │
//!                           ├─► oneshot replies (FIFO order)
//!                           └─► NotificationRouter
//! ```
//!
//! The protocol has no request ids. Responses are matched purely by
//! position, so at most one command is on the wire at a time and the next
//! one is written only after the previous status line arrived.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::codec::{build_response, is_status_line, Command, Record};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, QueryError, Result};
use crate::notify::{Notification, NotificationRouter};
use crate::pacing::PacingGate;
use crate::transport::TransportEvent;
use crate::writer::WriterHandle;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the server greeting.
    Connecting,
    /// Accepting commands.
    Ready,
    /// Closed; every later submit fails.
    Closed,
}

/// Events published toward the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Greeting received, commands accepted.
    Ready,
    /// Connection closed, with a human-readable reason.
    Closed(String),
    /// A fire-and-forget command (keepalive) failed.
    ProtocolError(ProtocolError),
}

/// Reply channel for one submitted command.
pub(crate) type ReplySender = oneshot::Sender<Result<Vec<Record>>>;

/// Messages accepted by the dispatcher task.
#[derive(Debug)]
pub(crate) enum DispatcherMessage {
    /// Queue an already encoded command line.
    Submit { line: String, reply: ReplySender },
    /// Close the connection and flush the FIFO.
    Shutdown,
}

/// Who is waiting for a pending command.
#[derive(Debug)]
enum Waiter {
    Caller(ReplySender),
    Keepalive,
}

/// A queued command and whoever waits for it.
#[derive(Debug)]
struct PendingCall {
    line: String,
    waiter: Waiter,
}

impl PendingCall {
    fn settle(self, outcome: Result<Vec<Record>>, events: &broadcast::Sender<ClientEvent>) {
        match self.waiter {
            Waiter::Caller(reply) => {
                if reply.send(outcome).is_err() {
                    tracing::debug!("Caller dropped before '{}' settled", self.line);
                }
            }
            Waiter::Keepalive => {
                if let Err(e) = outcome {
                    tracing::warn!("Keepalive '{}' failed: {}", self.line, e);
                    if let QueryError::Protocol(err) = e {
                        let _ = events.send(ClientEvent::ProtocolError(err));
                    }
                }
            }
        }
    }
}

/// Handle for submitting commands to the dispatcher task.
///
/// This is cheaply cloneable.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<DispatcherMessage>,
    state: watch::Receiver<ConnectionState>,
}

impl DispatcherHandle {
    /// Encode and submit a command, waiting for its outcome.
    ///
    /// Serialization errors are returned before anything is queued.
    pub async fn submit(&self, command: &Command) -> Result<Vec<Record>> {
        let line = command.encode()?;
        self.submit_line(line).await
    }

    /// Submit an already encoded line.
    pub(crate) async fn submit_line(&self, line: String) -> Result<Vec<Record>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DispatcherMessage::Submit { line, reply })
            .await
            .map_err(|_| QueryError::NotConnected)?;
        rx.await.unwrap_or(Err(QueryError::ConnectionClosed))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the greeting was received.
    ///
    /// Fails with [`QueryError::ConnectionClosed`] if the connection closes
    /// first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            match *state.borrow_and_update() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Closed => return Err(QueryError::ConnectionClosed),
                ConnectionState::Connecting => {}
            }
            if state.changed().await.is_err() {
                return Err(QueryError::ConnectionClosed);
            }
        }
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Ask the dispatcher to close the connection.
    ///
    /// Pending commands settle with [`QueryError::ConnectionClosed`].
    pub async fn shutdown(&self) {
        let _ = self.tx.send(DispatcherMessage::Shutdown).await;
    }
}

/// Dispatcher state, owned by its task.
struct Dispatcher {
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Queued commands; the head is in flight when `in_flight` is set.
    fifo: VecDeque<PendingCall>,
    in_flight: bool,
    /// Data lines received for the in-flight command.
    response_lines: Vec<String>,
    gate: PacingGate,
    greeting_lines: usize,
    greeting_seen: usize,
    server_identifier: String,
    keepalive_line: Option<String>,
    router: NotificationRouter,
    writer: WriterHandle,
    events: broadcast::Sender<ClientEvent>,
}

/// Spawn the dispatcher task.
///
/// Returns the handle and the task's join handle. The task ends when the
/// connection closes.
pub(crate) fn spawn_dispatcher(
    config: &ClientConfig,
    writer: WriterHandle,
    router: NotificationRouter,
    transport: mpsc::Receiver<TransportEvent>,
    events: broadcast::Sender<ClientEvent>,
) -> (DispatcherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

    let keepalive_line = if config.keepalive.enabled {
        match Command::new(config.keepalive.command.as_str()).encode() {
            Ok(line) => Some(line),
            Err(e) => {
                tracing::warn!("Keepalive disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    let keepalive = keepalive_line
        .as_ref()
        .map(|_| keepalive_interval(config.keepalive_interval()));

    let dispatcher = Dispatcher {
        state: ConnectionState::Connecting,
        state_tx,
        fifo: VecDeque::new(),
        in_flight: false,
        response_lines: Vec::new(),
        gate: PacingGate::from_config(&config.pacing),
        greeting_lines: config.greeting_lines,
        greeting_seen: 0,
        server_identifier: config.server_identifier.clone(),
        keepalive_line,
        router,
        writer,
        events,
    };

    let task = tokio::spawn(dispatcher.run(rx, transport, keepalive));
    let handle = DispatcherHandle {
        tx,
        state: state_rx,
    };
    (handle, task)
}

fn keepalive_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Tick an optional interval; pends forever when there is none.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Sleep until a deadline; pends forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

impl Dispatcher {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<DispatcherMessage>,
        mut transport: mpsc::Receiver<TransportEvent>,
        mut keepalive: Option<Interval>,
    ) {
        if self.greeting_lines == 0 {
            self.become_ready();
        }

        while self.state != ConnectionState::Closed {
            let gate_wake = self.gate_wake();

            tokio::select! {
                biased;

                event = transport.recv() => match event {
                    Some(TransportEvent::Line(line)) => self.handle_line(line).await,
                    Some(TransportEvent::Closed(None)) | None => {
                        self.close("connection closed by server");
                    }
                    Some(TransportEvent::Closed(Some(e))) => self.close(&e.to_string()),
                },

                message = requests.recv() => match message {
                    Some(DispatcherMessage::Submit { line, reply }) => {
                        self.enqueue(line, Waiter::Caller(reply)).await;
                    }
                    Some(DispatcherMessage::Shutdown) | None => self.close("client shut down"),
                },

                _ = sleep_until(gate_wake), if gate_wake.is_some() => self.pump().await,

                _ = tick(&mut keepalive), if keepalive.is_some() => self.keepalive().await,
            }
        }

        // Reject whatever raced in after the close
        requests.close();
        while let Ok(message) = requests.try_recv() {
            if let DispatcherMessage::Submit { reply, .. } = message {
                let _ = reply.send(Err(QueryError::NotConnected));
            }
        }
    }

    /// Deadline at which a waiting head command may be written.
    ///
    /// A deadline already passed wakes the loop at once, so a head left
    /// behind by a line that did not pump is still written.
    fn gate_wake(&self) -> Option<Instant> {
        if self.in_flight || self.fifo.is_empty() || self.state != ConnectionState::Ready {
            return None;
        }
        self.gate.reopens_at()
    }

    async fn enqueue(&mut self, line: String, waiter: Waiter) {
        if self.state != ConnectionState::Ready {
            PendingCall { line, waiter }.settle(Err(QueryError::NotConnected), &self.events);
            return;
        }
        self.fifo.push_back(PendingCall { line, waiter });
        self.pump().await;
    }

    async fn keepalive(&mut self) {
        if self.state != ConnectionState::Ready {
            return;
        }
        if self
            .fifo
            .iter()
            .any(|call| matches!(call.waiter, Waiter::Keepalive))
        {
            tracing::trace!("Keepalive already pending, skipping tick");
            return;
        }
        if let Some(line) = self.keepalive_line.clone() {
            tracing::trace!("Keepalive tick");
            self.enqueue(line, Waiter::Keepalive).await;
        }
    }

    /// Write the head command if nothing is in flight and the gate is open.
    async fn pump(&mut self) {
        if self.in_flight || self.state != ConnectionState::Ready {
            return;
        }
        let Some(head) = self.fifo.front() else {
            return;
        };

        let now = Instant::now();
        if !self.gate.is_open(now) {
            return;
        }

        if self.writer.is_closed() {
            self.close("writer stopped");
            return;
        }

        let line = head.line.clone();
        self.in_flight = true;
        self.response_lines.clear();
        self.gate.close(now);

        tracing::debug!("-> {} ({} unflushed)", line, self.writer.pending_count());
        if let Err(e) = self.writer.send(&line).await {
            self.close(&e.to_string());
        }
    }

    async fn handle_line(&mut self, line: String) {
        match self.state {
            ConnectionState::Connecting => self.handle_greeting(&line),
            ConnectionState::Ready => {
                if let Some(notification) = Notification::parse(&line) {
                    tracing::debug!("Notification '{}'", notification.event);
                    self.router.dispatch(&notification);
                } else if is_status_line(&line) {
                    self.settle_head(&line);
                    self.pump().await;
                } else if self.in_flight {
                    self.response_lines.push(line);
                } else {
                    tracing::warn!("Dropping unsolicited line: {}", line);
                }
            }
            ConnectionState::Closed => {}
        }
    }

    fn handle_greeting(&mut self, line: &str) {
        if self.greeting_seen == 0 && line != self.server_identifier {
            let reason = format!(
                "expected server identifier '{}', got '{}'",
                self.server_identifier, line
            );
            tracing::error!("Handshake failed: {}", reason);
            self.close(&QueryError::Handshake(reason).to_string());
            return;
        }

        self.greeting_seen += 1;
        if self.greeting_seen >= self.greeting_lines {
            self.become_ready();
        }
    }

    fn become_ready(&mut self) {
        self.state = ConnectionState::Ready;
        self.state_tx.send_replace(ConnectionState::Ready);
        tracing::debug!("Connection ready");
        let _ = self.events.send(ClientEvent::Ready);
    }

    /// Settle the in-flight head with the given status line.
    fn settle_head(&mut self, status: &str) {
        if !self.in_flight {
            tracing::warn!("Status line without pending command: {}", status);
            return;
        }
        self.in_flight = false;

        let lines = std::mem::take(&mut self.response_lines);
        let outcome = build_response(&lines, status);
        if let Some(call) = self.fifo.pop_front() {
            tracing::debug!("<- {} ({})", status, call.line);
            call.settle(outcome, &self.events);
        }
    }

    /// Close the connection and flush the FIFO in order.
    fn close(&mut self, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        tracing::debug!("Connection closed: {}", reason);
        self.state = ConnectionState::Closed;
        self.in_flight = false;
        self.response_lines.clear();

        for call in self.fifo.drain(..) {
            call.settle(Err(QueryError::ConnectionClosed), &self.events);
        }

        let _ = self.events.send(ClientEvent::Closed(reason.to_string()));
        self.state_tx.send_replace(ConnectionState::Closed);
    }
}
