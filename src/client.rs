//! Client builder and connection facade.
//!
//! The [`ClientBuilder`] collects configuration and notification handlers.
//! Starting it wires up one connection:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task and the reader task
//! 3. Spawn the dispatcher owning the command FIFO
//! 4. Wait for the server greeting
//!
//! # Example
//!
//! ```ignore
//! use serverquery_client::{Client, Command};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .on("cliententerview", |n| println!("joined: {:?}", n.first()))
//!         .connect("127.0.0.1:10011")
//!         .await?;
//!
//!     client.login("serveradmin", "secret").await?;
//!     client.use_server(1).await?;
//!     client.register_event("server", None).await?;
//!
//!     let channels = client.submit_cached(&Command::new("channellist")).await?;
//!     println!("{} channels", channels.len());
//!
//!     client.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::ToSocketAddrs;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cache::{CoalescingCache, SharedOutcome};
use crate::codec::{Command, Record};
use crate::config::ClientConfig;
use crate::dispatcher::{spawn_dispatcher, ClientEvent, ConnectionState, DispatcherHandle};
use crate::error::{QueryError, Result};
use crate::notify::{Notification, NotificationHandler, NotificationRouter, SubscriptionId};
use crate::transport::{connect, spawn_reader_task};
use crate::writer::spawn_writer_task;

/// Capacity of the application event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Builder for configuring and starting a query client.
pub struct ClientBuilder {
    config: ClientConfig,
    subscriptions: Vec<(String, NotificationHandler)>,
}

impl ClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            subscriptions: Vec::new(),
        }
    }

    /// Enable or disable the pacing gate.
    ///
    /// Default: enabled
    pub fn pacing(mut self, enabled: bool) -> Self {
        self.config.pacing.enabled = enabled;
        self
    }

    /// Set the minimum gap between two command writes.
    ///
    /// Default: 350ms
    pub fn pacing_interval(mut self, interval: Duration) -> Self {
        self.config.pacing.interval_ms = duration_ms(interval);
        self
    }

    /// Enable or disable the keepalive command.
    ///
    /// Default: enabled
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.config.keepalive.enabled = enabled;
        self
    }

    /// Set the keepalive period.
    ///
    /// Default: 240 seconds
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive.interval_ms = duration_ms(interval);
        self
    }

    /// Set the command sent on each keepalive tick.
    ///
    /// Default: `version`
    pub fn keepalive_command(mut self, command: &str) -> Self {
        self.config.keepalive.command = command.to_string();
        self
    }

    /// Set how long a settled cached outcome is reused.
    ///
    /// Default: 50ms
    pub fn cache_grace(mut self, grace: Duration) -> Self {
        self.config.cache_grace_ms = duration_ms(grace);
        self
    }

    /// Set how many greeting lines precede the ready state.
    ///
    /// Default: 2
    pub fn greeting_lines(mut self, lines: usize) -> Self {
        self.config.greeting_lines = lines;
        self
    }

    /// Set the expected first greeting line.
    ///
    /// Default: `TS3`
    pub fn server_identifier(mut self, identifier: &str) -> Self {
        self.config.server_identifier = identifier.to_string();
        self
    }

    /// Set the capacity of the internal request and line channels.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the timeout covering TCP connect and the greeting.
    ///
    /// Default: 10 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Register a notification handler, active from the first line on.
    pub fn on<F>(mut self, event: &str, handler: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.subscriptions.push((event.to_string(), Arc::new(handler)));
        self
    }

    /// Connect over TCP and start the client.
    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = connect(addr, self.config.connect_timeout()).await?;
        self.start(stream).await
    }

    /// Start the client on an already established stream.
    ///
    /// Returns once the greeting was received.
    pub async fn start<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Client::start(self.config, self.subscriptions, stream).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A connected query client.
///
/// Commands are serialized onto the wire one at a time. Cloning is not
/// supported; share it behind an `Arc`.
pub struct Client {
    dispatcher: DispatcherHandle,
    router: NotificationRouter,
    cache: CoalescingCache,
    events: broadcast::Sender<ClientEvent>,
    dispatcher_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    async fn start<S>(
        config: ClientConfig,
        subscriptions: Vec<(String, NotificationHandler)>,
        stream: S,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let (writer, writer_task) = spawn_writer_task(write_half, config.channel_capacity);

        let (lines_tx, lines_rx) = mpsc::channel(config.channel_capacity.max(1));
        let reader_task = spawn_reader_task(read_half, lines_tx);

        let router = NotificationRouter::new();
        for (event, handler) in subscriptions {
            router.subscribe_arc(&event, handler);
        }

        let (events, mut early_events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (dispatcher, dispatcher_task) =
            spawn_dispatcher(&config, writer, router.clone(), lines_rx, events.clone());

        let client = Client {
            dispatcher,
            router,
            cache: CoalescingCache::new(config.cache_grace()),
            events,
            dispatcher_task,
            reader_task,
            _writer_task: writer_task,
        };

        let timeout = config.connect_timeout();
        match tokio::time::timeout(timeout, client.dispatcher.wait_ready()).await {
            Ok(Ok(())) => Ok(client),
            Ok(Err(_)) => {
                let mut reason = String::from("connection closed during greeting");
                while let Ok(event) = early_events.try_recv() {
                    if let ClientEvent::Closed(r) = event {
                        reason = r;
                    }
                }
                Err(QueryError::Handshake(reason))
            }
            Err(_) => {
                client.close().await;
                Err(QueryError::Handshake(format!(
                    "no greeting within {timeout:?}"
                )))
            }
        }
    }

    /// Submit a command and wait for its records.
    ///
    /// # Errors
    ///
    /// - [`QueryError::Serialization`] before anything is written
    /// - [`QueryError::Protocol`] when the server rejects the command
    /// - transport errors when the connection is gone
    pub async fn submit(&self, command: &Command) -> Result<Vec<Record>> {
        self.dispatcher.submit(command).await
    }

    /// Submit through the coalescing cache.
    ///
    /// Identical commands in flight (or settled within the grace window)
    /// share one dispatch and one outcome.
    pub async fn submit_cached(&self, command: &Command) -> SharedOutcome {
        let dispatcher = self.dispatcher.clone();
        self.cache
            .call(command, move |line| async move {
                dispatcher.submit_line(line).await
            })
            .await
    }

    /// Subscribe to a notification event.
    pub fn subscribe<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.router.subscribe(event, handler)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    /// Receive connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    /// Ask the server to send notifications for `event`.
    ///
    /// `id` selects the channel for `channel` / `textchannel` events.
    pub async fn register_event(&self, event: &str, id: Option<u32>) -> Result<()> {
        let command = Command::new("servernotifyregister")
            .arg("event", event)
            .arg_opt("id", id);
        self.submit(&command).await.map(drop)
    }

    /// Stop every notification registration.
    pub async fn unregister_events(&self) -> Result<()> {
        self.submit(&Command::new("servernotifyunregister"))
            .await
            .map(drop)
    }

    /// Authenticate the query session.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let command = Command::new("login")
            .arg("client_login_name", username)
            .arg("client_login_password", password);
        self.submit(&command).await.map(drop)
    }

    /// Select the virtual server by id.
    pub async fn use_server(&self, sid: u32) -> Result<()> {
        self.submit(&Command::new("use").arg("sid", sid))
            .await
            .map(drop)
    }

    /// Server version record.
    pub async fn version(&self) -> Result<Record> {
        self.first_cached(&Command::new("version")).await
    }

    /// The query session's own identity.
    pub async fn whoami(&self) -> Result<Record> {
        self.first_cached(&Command::new("whoami")).await
    }

    async fn first_cached(&self, command: &Command) -> Result<Record> {
        let records = self.submit_cached(command).await?;
        Ok(records.first().cloned().unwrap_or_default())
    }

    /// Send `quit` and wait for the server to hang up.
    pub async fn quit(&self) -> Result<()> {
        match self.submit(&Command::new("quit")).await {
            Ok(_) | Err(QueryError::ConnectionClosed) => {}
            Err(e) => return Err(e),
        }
        self.dispatcher.closed().await;
        Ok(())
    }

    /// Close the connection locally.
    ///
    /// Pending commands settle with [`QueryError::ConnectionClosed`].
    pub async fn close(&self) {
        self.dispatcher.shutdown().await;
        self.dispatcher.closed().await;
        self.reader_task.abort();
    }

    /// Wait until the connection closes.
    ///
    /// This consumes the client.
    pub async fn wait_for_shutdown(mut self) -> Result<()> {
        let _ = (&mut self.dispatcher_task).await;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
