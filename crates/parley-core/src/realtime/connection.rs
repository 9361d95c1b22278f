//! RealtimeConnection: the long-lived link and its reconnect state machine.
//!
//! A background task owns the link. It obtains a valid (or renewed) access
//! token, performs the handshake under `connect_timeout`, then pumps inbound
//! frames to subscribers in arrival order. Any failure moves the machine to
//! `Reconnecting`, waits out the backoff and tries again. `disconnect()`
//! cancels the task and pins the state at `Closed` until the next
//! `connect()`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use parley_types::ClientError;
use parley_types::config::{ClientConfig, ReconnectConfig};
use parley_types::frame::{InboundEvent, RealtimeFrame};
use parley_types::session::ConnectionState;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::transport::{FrameSink, FrameSource, RealtimeConnector};
use crate::event::EventBus;
use crate::session::AccessTokenSource;

/// Tunables for one realtime connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub connect_timeout: Duration,
    /// Consecutive malformed frames tolerated before the link is recycled.
    pub protocol_error_threshold: u32,
    pub reconnect: ReconnectConfig,
    pub event_buffer: usize,
}

impl ConnectionSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.realtime_url.clone(),
            connect_timeout: config.connect_timeout(),
            protocol_error_threshold: config.protocol_error_threshold,
            reconnect: config.reconnect.clone(),
            event_buffer: config.event_buffer,
        }
    }
}

struct Run {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner<C: RealtimeConnector> {
    connector: C,
    tokens: Arc<dyn AccessTokenSource>,
    settings: ConnectionSettings,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    sink: tokio::sync::Mutex<Option<C::Sink>>,
    events: EventBus<InboundEvent>,
    run: Mutex<Option<Run>>,
}

enum Handshake<S> {
    Open(S),
    Failed(ClientError),
    /// Neither a valid nor a renewable credential exists.
    NoCredentials(ClientError),
    Cancelled,
}

enum LinkExit {
    Cancelled,
    PeerClosed,
    Failed(ClientError),
    TooManyProtocolErrors,
}

/// Handle to the realtime link. Clones share the same connection.
pub struct RealtimeConnection<C: RealtimeConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: RealtimeConnector> Clone for RealtimeConnection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: RealtimeConnector> RealtimeConnection<C> {
    pub fn new(
        connector: C,
        tokens: Arc<dyn AccessTokenSource>,
        settings: ConnectionSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let events = EventBus::new(settings.event_buffer);
        Self {
            inner: Arc::new(Inner {
                connector,
                tokens,
                settings,
                state,
                attempts: AtomicU32::new(0),
                sink: tokio::sync::Mutex::new(None),
                events,
                run: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Reconnect attempts since the last successful `Open`.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.inner.settings.url
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Inbound events, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.inner.events.subscribe()
    }

    /// Start the background link task. No-op while one is already running.
    pub fn connect(&self) {
        let mut run = self.inner.lock_run();
        if let Some(existing) = run.as_ref() {
            if !existing.cancel.is_cancelled() && !existing.task.is_finished() {
                debug!("Realtime connection already running");
                return;
            }
        }

        let cancel = CancellationToken::new();
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.state.send_replace(ConnectionState::Connecting);
        info!(url = %self.inner.settings.url, "Connecting realtime");

        let task = tokio::spawn(run_link(Arc::clone(&self.inner), cancel.clone()));
        *run = Some(Run { cancel, task });
    }

    /// Stop the link and move to `Closed`. Idempotent.
    pub async fn disconnect(&self) {
        let run = self.inner.lock_run().take();
        if let Some(run) = &run {
            run.cancel.cancel();
        }

        let previous = self.inner.state.send_replace(ConnectionState::Closed);
        if previous != ConnectionState::Closed {
            info!(from = %previous, "Realtime disconnected");
        }
        self.inner.close_sink().await;

        if let Some(run) = run {
            if let Err(err) = run.task.await {
                if err.is_panic() {
                    warn!(error = %err, "Realtime task panicked");
                }
            }
        }
    }

    /// Send a frame. Only accepted while `Open`; there is no outbound queue.
    pub async fn send(&self, frame: &RealtimeFrame) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::NotConnected);
        }
        let text = frame.to_json()?;
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send_text(text).await,
            None => Err(ClientError::NotConnected),
        }
    }
}

impl<C: RealtimeConnector> std::fmt::Debug for RealtimeConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("url", &self.inner.settings.url)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl<C: RealtimeConnector> Inner<C> {
    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `next` unless this run was cancelled. Returns false once cancelled.
    fn transition(&self, cancel: &CancellationToken, next: ConnectionState) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if cancel.is_cancelled() {
                return false;
            }
            applied = true;
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Realtime state change");
            *state = next;
            true
        });
        applied
    }

    async fn close_sink(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(err) = sink.close().await {
                debug!(error = %err, "Closing realtime sink failed");
            }
        }
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Handshake<C::Source> {
        let token = tokio::select! {
            _ = cancel.cancelled() => return Handshake::Cancelled,
            token = self.tokens.access_token() => token,
        };
        let token = match token {
            Ok(token) => token,
            Err(err) if err.is_auth() => return Handshake::NoCredentials(err),
            Err(err) => return Handshake::Failed(err),
        };

        let timeout = self.settings.connect_timeout;
        let connected = tokio::select! {
            _ = cancel.cancelled() => return Handshake::Cancelled,
            result = tokio::time::timeout(
                timeout,
                self.connector.connect(&self.settings.url, &token),
            ) => result,
        };
        let (sink, source) = match connected {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return Handshake::Failed(err),
            Err(_) => return Handshake::Failed(ClientError::timeout("realtime handshake", timeout)),
        };

        *self.sink.lock().await = Some(sink);
        self.attempts.store(0, Ordering::SeqCst);
        if !self.transition(cancel, ConnectionState::Open) {
            self.close_sink().await;
            return Handshake::Cancelled;
        }
        info!(url = %self.settings.url, "Realtime connection open");
        Handshake::Open(source)
    }

    async fn pump(&self, mut source: C::Source, cancel: &CancellationToken) -> LinkExit {
        let threshold = self.settings.protocol_error_threshold.max(1);
        let mut malformed = 0u32;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return LinkExit::Cancelled,
                frame = source.next_frame() => frame,
            };
            let text = match frame {
                None => return LinkExit::PeerClosed,
                Some(Err(err)) => return LinkExit::Failed(err),
                Some(Ok(text)) => text,
            };
            match InboundEvent::parse(&text) {
                Ok(event) => {
                    malformed = 0;
                    debug!(
                        kind = ?event.kind(),
                        conversation_id = ?event.conversation_id(),
                        "Inbound realtime event"
                    );
                    self.events.publish(event);
                }
                Err(err) => {
                    malformed += 1;
                    warn!(
                        error = %err,
                        consecutive = malformed,
                        "Ignoring malformed realtime frame"
                    );
                    if malformed >= threshold {
                        return LinkExit::TooManyProtocolErrors;
                    }
                }
            }
        }
    }
}

async fn run_link<C: RealtimeConnector>(inner: Arc<Inner<C>>, cancel: CancellationToken) {
    let mut backoff = Backoff::from_config(&inner.settings.reconnect);

    loop {
        if !inner.transition(&cancel, ConnectionState::Connecting) {
            return;
        }

        match inner.handshake(&cancel).await {
            Handshake::Cancelled => return,
            Handshake::NoCredentials(err) => {
                warn!(error = %err, "No usable credentials, closing realtime connection");
                inner.transition(&cancel, ConnectionState::Closed);
                return;
            }
            Handshake::Failed(err) => {
                let attempt = inner.attempts.load(Ordering::SeqCst);
                warn!(attempt, error = %err, "Realtime handshake failed");
            }
            Handshake::Open(source) => {
                backoff.reset();
                let exit = inner.pump(source, &cancel).await;
                inner.close_sink().await;
                match exit {
                    LinkExit::Cancelled => return,
                    LinkExit::PeerClosed => warn!("Realtime link closed by peer"),
                    LinkExit::Failed(err) => warn!(error = %err, "Realtime link failed"),
                    LinkExit::TooManyProtocolErrors => warn!(
                        threshold = inner.settings.protocol_error_threshold,
                        "Too many malformed frames, recycling realtime link"
                    ),
                }
            }
        }

        let attempts = inner.attempts.load(Ordering::SeqCst);
        if let Some(max) = inner.settings.reconnect.max_attempts {
            if attempts >= max {
                warn!(attempts, "Reconnect attempts exhausted, closing realtime connection");
                inner.transition(&cancel, ConnectionState::Closed);
                return;
            }
        }

        if !inner.transition(&cancel, ConnectionState::Reconnecting) {
            return;
        }
        let delay = backoff.next_delay();
        debug!(?delay, attempt = attempts + 1, "Waiting before reconnect");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        inner.attempts.fetch_add(1, Ordering::SeqCst);
    }
}
