//! MessageDeliveryCoordinator: optimistic sends over realtime or REST.
//!
//! Every send is validated, recorded as `Pending` in the [`MessageLog`] and
//! then delivered on a spawned task. While the realtime link is open the
//! message goes out as a `chat_message` frame and the task waits for the
//! inbound event carrying the same correlation id. Otherwise (or when the
//! frame cannot be written) the REST endpoint is used and the response is
//! reconciled against the record with that correlation id.
//!
//! A delivery belongs to the log generation it was queued under; once
//! [`reset`](MessageDeliveryCoordinator::reset) starts a new one, its late
//! results are dropped.

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parley_types::ClientError;
use parley_types::chat::{
    DeliveryChannel, DeliveryReceipt, LogChange, LogRecord, MessageStatus, OutboundMessage,
    SendMessageRequest,
};
use parley_types::config::ClientConfig;
use parley_types::frame::{ChatMessageEvent, ErrorEvent, InboundEvent, RealtimeFrame};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::log::{MessageLog, Settlement};
use crate::realtime::{RealtimeConnection, RealtimeConnector};
use crate::session::{HttpTransport, SessionGateway};

/// What the dispatcher hands to a delivery waiting on the realtime channel.
#[derive(Debug)]
enum AckOutcome {
    Confirmed(ChatMessageEvent),
    Rejected(ErrorEvent),
}

enum RealtimeAttempt {
    Settled(Result<DeliveryReceipt, ClientError>),
    /// The frame never left; the record is still outstanding.
    NotSent(ClientError),
}

struct CoordinatorInner<T: HttpTransport, C: RealtimeConnector> {
    gateway: Arc<SessionGateway<T>>,
    connection: RealtimeConnection<C>,
    log: MessageLog,
    /// Realtime deliveries waiting for their correlated ack.
    pending: DashMap<Uuid, oneshot::Sender<AckOutcome>>,
    conversation: RwLock<Option<String>>,
    max_length: usize,
    ack_timeout: Duration,
    shutdown: CancellationToken,
}

pub struct MessageDeliveryCoordinator<T: HttpTransport, C: RealtimeConnector> {
    inner: Arc<CoordinatorInner<T, C>>,
}

impl<T: HttpTransport, C: RealtimeConnector> Clone for MessageDeliveryCoordinator<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HttpTransport, C: RealtimeConnector> MessageDeliveryCoordinator<T, C> {
    /// Create the coordinator and start its inbound dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        gateway: Arc<SessionGateway<T>>,
        connection: RealtimeConnection<C>,
        config: &ClientConfig,
    ) -> Self {
        let events = connection.subscribe();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(CoordinatorInner {
            gateway,
            connection,
            log: MessageLog::new(config.event_buffer),
            pending: DashMap::new(),
            conversation: RwLock::new(None),
            max_length: config.max_message_length,
            ack_timeout: config.ack_timeout(),
            shutdown: shutdown.clone(),
        });
        tokio::spawn(dispatch(Arc::downgrade(&inner), events, shutdown));
        Self { inner }
    }

    /// Record `content` and deliver it in the background.
    ///
    /// Returns the correlation id of the new `Pending` record. Delivery
    /// progress is published on [`subscribe`](Self::subscribe).
    pub fn send(&self, content: &str, conversation_id: Option<&str>) -> Result<Uuid, ClientError> {
        let (message, generation) = self.inner.prepare(content, conversation_id)?;
        let correlation_id = message.correlation_id;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _ = inner.deliver(message, generation).await;
        });
        Ok(correlation_id)
    }

    /// Like [`send`](Self::send) but waits for the delivery outcome.
    ///
    /// Delivery runs on its own task, so dropping this future does not
    /// abandon the message.
    pub async fn send_and_wait(
        &self,
        content: &str,
        conversation_id: Option<&str>,
    ) -> Result<DeliveryReceipt, ClientError> {
        let (message, generation) = self.inner.prepare(content, conversation_id)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.deliver(message, generation).await })
            .await
            .map_err(|e| ClientError::Network(format!("delivery task failed: {e}")))?
    }

    /// Withdraw a `Failed` record and send its content again under a fresh
    /// correlation id.
    pub fn retry(&self, correlation_id: Uuid) -> Result<Uuid, ClientError> {
        let failed = self.inner.log.remove_failed(correlation_id).ok_or_else(|| {
            ClientError::Validation(format!("no failed message with id {correlation_id}"))
        })?;
        debug!(%correlation_id, "Retrying failed message");
        self.send(&failed.content, failed.conversation_id.as_deref())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogChange> {
        self.inner.log.subscribe()
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.inner.log.snapshot()
    }

    pub fn status(&self, correlation_id: Uuid) -> Option<MessageStatus> {
        self.inner.log.status(correlation_id)
    }

    pub fn find(&self, correlation_id: Uuid) -> Option<OutboundMessage> {
        self.inner.log.find(correlation_id)
    }

    /// Number of realtime deliveries still waiting for an ack.
    pub fn awaiting_ack(&self) -> usize {
        self.inner.pending.len()
    }

    /// Conversation that sends without an explicit id are routed to.
    pub fn conversation_id(&self) -> Option<String> {
        self.inner
            .conversation
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_conversation(&self, conversation_id: Option<String>) {
        *self
            .inner
            .conversation
            .write()
            .unwrap_or_else(PoisonError::into_inner) = conversation_id;
    }

    /// Drop every record and release pending ack waiters.
    ///
    /// Deliveries still in flight finish with an `Auth` error and leave the
    /// log and the conversation untouched.
    pub fn reset(&self) {
        self.inner.pending.clear();
        self.inner.log.clear();
        self.set_conversation(None);
    }
}

impl<T: HttpTransport, C: RealtimeConnector> CoordinatorInner<T, C> {
    fn prepare(
        &self,
        content: &str,
        conversation_id: Option<&str>,
    ) -> Result<(OutboundMessage, u64), ClientError> {
        if content.trim().is_empty() {
            return Err(ClientError::Validation("message content is empty".to_string()));
        }
        let length = content.chars().count();
        if length > self.max_length {
            return Err(ClientError::Validation(format!(
                "message is {length} characters, the limit is {}",
                self.max_length
            )));
        }

        let conversation_id = match conversation_id {
            Some(id) => Some(id.to_string()),
            None => self
                .conversation
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        let message = OutboundMessage::pending(content.to_string(), conversation_id);
        debug!(correlation_id = %message.correlation_id, "Message queued");
        let generation = self.log.push_pending(message.clone());
        Ok((message, generation))
    }

    /// Adopt the server's conversation unless one is set or the log moved
    /// past `generation`.
    fn remember_conversation(&self, conversation_id: &str, generation: u64) {
        let mut current = self
            .conversation
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.log.generation() != generation {
            return;
        }
        if current.is_none() {
            debug!(conversation_id, "Conversation assigned by server");
            *current = Some(conversation_id.to_string());
        }
    }

    fn fail(&self, correlation_id: Uuid, err: ClientError) -> ClientError {
        self.log.fail(correlation_id, &err.to_string());
        warn!(%correlation_id, error = %err, "Message delivery failed");
        err
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.log.generation() != generation
    }

    async fn deliver(
        &self,
        message: OutboundMessage,
        generation: u64,
    ) -> Result<DeliveryReceipt, ClientError> {
        let correlation_id = message.correlation_id;
        if self.is_stale(generation) {
            return Err(session_ended(correlation_id));
        }
        if self.connection.is_open() {
            match self.deliver_realtime(&message, generation).await {
                RealtimeAttempt::Settled(result) => return result,
                RealtimeAttempt::NotSent(err) => {
                    debug!(%correlation_id, error = %err, "Realtime send failed, using REST");
                }
            }
        }
        self.deliver_rest(&message, generation).await
    }

    async fn deliver_realtime(
        &self,
        message: &OutboundMessage,
        generation: u64,
    ) -> RealtimeAttempt {
        let correlation_id = message.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        let frame = RealtimeFrame::chat_message(
            message.content.clone(),
            message.conversation_id.clone(),
            correlation_id,
        );
        if let Err(err) = self.connection.send(&frame).await {
            self.pending.remove(&correlation_id);
            return RealtimeAttempt::NotSent(err);
        }
        self.log.set_status(correlation_id, MessageStatus::Sent);

        let outcome = match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) if self.is_stale(generation) => {
                return RealtimeAttempt::Settled(Err(session_ended(correlation_id)));
            }
            Ok(Err(_)) => {
                let err = ClientError::Network("delivery abandoned before acknowledgement".into());
                return RealtimeAttempt::Settled(Err(self.fail(correlation_id, err)));
            }
            Err(_) => {
                self.pending.remove(&correlation_id);
                let err = ClientError::timeout("message acknowledgement", self.ack_timeout);
                return RealtimeAttempt::Settled(Err(self.fail(correlation_id, err)));
            }
        };

        match outcome {
            AckOutcome::Confirmed(event) => {
                let reply = event.ai_message.clone();
                let acknowledged = self.log.acknowledge(
                    correlation_id,
                    event.user_message.as_ref(),
                    reply.clone().into_iter().collect(),
                );
                if !acknowledged && self.is_stale(generation) {
                    return RealtimeAttempt::Settled(Err(session_ended(correlation_id)));
                }
                if let Some(conversation_id) = &event.conversation_id {
                    self.remember_conversation(conversation_id, generation);
                }
                let channel = DeliveryChannel::Realtime;
                info!(%correlation_id, %channel, "Message acknowledged");
                RealtimeAttempt::Settled(Ok(DeliveryReceipt {
                    correlation_id,
                    channel,
                    conversation_id: event.conversation_id,
                    reply,
                }))
            }
            AckOutcome::Rejected(error) => {
                let err = ClientError::Rejected {
                    code: error.code,
                    message: error.message,
                };
                RealtimeAttempt::Settled(Err(self.fail(correlation_id, err)))
            }
        }
    }

    async fn deliver_rest(
        &self,
        message: &OutboundMessage,
        generation: u64,
    ) -> Result<DeliveryReceipt, ClientError> {
        let correlation_id = message.correlation_id;
        let request = SendMessageRequest::from_outbound(message);
        let response = match self.gateway.send_message(&request).await {
            Ok(response) => response,
            Err(_) if self.is_stale(generation) => return Err(session_ended(correlation_id)),
            Err(err) => return Err(self.fail(correlation_id, err)),
        };

        let conversation_id = response.conversation.id.clone();
        let reply = response.ai_message.clone();
        let confirmed = vec![response.user_message, response.ai_message];
        match self.log.settle(generation, correlation_id, confirmed) {
            Settlement::Stale => return Err(session_ended(correlation_id)),
            Settlement::Superseded => {
                debug!(%correlation_id, "Realtime echo settled the message first");
            }
            Settlement::Reconciled | Settlement::Merged(_) => {}
        }
        self.remember_conversation(&conversation_id, generation);
        info!(%correlation_id, channel = %DeliveryChannel::Rest, "Message delivered");
        Ok(DeliveryReceipt {
            correlation_id,
            channel: DeliveryChannel::Rest,
            conversation_id: Some(conversation_id),
            reply: Some(reply),
        })
    }

    fn handle_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::ChatMessage(message) => self.on_chat_message(message),
            InboundEvent::Error(error) => self.on_error(error),
            InboundEvent::TypingStart(_) | InboundEvent::TypingStop(_) => {}
        }
    }

    fn on_chat_message(&self, message: ChatMessageEvent) {
        let Some(correlation_id) = message.correlation_id else {
            self.append_server_messages(message);
            return;
        };

        if let Some((_, waiter)) = self.pending.remove(&correlation_id) {
            if waiter.send(AckOutcome::Confirmed(message)).is_err() {
                debug!(%correlation_id, "Ack arrived after its delivery gave up");
            }
            return;
        }

        match self.log.status(correlation_id) {
            Some(MessageStatus::Failed) => {
                debug!(%correlation_id, "Ignoring confirmation for a failed message");
            }
            Some(MessageStatus::Acknowledged) => {
                self.log
                    .append_confirmed(message.ai_message.into_iter().collect());
            }
            Some(MessageStatus::Pending | MessageStatus::Sent) => {
                // Confirmed over realtime while the REST call is still out.
                let confirmed = message
                    .user_message
                    .into_iter()
                    .chain(message.ai_message)
                    .collect();
                self.log.reconcile(correlation_id, confirmed);
            }
            None => self.append_server_messages(message),
        }
    }

    fn append_server_messages(&self, message: ChatMessageEvent) {
        let messages: Vec<_> = message
            .user_message
            .into_iter()
            .chain(message.ai_message)
            .collect();
        if messages.is_empty() {
            debug!("Inbound chat_message carried only bare content");
            return;
        }
        let added = self.log.append_confirmed(messages);
        debug!(added, "Server messages appended");
    }

    fn on_error(&self, error: ErrorEvent) {
        let waiter = error
            .correlation_id
            .and_then(|id| self.pending.remove(&id))
            .map(|(_, waiter)| waiter);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(AckOutcome::Rejected(error));
            }
            None => warn!(
                code = error.code.as_deref().unwrap_or("-"),
                message = %error.message,
                "Server reported an error"
            ),
        }
    }
}

impl<T: HttpTransport, C: RealtimeConnector> Drop for CoordinatorInner<T, C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<T: HttpTransport, C: RealtimeConnector> std::fmt::Debug for MessageDeliveryCoordinator<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDeliveryCoordinator")
            .field("log", &self.inner.log)
            .field("awaiting_ack", &self.inner.pending.len())
            .field("max_length", &self.inner.max_length)
            .finish()
    }
}

fn session_ended(correlation_id: Uuid) -> ClientError {
    debug!(%correlation_id, "Dropping delivery result from an ended session");
    ClientError::Auth("session ended before delivery completed".to_string())
}

/// Route inbound realtime events to the coordinator, in arrival order.
async fn dispatch<T: HttpTransport, C: RealtimeConnector>(
    inner: Weak<CoordinatorInner<T, C>>,
    mut events: broadcast::Receiver<InboundEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = events.recv() => received,
        };
        match received {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.handle_inbound(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Delivery dispatcher lagged behind inbound events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Delivery dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialStore;
    use crate::realtime::ConnectionSettings;
    use crate::test_support::{
        MockConnector, MockPeer, MockTransport, StaticTokens, ok, wait_for_state,
    };
    use parley_types::session::ConnectionState;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    type Coordinator = MessageDeliveryCoordinator<MockTransport, MockConnector>;

    fn server_json(id: &str, role: &str, content: &str) -> Value {
        json!({
            "id": id,
            "conversationId": "c1",
            "role": role,
            "content": content,
            "createdAt": "2026-01-01T00:00:00Z",
        })
    }

    /// REST double for the send endpoint echoing the request's content.
    fn chat_server(fail_first: bool) -> MockTransport {
        let failed_once = AtomicBool::new(!fail_first);
        MockTransport::new(move |request| {
            if request.path != "/chat/messages" {
                return Ok(ok(Value::Null));
            }
            if !failed_once.swap(true, Ordering::SeqCst) {
                return Err(ClientError::Network("connection reset".into()));
            }
            let body = request.body.clone().unwrap_or_default();
            let content = body["content"].as_str().unwrap_or_default().to_string();
            let correlation = body["context"]["correlationId"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            Ok(ok(json!({
                "conversation": {
                    "id": "c1",
                    "createdAt": "2026-01-01T00:00:00Z",
                    "updatedAt": "2026-01-01T00:00:00Z",
                },
                "userMessage": server_json(&format!("u-{correlation}"), "user", &content),
                "aiMessage": server_json(&format!("a-{correlation}"), "assistant", "noted"),
            })))
        })
    }

    fn build(
        transport: MockTransport,
        config: &ClientConfig,
    ) -> (Coordinator, RealtimeConnection<MockConnector>, MockConnector) {
        let connector = MockConnector::new();
        let gateway = Arc::new(SessionGateway::new(
            transport,
            Arc::new(CredentialStore::in_memory()),
            config,
        ));
        let connection = RealtimeConnection::new(
            connector.clone(),
            Arc::new(StaticTokens::valid("t")),
            ConnectionSettings::from_config(config),
        );
        let coordinator = MessageDeliveryCoordinator::new(gateway, connection.clone(), config);
        (coordinator, connection, connector)
    }

    async fn open(
        connection: &RealtimeConnection<MockConnector>,
        connector: &MockConnector,
    ) -> MockPeer {
        let mut state = connection.watch_state();
        connection.connect();
        wait_for_state(&mut state, ConnectionState::Open).await;
        connector.next_peer().await
    }

    async fn wait_for_status(coordinator: &Coordinator, id: Uuid, want: MessageStatus) {
        tokio::time::timeout(Duration::from_secs(3), async {
            while coordinator.status(id) != Some(want) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("message never became {want}"));
    }

    fn outbound_correlation(frame: &str) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        assert_eq!(value["type"], "chat_message");
        value["correlationId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn invalid_content_is_rejected_before_any_network_call() {
        let transport = chat_server(false);
        let (coordinator, _conn, connector) = build(transport.clone(), &ClientConfig::default());

        assert!(matches!(
            coordinator.send("", None),
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            coordinator.send("   ", None),
            Err(ClientError::Validation(_))
        ));
        let too_long = "x".repeat(1001);
        assert!(matches!(
            coordinator.send_and_wait(&too_long, None).await,
            Err(ClientError::Validation(_))
        ));

        assert!(coordinator.snapshot().is_empty());
        assert_eq!(transport.calls("/chat/messages"), 0);
        assert_eq!(connector.connects(), 0);

        // Exactly at the limit is fine.
        assert!(coordinator.send(&"x".repeat(1000), None).is_ok());
    }

    #[tokio::test]
    async fn realtime_send_is_acknowledged_in_place() {
        let (coordinator, connection, connector) =
            build(chat_server(false), &ClientConfig::default());
        let mut peer = open(&connection, &connector).await;

        let id = coordinator.send("Hello", None).unwrap();
        let records = coordinator.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content(), "Hello");
        assert_eq!(coordinator.status(id), Some(MessageStatus::Pending));

        let correlation = outbound_correlation(&peer.next_outbound().await);
        assert_eq!(correlation, id.to_string());
        peer.push(
            json!({
                "type": "chat_message",
                "correlationId": correlation,
                "conversationId": "c1",
                "data": {
                    "userMessage": server_json("u1", "user", "Hello"),
                    "aiMessage": server_json("a1", "assistant", "Hi there"),
                },
            })
            .to_string(),
        );

        wait_for_status(&coordinator, id, MessageStatus::Acknowledged).await;
        let records = coordinator.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].correlation_id(), Some(id));
        assert_eq!(records[1].server_id(), Some("a1"));
        assert_eq!(coordinator.conversation_id().as_deref(), Some("c1"));
        assert_eq!(coordinator.awaiting_ack(), 0);
    }

    #[tokio::test]
    async fn rest_fallback_reconciles_by_correlation_id() {
        let transport = chat_server(false);
        let (coordinator, _conn, _connector) = build(transport.clone(), &ClientConfig::default());

        let (first, second) = tokio::join!(
            coordinator.send_and_wait("first", None),
            coordinator.send_and_wait("second", None),
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.channel, DeliveryChannel::Rest);
        assert_eq!(second.reply.unwrap().content, "noted");

        let records = coordinator.snapshot();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.correlation_id().is_none()));
        let user_contents: Vec<_> = records
            .iter()
            .filter(|r| r.server_id().is_some_and(|id| id.starts_with("u-")))
            .map(|r| r.content().to_string())
            .collect();
        assert_eq!(user_contents.len(), 2);
        assert!(user_contents.contains(&"first".to_string()));
        assert!(user_contents.contains(&"second".to_string()));
        assert_eq!(transport.calls("/chat/messages"), 2);
    }

    #[tokio::test]
    async fn later_sends_continue_the_assigned_conversation() {
        let transport = chat_server(false);
        let (coordinator, _conn, _connector) = build(transport.clone(), &ClientConfig::default());

        coordinator.send_and_wait("one", None).await.unwrap();
        coordinator.send_and_wait("two", None).await.unwrap();

        let requests = transport.requests_for("/chat/messages");
        let first_body = requests[0].body.clone().unwrap();
        let second_body = requests[1].body.clone().unwrap();
        assert!(first_body.get("conversationId").is_none());
        assert_eq!(second_body["conversationId"], "c1");
    }

    #[tokio::test]
    async fn network_failure_marks_failed_and_retry_resends() {
        let transport = chat_server(true);
        let (coordinator, _conn, _connector) = build(transport.clone(), &ClientConfig::default());

        let err = coordinator.send_and_wait("Hello", None).await.unwrap_err();
        assert!(err.is_retryable());
        let failed_id = coordinator
            .snapshot()
            .iter()
            .find_map(|r| r.correlation_id())
            .unwrap();
        assert_eq!(coordinator.status(failed_id), Some(MessageStatus::Failed));
        assert!(coordinator.find(failed_id).unwrap().failure.is_some());

        let retried = coordinator.retry(failed_id).unwrap();
        assert_ne!(retried, failed_id);
        assert!(coordinator.status(failed_id).is_none());

        tokio::time::timeout(Duration::from_secs(3), async {
            while coordinator.snapshot().iter().any(|r| r.correlation_id().is_some()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(coordinator.snapshot().len(), 2);
        assert_eq!(transport.calls("/chat/messages"), 2);
    }

    #[tokio::test]
    async fn retry_requires_a_failed_record() {
        let (coordinator, _conn, _connector) = build(chat_server(false), &ClientConfig::default());
        assert!(matches!(
            coordinator.retry(Uuid::now_v7()),
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn error_frame_fails_the_correlated_message() {
        let (coordinator, connection, connector) =
            build(chat_server(false), &ClientConfig::default());
        let mut peer = open(&connection, &connector).await;

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.send_and_wait("Hello", None).await })
        };
        let correlation = outbound_correlation(&peer.next_outbound().await);
        peer.push(
            json!({
                "type": "error",
                "correlationId": correlation,
                "data": {"code": "RATE_LIMITED", "message": "slow down"},
            })
            .to_string(),
        );

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ClientError::Rejected {
                code: Some("RATE_LIMITED".into()),
                message: "slow down".into(),
            }
        );
        let id: Uuid = correlation.parse().unwrap();
        assert_eq!(coordinator.status(id), Some(MessageStatus::Failed));
    }

    #[tokio::test]
    async fn missing_ack_times_out_and_late_ack_is_ignored() {
        let config = ClientConfig {
            ack_timeout_secs: 1,
            ..ClientConfig::default()
        };
        let (coordinator, connection, connector) = build(chat_server(false), &config);
        let mut peer = open(&connection, &connector).await;

        let err = coordinator.send_and_wait("Hello", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        let correlation = outbound_correlation(&peer.next_outbound().await);
        let id: Uuid = correlation.parse().unwrap();
        assert_eq!(coordinator.status(id), Some(MessageStatus::Failed));

        peer.push(
            json!({
                "type": "chat_message",
                "correlationId": correlation,
                "data": {"aiMessage": server_json("a1", "assistant", "late")},
            })
            .to_string(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.status(id), Some(MessageStatus::Failed));
        assert_eq!(coordinator.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn unwritable_link_falls_back_to_rest() {
        let transport = chat_server(false);
        let (coordinator, connection, connector) =
            build(transport.clone(), &ClientConfig::default());
        let mut peer = open(&connection, &connector).await;
        peer.refuse_outbound();

        let receipt = coordinator.send_and_wait("Hello", None).await.unwrap();

        assert_eq!(receipt.channel, DeliveryChannel::Rest);
        assert!(connection.is_open());
        assert_eq!(transport.calls("/chat/messages"), 1);
        assert_eq!(coordinator.awaiting_ack(), 0);
        let records = coordinator.snapshot();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.correlation_id().is_none()));
    }

    #[tokio::test]
    async fn realtime_echo_during_rest_send_settles_once() {
        let transport = chat_server(false);
        transport.set_delay("/chat/messages", Duration::from_millis(200));
        let (coordinator, connection, connector) =
            build(transport.clone(), &ClientConfig::default());
        let mut peer = open(&connection, &connector).await;
        peer.refuse_outbound();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.send_and_wait("Hello", None).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.calls("/chat/messages") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let id = coordinator
            .snapshot()
            .iter()
            .find_map(|r| r.correlation_id())
            .unwrap();

        // Same server ids the REST response will carry.
        peer.push(
            json!({
                "type": "chat_message",
                "correlationId": id.to_string(),
                "conversationId": "c1",
                "data": {
                    "userMessage": server_json(&format!("u-{id}"), "user", "Hello"),
                    "aiMessage": server_json(&format!("a-{id}"), "assistant", "noted"),
                },
            })
            .to_string(),
        );

        let receipt = waiter.await.unwrap().unwrap();
        assert_eq!(receipt.channel, DeliveryChannel::Rest);

        let records = coordinator.snapshot();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.correlation_id() != Some(id)));
        let mut server_ids: Vec<_> = records.iter().filter_map(|r| r.server_id()).collect();
        server_ids.sort_unstable();
        server_ids.dedup();
        assert_eq!(server_ids.len(), 2);
    }

    #[tokio::test]
    async fn reset_discards_rest_result_still_in_flight() {
        let transport = chat_server(false);
        transport.set_delay("/chat/messages", Duration::from_millis(200));
        let (coordinator, _conn, _connector) = build(transport.clone(), &ClientConfig::default());
        let mut changes = coordinator.subscribe();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.send_and_wait("Hello", None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.reset();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_auth());
        assert_eq!(transport.calls("/chat/messages"), 1);
        assert!(coordinator.snapshot().is_empty());
        assert!(coordinator.conversation_id().is_none());

        assert!(matches!(changes.recv().await.unwrap(), LogChange::Added { .. }));
        assert_eq!(changes.recv().await.unwrap(), LogChange::Cleared);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_releases_realtime_delivery_awaiting_ack() {
        let (coordinator, connection, connector) =
            build(chat_server(false), &ClientConfig::default());
        let mut peer = open(&connection, &connector).await;

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.send_and_wait("Hello", None).await })
        };
        let correlation = outbound_correlation(&peer.next_outbound().await);
        coordinator.reset();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_auth());

        // The server's answer for the old session arrives afterwards.
        peer.push(
            json!({
                "type": "chat_message",
                "correlationId": correlation,
                "conversationId": "c1",
                "data": {"userMessage": server_json("u1", "user", "Hello")},
            })
            .to_string(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(coordinator.conversation_id().is_none());
        assert_eq!(coordinator.awaiting_ack(), 0);
    }

    #[tokio::test]
    async fn uncorrelated_messages_are_appended_once() {
        let (coordinator, connection, connector) =
            build(chat_server(false), &ClientConfig::default());
        let peer = open(&connection, &connector).await;
        let mut changes = coordinator.subscribe();

        let frame = json!({
            "type": "chat_message",
            "conversationId": "c9",
            "data": {"aiMessage": server_json("a9", "assistant", "from another device")},
        })
        .to_string();
        peer.push(frame.clone());
        peer.push(frame);

        let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(change, LogChange::Added { .. }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.snapshot().len(), 1);
    }
}
