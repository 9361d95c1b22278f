//! ChatClient: wires the session, realtime and delivery components together
//! for one logical session and owns the logout sequence.

use std::sync::Arc;

use parley_types::ClientError;
use parley_types::auth::{
    AuthPayload, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterRequest,
    ResetPasswordRequest, User,
};
use parley_types::chat::{DeliveryReceipt, LogChange, LogRecord};
use parley_types::config::ClientConfig;
use parley_types::frame::InboundEvent;
use parley_types::session::{ConnectionState, SessionEvent};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credential::{CredentialStore, SessionVault};
use crate::delivery::MessageDeliveryCoordinator;
use crate::realtime::{ConnectionSettings, RealtimeConnection, RealtimeConnector};
use crate::session::{HttpTransport, SessionGateway};
use crate::typing::TypingSignal;

/// One client session: credentials, REST gateway, realtime link, typing
/// indicators and the message log.
///
/// Generic over the HTTP transport and realtime connector so the same
/// wiring runs against real adapters and in-memory doubles.
pub struct ChatClient<T: HttpTransport, C: RealtimeConnector> {
    config: ClientConfig,
    store: Arc<CredentialStore>,
    gateway: Arc<SessionGateway<T>>,
    connection: RealtimeConnection<C>,
    typing: Arc<TypingSignal<C>>,
    coordinator: MessageDeliveryCoordinator<T, C>,
    supervisor: CancellationToken,
}

impl<T: HttpTransport, C: RealtimeConnector> ChatClient<T, C> {
    /// Build a client. Must be called from within a Tokio runtime.
    pub fn new(
        config: ClientConfig,
        transport: T,
        connector: C,
        vault: Arc<dyn SessionVault>,
    ) -> Self {
        let store = Arc::new(CredentialStore::new(vault));
        let gateway = Arc::new(SessionGateway::new(transport, Arc::clone(&store), &config));
        let connection = RealtimeConnection::new(
            connector,
            gateway.clone(),
            ConnectionSettings::from_config(&config),
        );
        let typing = Arc::new(TypingSignal::new(connection.clone(), config.typing_timeout()));
        let coordinator =
            MessageDeliveryCoordinator::new(Arc::clone(&gateway), connection.clone(), &config);

        let supervisor = CancellationToken::new();
        tokio::spawn(supervise(
            connection.clone(),
            Arc::clone(&typing),
            gateway.subscribe(),
            connection.watch_state(),
            supervisor.clone(),
        ));

        Self {
            config,
            store,
            gateway,
            connection,
            typing,
            coordinator,
            supervisor,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<SessionGateway<T>> {
        &self.gateway
    }

    pub fn connection(&self) -> &RealtimeConnection<C> {
        &self.connection
    }

    pub fn coordinator(&self) -> &MessageDeliveryCoordinator<T, C> {
        &self.coordinator
    }

    pub fn typing(&self) -> &TypingSignal<C> {
        &self.typing
    }

    /// Reload a session persisted by an earlier process.
    pub fn restore(&self) -> bool {
        self.store.restore()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.has_credentials()
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ClientError> {
        self.gateway.login(request).await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ClientError> {
        self.gateway.register(request).await
    }

    pub async fn current_user(&self) -> Result<User, ClientError> {
        self.gateway.current_user().await
    }

    pub async fn change_password(
        &self,
        request: &ChangePasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.gateway.change_password(request).await
    }

    pub async fn forgot_password(
        &self,
        request: &ForgotPasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.gateway.forgot_password(request).await
    }

    pub async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.gateway.reset_password(request).await
    }

    /// Start the realtime link. Requires stored credentials.
    pub fn connect(&self) -> Result<(), ClientError> {
        if !self.store.has_credentials() {
            return Err(ClientError::Auth("not signed in".to_string()));
        }
        self.connection.connect();
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.typing.cancel_all();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn send(&self, content: &str, conversation_id: Option<&str>) -> Result<Uuid, ClientError> {
        self.coordinator.send(content, conversation_id)
    }

    pub async fn send_and_wait(
        &self,
        content: &str,
        conversation_id: Option<&str>,
    ) -> Result<DeliveryReceipt, ClientError> {
        self.coordinator.send_and_wait(content, conversation_id).await
    }

    pub fn retry(&self, correlation_id: Uuid) -> Result<Uuid, ClientError> {
        self.coordinator.retry(correlation_id)
    }

    pub fn messages(&self) -> Vec<LogRecord> {
        self.coordinator.snapshot()
    }

    pub async fn start_typing(&self, conversation_id: &str) {
        self.typing.start_typing(conversation_id).await;
    }

    pub async fn stop_typing(&self, conversation_id: &str) {
        self.typing.stop_typing(conversation_id).await;
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogChange> {
        self.coordinator.subscribe()
    }

    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.gateway.subscribe()
    }

    pub fn subscribe_inbound(&self) -> broadcast::Receiver<InboundEvent> {
        self.connection.subscribe()
    }

    /// End the session.
    ///
    /// In order: renewal waiters are failed with `Auth`, the realtime link
    /// is closed (no further reconnects), the server is notified and the
    /// credentials are cleared, then typing timers are disarmed.
    pub async fn logout(&self) {
        self.gateway.abort_renewal("logged out");
        self.connection.disconnect().await;
        self.gateway.logout().await;
        self.typing.cancel_all();
        self.coordinator.reset();
        info!("Session ended");
    }
}

impl<T: HttpTransport, C: RealtimeConnector> Drop for ChatClient<T, C> {
    fn drop(&mut self) {
        self.supervisor.cancel();
    }
}

impl<T: HttpTransport, C: RealtimeConnector> std::fmt::Debug for ChatClient<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("store", &self.store)
            .field("connection", &self.connection)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Tear the link down when renewal fails and disarm typing timers whenever
/// the link leaves `Open`.
async fn supervise<C: RealtimeConnector>(
    connection: RealtimeConnection<C>,
    typing: Arc<TypingSignal<C>>,
    mut sessions: broadcast::Receiver<SessionEvent>,
    mut state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = sessions.recv() => match event {
                Ok(SessionEvent::Expired { reason }) => {
                    warn!(%reason, "Session expired, closing realtime connection");
                    connection.disconnect().await;
                    typing.cancel_all();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session supervisor lagged behind session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if current != ConnectionState::Open {
                    typing.cancel_all();
                }
            }
        }
    }
    debug!("Session supervisor stopped");
}
