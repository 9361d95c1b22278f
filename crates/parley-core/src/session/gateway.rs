//! SessionGateway: authenticated REST calls and the credential renewal protocol.
//!
//! Every call attaches the stored access token, renewing it first when it
//! has already expired. A 401 on a renewable call joins the singleflight
//! renewal, then the call is retried exactly once with the new token. A
//! failed renewal clears the credential store, publishes
//! [`SessionEvent::Expired`] and fails every waiter with the same `Auth`
//! error. Calls that were already in flight and come back with a 401 after
//! that get the same error too.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use parley_types::ClientError;
use parley_types::auth::{
    AuthPayload, ChangePasswordRequest, CurrentUser, ForgotPasswordRequest, LoginRequest,
    RegisterRequest, ResetPasswordRequest, User,
};
use parley_types::chat::{SendMessageRequest, SendMessageResponse};
use parley_types::config::ClientConfig;
use parley_types::envelope::{Acknowledgement, ApiEnvelope};
use parley_types::session::SessionEvent;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::renewal::{Joined, RenewalGate};
use super::transport::{ApiRequest, ApiResponse, HttpMethod, HttpTransport};
use crate::credential::CredentialStore;
use crate::event::EventBus;

/// Endpoints whose 401 is an answer about the submitted credentials rather
/// than about the stored access token. They never enter renewal.
const BOOTSTRAP_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/refresh",
    "/auth/forgot-password",
    "/auth/reset-password",
    "/auth/logout",
];

fn is_bootstrap(path: &str) -> bool {
    BOOTSTRAP_PATHS.contains(&path)
}

pub struct SessionGateway<T: HttpTransport> {
    transport: T,
    store: Arc<CredentialStore>,
    renewal: RenewalGate,
    /// Store epoch left behind by the last failed renewal, with its error.
    last_failure: Mutex<Option<(u64, ClientError)>>,
    events: EventBus<SessionEvent>,
    refresh_timeout: Duration,
}

impl<T: HttpTransport> SessionGateway<T> {
    pub fn new(transport: T, store: Arc<CredentialStore>, config: &ClientConfig) -> Self {
        Self {
            transport,
            store,
            renewal: RenewalGate::default(),
            last_failure: Mutex::new(None),
            events: EventBus::new(config.event_buffer),
            refresh_timeout: config.refresh_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn renewal_in_flight(&self) -> bool {
        self.renewal.in_flight()
    }

    /// Issue a call and return the raw success response.
    ///
    /// Non-success statuses become [`ClientError::Api`] (or `Auth` for a
    /// 401 that renewal could not fix); transport failures stay `Network`
    /// or `Timeout`.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, ClientError> {
        let attached = if is_bootstrap(path) {
            self.store.access_token()
        } else {
            self.token_for_call().await?
        };
        let response = self.execute(method, path, body.clone(), attached.clone()).await?;

        if !response.is_unauthorized() || is_bootstrap(path) {
            return check_status(response);
        }

        let token = self.token_after_rejection(attached.as_deref()).await?;
        let retried = self.execute(method, path, body, Some(token)).await?;
        if retried.is_unauthorized() {
            let (_, message) = error_parts(&retried);
            warn!(%method, path, "Call rejected again after credential renewal");
            return Err(ClientError::Auth(message));
        }
        check_status(retried)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<serde_json::Value>,
        bearer: Option<String>,
    ) -> Result<ApiResponse, ClientError> {
        let request = ApiRequest::new(method, path)
            .with_body(body)
            .with_bearer(bearer);
        let result = self.transport.execute(request).await;
        match &result {
            Ok(response) => debug!(%method, path, status = response.status, "API call"),
            Err(err) => debug!(%method, path, error = %err, "API call failed"),
        }
        result
    }

    /// Stored access token, renewed first if it has expired and can be renewed.
    async fn token_for_call(&self) -> Result<Option<String>, ClientError> {
        let attached = self.store.access_token();
        if attached.is_none() || self.store.is_valid() || self.store.refresh_token().is_none() {
            return Ok(attached);
        }
        debug!("Access token expired, renewing before the call");
        self.renew().await.map(Some)
    }

    /// Token to retry with after a 401 on a call that attached `attached`.
    async fn token_after_rejection(&self, attached: Option<&str>) -> Result<String, ClientError> {
        // Another caller already renewed since this call attached its token.
        if let Some(current) = self.store.access_token() {
            if attached != Some(current.as_str()) {
                debug!("Credentials changed while the call was in flight, retrying");
                return Ok(current);
            }
        }
        self.renew().await
    }

    /// Join the singleflight renewal and return the new access token.
    async fn renew(&self) -> Result<String, ClientError> {
        if let Some(err) = self.failure_for_current_epoch() {
            debug!("Credentials already cleared by a failed renewal");
            return Err(err);
        }
        let ticket = match self.renewal.join() {
            Joined::Follower(waiter) => {
                debug!("Waiting on in-flight credential renewal");
                return waiter.outcome().await;
            }
            Joined::Leader(ticket) => ticket,
        };

        let epoch = self.store.epoch();
        let cancel = ticket.cancellation();
        let outcome = tokio::select! {
            // Logout owns the teardown; the dropped ticket is already detached.
            _ = cancel.cancelled() => {
                return Err(ClientError::Auth("logged out during credential renewal".to_string()));
            }
            outcome = self.perform_renewal(epoch) => outcome,
        };

        if let Err(err) = &outcome {
            if self.store.clear_if_epoch(epoch) {
                self.remember_failure(err);
                warn!(error = %err, "Credential renewal failed, session cleared");
                self.events.publish(SessionEvent::Expired {
                    reason: err.to_string(),
                });
            }
        }

        if ticket.complete(outcome.clone()) {
            outcome
        } else {
            Err(ClientError::Auth(
                "logged out during credential renewal".to_string(),
            ))
        }
    }

    fn remember_failure(&self, err: &ClientError) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((self.store.epoch(), err.clone()));
    }

    /// The failed renewal's error, while the store is still as it left it.
    fn failure_for_current_epoch(&self) -> Option<ClientError> {
        if self.store.has_credentials() {
            return None;
        }
        let epoch = self.store.epoch();
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(failed_at, _)| *failed_at == epoch)
            .map(|(_, err)| err.clone())
    }

    async fn perform_renewal(&self, epoch: u64) -> Result<String, ClientError> {
        let Some(refresh_token) = self.store.refresh_token() else {
            return Err(ClientError::Auth("no refresh token available".to_string()));
        };

        info!("Renewing credentials");
        let request = ApiRequest::new(HttpMethod::Post, "/auth/refresh")
            .with_refresh_token(Some(refresh_token));
        let exchange = self.transport.execute(request);
        let response = match tokio::time::timeout(self.refresh_timeout, exchange).await {
            Ok(response) => response,
            Err(_) => {
                return Err(ClientError::Auth(
                    ClientError::timeout("credential renewal", self.refresh_timeout).to_string(),
                ));
            }
        };

        let payload = response
            .and_then(check_status)
            .and_then(|response| decode_data::<AuthPayload>("/auth/refresh", response))
            .map_err(|err| match err {
                ClientError::Auth(message) => ClientError::Auth(message),
                other => ClientError::Auth(format!("credential renewal failed: {other}")),
            })?;

        if !self.store.set_credentials_if_epoch(epoch, &payload) {
            return Err(ClientError::Auth(
                "session ended during credential renewal".to_string(),
            ));
        }
        info!(user_id = %payload.user.id, "Credentials renewed");
        self.events.publish(SessionEvent::Renewed);
        Ok(payload.tokens.access_token)
    }

    async fn call<B: Serialize, R: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, ClientError> {
        let body = body.map(encode_body).transpose()?;
        let response = self.request(method, path, body).await?;
        decode_data(path, response)
    }

    /// Call an endpoint whose payload is irrelevant; returns the server message.
    async fn acknowledge<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<String>, ClientError> {
        let body = body.map(encode_body).transpose()?;
        let response = self.request(method, path, body).await?;
        let status = response.status;
        let envelope: Acknowledgement =
            serde_json::from_value(response.body).unwrap_or(ApiEnvelope {
                success: true,
                data: None,
                error: None,
                message: None,
                timestamp: None,
            });
        let message = envelope.message.clone();
        envelope.into_result(status)?;
        Ok(message)
    }

    fn install(&self, payload: &AuthPayload) {
        self.store.set_credentials(payload);
        info!(user_id = %payload.user.id, "Signed in");
        self.events.publish(SessionEvent::Authenticated {
            user_id: payload.user.id.clone(),
        });
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthPayload, ClientError> {
        let payload: AuthPayload = self
            .call(HttpMethod::Post, "/auth/login", Some(request))
            .await?;
        self.install(&payload);
        Ok(payload)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthPayload, ClientError> {
        let payload: AuthPayload = self
            .call(HttpMethod::Post, "/auth/register", Some(request))
            .await?;
        self.install(&payload);
        Ok(payload)
    }

    /// Renew the credentials now, sharing any renewal already in flight.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.renew().await.map(|_| ())
    }

    /// Fail every waiter of the in-flight renewal with an `Auth` error.
    pub fn abort_renewal(&self, reason: &str) -> bool {
        let aborted = self.renewal.abort(ClientError::Auth(reason.to_string()));
        if aborted {
            info!(reason, "Aborted in-flight credential renewal");
        }
        aborted
    }

    /// End the session.
    ///
    /// Renewal waiters are rejected first, the server is notified on a best
    /// effort basis, then the store is cleared. Never fails: a session that
    /// cannot reach the server is still ended locally.
    pub async fn logout(&self) {
        self.abort_renewal("logged out");

        if let Some(tokens) = self.store.tokens() {
            let request = ApiRequest::new(HttpMethod::Post, "/auth/logout")
                .with_bearer(Some(tokens.access_token))
                .with_refresh_token(Some(tokens.refresh_token));
            match self.transport.execute(request).await.and_then(check_status) {
                Ok(_) => debug!("Server acknowledged logout"),
                Err(err) => warn!(error = %err, "Logout notification failed, clearing locally"),
            }
        }

        self.store.clear();
        info!("Signed out");
        self.events.publish(SessionEvent::LoggedOut);
    }

    pub async fn current_user(&self) -> Result<User, ClientError> {
        let current: CurrentUser = self
            .call::<(), _>(HttpMethod::Get, "/auth/me", None)
            .await?;
        self.store.set_user(current.user.clone());
        Ok(current.user)
    }

    pub async fn change_password(
        &self,
        request: &ChangePasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.acknowledge(HttpMethod::Post, "/auth/change-password", Some(request))
            .await
    }

    pub async fn forgot_password(
        &self,
        request: &ForgotPasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.acknowledge(HttpMethod::Post, "/auth/forgot-password", Some(request))
            .await
    }

    pub async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<Option<String>, ClientError> {
        self.acknowledge(HttpMethod::Post, "/auth/reset-password", Some(request))
            .await
    }

    /// Fallback message send over REST.
    pub async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ClientError> {
        self.call(HttpMethod::Post, "/chat/messages", Some(request))
            .await
    }

    /// The stored access token if still valid, otherwise a renewed one.
    pub async fn valid_access_token(&self) -> Result<String, ClientError> {
        if self.store.is_valid() {
            if let Some(token) = self.store.access_token() {
                return Ok(token);
            }
        }
        if self.store.refresh_token().is_none() {
            return Err(ClientError::Auth("not signed in".to_string()));
        }
        self.renew().await
    }
}

impl<T: HttpTransport> std::fmt::Debug for SessionGateway<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGateway")
            .field("store", &self.store)
            .field("renewal_in_flight", &self.renewal.in_flight())
            .field("refresh_timeout", &self.refresh_timeout)
            .finish()
    }
}

fn encode_body<B: Serialize>(body: &B) -> Result<serde_json::Value, ClientError> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::Validation(format!("request body could not be encoded: {e}")))
}

fn error_parts(response: &ApiResponse) -> (Option<String>, String) {
    let fallback = format!("request failed with status {}", response.status);
    match serde_json::from_value::<Acknowledgement>(response.body.clone()) {
        Ok(envelope) => envelope.error_parts(&fallback),
        Err(_) => (None, fallback),
    }
}

fn check_status(response: ApiResponse) -> Result<ApiResponse, ClientError> {
    if response.is_success() {
        return Ok(response);
    }
    let (code, message) = error_parts(&response);
    if response.is_unauthorized() {
        return Err(ClientError::Auth(message));
    }
    Err(ClientError::Api {
        status: response.status,
        code,
        message,
    })
}

fn decode_data<R: DeserializeOwned>(path: &str, response: ApiResponse) -> Result<R, ClientError> {
    let status = response.status;
    let envelope: ApiEnvelope<R> = serde_json::from_value(response.body)
        .map_err(|e| ClientError::Protocol(format!("malformed response from {path}: {e}")))?;
    envelope
        .into_result(status)?
        .ok_or_else(|| ClientError::Protocol(format!("response from {path} carried no data")))
}

/// Boxed future returned by [`AccessTokenSource`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ClientError>> + Send + 'a>>;

/// Supplies a valid (or freshly renewed) access token for the realtime handshake.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> TokenFuture<'_>;
}

impl<T: HttpTransport> AccessTokenSource for SessionGateway<T> {
    fn access_token(&self) -> TokenFuture<'_> {
        Box::pin(self.valid_access_token())
    }
}
