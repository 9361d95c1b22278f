//! In-memory doubles for the core's ports, shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_types::ClientError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parley_types::auth::{AuthPayload, SessionDescriptor, TokenClaims, TokenPair, User};
use parley_types::session::ConnectionState;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use crate::realtime::{FrameSink, FrameSource, RealtimeConnector};
use crate::session::{AccessTokenSource, ApiRequest, ApiResponse, HttpTransport, TokenFuture};

static TOKEN_SEQ: AtomicI64 = AtomicI64::new(1);

/// Unsigned JWT carrying `claims`; the signature segment is a placeholder.
pub fn unsigned_token(claims: &TokenClaims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.unsigned")
}

/// Unsigned JWT expiring at `at`. Every call yields a distinct token.
pub fn token_expiring_at(at: DateTime<Utc>) -> String {
    unsigned_token(&TokenClaims {
        exp: at.timestamp(),
        sub: Some("test-user".to_string()),
        iat: Some(TOKEN_SEQ.fetch_add(1, Ordering::Relaxed)),
        email: None,
    })
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        user_type: "student".to_string(),
        organization_id: None,
        created_at: None,
    }
}

/// Login-style payload whose access token expires after `ttl`.
pub fn auth_payload(user_id: &str, ttl: chrono::Duration) -> AuthPayload {
    let now = Utc::now();
    let expires_at = now + ttl;
    AuthPayload {
        user: user(user_id),
        tokens: TokenPair {
            access_token: token_expiring_at(expires_at),
            refresh_token: format!("refresh-{}", TOKEN_SEQ.fetch_add(1, Ordering::Relaxed)),
            token_type: "Bearer".to_string(),
            expires_at,
        },
        session: SessionDescriptor {
            id: format!("session-{user_id}"),
            expires_at: now + chrono::Duration::days(7),
            device_info: None,
        },
    }
}

/// 200 response wrapping `data` in a success envelope.
pub fn ok(data: serde_json::Value) -> ApiResponse {
    ApiResponse::new(200, json!({"success": true, "data": data}))
}

pub fn unauthorized(message: &str) -> ApiResponse {
    ApiResponse::new(
        401,
        json!({"success": false, "error": "UNAUTHORIZED", "message": message}),
    )
}

pub fn api_error(status: u16, code: &str, message: &str) -> ApiResponse {
    ApiResponse::new(
        status,
        json!({"success": false, "error": {"code": code, "message": message}}),
    )
}

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, ClientError> + Send + Sync;

struct TransportState {
    handler: Box<Handler>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<ApiRequest>>,
}

/// Scripted HTTP transport that records every request.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, ClientError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            state: Arc::new(TransportState {
                handler: Box::new(handler),
                delays: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delay responses for `path` (the handler runs after the delay).
    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.state
            .delays
            .lock()
            .unwrap()
            .insert(path.to_string(), delay);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests_for(path).len()
    }

    pub fn requests_for(&self, path: &str) -> Vec<ApiRequest> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

impl HttpTransport for MockTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.state.requests.lock().unwrap().push(request.clone());
        let delay = self.state.delays.lock().unwrap().get(&request.path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        (self.state.handler)(&request)
    }
}

/// Token source with a fixed answer.
pub struct StaticTokens(Result<String, ClientError>);

impl StaticTokens {
    pub fn valid(token: &str) -> Self {
        Self(Ok(token.to_string()))
    }

    pub fn failing(err: ClientError) -> Self {
        Self(Err(err))
    }
}

impl AccessTokenSource for StaticTokens {
    fn access_token(&self) -> TokenFuture<'_> {
        let result = self.0.clone();
        Box::pin(async move { result })
    }
}

/// Server end of one mock realtime link.
pub struct MockPeer {
    inbound: mpsc::UnboundedSender<String>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(text.into());
    }

    /// Next frame the client sent.
    pub async fn next_outbound(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("no outbound frame")
            .expect("link closed")
    }

    pub fn try_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Stop accepting client frames while keeping the link open, so every
    /// client write fails.
    pub fn refuse_outbound(&mut self) {
        self.outbound.close();
    }
}

pub struct MockSink {
    tx: mpsc::UnboundedSender<String>,
}

impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.tx
            .send(text)
            .map_err(|_| ClientError::Network("peer went away".to_string()))
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

pub struct MockSource {
    rx: mpsc::UnboundedReceiver<String>,
}

impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<String, ClientError>> {
        self.rx.recv().await.map(Ok)
    }
}

struct ConnectorState {
    connects: AtomicUsize,
    failures_left: AtomicUsize,
    hang: AtomicBool,
    tokens: Mutex<Vec<String>>,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

/// Channel-backed connector: every successful connect yields a [`MockPeer`].
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ConnectorState {
                connects: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                hang: AtomicBool::new(false),
                tokens: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Refuse the next `n` handshakes.
    pub fn fail_next(&self, n: usize) {
        self.state.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make handshakes never complete.
    pub fn hang(&self, hang: bool) {
        self.state.hang.store(hang, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub async fn next_peer(&self) -> MockPeer {
        let mut peers = self.state.peers_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(2), peers.recv())
            .await
            .expect("no realtime connection was made")
            .expect("connector dropped")
    }
}

impl RealtimeConnector for MockConnector {
    type Sink = MockSink;
    type Source = MockSource;

    async fn connect(
        &self,
        _url: &str,
        access_token: &str,
    ) -> Result<(MockSink, MockSource), ClientError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state
            .tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());

        if self.state.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let refused = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::Network("connection refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let _ = self.state.peers_tx.send(MockPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        Ok((MockSink { tx: outbound_tx }, MockSource { rx: inbound_rx }))
    }
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|state| *state == want))
        .await
        .unwrap_or_else(|_| panic!("connection never reached {want}"))
        .map(|_| ())
        .expect("state channel closed");
}
