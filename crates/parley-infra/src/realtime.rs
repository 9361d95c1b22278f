//! WebSocket realtime connector using tokio-tungstenite.
//!
//! The handshake request carries `Authorization: Bearer <token>`. After the
//! upgrade the stream is split into a [`FrameSink`] and a [`FrameSource`];
//! only text frames reach the core, pings and binary frames are skipped.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::realtime::{FrameSink, FrameSource, RealtimeConnector};
use parley_types::ClientError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

pub struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

pub struct WebSocketSource {
    stream: SplitStream<WsStream>,
}

impl RealtimeConnector for WebSocketConnector {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    async fn connect(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<(WebSocketSink, WebSocketSource), ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::Network(format!("invalid realtime URL {url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| {
                ClientError::Validation(format!("access token is not a valid header value: {e}"))
            })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ClientError::Network(format!("realtime handshake failed: {e}")))?;
        debug!(status = response.status().as_u16(), "Realtime handshake accepted");

        let (sink, stream) = ws_stream.split();
        Ok((WebSocketSink { sink }, WebSocketSource { stream }))
    }
}

impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Network(format!("realtime send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.sink
            .close()
            .await
            .map_err(|e| ClientError::Network(format!("realtime close failed: {e}")))
    }
}

impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Realtime peer sent close");
                    return None;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(_) => {
                    debug!("Skipping non-text realtime frame");
                    continue;
                }
                Err(e) => {
                    return Some(Err(ClientError::Network(format!("realtime receive failed: {e}"))));
                }
            }
        }
    }
}
