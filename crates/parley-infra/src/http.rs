//! ReqwestTransport -- concrete [`HttpTransport`] over `reqwest`.
//!
//! Resolves request paths against the configured API base URL, attaches the
//! bearer token and (for refresh/logout) the refresh token as both the
//! `refreshToken` cookie and the `X-Refresh-Token` header. Any status is
//! returned as a response; only transport failures become errors.

use std::time::Duration;

use parley_core::session::{ApiRequest, ApiResponse, HttpMethod, HttpTransport};
use parley_types::ClientError;
use parley_types::config::ClientConfig;
use reqwest::header::{COOKIE, HeaderValue};
use tracing::debug;

/// Header carrying the refresh token for servers that do not read cookies.
pub const REFRESH_TOKEN_HEADER: &str = "X-Refresh-Token";

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_error(&self, request: &ApiRequest, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::timeout(format!("{} {}", request.method, request.path), self.timeout)
        } else {
            ClientError::Network(format!("{} {} failed: {err}", request.method, request.path))
        }
    }
}

fn to_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .client
            .request(to_method(request.method), self.url(&request.path));

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(refresh) = &request.refresh_token {
            let cookie = HeaderValue::from_str(&format!("refreshToken={refresh}"))
                .map_err(|e| {
                    let reason = format!("refresh token is not a valid header value: {e}");
                    ClientError::Validation(reason)
                })?;
            builder = builder
                .header(COOKIE, cookie)
                .header(REFRESH_TOKEN_HEADER, refresh.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_error(&request, e))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&request, e))?;

        // Error pages and empty bodies still carry a usable status.
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                debug!(path = %request.path, status, error = %err, "Response body is not JSON");
                serde_json::Value::Null
            })
        };
        Ok(ApiResponse::new(status, body))
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the raw request and reply with `response`.
    async fn one_shot_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if request_complete(&raw) {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}/api/"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    fn transport(base_url: String) -> ReqwestTransport {
        ReqwestTransport::new(&ClientConfig {
            api_base_url: base_url,
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_bearer_and_json_body() {
        let (base, server) = one_shot_server(
            concat!(
                "HTTP/1.1 200 OK\r\n",
                "content-type: application/json\r\n",
                "content-length: 27\r\n",
                "connection: close\r\n\r\n",
                "{\"success\":true,\"data\":{}}\n",
            ),
        )
        .await;
        let transport = transport(base);
        assert!(!transport.base_url().ends_with('/'));

        let response = transport
            .execute(
                ApiRequest::new(HttpMethod::Post, "/chat/messages")
                    .with_bearer(Some("abc".into()))
                    .with_body(Some(json!({"content": "hi"}))),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body["success"], true);
        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/chat/messages HTTP/1.1"));
        assert!(raw.to_lowercase().contains("authorization: bearer abc"));
        assert!(raw.ends_with(r#"{"content":"hi"}"#));
    }

    #[tokio::test]
    async fn refresh_token_goes_in_cookie_and_header() {
        let (base, server) = one_shot_server(
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let response = transport(base)
            .execute(
                ApiRequest::new(HttpMethod::Post, "/auth/refresh")
                    .with_refresh_token(Some("r-1".into())),
            )
            .await
            .unwrap();

        assert!(response.is_unauthorized());
        assert!(response.body.is_null());
        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.contains("cookie: refreshtoken=r-1"));
        assert!(raw.contains("x-refresh-token: r-1"));
        assert!(!raw.contains("authorization:"));
    }

    #[tokio::test]
    async fn non_json_error_body_keeps_status() {
        let (base, _server) = one_shot_server(
            concat!(
                "HTTP/1.1 502 Bad Gateway\r\n",
                "content-type: text/html\r\n",
                "content-length: 12\r\n",
                "connection: close\r\n\r\n",
                "<h1>bad</h1>",
            ),
        )
        .await;
        let response = transport(base)
            .execute(ApiRequest::new(HttpMethod::Get, "/auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 502);
        assert!(response.body.is_null());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport(format!("http://{addr}"))
            .execute(ApiRequest::new(HttpMethod::Get, "/auth/me"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
    }
}
