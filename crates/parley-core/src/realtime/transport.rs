//! Realtime transport ports.
//!
//! A [`RealtimeConnector`] performs the handshake and hands back the two
//! halves of the link: a [`FrameSink`] for outbound text frames and a
//! [`FrameSource`] for inbound ones. parley-infra implements them over
//! WebSockets; tests use in-memory channels.

use std::future::Future;

use parley_types::ClientError;

pub trait FrameSink: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Close the link gracefully. Closing an already closed link is not an error.
    fn close(&mut self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

pub trait FrameSource: Send + 'static {
    /// Next inbound text frame, or `None` once the peer has closed the link.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<String, ClientError>>> + Send;
}

pub trait RealtimeConnector: Send + Sync + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    /// Open a link to `url`, authenticating with `access_token`.
    ///
    /// Success means the peer accepted the handshake.
    fn connect(
        &self,
        url: &str,
        access_token: &str,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Source), ClientError>> + Send;
}
