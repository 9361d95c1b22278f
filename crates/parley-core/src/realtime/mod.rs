//! The realtime link: transport ports, reconnect backoff and the connection
//! state machine.

pub mod backoff;
pub mod connection;
pub mod transport;

pub use backoff::Backoff;
pub use connection::{ConnectionSettings, RealtimeConnection};
pub use transport::{FrameSink, FrameSource, RealtimeConnector};
