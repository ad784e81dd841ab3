//! Endpoint Adapter: abstracts the underlying message-oriented transport.

mod ws;

pub use ws::{EndpointConfig, WebSocketEndpointAdapter};

use std::sync::Arc;

/// Numeric WebSocket close codes this implementation recognizes. Standard
/// codes use the standard 1000-series range; application codes use a
/// private 4000-series range. The exact values are an implementation
/// choice (`spec.md` does not prescribe them) and are recorded in
/// DESIGN.md.
pub mod close_codes {
    pub const NORMAL_CLOSURE: u16 = 1000;
    pub const ENDPOINT_UNAVAILABLE: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_MESSAGE_TYPE: u16 = 1003;

    pub const DESTINATION_READ_FAILED: u16 = 4000;
    pub const BAD_ACK: u16 = 4001;
    pub const ERROR_UNKNOWN: u16 = 4002;
    pub const INVALID_TAG: u16 = 4003;
    pub const INVALID_WEBSOCKET_OPCODE: u16 = 4004;
    pub const REAUTHENTICATION_REQUIRED: u16 = 4005;
    pub const SID_UNKNOWN: u16 = 4006;
    pub const SID_IN_USE: u16 = 4007;
}

/// How a close code is handled by the reconnect state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// End-of-stream from the server's side; reads become terminal.
    Graceful,
    /// Recoverable; drives a fresh connect or a reconnect+replay.
    Recoverable,
    /// Fatal; surfaces `ServerClosedStream` and closes the stream.
    Unrecoverable,
}

/// A close status observed on a `Channel::receive` call.
#[derive(Debug, Clone)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn classify(&self) -> CloseClass {
        use close_codes::*;
        match self.code {
            NORMAL_CLOSURE | DESTINATION_READ_FAILED => CloseClass::Graceful,
            SID_UNKNOWN | SID_IN_USE => CloseClass::Unrecoverable,
            ENDPOINT_UNAVAILABLE
            | PROTOCOL_ERROR
            | INVALID_MESSAGE_TYPE
            | BAD_ACK
            | ERROR_UNKNOWN
            | INVALID_TAG
            | INVALID_WEBSOCKET_OPCODE
            | REAUTHENTICATION_REQUIRED => CloseClass::Recoverable,
            // An unknown code from a non-conforming server: treat as
            // recoverable rather than refusing to ever reconnect.
            _ => CloseClass::Recoverable,
        }
    }
}

/// Outcome of a single `Channel::receive` call.
#[derive(Debug)]
pub enum Received {
    Message(Vec<u8>),
    Closed(CloseStatus),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("transport connect failed: {0}")]
    Transport(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
    #[error("server closed the connection before a session message arrived")]
    ClosedBeforeSession,
}

/// One transport-level connection carrying framed messages.
///
/// Both methods take `&self`: implementations are expected to hold their
/// send and receive halves behind independent interior locks (the default
/// `WebSocketEndpointAdapter` splits the underlying `tokio-tungstenite`
/// stream into its sink/stream halves) so a concurrent read and write do
/// not contend for one `&mut self` handle.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn receive(&self) -> Received;
    async fn send(&self, message_bytes: Vec<u8>) -> Result<(), ChannelError>;
    async fn close(&self);
}

#[async_trait::async_trait]
pub trait EndpointAdapter: Send + Sync + 'static {
    type Channel: Channel;

    /// Opens a fresh transport connection for a brand-new session.
    async fn connect(&self) -> Result<Self::Channel, ConnectError>;

    /// Opens a new transport connection that resumes an existing session
    /// at the given cumulative acknowledged-byte offset.
    async fn reconnect(
        &self,
        session_id: Arc<[u8]>,
        bytes_acked_total: u64,
    ) -> Result<Self::Channel, ConnectError>;
}
