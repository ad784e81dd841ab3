//! Public error taxonomy for the relay stream.

use crate::adapter::ConnectError;

/// The five error kinds a caller of the relay stream can observe.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Caller's read buffer is smaller than [`crate::min_read_size`]. The
    /// stream remains usable; this is a per-call failure only.
    #[error("read buffer of {got} bytes is smaller than the minimum {min}")]
    BufferTooSmall { got: usize, min: usize },

    /// A caller write exceeded the maximum single-frame payload size.
    /// Not one of `spec.md`'s five named kinds, but a distinct outbound
    /// misuse case that needs its own variant rather than being folded
    /// into a server-response error. See DESIGN.md.
    #[error("write of {len} bytes exceeds the {max}-byte single-frame maximum")]
    PayloadTooLarge { len: usize, max: usize },

    /// Truncated message, unknown/forbidden tag (outside the lenient
    /// mid-stream case), non-monotonic ACK, ACK exceeding sent bytes, or
    /// ACK not landing on a frame boundary. Fatal; the stream closes.
    #[error("invalid server response: {0}")]
    InvalidServerResponse(String),

    /// Unrecoverable close code, or any close encountered while resuming
    /// a session. Fatal; the stream closes.
    #[error("server closed the stream: {0}")]
    ServerClosedStream(String),

    /// A connect or reconnect attempt failed outright (DNS, TLS, HTTP
    /// upgrade, or the server closing before a session message arrived).
    /// Surfaced directly to the in-flight caller; there is no built-in
    /// retry.
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// Operation invoked after `close()` or after a fatal error.
    #[error("stream is closed")]
    StreamClosed,

    /// Operation aborted by the caller's cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<relay_protocol::DecodeError> for RelayError {
    fn from(e: relay_protocol::DecodeError) -> Self {
        RelayError::InvalidServerResponse(e.to_string())
    }
}

impl From<relay_protocol::EncodeError> for RelayError {
    fn from(e: relay_protocol::EncodeError) -> Self {
        match e {
            relay_protocol::EncodeError::PayloadTooLarge { len, max } => {
                RelayError::PayloadTooLarge { len, max }
            }
        }
    }
}

impl From<crate::queue::QueueError> for RelayError {
    fn from(e: crate::queue::QueueError) -> Self {
        RelayError::InvalidServerResponse(e.to_string())
    }
}
