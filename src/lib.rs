//! Reliable byte-stream relay client.
//!
//! Tunnels an application-level TCP byte stream over a framed WebSocket
//! transport to a cloud relay endpoint, which forwards bytes to a target
//! machine. This crate implements the relay stream core only: framing
//! ([`relay_protocol`]), the transport abstraction ([`adapter`]), the
//! unacknowledged send queue ([`queue`]), and the public read/write/close
//! API with its reconnect state machine ([`stream`]).
//!
//! Out of scope: the GUI client, compute-platform metadata/credential
//! adapters, background-job orchestration, settings persistence, and
//! OAuth token acquisition — these are external collaborators with a
//! narrow contract consumed through [`adapter::EndpointAdapter`].

pub mod adapter;
mod error;
mod queue;
mod stream;

pub use adapter::{
    Channel, ChannelError, CloseClass, CloseStatus, ConnectError, EndpointAdapter, EndpointConfig,
    Received, WebSocketEndpointAdapter, close_codes,
};
pub use error::RelayError;
pub use queue::QueueError;
pub use relay_protocol::{
    DecodeError, EncodeError, MAX_DATA_PAYLOAD_SIZE, MIN_READ_SIZE, Message,
};
pub use stream::{RelayStream, StreamState};
