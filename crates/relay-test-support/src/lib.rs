//! Test-only scaffolding for the relay stream: a scriptable in-process
//! mock `EndpointAdapter`, and a real loopback mock WebSocket server for
//! exercising the default transport adapter end to end.

mod mock_adapter;
mod mock_server;

pub use mock_adapter::{Event, ScriptedAdapter, ScriptedChannel};
pub use mock_server::MockRelayServer;
