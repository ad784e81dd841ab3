//! Real loopback WebSocket server for exercising `WebSocketEndpointAdapter`
//! end to end, modeled on this workspace's `mock_ws_server` test harness
//! but speaking the binary tag/length wire format instead of JSON.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock relay endpoint: on every connection it sends
/// `CONNECT_SUCCESS_SID` with a fixed session id, then echoes each
/// received `DATA` frame back as an `ACK` for the cumulative bytes
/// received so far. Good enough to exercise the adapter's framing and
/// connect/send/receive wiring against a real socket; the reconnect
/// state machine itself is exercised against [`crate::ScriptedAdapter`]
/// instead.
pub struct MockRelayServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockRelayServer {
    pub async fn start() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            Self::accept_loop(listener).await;
        });
        Ok(Self { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/connect", self.addr)
    }

    async fn accept_loop(listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        let mut buf = Vec::new();
        buf.extend_from_slice(&relay_protocol::TAG_CONNECT_SUCCESS_SID.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"mock");
        write.send(Message::Binary(buf.into())).await?;

        let mut bytes_received: u64 = 0;
        while let Some(msg_result) = read.next().await {
            let msg = msg_result?;
            let bytes = match msg {
                Message::Binary(b) => b,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };
            if let Ok(relay_protocol::Message::Data(payload)) = relay_protocol::decode(&bytes) {
                bytes_received += payload.len() as u64;
                let mut ack = Vec::with_capacity(2 + 8);
                ack.extend_from_slice(&relay_protocol::TAG_ACK.to_be_bytes());
                ack.extend_from_slice(&bytes_received.to_be_bytes());
                write.send(Message::Binary(ack.into())).await?;
            }
        }
        Ok(())
    }
}
