//! Default `EndpointAdapter` built on `tokio-tungstenite`.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Channel, ChannelError, CloseStatus, ConnectError, EndpointAdapter, Received};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Caller-supplied configuration for the default WebSocket adapter. No
/// file/env loading happens here — the caller is responsible for
/// producing this value however it sees fit.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// URL used for a brand-new session, e.g. `wss://relay.example.com/connect`.
    pub connect_url: String,
    /// URL template used for resuming a session. `{sid}` and `{ack}` are
    /// substituted with the hex-encoded session id and the acked-byte
    /// offset, e.g. `wss://relay.example.com/reconnect?sid={sid}&ack={ack}`.
    pub reconnect_url_template: String,
    /// Bearer token sent as an `Authorization` header on both endpoints.
    pub token: String,
}

pub struct WebSocketEndpointAdapter {
    config: EndpointConfig,
}

impl WebSocketEndpointAdapter {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    async fn dial(&self, url: &str) -> Result<WsChannel, ConnectError> {
        let request = build_ws_request(url, &self.config.token)?;
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();
        Ok(WsChannel {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait::async_trait]
impl EndpointAdapter for WebSocketEndpointAdapter {
    type Channel = WsChannel;

    async fn connect(&self) -> Result<Self::Channel, ConnectError> {
        self.dial(&self.config.connect_url).await
    }

    async fn reconnect(
        &self,
        session_id: Arc<[u8]>,
        bytes_acked_total: u64,
    ) -> Result<Self::Channel, ConnectError> {
        let url = self
            .config
            .reconnect_url_template
            .replace("{sid}", &hex_encode(&session_id))
            .replace("{ack}", &bytes_acked_total.to_string());
        self.dial(&url).await
    }
}

/// A single WebSocket connection, split into independent sink/stream
/// halves so a concurrent `send` and `receive` don't contend for one
/// `&mut self` handle.
pub struct WsChannel {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
}

#[async_trait::async_trait]
impl Channel for WsChannel {
    async fn receive(&self) -> Received {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None => {
                    return Received::Closed(CloseStatus::new(
                        super::close_codes::ERROR_UNKNOWN,
                        "transport stream ended without a close frame",
                    ));
                }
                Some(Err(e)) => {
                    return Received::Closed(CloseStatus::new(
                        super::close_codes::ERROR_UNKNOWN,
                        e.to_string(),
                    ));
                }
                Some(Ok(WsMessage::Binary(bytes))) => return Received::Message(bytes.into()),
                Some(Ok(WsMessage::Close(frame))) => {
                    return Received::Closed(close_status_from_frame(frame));
                }
                // Ping/Pong/Text/Frame are not part of this wire protocol;
                // tungstenite answers pings automatically, so just loop.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn send(&self, message_bytes: Vec<u8>) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Binary(message_bytes.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;
    }
}

fn close_status_from_frame(frame: Option<CloseFrame>) -> CloseStatus {
    match frame {
        Some(f) => CloseStatus::new(u16::from(f.code), f.reason.to_string()),
        None => CloseStatus::new(super::close_codes::NORMAL_CLOSURE, ""),
    }
}

fn build_ws_request(
    url: &str,
    token: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ConnectError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectError::Handshake(format!("invalid URL '{url}': {e}")))?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}").parse().map_err(
            |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                ConnectError::Handshake(format!("invalid auth header: {e}"))
            },
        )?,
    );
    Ok(request)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}
