//! In-process scriptable mock adapter, modeled on this workspace's
//! `mock_ws_client`/`mock_ws_server` test harness but driven purely by an
//! in-memory event script rather than a real socket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use relay_core::{Channel, ChannelError, CloseStatus, ConnectError, EndpointAdapter, Received};
use tokio::sync::Mutex;

/// One scripted event a [`ScriptedChannel`] will yield from `receive()`.
#[derive(Debug, Clone)]
pub enum Event {
    /// A raw, already-encoded wire message (see `relay_protocol::encode_data`
    /// for `DATA`; hand-assemble other tags with their tag/length prefix).
    Message(Vec<u8>),
    Closed(CloseStatus),
}

impl Event {
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Event::Message(relay_protocol::encode_data(&payload.into()).expect("test payload fits"))
    }

    pub fn connect_success_sid(sid: impl AsRef<[u8]>) -> Self {
        let sid = sid.as_ref();
        let mut buf = Vec::with_capacity(2 + 4 + sid.len());
        buf.extend_from_slice(&relay_protocol::TAG_CONNECT_SUCCESS_SID.to_be_bytes());
        buf.extend_from_slice(&(sid.len() as u32).to_be_bytes());
        buf.extend_from_slice(sid);
        Event::Message(buf)
    }

    pub fn reconnect_success_ack(acked: u64) -> Self {
        let mut buf = Vec::with_capacity(2 + 8);
        buf.extend_from_slice(&relay_protocol::TAG_RECONNECT_SUCCESS_ACK.to_be_bytes());
        buf.extend_from_slice(&acked.to_be_bytes());
        Event::Message(buf)
    }

    pub fn ack(acked: u64) -> Self {
        let mut buf = Vec::with_capacity(2 + 8);
        buf.extend_from_slice(&relay_protocol::TAG_ACK.to_be_bytes());
        buf.extend_from_slice(&acked.to_be_bytes());
        Event::Message(buf)
    }

    pub fn raw_tag(tag: u16) -> Self {
        Event::Message(tag.to_be_bytes().to_vec())
    }

    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Event::Closed(CloseStatus::new(code, reason))
    }
}

struct ScriptedChannelState {
    events: Mutex<VecDeque<Event>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

/// One transport-level connection's worth of scripted server behavior.
/// Cheaply `Clone` (an `Arc` handle) so a test can keep a copy to inspect
/// `sent()` after handing the other copy to the adapter.
#[derive(Clone)]
pub struct ScriptedChannel(Arc<ScriptedChannelState>);

impl ScriptedChannel {
    pub fn new(events: Vec<Event>) -> Self {
        Self(Arc::new(ScriptedChannelState {
            events: Mutex::new(events.into()),
            sent: Mutex::new(Vec::new()),
        }))
    }

    /// Every payload handed to `send()` on this channel, in order.
    pub async fn sent(&self) -> Vec<Vec<u8>> {
        self.0.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Channel for ScriptedChannel {
    async fn receive(&self) -> Received {
        let mut events = self.0.events.lock().await;
        match events.pop_front() {
            Some(Event::Message(bytes)) => Received::Message(bytes),
            Some(Event::Closed(status)) => Received::Closed(status),
            None => {
                // Script exhausted: simulate a transport that never speaks
                // again rather than a spurious close.
                drop(events);
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn send(&self, message_bytes: Vec<u8>) -> Result<(), ChannelError> {
        self.0.sent.lock().await.push(message_bytes);
        Ok(())
    }

    async fn close(&self) {}
}

/// A queue of channels handed out, in order, across successive
/// `connect()`/`reconnect()` calls — modeling "the first channel behaves
/// like X, the second like Y" as seen throughout `spec.md` §8's boundary
/// scenarios.
pub struct ScriptedAdapter {
    channels: Mutex<VecDeque<ScriptedChannel>>,
    connect_calls: AtomicU64,
    reconnect_calls: Mutex<Vec<(Arc<[u8]>, u64)>>,
}

impl ScriptedAdapter {
    pub fn new(channels: Vec<ScriptedChannel>) -> Self {
        Self {
            channels: Mutex::new(channels.into()),
            connect_calls: AtomicU64::new(0),
            reconnect_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn connect_call_count(&self) -> u64 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub async fn reconnect_calls(&self) -> Vec<(Arc<[u8]>, u64)> {
        self.reconnect_calls.lock().await.clone()
    }

    async fn next_channel(&self) -> Result<ScriptedChannel, ConnectError> {
        self.channels
            .lock()
            .await
            .pop_front()
            .ok_or(ConnectError::ClosedBeforeSession)
    }
}

#[async_trait::async_trait]
impl EndpointAdapter for ScriptedAdapter {
    type Channel = ScriptedChannel;

    async fn connect(&self) -> Result<Self::Channel, ConnectError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.next_channel().await
    }

    async fn reconnect(
        &self,
        session_id: Arc<[u8]>,
        bytes_acked_total: u64,
    ) -> Result<Self::Channel, ConnectError> {
        self.reconnect_calls
            .lock()
            .await
            .push((session_id, bytes_acked_total));
        self.next_channel().await
    }
}
