//! Relay Stream: the public façade. Drives the codec, the channel
//! obtained from the Endpoint Adapter, and the unacknowledged send queue
//! through the connect/reconnect state machine.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{Channel, CloseClass, CloseStatus, EndpointAdapter, Received};
use crate::error::RelayError;
use crate::queue::SendQueue;

/// Lifecycle of a relay stream. See `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotConnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

struct Inner<C> {
    channel: Option<Arc<C>>,
    queue: SendQueue,
    session_id: Option<Arc<[u8]>>,
    state: StreamState,
    ever_received_data: bool,
    ever_sent: bool,
    read_terminal: bool,
    connect_count: u64,
    reconnect_count: u64,
}

impl<C> Inner<C> {
    fn new() -> Self {
        Self {
            channel: None,
            queue: SendQueue::new(),
            session_id: None,
            state: StreamState::NotConnected,
            ever_received_data: false,
            ever_sent: false,
            read_terminal: false,
            connect_count: 0,
            reconnect_count: 0,
        }
    }
}

enum CloseOutcome {
    /// Reads become terminal; the stream is otherwise left usable.
    EndOfStream,
    /// A replacement channel is now installed; the caller's loop should
    /// retry its operation.
    Reconnected,
    Fatal(RelayError),
}

/// Reliable byte-stream relay client. One instance per logical stream.
pub struct RelayStream<A: EndpointAdapter> {
    adapter: A,
    inner: Mutex<Inner<A::Channel>>,
    reconnected: Notify,
}

impl<A: EndpointAdapter> RelayStream<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            inner: Mutex::new(Inner::new()),
            reconnected: Notify::new(),
        }
    }

    /// The minimum caller read buffer size, in bytes.
    pub const fn min_read_size() -> usize {
        relay_protocol::MIN_READ_SIZE
    }

    pub async fn unacknowledged_message_count(&self) -> usize {
        self.inner.lock().await.queue.unacknowledged_count()
    }

    /// Outstanding unacknowledged bytes: the ack a caller should still
    /// expect the server to eventually send for data already handed to
    /// the transport.
    pub async fn expected_ack(&self) -> u64 {
        self.inner.lock().await.queue.outstanding_bytes()
    }

    pub async fn connect_count(&self) -> u64 {
        self.inner.lock().await.connect_count
    }

    pub async fn reconnect_count(&self) -> u64 {
        self.inner.lock().await.reconnect_count
    }

    pub async fn state(&self) -> StreamState {
        self.inner.lock().await.state
    }

    /// Explicit no-op establishing the public surface named in
    /// `spec.md` §6; connection is otherwise always lazy, established on
    /// the first `read`/`write`.
    pub fn open(adapter: A) -> Self {
        Self::new(adapter)
    }

    // -----------------------------------------------------------------
    // read
    // -----------------------------------------------------------------

    pub async fn read(&self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize, RelayError> {
        let min = Self::min_read_size();
        if buf.len() < min {
            return Err(RelayError::BufferTooSmall {
                got: buf.len(),
                min,
            });
        }

        loop {
            {
                let guard = self.inner.lock().await;
                if guard.state == StreamState::Closed {
                    return Err(RelayError::StreamClosed);
                }
                if guard.read_terminal {
                    return Ok(0);
                }
            }

            let channel = self.channel_for_read(cancel).await?;

            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                r = channel.receive() => r,
            };

            match received {
                Received::Message(bytes) => {
                    if let Some(n) = self.dispatch_message(&bytes, buf).await? {
                        return Ok(n);
                    }
                }
                Received::Closed(status) => match self.handle_close(status).await {
                    CloseOutcome::EndOfStream => {
                        let mut guard = self.inner.lock().await;
                        guard.read_terminal = true;
                        return Ok(0);
                    }
                    CloseOutcome::Reconnected => continue,
                    CloseOutcome::Fatal(e) => return Err(self.fail(e).await),
                },
            }
        }
    }

    /// Decode one message and act on it. Returns `Some(n)` when the
    /// caller's read is satisfied with `n` payload bytes, or `None` if
    /// the read loop should continue to the next message.
    async fn dispatch_message(
        &self,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<Option<usize>, RelayError> {
        let decoded = match relay_protocol::decode(bytes) {
            Ok(m) => m,
            Err(relay_protocol::DecodeError::InvalidTag(tag)) => {
                let lenient = {
                    let guard = self.inner.lock().await;
                    guard.state == StreamState::Connected
                };
                if lenient {
                    warn!(tag, "dropping unrecognized or forbidden tag mid-stream");
                    return Ok(None);
                }
                return Err(self
                    .fail(RelayError::InvalidServerResponse(format!(
                        "invalid tag {tag} before session established"
                    )))
                    .await);
            }
            Err(e) => return Err(self.fail(e.into()).await),
        };

        match decoded {
            relay_protocol::Message::ConnectSuccessSid(sid) => {
                let mut guard = self.inner.lock().await;
                // A resume attempt that has nothing to replay (nothing was
                // ever sent) may come back as a brand-new session instead
                // of a RECONNECT_SUCCESS_ACK — there is no backlog for the
                // server to acknowledge. See DESIGN.md.
                let acceptable_during_resume =
                    guard.state == StreamState::Reconnecting && guard.queue.bytes_sent_total() == 0;
                if guard.state != StreamState::Connecting && !acceptable_during_resume {
                    let err = RelayError::InvalidServerResponse(
                        "unexpected CONNECT_SUCCESS_SID".into(),
                    );
                    return Err(self.fail_locked(&mut guard, err));
                }
                guard.session_id = Some(Arc::from(sid.into_boxed_slice()));
                guard.state = StreamState::Connected;
                info!("session established");
                Ok(None)
            }
            relay_protocol::Message::ReconnectSuccessAck(acked) => {
                let mut guard = self.inner.lock().await;
                if guard.state != StreamState::Reconnecting {
                    let err = RelayError::InvalidServerResponse(
                        "unexpected RECONNECT_SUCCESS_ACK".into(),
                    );
                    return Err(self.fail_locked(&mut guard, err));
                }
                if let Err(e) = guard.queue.resume_to(acked) {
                    return Err(self.fail_locked(&mut guard, e.into()));
                }
                let replay: Vec<Vec<u8>> =
                    guard.queue.replay_all().map(<[u8]>::to_vec).collect();
                let channel = guard
                    .channel
                    .clone()
                    .expect("channel is installed before Reconnecting is reached");
                drop(guard);

                for payload in replay {
                    let encoded = relay_protocol::encode_data(&payload)
                        .expect("payload was already size-validated at append time");
                    if channel.send(encoded).await.is_err() {
                        return Err(self
                            .fail(RelayError::ServerClosedStream(
                                "replay send failed".into(),
                            ))
                            .await);
                    }
                }

                let mut guard = self.inner.lock().await;
                guard.state = StreamState::Connected;
                drop(guard);
                self.reconnected.notify_waiters();
                info!("session resumed");
                Ok(None)
            }
            relay_protocol::Message::Data(payload) => {
                {
                    let mut guard = self.inner.lock().await;
                    if guard.state != StreamState::Connected {
                        let err = RelayError::InvalidServerResponse(
                            "DATA received while not connected".into(),
                        );
                        return Err(self.fail_locked(&mut guard, err));
                    }
                    guard.ever_received_data = true;
                }
                if payload.is_empty() {
                    debug!("ignoring empty DATA payload");
                    return Ok(None);
                }
                if payload.len() > buf.len() {
                    // Precluded by the MinReadSize precondition; guard anyway.
                    return Err(RelayError::BufferTooSmall {
                        got: buf.len(),
                        min: Self::min_read_size(),
                    });
                }
                buf[..payload.len()].copy_from_slice(&payload);
                debug!(len = payload.len(), "delivered DATA to caller");
                Ok(Some(payload.len()))
            }
            relay_protocol::Message::Ack(acked) => {
                let mut guard = self.inner.lock().await;
                if guard.state != StreamState::Connected {
                    let err =
                        RelayError::InvalidServerResponse("ACK received while not connected".into());
                    return Err(self.fail_locked(&mut guard, err));
                }
                if let Err(e) = guard.queue.trim_to(acked) {
                    return Err(self.fail_locked(&mut guard, e.into()));
                }
                Ok(None)
            }
        }
    }

    async fn handle_close(&self, status: CloseStatus) -> CloseOutcome {
        let was_reconnecting = {
            let guard = self.inner.lock().await;
            guard.state == StreamState::Reconnecting
        };
        if was_reconnecting {
            return CloseOutcome::Fatal(RelayError::ServerClosedStream(format!(
                "close code {} received while resuming session",
                status.code
            )));
        }

        match status.classify() {
            CloseClass::Graceful => CloseOutcome::EndOfStream,
            CloseClass::Unrecoverable => CloseOutcome::Fatal(RelayError::ServerClosedStream(
                format!("unrecoverable close code {}", status.code),
            )),
            CloseClass::Recoverable => {
                let fresh = {
                    let guard = self.inner.lock().await;
                    !guard.ever_received_data && !guard.ever_sent
                };
                if fresh {
                    {
                        let mut guard = self.inner.lock().await;
                        guard.channel = None;
                        guard.state = StreamState::Connecting;
                    }
                    match self.adapter.connect().await {
                        Ok(channel) => {
                            let mut guard = self.inner.lock().await;
                            guard.channel = Some(Arc::new(channel));
                            guard.connect_count += 1;
                            info!(connect_count = guard.connect_count, "reconnected fresh");
                            CloseOutcome::Reconnected
                        }
                        Err(e) => CloseOutcome::Fatal(e.into()),
                    }
                } else {
                    let (session_id, acked) = {
                        let mut guard = self.inner.lock().await;
                        let Some(session_id) = guard.session_id.clone() else {
                            // Data was written but no session was ever
                            // established (no CONNECT_SUCCESS_SID was ever
                            // read), so there is nothing to resume.
                            return CloseOutcome::Fatal(self.fail_locked(
                                &mut guard,
                                RelayError::ServerClosedStream(
                                    "channel closed before a session was established".into(),
                                ),
                            ));
                        };
                        (session_id, guard.queue.bytes_acked_total())
                    };
                    {
                        let mut guard = self.inner.lock().await;
                        guard.channel = None;
                        guard.state = StreamState::Reconnecting;
                    }
                    match self.adapter.reconnect(session_id, acked).await {
                        Ok(channel) => {
                            let mut guard = self.inner.lock().await;
                            guard.channel = Some(Arc::new(channel));
                            guard.reconnect_count += 1;
                            info!(reconnect_count = guard.reconnect_count, "resuming session");
                            CloseOutcome::Reconnected
                        }
                        Err(e) => CloseOutcome::Fatal(RelayError::ServerClosedStream(format!(
                            "reconnect failed: {e}"
                        ))),
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // write
    // -----------------------------------------------------------------

    pub async fn write(&self, buf: &[u8], cancel: &CancellationToken) -> Result<(), RelayError> {
        let encoded = relay_protocol::encode_data(buf)?;

        loop {
            let channel = self.channel_for_write(cancel).await?;

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                r = channel.send(encoded.clone()) => r,
            };

            match sent {
                Ok(()) => {
                    let mut guard = self.inner.lock().await;
                    guard.queue.append(buf.to_vec());
                    guard.ever_sent = true;
                    return Ok(());
                }
                Err(_) => {
                    let synthetic = CloseStatus::new(
                        crate::adapter::close_codes::ERROR_UNKNOWN,
                        "write failed on channel",
                    );
                    match self.handle_close(synthetic).await {
                        CloseOutcome::Reconnected => continue,
                        CloseOutcome::EndOfStream => {
                            // A send failure is never graceful; treated
                            // defensively as a fatal condition.
                            return Err(self
                                .fail(RelayError::ServerClosedStream(
                                    "channel closed during write".into(),
                                ))
                                .await);
                        }
                        CloseOutcome::Fatal(e) => return Err(self.fail(e).await),
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // close
    // -----------------------------------------------------------------

    pub async fn close(&self, cancel: &CancellationToken) -> Result<(), RelayError> {
        let channel = {
            let mut guard = self.inner.lock().await;
            if guard.state == StreamState::Closed {
                return Ok(());
            }
            let channel = guard.channel.take();
            guard.state = StreamState::Closed;
            channel
        };
        if let Some(channel) = channel {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                () = channel.close() => {}
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // channel acquisition helpers
    // -----------------------------------------------------------------

    /// Fetch the current channel for a read, lazily connecting if
    /// `NotConnected`. Unlike writes, a read may proceed while
    /// `Reconnecting` — it is the read loop itself that drives the
    /// resume to completion.
    async fn channel_for_read(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<A::Channel>, RelayError> {
        loop {
            let existing = {
                let mut guard = self.inner.lock().await;
                match guard.state {
                    StreamState::Closed => return Err(RelayError::StreamClosed),
                    StreamState::NotConnected => {
                        guard.state = StreamState::Connecting;
                        None
                    }
                    _ => guard.channel.clone(),
                }
            };
            if let Some(c) = existing {
                return Ok(c);
            }
            self.connect_fresh(cancel).await?;
        }
    }

    /// Fetch the current channel for a write. Blocks while
    /// `Reconnecting` until a replay completes and `Connected` is
    /// reached (see `spec.md` §5).
    async fn channel_for_write(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<A::Channel>, RelayError> {
        loop {
            let outcome = {
                let mut guard = self.inner.lock().await;
                match guard.state {
                    StreamState::Closed => return Err(RelayError::StreamClosed),
                    StreamState::Reconnecting => None,
                    StreamState::NotConnected => {
                        guard.state = StreamState::Connecting;
                        Some(guard.channel.clone())
                    }
                    StreamState::Connecting | StreamState::Connected => {
                        Some(guard.channel.clone())
                    }
                }
            };
            match outcome {
                Some(Some(c)) => return Ok(c),
                Some(None) => self.connect_fresh(cancel).await?,
                None => self.await_reconnected_or_closed(cancel).await?,
            }
        }
    }

    async fn connect_fresh(&self, cancel: &CancellationToken) -> Result<(), RelayError> {
        let channel = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RelayError::Cancelled),
            r = self.adapter.connect() => r?,
        };
        let mut guard = self.inner.lock().await;
        guard.channel = Some(Arc::new(channel));
        guard.connect_count += 1;
        info!(connect_count = guard.connect_count, "connected");
        Ok(())
    }

    async fn await_reconnected_or_closed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        loop {
            let notified = self.reconnected.notified();
            tokio::pin!(notified);
            {
                let guard = self.inner.lock().await;
                match guard.state {
                    StreamState::Closed => return Err(RelayError::StreamClosed),
                    StreamState::Reconnecting => {}
                    _ => return Ok(()),
                }
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                () = &mut notified => {}
            }
        }
    }

    // -----------------------------------------------------------------
    // failure helpers
    // -----------------------------------------------------------------

    fn fail_locked(&self, guard: &mut Inner<A::Channel>, err: RelayError) -> RelayError {
        guard.state = StreamState::Closed;
        guard.channel = None;
        err
    }

    async fn fail(&self, err: RelayError) -> RelayError {
        let mut guard = self.inner.lock().await;
        self.fail_locked(&mut guard, err)
    }
}
