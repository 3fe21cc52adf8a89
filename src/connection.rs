//! HTTP/2 connections and the per-notification stream dispatcher.
//!
//! A [`Connection`] wraps one authenticated HTTP/2 connection to APNs. Each
//! connection owns a counting semaphore bounding concurrent streams and a
//! background driver task that pumps the `h2` connection state machine,
//! replenishes the connection-level flow window once per second, and flips
//! the connection's open flag when the peer goes away.
//!
//! The handshake is generic over the transport so the dispatcher can be
//! exercised against any HTTP/2 peer; production connections come from the
//! pool, which layers TLS underneath.

use std::future::poll_fn;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use h2::client::{self, SendRequest};
use h2::{Reason, SendStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::{ApnsError, Result};
use crate::payload::{Priority, PushType};
use crate::request;
use crate::response::{classify, ApnResult};
use crate::token::DeviceToken;

/// SETTINGS_MAX_FRAME_SIZE advertised to APNs.
const MAX_FRAME_SIZE: u32 = 16_384;

/// SETTINGS_MAX_HEADER_LIST_SIZE advertised to APNs.
const MAX_HEADER_LIST_SIZE: u32 = 4_096;

/// SETTINGS_INITIAL_WINDOW_SIZE, also the connection-level window target
/// the flow worker keeps replenishing.
const INITIAL_WINDOW_SIZE: u32 = 65_536;

/// Cadence of connection-level WINDOW_UPDATE replenishment.
const FLOW_REPLENISH_INTERVAL: Duration = Duration::from_secs(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable configuration a session captures at construction time, used
/// by the pool to create new connections on demand.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Client certificate path (certificate mode).
    pub cert_path: Option<PathBuf>,
    /// Client private key path (certificate mode).
    pub key_path: Option<PathBuf>,
    /// CA bundle path (certificate mode).
    pub ca_path: Option<PathBuf>,
    /// APNs hostname, production or sandbox.
    pub hostname: String,
    /// Bundle topic sent as `apns-topic`.
    pub topic: String,
    /// Whether authentication uses caller-supplied bearer tokens.
    pub use_jwt: bool,
    /// Stream-slot capacity per connection.
    pub max_concurrent_streams: u32,
}

/// State shared between a connection handle and its driver task.
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    id: u64,
    open: AtomicBool,
    shutdown: Notify,
}

impl ConnectionShared {
    fn new(id: u64) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            shutdown: Notify::new(),
        }
    }

    /// Mark the connection unusable for new streams. In-flight streams
    /// keep running; the socket stays up until [`Self::close`].
    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Mark the connection closed and tell the driver to tear the
    /// transport down. Idempotent.
    pub(crate) fn close(&self) {
        self.mark_closed();
        // notify_one stores a permit, so the driver sees this even if it
        // has not reached its select yet.
        self.shutdown.notify_one();
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One TLS-secured HTTP/2 connection to APNs.
pub struct Connection {
    send: SendRequest<Bytes>,
    shared: Arc<ConnectionShared>,
    streams: Semaphore,
    info: Arc<ConnectionInfo>,
}

impl Connection {
    /// Perform the HTTP/2 handshake over an established transport and
    /// spawn the connection's driver task.
    ///
    /// The transport is normally a TLS stream produced by the pool, but any
    /// duplex byte stream speaking HTTP/2 on the other side works.
    pub async fn handshake<T>(io: T, info: Arc<ConnectionInfo>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (send, h2_connection) = client::Builder::new()
            .max_frame_size(MAX_FRAME_SIZE)
            .max_concurrent_streams(info.max_concurrent_streams)
            .max_header_list_size(MAX_HEADER_LIST_SIZE)
            .initial_window_size(INITIAL_WINDOW_SIZE)
            .handshake(io)
            .await?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(ConnectionShared::new(id));
        tokio::spawn(drive(h2_connection, Arc::clone(&shared)));

        debug!(
            connection = id,
            host = %info.hostname,
            max_streams = info.max_concurrent_streams,
            "HTTP/2 connection established"
        );

        Ok(Self {
            send,
            shared,
            streams: Semaphore::new(info.max_concurrent_streams as usize),
            info,
        })
    }

    /// Whether the connection may still be used for new streams.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Free stream slots right now.
    pub(crate) fn available_streams(&self) -> usize {
        self.streams.available_permits()
    }

    /// Mark the connection unusable so the pool discards it. In-flight
    /// streams on other tasks are left to finish.
    pub(crate) fn mark_closed(&self) {
        self.shared.mark_closed();
    }

    pub(crate) fn close(&self) {
        self.shared.close();
    }

    /// Send one notification over this connection.
    ///
    /// Acquires a stream slot (waiting if all are in flight), writes the
    /// request, and classifies the response. Client-side failures are
    /// folded into [`ApnResult::ClientError`] / [`ApnResult::IoError`];
    /// a peer refusing new streams yields [`ApnResult::Backoff`].
    pub async fn send_raw(
        &self,
        token: &DeviceToken,
        jwt: Option<&str>,
        push_type: PushType,
        priority: Option<Priority>,
        body: Bytes,
    ) -> ApnResult {
        match self.dispatch(token, jwt, push_type, priority, body).await {
            Ok(result) => result,
            Err(err) => ApnResult::from_error(err),
        }
    }

    async fn dispatch(
        &self,
        token: &DeviceToken,
        jwt: Option<&str>,
        push_type: PushType,
        priority: Option<Priority>,
        body: Bytes,
    ) -> Result<ApnResult> {
        if !self.is_open() {
            return Err(ApnsError::ConnectionClosed);
        }

        // Slot released on every exit path, including cancellation.
        let _slot = self
            .streams
            .acquire()
            .await
            .map_err(|_| ApnsError::ConnectionClosed)?;

        let priority = priority.or_else(|| push_type.default_priority());
        let head = request::build_request(
            &self.info.hostname,
            token,
            &self.info.topic,
            push_type,
            priority,
            jwt,
        )?;

        let ready = self.send.clone();
        let mut ready = match ready.ready().await {
            Ok(ready) => ready,
            Err(err) => return Ok(self.stream_error(err)),
        };
        let (response, mut stream) = match ready.send_request(head, body.is_empty()) {
            Ok(pair) => pair,
            Err(err) => return Ok(self.stream_error(err)),
        };

        if !body.is_empty() {
            send_body(&mut stream, body).await?;
        }

        let (parts, mut incoming) = match response.await {
            Ok(response) => response.into_parts(),
            Err(err) => return Ok(self.stream_error(err)),
        };

        let mut payload = BytesMut::new();
        while let Some(chunk) = incoming.data().await {
            let chunk = chunk?;
            let _ = incoming.flow_control().release_capacity(chunk.len());
            payload.extend_from_slice(&chunk);
        }

        debug!(
            connection = self.shared.id,
            status = parts.status.as_u16(),
            "APNs response"
        );
        Ok(classify(parts.status, &payload))
    }

    /// Translate an error from opening or completing a stream.
    ///
    /// REFUSED_STREAM means the peer will take no more streams right now:
    /// the caller should back off and retry. GOAWAY marks the connection
    /// unusable; in-flight streams may still complete, but the pool must
    /// not hand the connection out again.
    fn stream_error(&self, err: h2::Error) -> ApnResult {
        if err.reason() == Some(Reason::REFUSED_STREAM) {
            debug!(connection = self.shared.id, "stream refused, backing off");
            return ApnResult::Backoff;
        }
        if err.is_go_away() {
            warn!(connection = self.shared.id, error = %err, "connection going away");
            // In-flight streams may still complete; only new use is barred.
            self.shared.mark_closed();
        }
        ApnResult::from_error(ApnsError::Http2(err))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The h2 connection task parks even after every request handle is
        // gone; wake it so the socket actually closes.
        self.shared.close();
    }
}

/// Upload the request body, honoring the peer's flow-control window, with
/// END_STREAM on the final frame.
async fn send_body(stream: &mut SendStream<Bytes>, mut body: Bytes) -> Result<()> {
    stream.reserve_capacity(body.len());
    while !body.is_empty() {
        let granted = match poll_fn(|cx| stream.poll_capacity(cx)).await {
            Some(capacity) => capacity?,
            None => return Err(ApnsError::ConnectionClosed),
        };
        let frame = body.split_to(granted.min(body.len()));
        let end_of_stream = body.is_empty();
        stream.send_data(frame, end_of_stream)?;
        if !end_of_stream {
            stream.reserve_capacity(body.len());
        }
    }
    Ok(())
}

/// Per-connection driver: pumps the HTTP/2 state machine, replenishes the
/// connection-level inbound flow window every second, and terminates when
/// the connection closes.
async fn drive<T>(mut connection: client::Connection<T, Bytes>, shared: Arc<ConnectionShared>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut window = tokio::time::interval(FLOW_REPLENISH_INTERVAL);
    window.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = &mut connection => {
                match result {
                    Ok(()) => debug!(connection = shared.id, "connection closed"),
                    Err(err) => {
                        warn!(connection = shared.id, error = %err, "connection terminated")
                    }
                }
                shared.mark_closed();
                break;
            }
            _ = shared.shutdown.notified() => break,
            _ = window.tick() => {
                connection.set_target_window_size(INITIAL_WINDOW_SIZE);
            }
        }
    }
    // Dropping `connection` tears the transport down.
}
