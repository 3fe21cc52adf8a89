//! Session lifecycle and the top-level send API.
//!
//! A [`Session`] is the handle an application keeps for the lifetime of its
//! APNs traffic: it owns the connection pool, the bundle topic, and the
//! open flag. Sessions are cheap to clone and safe to share across tasks;
//! every concurrent sender goes through the same two-level pool
//! (connections, then per-connection stream slots).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::connection::ConnectionInfo;
use crate::error::{ApnsError, Result};
use crate::payload::{JsonAps, Priority, PushType, SILENT_PAYLOAD};
use crate::pool::ConnectionPool;
use crate::response::ApnResult;
use crate::token::DeviceToken;

/// APNs production hostname.
pub const PRODUCTION_HOST: &str = "api.push.apple.com";

/// APNs sandbox hostname.
pub const SANDBOX_HOST: &str = "api.sandbox.push.apple.com";

/// Upper bound on one acquire+send+receive sequence.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Client certificate path (certificate mode).
    pub cert_path: Option<PathBuf>,
    /// Client private key path (certificate mode).
    pub key_path: Option<PathBuf>,
    /// CA bundle path (certificate mode).
    pub ca_path: Option<PathBuf>,
    /// Authenticate with caller-supplied bearer tokens instead of a
    /// client certificate.
    pub use_jwt: bool,
    /// Target the sandbox environment.
    pub sandbox: bool,
    /// Concurrent streams per connection.
    pub max_concurrent_streams: u32,
    /// Connections per session.
    pub max_connections: u32,
    /// Bundle topic sent as `apns-topic`.
    pub topic: String,
}

impl SessionConfig {
    /// Create a configuration for the given bundle topic.
    ///
    /// Defaults to JWT mode against production with 100 streams per
    /// connection and 4 connections.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            cert_path: None,
            key_path: None,
            ca_path: None,
            use_jwt: true,
            sandbox: false,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            topic: topic.into(),
        }
    }

    /// Use certificate authentication with the given credential files.
    pub fn certificate(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self.ca_path = Some(ca_path.into());
        self.use_jwt = false;
        self
    }

    /// Target the sandbox environment.
    pub fn sandbox(mut self) -> Self {
        self.sandbox = true;
        self
    }

    /// Set the concurrent-stream limit per connection.
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    /// Set the connection limit for the session.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// A handle to an open APNs session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    pool: ConnectionPool,
    info: Arc<ConnectionInfo>,
    open: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.pool.destroy_all();
    }
}

impl Session {
    /// Open a session.
    ///
    /// Selects the hostname from the environment flag and, in certificate
    /// mode, loads and validates the credential files up front — a
    /// configuration whose credentials do not load is rejected here, never
    /// at send time. Connections themselves are established lazily.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let hostname = if config.sandbox {
            SANDBOX_HOST
        } else {
            PRODUCTION_HOST
        };
        let info = Arc::new(ConnectionInfo {
            cert_path: config.cert_path,
            key_path: config.key_path,
            ca_path: config.ca_path,
            hostname: hostname.to_string(),
            topic: config.topic,
            use_jwt: config.use_jwt,
            max_concurrent_streams: config.max_concurrent_streams.max(1),
        });

        let pool = ConnectionPool::new(Arc::clone(&info), config.max_connections)?;

        info!(
            host = hostname,
            topic = %info.topic,
            jwt = info.use_jwt,
            max_connections = config.max_connections,
            max_streams = info.max_concurrent_streams,
            "APNs session opened"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                pool,
                info,
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Whether the session still accepts sends.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Close the session and release every pooled connection.
    ///
    /// # Panics
    ///
    /// Panics when called on a session that is already closed; closing
    /// twice is a programming error.
    pub fn close(&self) {
        let was_open = self.inner.open.swap(false, Ordering::SeqCst);
        assert!(was_open, "APNs session closed twice");
        self.inner.pool.destroy_all();
        info!(topic = %self.inner.info.topic, "APNs session closed");
    }

    /// Serialize and send a notification payload.
    pub async fn send(
        &self,
        token: &DeviceToken,
        payload: &JsonAps,
        push_type: PushType,
        priority: Option<Priority>,
        jwt: Option<&str>,
    ) -> ApnResult {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => return ApnResult::ClientError(ApnsError::Json(err)),
        };
        self.send_raw(token, Bytes::from(body), push_type, priority, jwt)
            .await
    }

    /// Send a silent background notification (`content-available: 1`).
    pub async fn send_silent_message(&self, token: &DeviceToken, jwt: Option<&str>) -> ApnResult {
        self.send_raw(
            token,
            Bytes::from_static(SILENT_PAYLOAD),
            PushType::Background,
            None,
            jwt,
        )
        .await
    }

    /// Send a widget reload notification.
    pub async fn send_widget_notification(
        &self,
        token: &DeviceToken,
        priority: Option<Priority>,
        jwt: Option<&str>,
    ) -> ApnResult {
        self.send(token, &JsonAps::widget(), PushType::Widgets, priority, jwt)
            .await
    }

    /// Send pre-serialized body bytes.
    ///
    /// Picks a pooled connection (sharing one with other senders until its
    /// stream slots run out), dispatches under the session-wide deadline,
    /// and makes sure a connection that produced a client-side failure or
    /// deadline overrun is discarded instead of reused.
    pub async fn send_raw(
        &self,
        token: &DeviceToken,
        body: Bytes,
        push_type: PushType,
        priority: Option<Priority>,
        jwt: Option<&str>,
    ) -> ApnResult {
        if !self.is_open() {
            return ApnResult::ClientError(ApnsError::SessionClosed);
        }

        // One deadline covers connection acquisition, the wait for a
        // stream slot, and the request itself.
        let deadline = tokio::time::Instant::now() + REQUEST_TIMEOUT;

        let connection = match tokio::time::timeout_at(deadline, self.inner.pool.acquire()).await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return ApnResult::from_error(err),
            Err(_) => return ApnResult::ClientError(ApnsError::Timeout(REQUEST_TIMEOUT)),
        };

        // The flag may have flipped while this task waited in the pool.
        if !self.is_open() {
            return ApnResult::ClientError(ApnsError::SessionClosed);
        }

        let send = connection.send_raw(token, jwt, push_type, priority, body);
        match tokio::time::timeout_at(deadline, send).await {
            Ok(result) => {
                if result.discards_connection() {
                    debug!(error = ?result, "discarding connection after failed send");
                    connection.mark_closed();
                }
                result
            }
            Err(_) => {
                connection.mark_closed();
                ApnResult::ClientError(ApnsError::Timeout(REQUEST_TIMEOUT))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_credentials(dir: &tempfile::TempDir) -> (PathBuf, PathBuf, PathBuf) {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = generated.serialize_pem().unwrap();
        let key_pem = generated.serialize_private_key_pem();

        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        let ca = dir.path().join("ca.pem");
        fs::write(&cert, &cert_pem).unwrap();
        fs::write(&key, &key_pem).unwrap();
        fs::write(&ca, &cert_pem).unwrap();
        (cert, key, ca)
    }

    fn open_session() -> Session {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key, ca) = write_credentials(&dir);
        Session::new(
            SessionConfig::new("com.example.MyApp")
                .certificate(cert, key, ca)
                .sandbox(),
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("com.example.MyApp");
        assert!(config.use_jwt);
        assert!(!config.sandbox);
        assert_eq!(config.max_concurrent_streams, 100);
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_certificate_config_clears_jwt_mode() {
        let config =
            SessionConfig::new("com.example.MyApp").certificate("c.pem", "k.pem", "ca.pem");
        assert!(!config.use_jwt);
        assert_eq!(
            config.cert_path.as_deref(),
            Some(std::path::Path::new("c.pem"))
        );
    }

    #[test]
    fn test_session_opens_and_closes() {
        let session = open_session();
        assert!(session.is_open());
        session.close();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_send_after_close_fails_fast() {
        let session = open_session();
        session.close();

        let token = DeviceToken::from_hex("deadbeef");
        let result = session.send_silent_message(&token, None).await;
        assert!(matches!(
            result,
            ApnResult::ClientError(ApnsError::SessionClosed)
        ));
    }

    #[test]
    #[should_panic(expected = "closed twice")]
    fn test_double_close_panics() {
        let session = open_session();
        session.close();
        session.close();
    }

    #[test]
    fn test_clones_share_the_open_flag() {
        let session = open_session();
        let clone = session.clone();
        session.close();
        assert!(!clone.is_open());
    }

    #[test]
    fn test_rejects_unloadable_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::new("com.example.MyApp").certificate(
            dir.path().join("missing-cert.pem"),
            dir.path().join("missing-key.pem"),
            dir.path().join("missing-ca.pem"),
        );
        assert!(matches!(
            Session::new(config),
            Err(ApnsError::Credentials(_))
        ));
    }
}
