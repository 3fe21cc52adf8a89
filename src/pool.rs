//! Connection pooling.
//!
//! One pool per session, holding up to the session's `max_connections`
//! live HTTP/2 connections. Connections are created lazily and shared:
//! concurrent senders multiplex streams on the same connection until its
//! stream slots are exhausted, and only then does the pool grow. A
//! connection is dropped from the pool once its open flag clears (GOAWAY,
//! error, timeout, session close) or after five idle minutes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::connection::{Connection, ConnectionInfo};
use crate::credentials;
use crate::error::{ApnsError, Result};

const APNS_PORT: u16 = 443;

/// How long an unused connection may sit in the pool before eviction.
const IDLE_TTL: Duration = Duration::from_secs(300);

struct PoolEntry {
    connection: Arc<Connection>,
    idle_since: Instant,
}

/// A capacity-bounded pool of shared connections.
///
/// Credentials are loaded once, here, when the session is constructed;
/// every new connection reuses the assembled TLS configuration.
pub(crate) struct ConnectionPool {
    info: Arc<ConnectionInfo>,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    max_connections: usize,
    connections: Mutex<Vec<PoolEntry>>,
    // Serializes connection creation so a burst of senders cannot push
    // the pool past its capacity.
    create: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    pub(crate) fn new(info: Arc<ConnectionInfo>, max_connections: u32) -> Result<Self> {
        let config = credentials::client_config(&info)?;
        let server_name = ServerName::try_from(info.hostname.clone()).map_err(|e| {
            ApnsError::Credentials(format!("invalid hostname {}: {e}", info.hostname))
        })?;
        Ok(Self {
            info,
            connector: TlsConnector::from(config),
            server_name,
            max_connections: max_connections.max(1) as usize,
            connections: Mutex::new(Vec::new()),
            create: tokio::sync::Mutex::new(()),
        })
    }

    /// Pick a connection for one send.
    ///
    /// Prefers an open connection with a free stream slot, creates a new
    /// connection when none has one and the pool is below capacity, and at
    /// capacity hands back the least-loaded connection — the caller then
    /// blocks on its stream semaphore rather than failing.
    pub(crate) async fn acquire(&self) -> Result<Arc<Connection>> {
        loop {
            if let Some(connection) = self.checkout() {
                return Ok(connection);
            }

            let _creating = self.create.lock().await;
            // Another creator may have added a connection while this task
            // waited for the lock.
            if let Some(connection) = self.checkout() {
                return Ok(connection);
            }

            if self.open_count() < self.max_connections {
                let connection = Arc::new(self.connect().await?);
                let mut list = self.lock_list();
                list.push(PoolEntry {
                    connection: Arc::clone(&connection),
                    idle_since: Instant::now(),
                });
                return Ok(connection);
            }

            if let Some(connection) = self.fallback() {
                return Ok(connection);
            }
            // Every connection disappeared between the checks; start over.
        }
    }

    /// Close every pooled connection.
    pub(crate) fn destroy_all(&self) {
        let mut list = self.lock_list();
        for entry in list.drain(..) {
            entry.connection.close();
        }
    }

    /// An open connection with at least one free stream slot, fullest
    /// first so idle connections can age out.
    fn checkout(&self) -> Option<Arc<Connection>> {
        let mut list = self.lock_list();
        Self::prune(&mut list);
        self.evict_idle(&mut list);

        let entry = list
            .iter_mut()
            .filter(|entry| entry.connection.available_streams() > 0)
            .min_by_key(|entry| entry.connection.available_streams())?;
        entry.idle_since = Instant::now();
        Some(Arc::clone(&entry.connection))
    }

    /// The least-loaded open connection, free slot or not.
    fn fallback(&self) -> Option<Arc<Connection>> {
        let mut list = self.lock_list();
        Self::prune(&mut list);

        let entry = list
            .iter_mut()
            .max_by_key(|entry| entry.connection.available_streams())?;
        entry.idle_since = Instant::now();
        Some(Arc::clone(&entry.connection))
    }

    fn open_count(&self) -> usize {
        let mut list = self.lock_list();
        Self::prune(&mut list);
        list.len()
    }

    /// Drop connections the driver or a failed send marked closed. The
    /// socket winds down when the last in-flight sender releases its
    /// handle.
    fn prune(list: &mut Vec<PoolEntry>) {
        list.retain(|entry| entry.connection.is_open());
    }

    /// Close connections that sat unused for the idle TTL. Only fully
    /// idle connections are eligible, so no in-flight stream is cut.
    fn evict_idle(&self, list: &mut Vec<PoolEntry>) {
        let max_streams = self.info.max_concurrent_streams as usize;
        list.retain(|entry| {
            let expired = entry.idle_since.elapsed() >= IDLE_TTL
                && entry.connection.available_streams() == max_streams;
            if expired {
                debug!(host = %self.info.hostname, "evicting idle connection");
                entry.connection.close();
            }
            !expired
        });
    }

    async fn connect(&self) -> Result<Connection> {
        let tcp = TcpStream::connect((self.info.hostname.as_str(), APNS_PORT)).await?;
        tcp.set_nodelay(true)?;
        let tls = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await?;
        Connection::handshake(tls, Arc::clone(&self.info)).await
    }

    fn lock_list(&self) -> MutexGuard<'_, Vec<PoolEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
