//! Fixed-size broker connection pool
//!
//! A semaphore bounds live connections; idle ones wait in a mutex-guarded
//! stack. A connection only goes back to the stack through `recycle()`:
//! dropping a `PooledConnection` (error, timeout, cancellation) closes it,
//! so a half-read response can never leak into the next request.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::DeliveryError;
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::protocol::{self, Packet, ProtocolError};

/// Pool of TCP connections to one broker address
#[derive(Debug)]
pub struct ConnectionPool {
    addr: String,
    size: usize,
    connect_timeout: Duration,
    permits: Semaphore,
    idle: Mutex<Vec<TcpStream>>,
}

impl ConnectionPool {
    pub fn new(addr: impl Into<String>, size: usize, connect_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            addr: addr.into(),
            size,
            connect_timeout,
            permits: Semaphore::new(size),
            idle: Mutex::new(Vec::with_capacity(size)),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Idle connections currently parked
    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    /// Get a connection, reusing an idle one when available.
    ///
    /// Waits while all `size` connections are in use.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, DeliveryError> {
        let permit = self.permit().await?;
        let idle = self.lock_idle().pop();
        if let Some(stream) = idle {
            trace!(addr = %self.addr, "Reusing pooled connection");
            return Ok(PooledConnection::new(self, stream, permit, true));
        }
        let stream = self.connect().await?;
        Ok(PooledConnection::new(self, stream, permit, false))
    }

    /// Get a newly opened connection, bypassing idle ones
    pub async fn acquire_fresh(&self) -> Result<PooledConnection<'_>, DeliveryError> {
        let permit = self.permit().await?;
        let stream = self.connect().await?;
        Ok(PooledConnection::new(self, stream, permit, false))
    }

    /// Close all idle connections
    pub fn clear(&self) {
        let closed = std::mem::take(&mut *self.lock_idle()).len();
        debug!(addr = %self.addr, closed, "Idle connections cleared");
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, DeliveryError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| DeliveryError::connect_failed(&self.addr, "connection pool closed"))
    }

    async fn connect(&self) -> Result<TcpStream, DeliveryError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DeliveryError::timeout("connect", self.connect_timeout))?
            .map_err(|e| DeliveryError::connect_failed(&self.addr, e.to_string()))?;

        if let Err(e) = stream.set_nodelay(true) {
            trace!(addr = %self.addr, error = %e, "Failed to set TCP_NODELAY");
        }
        debug!(addr = %self.addr, "Broker connection opened");
        Ok(stream)
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<TcpStream>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection checked out of the pool
#[derive(Debug)]
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    stream: TcpStream,
    reused: bool,
    _permit: SemaphorePermit<'a>,
}

impl<'a> PooledConnection<'a> {
    fn new(
        pool: &'a ConnectionPool,
        stream: TcpStream,
        permit: SemaphorePermit<'a>,
        reused: bool,
    ) -> Self {
        Self {
            pool,
            stream,
            reused,
            _permit: permit,
        }
    }

    /// Whether this connection came from the idle stack (and may be stale)
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Send one request and read one response
    pub async fn round_trip(&mut self, request: &Packet) -> Result<Packet, ProtocolError> {
        protocol::write_packet(&mut self.stream, request).await?;
        protocol::read_packet(&mut self.stream).await
    }

    /// Return the connection to the idle stack
    pub fn recycle(self) {
        let Self { pool, stream, .. } = self;
        pool.lock_idle().push(stream);
    }
}
