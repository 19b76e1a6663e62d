//! Gearman job-server client
//!
//! Submits background jobs over a small pool of persistent connections.

use std::time::Duration;

use contracts::{DeliveryError, JobBroker, JobHandle, NotifierConfig};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::pool::ConnectionPool;
use crate::protocol::{self, Magic, Packet, PacketType, ProtocolError};

/// Connection settings for [`GearmanClient`]
#[derive(Debug, Clone)]
pub struct GearmanConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    /// Bound on one whole submit, including waiting for a pooled connection
    pub submit_timeout: Duration,
}

impl GearmanConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GearmanConfig {
    fn default() -> Self {
        Self::from(&NotifierConfig::default())
    }
}

impl From<&NotifierConfig> for GearmanConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self {
            host: config.broker_host.clone(),
            port: config.broker_port,
            pool_size: config.broker_pool_size,
            connect_timeout: config.connect_timeout(),
            submit_timeout: config.submit_timeout(),
        }
    }
}

/// Gearman client
///
/// Shared by every dispatcher worker. A connection is held only for one
/// request/response exchange.
#[derive(Debug)]
pub struct GearmanClient {
    name: String,
    config: GearmanConfig,
    pool: ConnectionPool,
}

impl GearmanClient {
    pub fn new(config: GearmanConfig) -> Self {
        let addr = config.addr();
        let pool = ConnectionPool::new(addr.clone(), config.pool_size, config.connect_timeout);
        Self {
            name: format!("gearman://{addr}"),
            config,
            pool,
        }
    }

    pub fn from_config(config: &NotifierConfig) -> Self {
        Self::new(GearmanConfig::from(config))
    }

    pub fn addr(&self) -> &str {
        self.pool.addr()
    }

    pub fn config(&self) -> &GearmanConfig {
        &self.config
    }

    /// Round-trip an `ECHO_REQ` to check the job server is reachable
    pub async fn ping(&self) -> Result<(), DeliveryError> {
        let request = Packet::request(PacketType::EchoReq, &[&b"ping"[..]]);
        let reply = timeout(self.config.submit_timeout, self.exchange(&request))
            .await
            .map_err(|_| DeliveryError::timeout("ping", self.config.submit_timeout))??;

        match reply.kind() {
            Some(PacketType::EchoRes) if reply.data == request.data => Ok(()),
            _ => Err(self.unexpected(&reply)),
        }
    }

    /// One request/response exchange.
    ///
    /// An idle connection may have been closed by the server since it was
    /// parked; a failure on a reused connection is retried once on a fresh one.
    async fn exchange(&self, request: &Packet) -> Result<Packet, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        match conn.round_trip(request).await {
            Ok(reply) => {
                conn.recycle();
                Ok(reply)
            }
            Err(e) if conn.is_reused() => {
                debug!(addr = %self.addr(), error = %e, "Stale pooled connection, reconnecting");
                drop(conn);
                self.pool.clear();

                let mut conn = self.pool.acquire_fresh().await?;
                let reply = conn
                    .round_trip(request)
                    .await
                    .map_err(|e| self.protocol_error(e))?;
                conn.recycle();
                Ok(reply)
            }
            Err(e) => Err(self.protocol_error(e)),
        }
    }

    fn protocol_error(&self, error: ProtocolError) -> DeliveryError {
        DeliveryError::connect_failed(self.addr(), error.to_string())
    }

    fn unexpected(&self, reply: &Packet) -> DeliveryError {
        DeliveryError::connect_failed(
            self.addr(),
            format!("unexpected reply packet type {}", reply.code),
        )
    }

    fn interpret(&self, reply: Packet) -> Result<JobHandle, DeliveryError> {
        if reply.magic != Magic::Response {
            return Err(self.unexpected(&reply));
        }
        match reply.kind() {
            Some(PacketType::JobCreated) => Ok(JobHandle::new(
                String::from_utf8_lossy(&reply.data).into_owned(),
            )),
            Some(PacketType::Error) => {
                let args = reply.args(2);
                let text = |idx: usize| {
                    args.get(idx)
                        .map(|a| String::from_utf8_lossy(a).into_owned())
                        .unwrap_or_default()
                };
                Err(DeliveryError::rejected(text(0), text(1)))
            }
            _ => Err(self.unexpected(&reply)),
        }
    }
}

impl JobBroker for GearmanClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "gearman_submit",
        skip(self, payload),
        fields(addr = %self.addr(), payload_len = payload.len())
    )]
    async fn submit(&self, job_name: &str, payload: &[u8]) -> Result<JobHandle, DeliveryError> {
        // a frame we cannot build will never succeed, so it is not retryable
        let request = protocol::submit_job_bg(job_name, "", payload)
            .map_err(|e| DeliveryError::rejected("CLIENT", e.to_string()))?;

        let reply = timeout(self.config.submit_timeout, self.exchange(&request))
            .await
            .map_err(|_| DeliveryError::timeout("submit", self.config.submit_timeout))??;

        let result = self.interpret(reply);
        if let Err(e) = &result {
            warn!(job = job_name, error = %e, "Job submission failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    /// Per-connection behaviour of the fake job server
    #[derive(Clone, Copy)]
    enum Mode {
        /// JOB_CREATED for every request
        Accept,
        /// ERROR for every request
        Reject,
        /// answer one request then close
        OneShot,
        /// read requests, never answer
        Silent,
    }

    async fn serve(mut stream: TcpStream, mode: Mode, counter: Arc<AtomicUsize>) {
        while let Ok(request) = protocol::read_packet(&mut stream).await {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let reply = match mode {
                Mode::Silent => continue,
                Mode::Reject => {
                    Packet::response(PacketType::Error, &[&b"ERR_QUEUE"[..], &b"queue full"[..]])
                }
                Mode::Accept | Mode::OneShot => match request.kind() {
                    Some(PacketType::EchoReq) => {
                        Packet::response(PacketType::EchoRes, &[&request.data[..]])
                    }
                    _ => {
                        let handle = format!("H:test:{n}");
                        Packet::response(PacketType::JobCreated, &[handle.as_bytes()])
                    }
                },
            };
            if protocol::write_packet(&mut stream, &reply).await.is_err() {
                return;
            }
            if matches!(mode, Mode::OneShot) {
                return;
            }
        }
    }

    /// Returns (port, accepted connections, requests seen)
    async fn fake_server(mode: Mode) -> (u16, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(AtomicUsize::new(0));
        let (acc, req) = (accepted.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                acc.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, mode, req.clone()));
            }
        });
        (port, accepted, requests)
    }

    fn client(port: u16) -> GearmanClient {
        GearmanClient::new(GearmanConfig {
            host: "127.0.0.1".into(),
            port,
            pool_size: 2,
            connect_timeout: Duration::from_millis(500),
            submit_timeout: Duration::from_millis(500),
        })
    }

    #[tokio::test]
    async fn test_submit_returns_handle() {
        let (port, _, requests) = fake_server(Mode::Accept).await;
        let client = client(port);

        let handle = client.submit("register", b"/a/b").await.unwrap();
        assert_eq!(handle.as_str(), "H:test:1");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let (port, accepted, _) = fake_server(Mode::Accept).await;
        let client = client(port);

        for _ in 0..5 {
            client.submit("register", b"/a").await.unwrap();
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_packet_is_rejection() {
        let (port, _, _) = fake_server(Mode::Reject).await;
        let client = client(port);

        let err = client.submit("register", b"/a").await.unwrap_err();
        assert_eq!(err, DeliveryError::rejected("ERR_QUEUE", "queue full"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_connection_reconnects() {
        let (port, accepted, _) = fake_server(Mode::OneShot).await;
        let client = client(port);

        client.submit("register", b"/a").await.unwrap();
        // let the server side close the parked connection
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.submit("unregister", b"/a").await.unwrap();

        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_submit_timeout() {
        let (port, _, _) = fake_server(Mode::Silent).await;
        let mut config = GearmanConfig::new("127.0.0.1", port);
        config.submit_timeout = Duration::from_millis(50);
        let client = GearmanClient::new(config);

        let err = client.submit("register", b"/a").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout { operation: "submit", .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client(port).submit("register", b"/a").await.unwrap_err();
        assert!(matches!(err, DeliveryError::ConnectFailed { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_invalid_job_name_not_sent() {
        let (port, accepted, _) = fake_server(Mode::Accept).await;
        let client = client(port);

        let err = client.submit("", b"/a").await.unwrap_err();
        assert!(matches!(err, DeliveryError::RejectedByBroker { ref code, .. } if code == "CLIENT"));
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let (port, _, _) = fake_server(Mode::Accept).await;
        client(port).ping().await.unwrap();
    }

    #[test]
    fn test_config_from_notifier_config() {
        let notifier = NotifierConfig {
            broker_host: "jobs.internal".into(),
            broker_port: 4731,
            broker_pool_size: 7,
            ..NotifierConfig::default()
        };
        let config = GearmanConfig::from(&notifier);
        assert_eq!(config.addr(), "jobs.internal:4731");
        assert_eq!(config.pool_size, 7);
        assert_eq!(config.submit_timeout, notifier.submit_timeout());
    }
}
