//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试（默认配置、任务名、错误分类）
//! - 端到端测试：请求 -> 规范化 -> 队列 -> 重试 -> Gearman 线协议
//!   （使用进程内的假 job server，无需真实 gearmand）

/// In-process Gearman job server speaking just enough of the protocol
#[cfg(test)]
mod fake_job_server {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use delivery::protocol::{self, Packet, PacketType};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Default)]
    struct ServerState {
        /// (function, payload) in arrival order, accepted jobs only
        jobs: Mutex<Vec<(String, String)>>,
        /// Payloads answered with ERROR
        reject: HashSet<String>,
        /// Every SUBMIT_JOB_BG seen, rejected ones included
        submits: AtomicUsize,
        latency: Duration,
    }

    pub struct FakeJobServer {
        port: u16,
        state: Arc<ServerState>,
    }

    impl FakeJobServer {
        pub async fn start() -> Self {
            Self::start_with(Vec::new(), Duration::ZERO).await
        }

        /// Reject submits whose payload is one of `reject`, answer after `latency`
        pub async fn start_with(reject: Vec<&str>, latency: Duration) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let state = Arc::new(ServerState {
                reject: reject.into_iter().map(String::from).collect(),
                latency,
                ..ServerState::default()
            });

            let shared = Arc::clone(&state);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, Arc::clone(&shared)));
                }
            });
            Self { port, state }
        }

        pub fn port(&self) -> u16 {
            self.port
        }

        pub fn jobs(&self) -> Vec<(String, String)> {
            self.state.jobs.lock().unwrap().clone()
        }

        pub fn submits(&self) -> usize {
            self.state.submits.load(Ordering::SeqCst)
        }
    }

    async fn serve(mut stream: TcpStream, state: Arc<ServerState>) {
        while let Ok(request) = protocol::read_packet(&mut stream).await {
            let reply = match request.kind() {
                Some(PacketType::EchoReq) => {
                    Packet::response(PacketType::EchoRes, &[&request.data[..]])
                }
                Some(PacketType::SubmitJobBg) => {
                    let n = state.submits.fetch_add(1, Ordering::SeqCst) + 1;
                    let args = request.args(3);
                    let function = String::from_utf8_lossy(args[0]).into_owned();
                    let payload = String::from_utf8_lossy(args[2]).into_owned();
                    tokio::time::sleep(state.latency).await;

                    if state.reject.contains(&payload) {
                        Packet::response(
                            PacketType::Error,
                            &[&b"ERR_UNKNOWN_FUNCTION"[..], &b"no worker for job"[..]],
                        )
                    } else {
                        state.jobs.lock().unwrap().push((function, payload));
                        let handle = format!("H:fake:{n}");
                        Packet::response(PacketType::JobCreated, &[handle.as_bytes()])
                    }
                }
                _ => Packet::response(PacketType::Error, &[&b"ERR"[..], &b"unsupported"[..]]),
            };
            if protocol::write_packet(&mut stream, &reply).await.is_err() {
                return;
            }
        }
    }

    /// A local port with nothing listening on it
    pub async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }
}

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        ChangeEvent, ChangeKind, DeliveryError, DeliveryOutcome, DispatchReport, NotifierConfig,
    };
    use std::time::Duration;

    #[test]
    fn test_default_config_snapshot() {
        let config = NotifierConfig::default();
        assert_eq!(config.broker_addr(), "localhost:4730");
        assert!(!config.enabled);
        assert_eq!(config.max_retry_attempts, 3);
        assert!(config.low_water() < config.queue_high_water);
        assert!(config_loader::validate(&config).is_ok());
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = ConfigLoader::load_from_str("broker_port = 0", ConfigFormat::Toml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config validation error at 'broker_port': broker port must be > 0"
        );
    }

    #[test]
    fn test_job_names_are_wire_contract() {
        assert_eq!(ChangeKind::Register.job_name(), "register");
        assert_eq!(ChangeKind::Unregister.job_name(), "unregister");
    }

    #[test]
    fn test_move_register_depends_on_unregister() {
        let events = normalizer::EventNormalizer::new()
            .normalize("MOVE", "/a", Some("/b"))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), ChangeKind::Unregister);
        assert_eq!(events[1].after(), Some(events[0].sequence()));
    }

    #[test]
    fn test_error_classification() {
        assert!(DeliveryError::connect_failed("h:1", "refused").is_retryable());
        assert!(DeliveryError::timeout("submit", Duration::from_secs(1)).is_retryable());
        assert!(!DeliveryError::rejected("ERR", "bad").is_retryable());
    }

    #[test]
    fn test_outcome_carries_event_identity() {
        let event = ChangeEvent::new(ChangeKind::Unregister, "/a".into(), 42);
        let outcome = DeliveryOutcome::dropped(&event, 3, "refused");
        assert_eq!(outcome.event_id, 42);
        assert_eq!(outcome.path, "/a");
        assert_eq!(outcome.kind, ChangeKind::Unregister);

        let report = DispatchReport {
            delivered: 1,
            dropped: 2,
            failed: 3,
            pending: 4,
        };
        assert_eq!(report.total(), 10);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{DeliveryStatus, NotifierConfig};
    use delivery::GearmanClient;
    use dispatcher::{create_dispatcher, DispatcherBuilder};
    use tokio::sync::mpsc;

    use crate::fake_job_server::{closed_port, FakeJobServer};

    fn config(port: u16) -> NotifierConfig {
        NotifierConfig {
            broker_host: "127.0.0.1".into(),
            broker_port: port,
            enabled: true,
            worker_count: 4,
            batch_size: 8,
            broker_pool_size: 4,
            connect_timeout_ms: 500,
            submit_timeout_ms: 1000,
            retry_initial_backoff_ms: 1,
            retry_max_backoff_ms: 8,
            shutdown_grace_ms: 100,
            ..NotifierConfig::default()
        }
    }

    fn job(name: &str, path: &str) -> (String, String) {
        (name.to_string(), path.to_string())
    }

    /// PUT -> register job on the wire
    #[tokio::test]
    async fn test_put_reaches_job_server() {
        let server = FakeJobServer::start().await;
        let dispatcher = create_dispatcher(config(server.port())).await.unwrap();

        dispatcher.notifier().on_request("PUT", "/docs/a.txt", None).await;
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(server.jobs(), vec![job("register", "/docs/a.txt")]);
    }

    /// MOVE must be observed as unregister(src) strictly before register(dst)
    #[tokio::test]
    async fn test_move_order_on_the_wire() {
        let server = FakeJobServer::start_with(Vec::new(), Duration::from_millis(20)).await;
        let dispatcher = create_dispatcher(config(server.port())).await.unwrap();
        let notifier = dispatcher.notifier();

        notifier
            .on_request("MOVE", "/a", Some("http://dav.example.com/b"))
            .await;
        notifier.on_request("MOVE", "/b", Some("/c")).await;
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.delivered, 4);
        assert_eq!(
            server.jobs(),
            vec![
                job("unregister", "/a"),
                job("register", "/b"),
                job("unregister", "/b"),
                job("register", "/c"),
            ]
        );
    }

    #[tokio::test]
    async fn test_rejection_dropped_after_one_attempt() {
        let server = FakeJobServer::start_with(vec!["/bad"], Duration::ZERO).await;
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = DispatcherBuilder::new(config(server.port()))
            .with_outcome_sender(tx)
            .start(Arc::new(GearmanClient::from_config(&config(server.port()))))
            .unwrap();

        dispatcher.notifier().on_request("DELETE", "/bad", None).await;
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.dropped, 1);
        assert_eq!(server.submits(), 1);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Dropped);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.last_error.unwrap().contains("ERR_UNKNOWN_FUNCTION"));
    }

    #[tokio::test]
    async fn test_unreachable_server_exhausts_retries() {
        let port = closed_port().await;
        let config = config(port);
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = DispatcherBuilder::new(config.clone())
            .with_outcome_sender(tx)
            .start(Arc::new(GearmanClient::from_config(&config)))
            .unwrap();
        let metrics = Arc::clone(dispatcher.metrics());

        dispatcher.notifier().on_request("PUT", "/a", None).await;
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.dropped, 1);
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.attempts, config.max_retry_attempts);
        assert!(metrics.last_error("/a").is_some());
    }

    #[tokio::test]
    async fn test_create_dispatcher_fails_fast_when_unreachable() {
        let port = closed_port().await;
        assert!(create_dispatcher(config(port)).await.is_err());
    }

    #[tokio::test]
    async fn test_per_path_order_under_concurrency() {
        let server = FakeJobServer::start_with(Vec::new(), Duration::from_millis(1)).await;
        let dispatcher = create_dispatcher(config(server.port())).await.unwrap();
        let notifier = dispatcher.notifier();

        for i in 0..10 {
            for path in ["/x", "/y", "/z"] {
                let method = if i % 2 == 0 { "PUT" } else { "DELETE" };
                notifier.on_request(method, path, None).await;
            }
        }
        let report = dispatcher.shutdown(Duration::from_secs(10)).await;
        assert_eq!(report.delivered, 30);

        let jobs = server.jobs();
        for path in ["/x", "/y", "/z"] {
            let kinds: Vec<&str> = jobs
                .iter()
                .filter(|(_, p)| p == path)
                .map(|(name, _)| name.as_str())
                .collect();
            let expected: Vec<&str> = (0..10)
                .map(|i| if i % 2 == 0 { "register" } else { "unregister" })
                .collect();
            assert_eq!(kinds, expected, "order broken for {path}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_on_one_path() {
        let server = FakeJobServer::start().await;
        let config = NotifierConfig {
            queue_high_water: 2,
            worker_count: 4,
            batch_size: 1,
            ..config(server.port())
        };
        let (tx, mut rx) = mpsc::channel(2048);
        let dispatcher = DispatcherBuilder::new(config.clone())
            .with_outcome_sender(tx)
            .start(Arc::new(GearmanClient::from_config(&config)))
            .unwrap();

        let mut producers = Vec::new();
        for task in 0..16 {
            let notifier = dispatcher.notifier();
            producers.push(tokio::spawn(async move {
                for i in 0..50 {
                    let method = if (task + i) % 3 == 0 { "DELETE" } else { "PUT" };
                    notifier.on_request(method, "/x", None).await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        let report = dispatcher.shutdown(Duration::from_secs(30)).await;
        assert_eq!(report.delivered, 800);

        let mut outcomes = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }
        assert_eq!(outcomes.len(), 800);
        assert!(
            outcomes.windows(2).all(|w| w[0].event_id < w[1].event_id),
            "events for /x delivered out of sequence order"
        );

        // the wire saw the same jobs in the same order
        let sent: Vec<String> = server.jobs().into_iter().map(|(name, _)| name).collect();
        let expected: Vec<String> = outcomes
            .iter()
            .map(|o| o.kind.job_name().to_string())
            .collect();
        assert_eq!(sent, expected);
    }

    #[tokio::test]
    async fn test_disabled_notifier_submits_nothing() {
        let server = FakeJobServer::start().await;
        let dispatcher = create_dispatcher(NotifierConfig {
            enabled: false,
            ..config(server.port())
        })
        .await
        .unwrap();

        dispatcher.notifier().on_request("PUT", "/a", None).await;
        let report = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report.total(), 0);
        assert_eq!(server.submits(), 0);
    }

    #[tokio::test]
    async fn test_report_accounts_for_every_event() {
        let server = FakeJobServer::start_with(vec!["/r1", "/r2"], Duration::ZERO).await;
        let dispatcher = create_dispatcher(config(server.port())).await.unwrap();
        let metrics = Arc::clone(dispatcher.metrics());
        let notifier = dispatcher.notifier();

        for i in 0..20 {
            notifier.on_request("PUT", &format!("/f{i}"), None).await;
        }
        notifier.on_request("PUT", "/r1", None).await;
        notifier.on_request("COPY", "/f0", Some("/r2")).await;
        notifier.on_request("PROPFIND", "/f0", None).await;
        let report = dispatcher.shutdown(Duration::from_secs(10)).await;

        assert_eq!(metrics.snapshot().enqueued, 22);
        assert_eq!(report.total(), 22);
        assert_eq!(report.delivered, 20);
        assert_eq!(report.dropped, 2);
    }

    #[tokio::test]
    async fn test_path_prefixes_scope_notifications() {
        let server = FakeJobServer::start().await;
        let dispatcher = create_dispatcher(NotifierConfig {
            path_prefixes: vec!["/dav".into()],
            ..config(server.port())
        })
        .await
        .unwrap();
        let notifier = dispatcher.notifier();

        notifier.on_request("MOVE", "/tmp/upload", Some("/dav/final")).await;
        notifier.on_request("PUT", "/other", None).await;
        dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(server.jobs(), vec![job("register", "/dav/final")]);
    }
}
