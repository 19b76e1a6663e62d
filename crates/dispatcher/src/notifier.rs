//! ChangeNotifier - inbound facade for intercepted requests

use std::sync::Arc;

use contracts::{ChangeEvent, NotifierConfig};
use dispatch_queue::{EnqueueError, Enqueued, OrderedDispatchQueue};
use normalizer::EventNormalizer;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::metrics::DispatchMetrics;

struct NotifierInner {
    enabled: bool,
    path_prefixes: Vec<String>,
    normalizer: EventNormalizer,
    /// Held from sequence allocation until the request's events are queued.
    /// FIFO, so queue order matches sequence order across producers.
    ingest: Mutex<()>,
    queue: Arc<OrderedDispatchQueue>,
    metrics: Arc<DispatchMetrics>,
}

/// Turns intercepted requests into queued change events.
///
/// Never fails the caller and never waits on delivery; it only suspends
/// while the queue applies backpressure.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

impl ChangeNotifier {
    pub(crate) fn new(
        config: &NotifierConfig,
        normalizer: EventNormalizer,
        queue: Arc<OrderedDispatchQueue>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                enabled: config.enabled,
                path_prefixes: config.path_prefixes.clone(),
                normalizer,
                ingest: Mutex::new(()),
                queue,
                metrics,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    /// Whether the event path falls inside the configured prefixes
    fn in_scope(&self, event: &ChangeEvent) -> bool {
        let prefixes = &self.inner.path_prefixes;
        prefixes.is_empty() || prefixes.iter().any(|p| event.path().is_under(p))
    }

    /// Handle one intercepted request.
    ///
    /// `destination` is the raw `Destination` header, required for COPY/MOVE.
    #[instrument(name = "notifier_on_request", skip(self), level = "debug")]
    pub async fn on_request(&self, method: &str, path: &str, destination: Option<&str>) {
        if !self.inner.enabled {
            return;
        }

        let _turn = self.inner.ingest.lock().await;
        let events = match self.inner.normalizer.normalize(method, path, destination) {
            Ok(events) => events,
            Err(e) => {
                debug!(error = %e, "Request produced no change events");
                return;
            }
        };

        for event in events {
            if !self.in_scope(&event) {
                trace!(event = %event, "Path outside configured prefixes, ignored");
                continue;
            }
            self.enqueue(event).await;
        }
    }

    async fn enqueue(&self, event: ChangeEvent) {
        let kind = event.kind();
        match self.inner.queue.enqueue(event).await {
            Ok(Enqueued::Accepted) => {
                self.inner.metrics.inc_enqueued();
                observability::record_event_enqueued(kind);
                observability::record_queue_depth(self.inner.queue.len());
            }
            Ok(Enqueued::Duplicate) => {
                self.inner.metrics.inc_duplicates();
                observability::record_enqueue_rejected("duplicate");
            }
            Err(EnqueueError::OutOfOrder(event)) => {
                self.inner.metrics.inc_rejected();
                observability::record_enqueue_rejected("out_of_order");
                warn!(event = %event, "Later event for this path already dispatched, event dropped");
            }
            Err(EnqueueError::Closed(event)) | Err(EnqueueError::QueueFull(event)) => {
                self.inner.metrics.inc_rejected();
                observability::record_enqueue_rejected("closed");
                warn!(event = %event, "Dispatcher shut down, event not queued");
            }
        }
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("enabled", &self.inner.enabled)
            .field("path_prefixes", &self.inner.path_prefixes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_queue::QueueConfig;

    fn notifier(config: NotifierConfig) -> (ChangeNotifier, Arc<OrderedDispatchQueue>) {
        let queue = Arc::new(OrderedDispatchQueue::new(QueueConfig::from(&config)));
        let notifier = ChangeNotifier::new(
            &config,
            EventNormalizer::new(),
            Arc::clone(&queue),
            Arc::new(DispatchMetrics::new()),
        );
        (notifier, queue)
    }

    fn enabled() -> NotifierConfig {
        NotifierConfig {
            enabled: true,
            ..NotifierConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let (notifier, queue) = notifier(NotifierConfig::default());
        assert!(!notifier.is_enabled());

        notifier.on_request("PUT", "/a", None).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_queued() {
        let (notifier, queue) = notifier(enabled());
        notifier.on_request("MOVE", "/a", Some("/b")).await;
        notifier.on_request("PROPFIND", "/a", None).await;
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_destination_is_swallowed() {
        let (notifier, queue) = notifier(enabled());
        notifier.on_request("COPY", "/a", None).await;
        notifier.on_request("MOVE", "/a", Some("::not a url::")).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_path_prefixes_filter_events() {
        let (notifier, queue) = notifier(NotifierConfig {
            path_prefixes: vec!["/dav/docs".into()],
            ..enabled()
        });

        notifier.on_request("PUT", "/dav/docs/a.txt", None).await;
        notifier.on_request("PUT", "/dav/docs-old/a.txt", None).await;
        notifier.on_request("PUT", "/elsewhere", None).await;
        // only the unregister side of this move is in scope
        notifier
            .on_request("MOVE", "/dav/docs/b.txt", Some("/tmp/b.txt"))
            .await;

        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_queue_in_sequence_order() {
        let config = NotifierConfig {
            queue_high_water: 2,
            ..enabled()
        };
        let (notifier, queue) = notifier(config);

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(batch) = queue.dequeue_batch(1).await {
                    seen.extend(batch.groups()[0].events().iter().map(ChangeEvent::sequence));
                }
                seen
            })
        };

        let mut producers = Vec::new();
        for _ in 0..8 {
            let notifier = notifier.clone();
            producers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    notifier.on_request("PUT", "/x", None).await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        queue.close();

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 400);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(queue.stats().out_of_order, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_counts_rejection() {
        let config = enabled();
        let queue = Arc::new(OrderedDispatchQueue::new(QueueConfig::from(&config)));
        let metrics = Arc::new(DispatchMetrics::new());
        let notifier = ChangeNotifier::new(
            &config,
            EventNormalizer::new(),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );

        queue.close();
        notifier.on_request("PUT", "/a", None).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.enqueued, 0);
    }
}
