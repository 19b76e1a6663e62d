//! Dispatcher - worker pool draining the dispatch queue into the broker

use std::sync::Arc;
use std::time::Duration;

use contracts::{DeliveryOutcome, DeliveryStatus, DispatchReport, JobBroker, NotifierConfig};
use delivery::GearmanClient;
use dispatch_queue::{OrderedDispatchQueue, PathGroup, QueueConfig};
use normalizer::EventNormalizer;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::DispatchMetrics;
use crate::notifier::ChangeNotifier;
use crate::retry::{deliver_with_retry, RetryPolicy};

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: NotifierConfig,
    outcome_tx: Option<mpsc::Sender<DeliveryOutcome>>,
    normalizer: Option<EventNormalizer>,
}

impl DispatcherBuilder {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            outcome_tx: None,
            normalizer: None,
        }
    }

    /// Also send every terminal outcome to `tx` (best effort, never blocks)
    pub fn with_outcome_sender(mut self, tx: mpsc::Sender<DeliveryOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// Use a specific normalizer (e.g. to continue a sequence range)
    pub fn with_normalizer(mut self, normalizer: EventNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Spawn the workers. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// `InvalidConfig` for settings the worker pool cannot run with
    #[instrument(
        name = "dispatcher_builder_start",
        skip(self, broker),
        fields(broker = broker.name(), workers = self.config.worker_count)
    )]
    pub fn start<B>(self, broker: Arc<B>) -> Result<Dispatcher, DispatcherError>
    where
        B: JobBroker + Sync + 'static,
    {
        Self::check(&self.config)?;

        let queue = Arc::new(OrderedDispatchQueue::new(QueueConfig::from(&self.config)));
        let metrics = Arc::new(DispatchMetrics::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = Arc::new(WorkerContext {
            policy: RetryPolicy::from(&self.config),
            metrics: Arc::clone(&metrics),
            outcome_tx: self.outcome_tx,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.worker_count {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&broker),
                Arc::clone(&ctx),
                self.config.batch_size,
                stop_rx.clone(),
            ));
        }

        let notifier = ChangeNotifier::new(
            &self.config,
            self.normalizer.unwrap_or_default(),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );

        info!(
            broker = broker.name(),
            enabled = self.config.enabled,
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            "Dispatcher started"
        );

        Ok(Dispatcher {
            queue,
            metrics,
            notifier,
            workers,
            stop_tx,
            grace: self.config.shutdown_grace(),
        })
    }

    fn check(config: &NotifierConfig) -> Result<(), DispatcherError> {
        if config.worker_count == 0 {
            return Err(DispatcherError::invalid_config("worker_count", "must be > 0"));
        }
        if config.batch_size == 0 {
            return Err(DispatcherError::invalid_config("batch_size", "must be > 0"));
        }
        if config.max_retry_attempts == 0 {
            return Err(DispatcherError::invalid_config(
                "max_retry_attempts",
                "must be >= 1",
            ));
        }
        Ok(())
    }
}

/// State shared by every worker and path task
struct WorkerContext {
    policy: RetryPolicy,
    metrics: Arc<DispatchMetrics>,
    outcome_tx: Option<mpsc::Sender<DeliveryOutcome>>,
}

impl WorkerContext {
    fn record(&self, outcome: DeliveryOutcome) {
        self.metrics.record_outcome(&outcome);
        observability::record_delivery_outcome(&outcome);

        let last_error = outcome.last_error.as_deref().unwrap_or_default();
        match outcome.status {
            DeliveryStatus::Delivered => {
                debug!(
                    path = %outcome.path,
                    sequence = outcome.event_id,
                    job = outcome.kind.job_name(),
                    attempts = outcome.attempts,
                    "Event delivered"
                );
            }
            DeliveryStatus::Dropped => {
                error!(
                    path = %outcome.path,
                    sequence = outcome.event_id,
                    job = outcome.kind.job_name(),
                    attempts = outcome.attempts,
                    error = last_error,
                    "Event dropped"
                );
            }
            DeliveryStatus::Failed => {
                warn!(
                    path = %outcome.path,
                    sequence = outcome.event_id,
                    job = outcome.kind.job_name(),
                    attempts = outcome.attempts,
                    error = last_error,
                    "Event failed, retry cut short by shutdown"
                );
            }
        }

        if let Some(tx) = &self.outcome_tx {
            if let Err(mpsc::error::TrySendError::Full(outcome)) = tx.try_send(outcome) {
                debug!(path = %outcome.path, "Outcome channel full, outcome not forwarded");
            }
        }
    }
}

/// Pull batches and run one task per path.
///
/// At most `batch_size` events are held by a worker's path tasks; as each
/// task ends its share frees up and the worker dequeues again, so one path
/// in backoff never idles the rest of the batch.
#[instrument(name = "dispatcher_worker", skip_all, fields(worker = worker_id))]
async fn worker_loop<B>(
    worker_id: usize,
    queue: Arc<OrderedDispatchQueue>,
    broker: Arc<B>,
    ctx: Arc<WorkerContext>,
    batch_size: usize,
    mut stop: watch::Receiver<bool>,
) where
    B: JobBroker + Sync + 'static,
{
    debug!("Worker started");

    let capacity = Arc::new(Semaphore::new(batch_size));
    let mut groups = JoinSet::new();
    let mut drained = false;

    loop {
        let free = capacity.available_permits();
        let accepting = !drained && free > 0 && !*stop.borrow();
        if !accepting && groups.is_empty() {
            break;
        }

        let task_stop = stop.clone();
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped), if accepting => {}
            Some(joined) = groups.join_next(), if !groups.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Path task panicked");
                    }
                }
            }
            batch = queue.dequeue_batch(free), if accepting => match batch {
                Some(batch) => {
                    ctx.metrics.add_in_flight(batch.len());
                    observability::record_queue_depth(queue.len());
                    for group in batch {
                        // released when the task ends, however it ends
                        let held = Arc::clone(&capacity)
                            .try_acquire_many_owned(group.len() as u32)
                            .ok();
                        groups.spawn(deliver_group(
                            Arc::clone(&broker),
                            group,
                            Arc::clone(&ctx),
                            task_stop.clone(),
                            held,
                        ));
                    }
                }
                None => drained = true,
            },
        }
    }

    debug!("Worker stopped");
}

/// Deliver one path's events in sequence order, holding the path lease
async fn deliver_group<B>(
    broker: Arc<B>,
    group: PathGroup,
    ctx: Arc<WorkerContext>,
    mut stop: watch::Receiver<bool>,
    _held: Option<OwnedSemaphorePermit>,
) where
    B: JobBroker + Sync + 'static,
{
    let (events, mut lease) = group.into_parts();
    for event in events {
        // unstarted events stay in flight and are reported pending
        if *stop.borrow() {
            break;
        }
        let outcome = deliver_with_retry(broker.as_ref(), &event, &ctx.policy, &mut stop).await;
        ctx.record(outcome);
        lease.complete(event.sequence());
    }
}

/// A running dispatcher
pub struct Dispatcher {
    queue: Arc<OrderedDispatchQueue>,
    metrics: Arc<DispatchMetrics>,
    notifier: ChangeNotifier,
    workers: JoinSet<()>,
    stop_tx: watch::Sender<bool>,
    grace: Duration,
}

impl Dispatcher {
    pub fn builder(config: NotifierConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Inbound facade; cheap to clone
    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn queue(&self) -> &Arc<OrderedDispatchQueue> {
        &self.queue
    }

    /// Stop accepting events and drain.
    ///
    /// Workers get `deadline` to empty the queue. After that the stop signal
    /// is raised (backoffs end as `Failed`, unstarted events stay pending)
    /// and whatever still runs after the grace period is aborted.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown(mut self, deadline: Duration) -> DispatchReport {
        self.queue.close();
        info!(buffered = self.queue.len(), "Dispatcher draining");

        if timeout(deadline, join_workers(&mut self.workers)).await.is_err() {
            warn!(
                buffered = self.queue.len(),
                in_flight = self.metrics.in_flight(),
                "Shutdown deadline reached, stopping workers"
            );
            self.stop_tx.send_replace(true);

            if timeout(self.grace, join_workers(&mut self.workers))
                .await
                .is_err()
            {
                warn!(remaining = self.workers.len(), "Aborting workers");
                self.workers.shutdown().await;
            }
        }

        let snapshot = self.metrics.snapshot();
        let report = DispatchReport {
            delivered: snapshot.delivered,
            dropped: snapshot.dropped,
            failed: snapshot.failed,
            pending: self.queue.len() as u64 + snapshot.in_flight,
        };
        observability::record_queue_depth(self.queue.len());

        info!(
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed,
            pending = report.pending,
            "Dispatcher shutdown complete"
        );
        report
    }
}

async fn join_workers(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

/// Create a dispatcher backed by a Gearman client built from `config`.
///
/// When notifications are enabled the job server is pinged first.
///
/// # Errors
/// - `InvalidConfig` from the builder
/// - `Delivery` when the job server is unreachable
#[instrument(name = "dispatcher_create", skip(config), fields(broker = %config.broker_addr()))]
pub async fn create_dispatcher(config: NotifierConfig) -> Result<Dispatcher, DispatcherError> {
    let client = GearmanClient::from_config(&config);
    if config.enabled {
        client.ping().await?;
        debug!(addr = client.addr(), "Job server reachable");
    }
    DispatcherBuilder::new(config).start(Arc::new(client))
}
