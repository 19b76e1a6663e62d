//! 分发指标
//!
//! Prometheus 指标（经 `metrics` facade 记录）以及提交延迟的在线统计。
//! 未安装 recorder 时所有 `record_*` 都是空操作。

use contracts::{ChangeKind, DeliveryOutcome, DeliveryStatus};
use metrics::{counter, gauge, histogram};

/// 记录事件入队
pub fn record_event_enqueued(kind: ChangeKind) {
    counter!(
        "change_notifier_events_enqueued_total",
        "kind" => kind.job_name()
    )
    .increment(1);
}

/// 记录入队被拒（队列已关闭）或重复事件
///
/// `reason`: `"closed"` / `"duplicate"`
pub fn record_enqueue_rejected(reason: &'static str) {
    counter!(
        "change_notifier_events_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// 记录一次提交尝试
///
/// `error_kind` 为 `None` 表示成功
pub fn record_delivery_attempt(error_kind: Option<&'static str>) {
    counter!(
        "change_notifier_submit_attempts_total",
        "result" => error_kind.unwrap_or("ok")
    )
    .increment(1);
}

/// 记录一次重试
pub fn record_retry() {
    counter!("change_notifier_retries_total").increment(1);
}

/// 记录事件终态
///
/// 每个状态一个 counter，例如 `change_notifier_events_dropped_total`
pub fn record_delivery_outcome(outcome: &DeliveryOutcome) {
    let kind = outcome.kind.job_name();
    match outcome.status {
        DeliveryStatus::Delivered => {
            counter!("change_notifier_events_delivered_total", "kind" => kind).increment(1)
        }
        DeliveryStatus::Dropped => {
            counter!("change_notifier_events_dropped_total", "kind" => kind).increment(1)
        }
        DeliveryStatus::Failed => {
            counter!("change_notifier_events_failed_total", "kind" => kind).increment(1)
        }
    }
    histogram!("change_notifier_delivery_attempts").record(f64::from(outcome.attempts));
}

/// 记录单次提交延迟（毫秒）
pub fn record_submit_latency_ms(latency_ms: f64) {
    histogram!("change_notifier_submit_latency_ms").record(latency_ms);
}

/// 记录队列深度
pub fn record_queue_depth(depth: usize) {
    gauge!("change_notifier_queue_depth").set(depth as f64);
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
