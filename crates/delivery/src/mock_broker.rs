//! Mock 作业服务器
//!
//! 内存实现的 `JobBroker`，用于单元测试和 `--dry-broker` 运行。
//! 支持按路径注入失败序列、全局失败和固定延迟。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{DeliveryError, JobBroker, JobHandle};
use tracing::trace;

/// 一次提交记录（成功或失败都会记录）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_name: String,
    /// 负载按 UTF-8 解码（路径）
    pub payload: String,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MockState {
    /// 按负载（路径）排队的失败脚本，逐次弹出
    scripted: HashMap<String, VecDeque<DeliveryError>>,
    /// 设置后每次提交都失败
    fail_always: Option<DeliveryError>,
    submissions: Vec<Submission>,
}

/// Mock 作业服务器
#[derive(Debug, Default)]
pub struct MockBroker {
    latency: Duration,
    next_handle: AtomicU64,
    state: Mutex<MockState>,
}

impl MockBroker {
    /// 创建立即成功的 mock
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次提交前等待 `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 让 `path` 接下来的提交依次返回给定错误，用完后恢复成功
    pub fn fail_next(&self, path: &str, errors: impl IntoIterator<Item = DeliveryError>) {
        self.lock()
            .scripted
            .entry(path.to_string())
            .or_default()
            .extend(errors);
    }

    /// 让所有提交都返回 `error`；传入 `None` 恢复
    pub fn fail_always(&self, error: Option<DeliveryError>) {
        self.lock().fail_always = error;
    }

    /// 全部提交记录（按提交顺序）
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// 成功提交记录
    pub fn accepted(&self) -> Vec<Submission> {
        self.lock()
            .submissions
            .iter()
            .filter(|s| s.succeeded)
            .cloned()
            .collect()
    }

    /// 某路径的提交次数（含失败）
    pub fn attempts_for(&self, path: &str) -> usize {
        self.lock()
            .submissions
            .iter()
            .filter(|s| s.payload == path)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobBroker for MockBroker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, job_name: &str, payload: &[u8]) -> Result<JobHandle, DeliveryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let payload = String::from_utf8_lossy(payload).into_owned();
        // 锁不跨 await
        let mut state = self.lock();
        let failure = match state.fail_always.clone() {
            Some(err) => Some(err),
            None => state
                .scripted
                .get_mut(&payload)
                .and_then(VecDeque::pop_front),
        };

        state.submissions.push(Submission {
            job_name: job_name.to_string(),
            payload,
            succeeded: failure.is_none(),
        });
        drop(state);

        match failure {
            Some(err) => {
                trace!(job = job_name, error = %err, "Mock submit failed");
                Err(err)
            }
            None => {
                let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(JobHandle::new(format!("H:mock:{id}")))
            }
        }
    }
}
