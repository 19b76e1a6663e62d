//! 配置校验模块
//!
//! 校验规则：
//! - broker 地址合法 (host 非空, port > 0)
//! - 重试次数 >= 1, 退避区间合法
//! - 队列水位: 0 < low_water < high_water
//! - worker / batch / pool 数量 > 0
//! - path_prefixes 为绝对路径

use contracts::{ContractError, NotifierConfig};

/// 校验 NotifierConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &NotifierConfig) -> Result<(), ContractError> {
    validate_broker(config)?;
    validate_retry(config)?;
    validate_queue(config)?;
    validate_workers(config)?;
    validate_path_prefixes(config)?;
    Ok(())
}

fn validate_broker(config: &NotifierConfig) -> Result<(), ContractError> {
    if config.broker_host.trim().is_empty() {
        return Err(ContractError::config_validation(
            "broker_host",
            "broker host cannot be empty",
        ));
    }
    if config.broker_port == 0 {
        return Err(ContractError::config_validation(
            "broker_port",
            "broker port must be > 0",
        ));
    }
    if config.connect_timeout_ms == 0 || config.submit_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "connect_timeout_ms / submit_timeout_ms",
            "timeouts must be > 0",
        ));
    }
    Ok(())
}

/// 校验重试策略
fn validate_retry(config: &NotifierConfig) -> Result<(), ContractError> {
    if config.max_retry_attempts == 0 {
        return Err(ContractError::config_validation(
            "max_retry_attempts",
            "max_retry_attempts must be >= 1 (it counts the first attempt)",
        ));
    }
    if config.retry_initial_backoff_ms > config.retry_max_backoff_ms {
        return Err(ContractError::config_validation(
            "retry_initial_backoff_ms / retry_max_backoff_ms",
            format!(
                "retry_initial_backoff_ms ({}) must be <= retry_max_backoff_ms ({})",
                config.retry_initial_backoff_ms, config.retry_max_backoff_ms
            ),
        ));
    }
    Ok(())
}

/// 校验队列水位
fn validate_queue(config: &NotifierConfig) -> Result<(), ContractError> {
    if config.queue_high_water == 0 {
        return Err(ContractError::config_validation(
            "queue_high_water",
            "queue_high_water must be > 0",
        ));
    }
    let low = config.low_water();
    if low >= config.queue_high_water {
        return Err(ContractError::config_validation(
            "queue_low_water",
            format!(
                "queue_low_water ({}) must be < queue_high_water ({})",
                low, config.queue_high_water
            ),
        ));
    }
    Ok(())
}

fn validate_workers(config: &NotifierConfig) -> Result<(), ContractError> {
    let counts = [
        ("worker_count", config.worker_count),
        ("batch_size", config.batch_size),
        ("broker_pool_size", config.broker_pool_size),
    ];
    for (field, value) in counts {
        if value == 0 {
            return Err(ContractError::config_validation(
                field,
                format!("{field} must be > 0"),
            ));
        }
    }
    Ok(())
}

fn validate_path_prefixes(config: &NotifierConfig) -> Result<(), ContractError> {
    for (idx, prefix) in config.path_prefixes.iter().enumerate() {
        if !prefix.starts_with('/') {
            return Err(ContractError::config_validation(
                format!("path_prefixes[{}]", idx),
                format!("prefix '{}' must be an absolute path", prefix),
            ));
        }
    }
    Ok(())
}
