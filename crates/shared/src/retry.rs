//! 指数退避重试
//!
//! 双写失败时在原地重试，覆盖连接池耗尽、Redis 短暂断连等瞬时故障。
//! 哪些错误可以重试由调用方传入的 `is_retryable` 决定。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数，不含首次执行
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 最多重试 3 次，500ms 起步，每次翻倍，单次不超过 10s
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次重试前的等待时间（从 0 开始），不超过 `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// 已失败 attempt 次后是否还能重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// 一条记录用尽所有重试时累计的等待时间
    pub fn worst_case_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

/// 按策略执行异步操作
///
/// 不可重试的错误立即返回；可重试的错误在退避后重新执行，
/// 重试次数用尽后返回最后一次的错误。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            warn!(operation = operation_name, error = %err, "不可重试的错误");
            return Err(err);
        }
        if !policy.should_retry(attempt) {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                error = %err,
                "重试次数已用尽"
            );
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "执行失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CdcError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    fn pool_timeout() -> CdcError {
        CdcError::Database(sqlx::Error::PoolTimedOut)
    }

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6)
            .map(|a| policy.delay_for_attempt(a).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![500, 1_000, 2_000, 4_000, 8_000, 10_000]);
        assert_eq!(policy.worst_case_backoff(), Duration::from_millis(3_500));
    }

    #[test]
    fn test_huge_attempt_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = fast(2);
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!fast(0).should_retry(0));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_with_policy(&fast(3), "persist", CdcError::is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(pool_timeout()) } else { Ok("done") } }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            retry_with_policy(&fast(2), "persist", CdcError::is_retryable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(pool_timeout()) }
            })
            .await;

        assert!(matches!(result, Err(CdcError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            retry_with_policy(&fast(5), "persist", CdcError::is_retryable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CdcError::Serialization("bad record".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
