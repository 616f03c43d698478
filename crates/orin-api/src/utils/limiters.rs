use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

use crate::config::settings::LimitsConfig;
use crate::utils::error::UpstreamError;

/// Bounds concurrent generations against the chat-completion API.
#[derive(Clone)]
pub struct Limiters {
    pub llm_generate: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &LimitsConfig) -> Self {
        Self {
            llm_generate: Arc::new(Semaphore::new(cfg.llm_concurrency.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
        }
    }

    /// Wait at most `acquire_timeout` for a permit. A saturated limiter is
    /// reported like an unavailable upstream so callers retry later.
    pub async fn acquire_llm(&self) -> Result<(OwnedSemaphorePermit, Duration), UpstreamError> {
        let start = Instant::now();

        match tokio::time::timeout(self.acquire_timeout, self.llm_generate.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok((permit, start.elapsed())),
            Ok(Err(_)) => Err(UpstreamError::Unavailable {
                service: "chat completion",
                detail: "limiter closed".into(),
            }),
            Err(_) => {
                warn!("LLM limiter saturated after {:?}", self.acquire_timeout);
                Err(UpstreamError::Unavailable {
                    service: "chat completion",
                    detail: "too many concurrent generations".into(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_saturated_limiter_fails_fast() {
        let limiters = Limiters::new(&LimitsConfig {
            llm_concurrency: 1,
            acquire_timeout_ms: 20,
        });

        let (_held, _) = limiters.acquire_llm().await.unwrap();
        let err = limiters.acquire_llm().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_permit_released_on_drop() {
        let limiters = Limiters::new(&LimitsConfig {
            llm_concurrency: 1,
            acquire_timeout_ms: 20,
        });

        drop(limiters.acquire_llm().await.unwrap());
        assert!(limiters.acquire_llm().await.is_ok());
    }
}
