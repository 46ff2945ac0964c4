//! Retry strategy attached to a template
//!
//! Rendered as Argo's `retryStrategy`: `limit` bounds the retries, `backoff`
//! grows the delay by `factor` per attempt up to `cap` (`maxDuration`).

use serde::Serialize;

use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryPolicy {
    Always,
    OnFailure,
    OnError,
    OnTransientError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Initial delay, e.g. `"5s"` or `"5"` (seconds)
    pub duration: String,
    pub factor: u32,
    pub cap: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    pub limit: u32,
    pub retry_policy: RetryPolicy,
    pub backoff: Option<Backoff>,
}

impl RetryStrategy {
    pub fn new(limit: u32, retry_policy: RetryPolicy) -> Self {
        Self {
            limit,
            retry_policy,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, duration: &str, factor: u32, cap: Option<&str>) -> Self {
        self.backoff = Some(Backoff {
            duration: duration.to_string(),
            factor,
            cap: cap.map(str::to_string),
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(backoff) = &self.backoff {
            if backoff.factor < 1 {
                return Err(ForgeError::InvalidRetry {
                    reason: format!("backoff factor must be >= 1 (got {})", backoff.factor),
                });
            }
            if backoff.duration.trim().is_empty() {
                return Err(ForgeError::InvalidRetry {
                    reason: "backoff duration is empty".to_string(),
                });
            }
            if backoff.cap.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(ForgeError::InvalidRetry {
                    reason: "backoff cap is empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_zero_rejected() {
        let r = RetryStrategy::new(3, RetryPolicy::Always).with_backoff("5", 0, Some("20"));
        assert_eq!(r.validate().unwrap_err().code(), "FORGE-026");
    }

    #[test]
    fn test_valid_backoff() {
        let r = RetryStrategy::new(200, RetryPolicy::Always).with_backoff("5", 2, Some("20"));
        assert!(r.validate().is_ok());
        assert!(RetryStrategy::new(0, RetryPolicy::OnError).validate().is_ok());
    }
}
