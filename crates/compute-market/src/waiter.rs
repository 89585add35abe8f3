use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::instance::ServiceInstance;
use crate::offer::Binding;

pub const DEFAULT_BINDING_ATTEMPTS: u32 = 10;
pub const DEFAULT_BINDING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("binding_timeout: instance {instance} not bound after {attempts} attempts")]
    BindingTimeout { instance: String, attempts: u32 },
    #[error("binding_wait_cancelled: instance {instance}")]
    Cancelled { instance: String },
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Waits for an instance's binding with a fixed attempt budget.
///
/// Each attempt observes the binding once and, on a miss, sleeps `interval`. After `attempts`
/// misses the wait ends with [`WaitError::BindingTimeout`]; it never blocks longer than
/// `attempts * interval`.
#[derive(Debug, Clone)]
pub struct BindingWaiter<S = TokioSleeper> {
    attempts: u32,
    interval: Duration,
    sleeper: S,
}

impl Default for BindingWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_BINDING_ATTEMPTS, DEFAULT_BINDING_INTERVAL)
    }
}

impl BindingWaiter {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self::with_sleeper(attempts, interval, TokioSleeper)
    }
}

impl<S: Sleeper> BindingWaiter<S> {
    pub fn with_sleeper(attempts: u32, interval: Duration, sleeper: S) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
            sleeper,
        }
    }

    pub async fn wait(
        &self,
        instance: &ServiceInstance,
        cancel: &CancellationToken,
    ) -> Result<Binding, WaitError> {
        for attempt in 1..=self.attempts {
            if let Some(binding) = instance.binding().await {
                return Ok(binding);
            }
            let state = instance.state().await;
            debug!(
                instance = instance.name(),
                state = %state,
                attempt,
                "binding not available yet, waiting"
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(WaitError::Cancelled {
                        instance: instance.name().to_string(),
                    });
                }
                () = self.sleeper.sleep(self.interval) => {}
            }
        }

        warn!(
            instance = instance.name(),
            attempts = self.attempts,
            "gave up waiting for binding"
        );
        Err(WaitError::BindingTimeout {
            instance: instance.name().to_string(),
            attempts: self.attempts,
        })
    }
}
