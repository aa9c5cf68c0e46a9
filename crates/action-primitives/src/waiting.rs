//! Readiness waits

use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{ElementState, Locator, PageDriver};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::errors::ActionError;
use crate::types::{ExecCtx, Readiness, ReplaySettings};

/// Waits until a locator satisfies a readiness condition
#[async_trait]
pub trait WaitStrategy: Send + Sync {
    async fn wait_ready(
        &self,
        driver: &dyn PageDriver,
        ctx: &ExecCtx,
        locator: &Locator,
        readiness: Readiness,
    ) -> Result<ElementState, ActionError>;
}

/// Polling wait bounded by a per-check ceiling
pub struct DefaultWaitStrategy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DefaultWaitStrategy {
    fn default() -> Self {
        Self::from_settings(&ReplaySettings::default())
    }
}

impl DefaultWaitStrategy {
    pub fn from_settings(settings: &ReplaySettings) -> Self {
        Self {
            timeout: settings.readiness_timeout,
            poll_interval: settings.poll_interval,
        }
    }
}

fn satisfied(state: &ElementState, readiness: Readiness) -> bool {
    match readiness {
        Readiness::None => true,
        Readiness::Attached => state.attached,
        Readiness::Interactable => state.attached && state.visible && state.enabled,
    }
}

#[async_trait]
impl WaitStrategy for DefaultWaitStrategy {
    async fn wait_ready(
        &self,
        driver: &dyn PageDriver,
        ctx: &ExecCtx,
        locator: &Locator,
        readiness: Readiness,
    ) -> Result<ElementState, ActionError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if ctx.is_cancelled() {
                return Err(ActionError::Interrupted(format!(
                    "stopped while waiting for {}",
                    locator
                )));
            }

            let state = driver.element_state(locator).await?;
            if satisfied(&state, readiness) {
                return Ok(state);
            }

            if Instant::now() >= deadline {
                debug!(locator = %locator, ?readiness, ?state, "readiness wait timed out");
                return Err(if !state.attached {
                    ActionError::SelectorNotFound(locator.to_string())
                } else if !state.visible {
                    ActionError::ElementNotInteractable(format!("{} is not visible", locator))
                } else {
                    ActionError::ElementNotInteractable(format!("{} is disabled", locator))
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Discovery polling: count matches up to `attempts` times. Returns the last count.
pub async fn poll_for_matches(
    driver: &dyn PageDriver,
    locator: &Locator,
    attempts: u32,
    interval: Duration,
) -> Result<usize, ActionError> {
    let mut count = 0;
    for attempt in 0..attempts.max(1) {
        count = driver.count(locator).await?;
        if count > 0 {
            break;
        }
        if attempt + 1 < attempts {
            sleep(interval).await;
        }
    }
    Ok(count)
}
