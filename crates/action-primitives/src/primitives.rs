//! Action primitives implementation

use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{Locator, PageDriver};
use chrono::Utc;
use tracing::{debug, info};

use crate::errors::ActionError;
use crate::types::{ActionKind, ActionReport, ExecCtx, Readiness, ReplaySettings};
use crate::waiting::{DefaultWaitStrategy, WaitStrategy};

pub const DEFAULT_PRESS_KEY: &str = "Enter";

/// Executes a single action against an already chosen locator
#[async_trait]
pub trait ActionPrimitives: Send + Sync {
    async fn navigate(&self, ctx: &ExecCtx, url: &str) -> Result<(), ActionError>;

    async fn act(
        &self,
        ctx: &ExecCtx,
        locator: &Locator,
        action: ActionKind,
        value: &str,
    ) -> Result<ActionReport, ActionError>;
}

pub struct DefaultActionPrimitives {
    driver: Arc<dyn PageDriver>,
    wait: Arc<dyn WaitStrategy>,
}

impl DefaultActionPrimitives {
    pub fn new(driver: Arc<dyn PageDriver>, settings: &ReplaySettings) -> Self {
        Self {
            driver,
            wait: Arc::new(DefaultWaitStrategy::from_settings(settings)),
        }
    }

    pub fn with_wait_strategy(mut self, wait: Arc<dyn WaitStrategy>) -> Self {
        self.wait = wait;
        self
    }

    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }
}

#[async_trait]
impl ActionPrimitives for DefaultActionPrimitives {
    async fn navigate(&self, ctx: &ExecCtx, url: &str) -> Result<(), ActionError> {
        if ctx.is_cancelled() {
            return Err(ActionError::Interrupted("Context cancelled".to_string()));
        }
        info!(action_id = %ctx.action_id, url, "navigating");
        self.driver
            .navigate(url)
            .await
            .map_err(|err| ActionError::Navigation(err.to_string()))
    }

    async fn act(
        &self,
        ctx: &ExecCtx,
        locator: &Locator,
        action: ActionKind,
        value: &str,
    ) -> Result<ActionReport, ActionError> {
        let started_at = Utc::now();
        if ctx.is_cancelled() {
            return Err(ActionError::Interrupted("Context cancelled".to_string()));
        }

        let readiness = action.readiness();
        if readiness != Readiness::None {
            self.wait
                .wait_ready(self.driver.as_ref(), ctx, locator, readiness)
                .await?;
        }

        debug!(
            action_id = %ctx.action_id,
            step_id = %ctx.step_id,
            action = action.name(),
            locator = %locator,
            "executing action"
        );
        match action.dom_operation(value) {
            Some(op) => self.driver.perform(locator, &op).await?,
            None => {
                let key = if value.is_empty() {
                    DEFAULT_PRESS_KEY
                } else {
                    value
                };
                self.driver.press_key(&locator.frame, key).await?
            }
        }

        Ok(ActionReport::success(
            action,
            locator.selector.clone(),
            locator.frame.clone(),
            started_at,
        ))
    }
}
