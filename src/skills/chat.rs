// ABOUTME: Catch-all skill that forwards messages to the AI chat client
// ABOUTME: Calls go through timeout, retry, and circuit breaker; failures become an apology

use anyhow::Result;
use async_trait::async_trait;
use husk_core::{
    retry_with_observer, CircuitBreaker, Handler, HandlerContext, HandlerResult, IncomingMessage,
    Permission, ResilienceError, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;

use super::require_permission;

pub const APOLOGY_REPLY: &str = "Sorry, I couldn't come up with an answer right now. Try again in a moment.";
pub const UNAVAILABLE_REPLY: &str = "Sorry, I'm taking a short break after some errors. Try again in a little while.";

pub struct ChatSkill {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ChatSkill {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            breaker,
            retry,
            timeout,
        }
    }
}

#[async_trait]
impl Handler for ChatSkill {
    fn name(&self) -> &str {
        "chat"
    }

    fn can_handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> bool {
        ctx.chat.is_some() && !message.content.trim().is_empty()
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> Result<HandlerResult> {
        let Some(client) = &ctx.chat else {
            return Ok(HandlerResult::not_handled());
        };
        if let Some(denied) = require_permission(message, ctx, Permission::ChatUse).await {
            return Ok(denied);
        }

        let prompt = message.content.trim();
        // The timeout bounds the whole retried call; one exhausted retry
        // sequence counts as a single breaker failure.
        let result = self
            .breaker
            .call_with_timeout(self.timeout, || {
                retry_with_observer(
                    &self.retry,
                    || client.chat(prompt, None),
                    |e: &anyhow::Error, attempt| {
                        tracing::warn!(attempt, error = %e, "Chat call failed, retrying");
                    },
                )
            })
            .await;

        match result {
            Ok(answer) => Ok(HandlerResult::reply(answer)),
            Err(e @ ResilienceError::CircuitOpen { .. }) => {
                tracing::info!(error = %e, "Chat skipped while breaker is open");
                Ok(HandlerResult::reply(UNAVAILABLE_REPLY))
            }
            Err(e) => {
                tracing::error!(
                    channel_id = %message.channel_id,
                    error = %e,
                    "Chat call failed"
                );
                Ok(HandlerResult::reply(APOLOGY_REPLY))
            }
        }
    }
}
