// ABOUTME: Capability-based handler contract and the ordered first-match registry
// ABOUTME: A claiming handler's failure is caught here and surfaced as a handled error

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::context::HandlerContext;
use crate::metrics;
use crate::traits::IncomingMessage;

/// Outcome of offering a message to a handler.
///
/// `handled = false` means "not mine, try the next candidate". A handled result
/// always ends dispatch, even when `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerResult {
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandlerResult {
    pub fn not_handled() -> Self {
        Self::default()
    }

    /// Claimed, nothing to say.
    pub fn silent() -> Self {
        Self {
            handled: true,
            ..Self::default()
        }
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            handled: true,
            response: Some(text.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            handled: true,
            response: None,
            error: Some(error.into()),
        }
    }
}

/// A named skill: a predicate plus an async processing step.
///
/// Handlers are stateless or own a private per-channel cache exposed through
/// `memory` / `set_memory`.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> bool;

    async fn handle(&self, message: &IncomingMessage, ctx: &HandlerContext)
        -> Result<HandlerResult>;

    /// Snapshot of this handler's memory for a channel, if it keeps any
    fn memory(&self, _channel_id: &str) -> Option<serde_json::Value> {
        None
    }

    /// Replace this handler's memory for a channel
    fn set_memory(&self, _channel_id: &str, _blob: serde_json::Value) {}
}

/// Ordered collection of handlers with first-match-wins dispatch.
///
/// Register more specific predicates before general ones. Several registries
/// can live in one process; they share nothing.
pub struct HandlerRegistry {
    label: String,
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry. `label` only appears in logs and metrics.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            handlers: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append a handler. A handler with an already registered name replaces
    /// the old one in place, keeping its position.
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let name = handler.name().to_string();
        if let Some(slot) = self.handlers.iter_mut().find(|h| h.name() == name) {
            tracing::warn!(
                registry = %self.label,
                handler = %name,
                "Handler already registered, overwriting"
            );
            *slot = handler;
            return;
        }
        tracing::debug!(registry = %self.label, handler = %name, "Handler registered");
        self.handlers.push(handler);
    }

    /// Remove a handler by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Handler>> {
        let pos = self.handlers.iter().position(|h| h.name() == name)?;
        Some(self.handlers.remove(pos))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// Handler names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer the message to each handler in registration order and run the
    /// first one whose predicate matches.
    ///
    /// Errors and panics from the claiming handler become
    /// `HandlerResult { handled: true, error }`; later handlers are not tried.
    pub async fn dispatch(&self, message: &IncomingMessage, ctx: &HandlerContext) -> HandlerResult {
        let Some(handler) = self.handlers.iter().find(|h| h.can_handle(message, ctx)) else {
            tracing::debug!(
                registry = %self.label,
                channel_id = %message.channel_id,
                "No handler matched"
            );
            metrics::record_dispatch(&self.label, "unmatched");
            return HandlerResult::not_handled();
        };

        tracing::debug!(
            registry = %self.label,
            handler = %handler.name(),
            channel_id = %message.channel_id,
            "Dispatching message"
        );

        let outcome = AssertUnwindSafe(handler.handle(message, ctx))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(
                    registry = %self.label,
                    handler = %handler.name(),
                    error = %e,
                    "Handler failed"
                );
                HandlerResult::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    registry = %self.label,
                    handler = %handler.name(),
                    panic = %message,
                    "Handler panicked"
                );
                HandlerResult::failed(message)
            }
        };

        let outcome = match (result.handled, result.error.is_some()) {
            (_, true) => "error",
            (true, false) => "ok",
            (false, false) => "declined",
        };
        metrics::record_dispatch(&self.label, outcome);
        result
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
