// ABOUTME: Keyed routing table used at the connector boundary
// ABOUTME: One handler per event name (last registration wins) plus a single fallback

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use crate::context::HandlerContext;
use crate::handler::{panic_message, HandlerRegistry, HandlerResult};
use crate::traits::IncomingMessage;

/// Something that can receive an emitted event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, message: &IncomingMessage, ctx: &HandlerContext)
        -> Result<HandlerResult>;
}

/// A whole registry can sit behind an event name or act as the fallback.
#[async_trait]
impl EventHandler for HandlerRegistry {
    async fn on_event(
        &self,
        message: &IncomingMessage,
        ctx: &HandlerContext,
    ) -> Result<HandlerResult> {
        Ok(self.dispatch(message, ctx).await)
    }
}

/// Exact-match event router. Not a pub/sub fan-out: each emit reaches at most
/// one handler.
#[derive(Default)]
pub struct EventBus {
    routes: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    fallback: RwLock<Option<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `event`, replacing any previous binding.
    pub fn on(&self, event: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event = event.into();
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if routes.insert(event.clone(), handler).is_some() {
            tracing::debug!(event = %event, "Event handler replaced");
        }
    }

    /// Set the handler used when no exact binding exists.
    pub fn on_default(&self, handler: Arc<dyn EventHandler>) {
        *self.fallback.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Remove the binding for `event`. Returns whether one existed.
    pub fn off(&self, event: &str) -> bool {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(event)
            .is_some()
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(event)
    }

    fn resolve(&self, event: &str) -> Option<Arc<dyn EventHandler>> {
        let bound = self
            .routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .cloned();
        bound.or_else(|| {
            self.fallback
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        })
    }

    /// Deliver to the handler bound to `event`, else the fallback, else report
    /// `handled = false`. A failing or panicking handler yields a handled
    /// error result.
    pub async fn emit(
        &self,
        event: &str,
        message: &IncomingMessage,
        ctx: &HandlerContext,
    ) -> HandlerResult {
        // Locks are released before awaiting the handler.
        let Some(handler) = self.resolve(event) else {
            tracing::debug!(event = %event, "No handler for event");
            return HandlerResult::not_handled();
        };

        let outcome = AssertUnwindSafe(handler.on_event(message, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(event = %event, error = %e, "Event handler failed");
                HandlerResult::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(event = %event, panic = %message, "Event handler panicked");
                HandlerResult::failed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_context, RecordingSender};

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler for Named {
        async fn on_event(
            &self,
            _message: &IncomingMessage,
            _ctx: &HandlerContext,
        ) -> Result<HandlerResult> {
            Ok(HandlerResult::reply(self.0))
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn on_event(
            &self,
            _message: &IncomingMessage,
            _ctx: &HandlerContext,
        ) -> Result<HandlerResult> {
            anyhow::bail!("connector gone")
        }
    }

    struct Exploding;

    #[async_trait]
    impl EventHandler for Exploding {
        async fn on_event(
            &self,
            _message: &IncomingMessage,
            _ctx: &HandlerContext,
        ) -> Result<HandlerResult> {
            panic!("bus handler exploded")
        }
    }

    async fn emit(bus: &EventBus, event: &str) -> HandlerResult {
        let msg = IncomingMessage::new("c1", "u1", "hi");
        let ctx = test_context(&msg, RecordingSender::new());
        bus.emit(event, &msg, &ctx).await
    }

    #[tokio::test]
    async fn test_unbound_without_default_is_not_handled() {
        let bus = EventBus::new();
        assert_eq!(emit(&bus, "direct").await, HandlerResult::not_handled());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let bus = EventBus::new();
        bus.on("direct", Arc::new(Named("first")));
        bus.on("direct", Arc::new(Named("second")));
        assert_eq!(
            emit(&bus, "direct").await.response.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_default_and_off() {
        let bus = EventBus::new();
        bus.on("direct", Arc::new(Named("direct")));
        bus.on_default(Arc::new(Named("fallback")));

        assert_eq!(
            emit(&bus, "channel").await.response.as_deref(),
            Some("fallback")
        );
        assert!(bus.off("direct"));
        assert!(!bus.has_handler("direct"));
        assert_eq!(
            emit(&bus, "direct").await.response.as_deref(),
            Some("fallback")
        );
    }

    #[tokio::test]
    async fn test_failing_handler_is_contained() {
        let bus = EventBus::new();
        bus.on("direct", Arc::new(Failing));
        let result = emit(&bus, "direct").await;
        assert!(result.handled);
        assert_eq!(result.error.as_deref(), Some("connector gone"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let bus = EventBus::new();
        bus.on("direct", Arc::new(Exploding));
        let result = emit(&bus, "direct").await;
        assert!(result.handled);
        assert_eq!(result.error.as_deref(), Some("bus handler exploded"));

        // The bus keeps working afterwards.
        bus.on("direct", Arc::new(Named("ok")));
        assert_eq!(emit(&bus, "direct").await.response.as_deref(), Some("ok"));
    }
}
