// ABOUTME: Integration tests for first-match dispatch and keyed event routing
// ABOUTME: Covers the fallthrough scenario, failure containment, and isolated registries

use anyhow::Result;
use async_trait::async_trait;
use husk_core::testing::{test_context, RecordingSender};
use husk_core::{
    EventBus, Handler, HandlerContext, HandlerRegistry, HandlerResult, IncomingMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Claims messages containing a keyword
struct Keyword {
    name: &'static str,
    keyword: &'static str,
    calls: AtomicUsize,
}

impl Keyword {
    fn new(name: &'static str, keyword: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            keyword,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Handler for Keyword {
    fn name(&self) -> &str {
        self.name
    }

    fn can_handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        message.content.contains(self.keyword)
    }

    async fn handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> Result<HandlerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerResult::reply(format!("{}: {}", self.name, message.content)))
    }
}

/// Claims everything
struct CatchAll {
    calls: AtomicUsize,
}

#[async_trait]
impl Handler for CatchAll {
    fn name(&self) -> &str {
        "catch-all"
    }

    fn can_handle(&self, _message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        true
    }

    async fn handle(&self, _message: &IncomingMessage, _ctx: &HandlerContext) -> Result<HandlerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerResult::reply("fallback"))
    }
}

/// Claims everything and then fails
struct Broken;

#[async_trait]
impl Handler for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn can_handle(&self, _message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        true
    }

    async fn handle(&self, _message: &IncomingMessage, _ctx: &HandlerContext) -> Result<HandlerResult> {
        anyhow::bail!("calendar service unreachable")
    }
}

async fn dispatch(registry: &HandlerRegistry, text: &str) -> HandlerResult {
    let msg = IncomingMessage::new("c1", "u1", text);
    let ctx = test_context(&msg, RecordingSender::new());
    registry.dispatch(&msg, &ctx).await
}

#[tokio::test]
async fn test_specific_handler_then_fallthrough() {
    let husk = Keyword::new("husk", "husk");
    let catch_all = Arc::new(CatchAll {
        calls: AtomicUsize::new(0),
    });

    let mut registry = HandlerRegistry::new("skills");
    registry.register(husk.clone());
    registry.register(catch_all.clone());

    let result = dispatch(&registry, "husk melk").await;
    assert!(result.handled);
    assert_eq!(result.response.as_deref(), Some("husk: husk melk"));

    let result = dispatch(&registry, "hello").await;
    assert!(result.handled);
    assert_eq!(result.response.as_deref(), Some("fallback"));

    assert_eq!(husk.calls.load(Ordering::SeqCst), 1);
    assert_eq!(catch_all.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_registry_never_handles() {
    let registry = HandlerRegistry::new("skills");
    for text in ["husk melk", "hello", ""] {
        assert_eq!(dispatch(&registry, text).await, HandlerResult::not_handled());
    }
}

#[tokio::test]
async fn test_failure_claims_message_without_fallthrough() {
    let catch_all = Arc::new(CatchAll {
        calls: AtomicUsize::new(0),
    });
    let mut registry = HandlerRegistry::new("skills");
    registry.register(Arc::new(Broken));
    registry.register(catch_all.clone());

    let result = dispatch(&registry, "anything").await;
    assert_eq!(
        result,
        HandlerResult::failed("calendar service unreachable")
    );
    assert_eq!(catch_all.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_registries_are_independent() {
    let mut skills = HandlerRegistry::new("skills");
    let mut connector = HandlerRegistry::new("connector");
    skills.register(Keyword::new("husk", "husk"));
    connector.register(Keyword::new("ping", "ping"));

    assert!(dispatch(&skills, "husk x").await.handled);
    assert!(!dispatch(&skills, "ping").await.handled);
    assert!(dispatch(&connector, "ping").await.handled);
    assert!(!dispatch(&connector, "husk x").await.handled);
}

#[tokio::test]
async fn test_event_bus_falls_back_to_registry() {
    let mut skills = HandlerRegistry::new("skills");
    skills.register(Keyword::new("husk", "husk"));
    let skills = Arc::new(skills);

    let mut direct = HandlerRegistry::new("direct");
    direct.register(Arc::new(CatchAll {
        calls: AtomicUsize::new(0),
    }));

    let bus = EventBus::new();
    bus.on("direct", Arc::new(direct));
    bus.on_default(skills);

    let msg = IncomingMessage::new("c1", "u1", "husk melk");
    let ctx = test_context(&msg, RecordingSender::new());

    let result = bus.emit("channel", &msg, &ctx).await;
    assert_eq!(result.response.as_deref(), Some("husk: husk melk"));

    let result = bus.emit("direct", &msg, &ctx).await;
    assert_eq!(result.response.as_deref(), Some("fallback"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_keeps_registration_order() {
    let husk = Keyword::new("husk", "husk");
    let mut registry = HandlerRegistry::new("skills");
    registry.register(husk.clone());
    registry.register(Arc::new(CatchAll {
        calls: AtomicUsize::new(0),
    }));
    let registry = Arc::new(registry);

    let mut tasks = Vec::new();
    for i in 0..50 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let text = if i % 2 == 0 { "husk it" } else { "other" };
            dispatch(&registry, text).await
        }));
    }

    let mut husk_replies = 0;
    for task in tasks {
        let result = task.await.unwrap();
        if result.response.as_deref() == Some("husk: husk it") {
            husk_replies += 1;
        }
    }
    assert_eq!(husk_replies, 25);
    assert_eq!(husk.calls.load(Ordering::SeqCst), 25);
}
