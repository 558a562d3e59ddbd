// ABOUTME: Registry that manages connector lifecycle.
// ABOUTME: Starts every registered connector against one sink and stops them together.

pub mod console;

use anyhow::Result;
use husk_core::{Connector, InboundSink};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use console::{ConsoleConnector, ConsoleSender};

/// Active connectors keyed by id.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector, replacing any with the same id.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let id = connector.id().to_string();
        if self.connectors.insert(id.clone(), connector).is_some() {
            tracing::warn!(connector = %id, "Replacing registered connector");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }

    /// Start every connector. Stops at the first connector that fails to start.
    pub async fn start_all(&self, sink: Arc<dyn InboundSink>) -> Result<()> {
        for (id, connector) in &self.connectors {
            connector.start(sink.clone()).await?;
            tracing::info!(connector = %id, "Connector started");
        }
        Ok(())
    }

    /// Stop every connector, logging failures instead of aborting.
    pub async fn shutdown_all(&self) {
        for (id, connector) in &self.connectors {
            if let Err(e) = connector.stop().await {
                tracing::error!(connector = %id, error = %e, "Connector shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use husk_core::testing::RecordingSender;
    use husk_core::{IncomingMessage, MessageSender};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        id: &'static str,
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl Stub {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for Stub {
        fn id(&self) -> &str {
            self.id
        }

        fn sender(&self) -> Arc<dyn MessageSender> {
            RecordingSender::new()
        }

        async fn start(&self, sink: Arc<dyn InboundSink>) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            sink.handle_incoming(IncomingMessage::new("c1", "u1", self.id))
                .await;
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InboundSink for CountingSink {
        async fn handle_incoming(&self, message: IncomingMessage) {
            self.seen.lock().unwrap().push(message.content);
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown_all() {
        let a = Stub::new("a");
        let b = Stub::new("b");
        let mut registry = ConnectorRegistry::new();
        registry.register(a.clone());
        registry.register(b.clone());
        assert_eq!(registry.ids(), vec!["a", "b"]);

        let sink = Arc::new(CountingSink::default());
        registry.start_all(sink.clone()).await.unwrap();
        assert_eq!(*sink.seen.lock().unwrap(), vec!["a", "b"]);

        registry.shutdown_all().await;
        assert_eq!(a.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(b.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Stub::new("a"));
        registry.register(Stub::new("a"));
        assert_eq!(registry.ids().len(), 1);
        assert!(registry.get("a").is_some());
    }
}
