// ABOUTME: Dispatch and resilience core for the husk chat relay
// ABOUTME: Handler registry, event bus, rate limiter, circuit breaker, retry, and audit log

pub mod audit;
pub mod circuit_breaker;
pub mod config;
pub mod confirmation;
pub mod context;
pub mod error;
pub mod event_bus;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod permissions;
pub mod rate_limiter;
pub mod retry;
pub mod schedule;
pub mod testing;
pub mod traits;

pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditLog};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use confirmation::{ConfirmationService, PendingConfirmation};
pub use context::{HandlerContext, SecurityContext};
pub use error::ResilienceError;
pub use event_bus::{EventBus, EventHandler};
pub use handler::{Handler, HandlerRegistry, HandlerResult};
pub use permissions::{Permission, PermissionChecker, Role, RoleStore};
pub use rate_limiter::RateLimiter;
pub use retry::{retry_with_backoff, retry_with_observer, RetryPolicy};
pub use schedule::ScheduledTask;
pub use traits::{
    ChatClient, Connector, Extraction, Extractor, InboundSink, IncomingMessage, MemoryStore,
    MessageKind, MessageSender, OutboundOptions,
};
