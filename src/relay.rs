// ABOUTME: The relay: one dispatch loop wiring rate limiting, routing, skills, and replies
// ABOUTME: Built once from config with injected collaborators; connectors push messages into it

use anyhow::Result;
use async_trait::async_trait;
use husk_core::audit::{details, AuditAction};
use husk_core::config::Config;
use husk_core::health::{BreakerHealthCheck, ChatHealthCheck, HealthChecker};
use husk_core::{
    AuditLog, ChatClient, CircuitBreaker, ConfirmationService, EventBus, Extractor, Handler,
    HandlerContext, HandlerRegistry, HandlerResult, InboundSink, IncomingMessage, MemoryStore,
    MessageSender, PermissionChecker, RateLimiter, RoleStore, ScheduledTask, SecurityContext,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::skills::{self, ChatSettings, MemoryBook};

pub const RATE_LIMITED_REPLY: &str = "You're sending messages too fast. Please try again later.";
pub const FAILURE_REPLY: &str = "Sorry, something went wrong while handling that.";

/// Audit user ID for actions the relay takes on its own behalf.
const SYSTEM_ACTOR: &str = "system";

/// How often expired confirmations are swept.
const CONFIRMATION_SWEEP_PERIOD: Duration = Duration::from_secs(30);

/// Claims blank messages so they never reach a skill.
struct BlankMessageFilter;

#[async_trait]
impl Handler for BlankMessageFilter {
    fn name(&self) -> &str {
        "blank"
    }

    fn can_handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        message.content.trim().is_empty()
    }

    async fn handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> Result<HandlerResult> {
        tracing::debug!(message_id = %message.id, "Ignoring blank message");
        Ok(HandlerResult::silent())
    }
}

/// Collects the relay's collaborators. Anything not supplied is built from
/// the config.
pub struct RelayBuilder {
    config: Config,
    sender: Arc<dyn MessageSender>,
    chat: Option<Arc<dyn ChatClient>>,
    extractor: Option<Arc<dyn Extractor>>,
    memory: Option<Arc<dyn MemoryStore>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    audit: Option<Arc<AuditLog>>,
    limiter: Option<Arc<RateLimiter>>,
    chat_breaker: Option<Arc<CircuitBreaker>>,
}

impl RelayBuilder {
    pub fn new(config: Config, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            config,
            sender,
            chat: None,
            extractor: None,
            memory: None,
            permissions: None,
            audit: None,
            limiter: None,
            chat_breaker: None,
        }
    }

    pub fn chat(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.chat = Some(client);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(store);
        self
    }

    pub fn permissions(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    pub fn audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn chat_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.chat_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> Result<Relay> {
        let config = self.config;
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(AuditLog::with_capacity(config.audit.capacity)));
        let limiter = self.limiter.unwrap_or_else(|| {
            Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                config.rate_limit.window(),
            ))
        });
        let chat_breaker = self.chat_breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::with_config(
                "chat",
                config.circuit_breaker.to_breaker_config(),
            ))
        });
        let permissions = self.permissions.unwrap_or_else(|| {
            Arc::new(RoleStore::new(config.security.owners.clone()).with_audit(audit.clone()))
        });
        let security = SecurityContext {
            permissions,
            audit: audit.clone(),
            confirmations: Arc::new(ConfirmationService::new(
                config.security.confirmation_ttl(),
                audit.clone(),
            )),
        };

        let book = MemoryBook::new();
        let chat_settings = self.chat.as_ref().map(|_| ChatSettings {
            breaker: chat_breaker.clone(),
            retry: config.retry.to_policy(),
            timeout: config.chat.timeout(),
        });
        let skills = Arc::new(skills::build_registry(&config.bot.name, book, chat_settings)?);
        for name in skills.names() {
            audit.log(
                AuditAction::SkillRegister,
                SYSTEM_ACTOR,
                "",
                details([("skill", name.as_str().into())]),
                true,
            );
        }
        tracing::info!(skills = ?skills.names(), "Skills registered");

        let mut connector_handlers = HandlerRegistry::new("connector");
        connector_handlers.register(Arc::new(BlankMessageFilter));

        let bus = EventBus::new();
        bus.on_default(skills.clone());

        Ok(Relay {
            config,
            sender: self.sender,
            limiter,
            audit,
            chat_breaker,
            security,
            connector_handlers,
            bus,
            skills,
            chat: self.chat,
            extractor: self.extractor,
            memory: self.memory,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// Owns every dispatch component; shared behind an `Arc` by connectors and
/// the HTTP server.
pub struct Relay {
    config: Config,
    sender: Arc<dyn MessageSender>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    chat_breaker: Arc<CircuitBreaker>,
    security: SecurityContext,
    /// Message-type routing, consulted before the event bus
    connector_handlers: HandlerRegistry,
    bus: EventBus,
    skills: Arc<HandlerRegistry>,
    chat: Option<Arc<dyn ChatClient>>,
    extractor: Option<Arc<dyn Extractor>>,
    memory: Option<Arc<dyn MemoryStore>>,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Relay {
    pub fn builder(config: Config, sender: Arc<dyn MessageSender>) -> RelayBuilder {
        RelayBuilder::new(config, sender)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn chat_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.chat_breaker
    }

    pub fn permissions(&self) -> Arc<dyn PermissionChecker> {
        self.security.permissions.clone()
    }

    pub fn confirmations(&self) -> &Arc<ConfirmationService> {
        &self.security.confirmations
    }

    /// Routes keyed by message kind (`direct`, `group_direct`, `channel`).
    /// Unbound kinds fall back to the skill registry.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.skills.names()
    }

    /// Memory blobs each skill holds for `channel_id`, keyed by skill name.
    pub fn skill_memory(&self, channel_id: &str) -> BTreeMap<String, serde_json::Value> {
        self.skill_names()
            .into_iter()
            .filter_map(|name| {
                let blob = self.skills.get(&name)?.memory(channel_id)?;
                Some((name, blob))
            })
            .collect()
    }

    /// Restore a skill's memory blob for `channel_id`. Returns false if no
    /// skill has that name.
    pub fn restore_skill_memory(&self, skill: &str, channel_id: &str, blob: serde_json::Value) -> bool {
        match self.skills.get(skill) {
            Some(handler) => {
                handler.set_memory(channel_id, blob);
                true
            }
            None => false,
        }
    }

    /// Health checks for the services the relay depends on. The chat breaker
    /// is non-critical: an open breaker degrades the service.
    pub fn health_checker(&self) -> HealthChecker {
        let mut checker = HealthChecker::new();
        checker.register(Arc::new(BreakerHealthCheck::new(self.chat_breaker.clone())));
        if let Some(chat) = &self.chat {
            checker.register(Arc::new(ChatHealthCheck::new(chat.clone())));
        }
        checker
    }

    /// Start periodic confirmation expiry and, if configured, rate-limiter
    /// key pruning. Must be called from within a tokio runtime.
    pub fn start_maintenance(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        let confirmations = self.security.confirmations.clone();
        tasks.push(ScheduledTask::every(
            "confirmation-expiry",
            CONFIRMATION_SWEEP_PERIOD,
            move || {
                let confirmations = confirmations.clone();
                async move {
                    let expired = confirmations.expire_stale();
                    if expired > 0 {
                        tracing::debug!(expired, "Expired stale confirmations");
                    }
                }
            },
        ));

        if let Some(secs) = self.config.rate_limit.prune_interval_secs {
            let limiter = self.limiter.clone();
            tasks.push(ScheduledTask::every(
                "rate-limit-prune",
                Duration::from_secs(secs.max(1)),
                move || {
                    let limiter = limiter.clone();
                    async move {
                        let pruned = limiter.prune();
                        if pruned > 0 {
                            tracing::debug!(pruned, "Pruned idle rate-limit keys");
                        }
                    }
                },
            ));
        }
    }

    /// Cancel background maintenance tasks.
    pub fn shutdown(&self) {
        let tasks: Vec<ScheduledTask> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in &tasks {
            task.cancel();
        }
        tracing::info!(count = tasks.len(), "Maintenance tasks stopped");
    }

    fn context_for(&self, message: &IncomingMessage) -> HandlerContext {
        HandlerContext::new(message, self.sender.clone())
            .with_chat(self.chat.clone())
            .with_extractor(self.extractor.clone())
            .with_memory(self.memory.clone())
            .with_security(Some(self.security.clone()))
    }

    /// Run one inbound message through the pipeline and send whatever it
    /// produces. Returns the result that was acted on.
    pub async fn process(&self, message: IncomingMessage) -> HandlerResult {
        let kind = message.kind();
        husk_core::metrics::record_message_received(kind.as_str());

        if !self.limiter.is_allowed(&message.user_id) {
            tracing::info!(
                user_id = %message.user_id,
                channel_id = %message.channel_id,
                "Rate limit exceeded"
            );
            self.audit.log(
                AuditAction::RateLimited,
                &message.user_id,
                &message.channel_id,
                details([("messageId", message.id.as_str().into())]),
                false,
            );
            let result = HandlerResult::reply(RATE_LIMITED_REPLY);
            self.deliver(&message, &result).await;
            return result;
        }

        let ctx = self.context_for(&message);
        let mut result = self.connector_handlers.dispatch(&message, &ctx).await;
        if !result.handled {
            result = self.bus.emit(kind.as_str(), &message, &ctx).await;
        }

        self.deliver(&message, &result).await;
        result
    }

    async fn deliver(&self, message: &IncomingMessage, result: &HandlerResult) {
        if !result.handled {
            tracing::debug!(message_id = %message.id, "No skill claimed message");
            return;
        }

        let text = match (&result.error, &result.response) {
            (Some(error), _) => {
                tracing::error!(
                    channel_id = %message.channel_id,
                    user_id = %message.user_id,
                    error = %error,
                    "Skill failed"
                );
                FAILURE_REPLY
            }
            (None, Some(response)) => response.as_str(),
            (None, None) => return,
        };

        if let Err(e) = self
            .sender
            .send_message(&message.channel_id, text, None)
            .await
        {
            tracing::error!(channel_id = %message.channel_id, error = %e, "Failed to send reply");
        }
    }
}

#[async_trait]
impl InboundSink for Relay {
    async fn handle_incoming(&self, message: IncomingMessage) {
        self.process(message).await;
    }
}
