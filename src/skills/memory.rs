// ABOUTME: Memory skill ("husk melk") and its follow-up clarification skill
// ABOUTME: Per-channel memory cache, optionally persisted through the MemoryStore collaborator

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use husk_core::audit::{details, AuditAction};
use husk_core::{Handler, HandlerContext, HandlerResult, IncomingMessage, Permission};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::require_permission;

/// Extractions below this confidence are not attached to a memory.
const MIN_EXTRACTION_CONFIDENCE: f32 = 0.7;

/// Reply when another dispatch consumed the clarification first.
pub const CLARIFICATION_TAKEN_REPLY: &str = "Already taken care of.";

/// Confirmation action key for wiping a channel's memory.
pub const CLEAR_MEMORY_ACTION: &str = "memory:clear";

/// One remembered item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub text: String,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
    /// Date found in the text by the extractor, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
}

#[derive(Default)]
struct BookState {
    items: HashMap<String, Vec<MemoryItem>>,
    /// Channels whose persisted memory has been loaded
    loaded: HashSet<String>,
    /// (channel, user) pairs we asked "what should I remember?"
    awaiting: HashSet<(String, String)>,
}

/// Per-channel memory shared by the memory, clarification, and confirmation
/// skills. Each operation takes the lock once, so interleaved dispatches for
/// the same channel never observe a half-applied change.
#[derive(Default)]
pub struct MemoryBook {
    state: Mutex<BookState>,
}

impl MemoryBook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn items(&self, channel_id: &str) -> Vec<MemoryItem> {
        self.lock().items.get(channel_id).cloned().unwrap_or_default()
    }

    fn push(&self, channel_id: &str, item: MemoryItem) {
        self.lock()
            .items
            .entry(channel_id.to_string())
            .or_default()
            .push(item);
    }

    /// Take back an item added by `push`. Later pushes stay in place.
    fn retract(&self, channel_id: &str, item: &MemoryItem) {
        let mut state = self.lock();
        if let Some(items) = state.items.get_mut(channel_id) {
            if let Some(pos) = items.iter().rposition(|existing| existing == item) {
                items.remove(pos);
            }
        }
    }

    /// Remove everything remembered for a channel; returns how many items
    /// were dropped.
    pub fn clear(&self, channel_id: &str) -> usize {
        self.lock()
            .items
            .remove(channel_id)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    pub fn await_clarification(&self, channel_id: &str, user_id: &str) {
        self.lock()
            .awaiting
            .insert((channel_id.to_string(), user_id.to_string()));
    }

    pub fn is_awaiting(&self, channel_id: &str, user_id: &str) -> bool {
        self.lock()
            .awaiting
            .contains(&(channel_id.to_string(), user_id.to_string()))
    }

    fn take_awaiting(&self, channel_id: &str, user_id: &str) -> bool {
        self.lock()
            .awaiting
            .remove(&(channel_id.to_string(), user_id.to_string()))
    }

    pub fn snapshot(&self, channel_id: &str) -> Option<serde_json::Value> {
        let state = self.lock();
        let items = state.items.get(channel_id)?;
        serde_json::to_value(items).ok()
    }

    pub fn restore(&self, channel_id: &str, blob: serde_json::Value) -> Result<()> {
        let items: Vec<MemoryItem> =
            serde_json::from_value(blob).context("Invalid memory blob")?;
        let mut state = self.lock();
        state.items.insert(channel_id.to_string(), items);
        state.loaded.insert(channel_id.to_string());
        Ok(())
    }

    /// Pull a channel's persisted memory into the cache on first use.
    async fn ensure_loaded(&self, channel_id: &str, ctx: &HandlerContext) -> Result<()> {
        let Some(store) = &ctx.memory else {
            return Ok(());
        };
        if self.lock().loaded.contains(channel_id) {
            return Ok(());
        }

        let blob = store.load(channel_id).await?;
        let persisted: Vec<MemoryItem> = match blob {
            Some(blob) => serde_json::from_value(blob).context("Invalid persisted memory")?,
            None => Vec::new(),
        };

        let mut state = self.lock();
        // Another dispatch may have loaded the channel while we awaited.
        if state.loaded.insert(channel_id.to_string()) {
            let items = state.items.entry(channel_id.to_string()).or_default();
            let fresh = std::mem::take(items);
            *items = persisted;
            items.extend(fresh);
        }
        Ok(())
    }

    /// Write a channel's memory back through the store, if one is attached.
    pub async fn persist(&self, channel_id: &str, ctx: &HandlerContext) -> Result<()> {
        let Some(store) = &ctx.memory else {
            return Ok(());
        };
        let blob = serde_json::to_value(self.items(channel_id))?;
        store.save(channel_id, &blob).await
    }

    /// Store `text` for the message's channel, tagging it with an extracted
    /// date when the extractor finds one.
    async fn remember(
        &self,
        text: &str,
        message: &IncomingMessage,
        ctx: &HandlerContext,
    ) -> Result<MemoryItem> {
        self.ensure_loaded(&message.channel_id, ctx).await?;

        let due = match &ctx.extractor {
            Some(extractor) => match extractor.extract(text).await {
                Ok(found) => found
                    .into_iter()
                    .filter(|e| e.kind == "date" && e.confidence >= MIN_EXTRACTION_CONFIDENCE)
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
                    .map(|e| e.value),
                Err(e) => {
                    tracing::warn!(error = %e, "Extraction failed, storing without date");
                    None
                }
            },
            None => None,
        };

        let item = MemoryItem {
            text: text.to_string(),
            added_by: message.user_id.clone(),
            added_at: Utc::now(),
            due,
        };
        self.push(&message.channel_id, item.clone());
        if let Err(e) = self.persist(&message.channel_id, ctx).await {
            self.retract(&message.channel_id, &item);
            return Err(e.context("Failed to persist memory"));
        }

        if let Some(audit) = ctx.audit() {
            audit.log(
                AuditAction::MemoryStore,
                &message.user_id,
                &message.channel_id,
                details([("text", item.text.as_str().into())]),
                true,
            );
        }
        tracing::info!(channel_id = %message.channel_id, "Memory stored");
        Ok(item)
    }
}

fn confirmation_text(item: &MemoryItem) -> String {
    match &item.due {
        Some(due) => format!("Got it, I'll remember \"{}\" ({}).", item.text, due),
        None => format!("Got it, I'll remember \"{}\".", item.text),
    }
}

/// Commands understood by the memory skill.
enum MemoryCommand {
    Store(String),
    AskWhat,
    List,
    Clear,
}

struct MemoryPatterns {
    store: Regex,
    bare: Regex,
    list: Regex,
    clear: Regex,
}

impl MemoryPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            store: Regex::new(r"(?is)^\s*(?:husk|remember)\s+(.+?)\s*$")?,
            bare: Regex::new(r"(?i)^\s*(?:husk|remember)\s*$")?,
            list: Regex::new(r"(?i)^\s*(?:hva husker du|what do you remember)\s*\??\s*$")?,
            clear: Regex::new(r"(?i)^\s*(?:glem alt|forget everything)\s*[.!]?\s*$")?,
        })
    }

    fn parse(&self, text: &str) -> Option<MemoryCommand> {
        if self.list.is_match(text) {
            return Some(MemoryCommand::List);
        }
        if self.clear.is_match(text) {
            return Some(MemoryCommand::Clear);
        }
        if self.bare.is_match(text) {
            return Some(MemoryCommand::AskWhat);
        }
        self.store
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| MemoryCommand::Store(m.as_str().to_string()))
    }
}

/// Stores, lists, and (after confirmation) forgets things per channel.
pub struct MemorySkill {
    book: Arc<MemoryBook>,
    patterns: MemoryPatterns,
}

impl MemorySkill {
    pub fn new(book: Arc<MemoryBook>) -> Result<Self> {
        Ok(Self {
            book,
            patterns: MemoryPatterns::new()?,
        })
    }
}

#[async_trait]
impl Handler for MemorySkill {
    fn name(&self) -> &str {
        "memory"
    }

    fn can_handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        self.patterns.parse(&message.content).is_some()
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> Result<HandlerResult> {
        let Some(command) = self.patterns.parse(&message.content) else {
            return Ok(HandlerResult::not_handled());
        };

        match command {
            MemoryCommand::Store(text) => {
                if let Some(denied) = require_permission(message, ctx, Permission::MemoryWrite).await {
                    return Ok(denied);
                }
                let item = self.book.remember(&text, message, ctx).await?;
                Ok(HandlerResult::reply(confirmation_text(&item)))
            }
            MemoryCommand::AskWhat => {
                self.book.await_clarification(&message.channel_id, &message.user_id);
                Ok(HandlerResult::reply("What should I remember?"))
            }
            MemoryCommand::List => {
                if let Some(denied) = require_permission(message, ctx, Permission::MemoryRead).await {
                    return Ok(denied);
                }
                self.book.ensure_loaded(&message.channel_id, ctx).await?;
                let items = self.book.items(&message.channel_id);
                if items.is_empty() {
                    return Ok(HandlerResult::reply("I don't remember anything here yet."));
                }
                let lines: Vec<String> = items
                    .iter()
                    .map(|item| match &item.due {
                        Some(due) => format!("- {} ({})", item.text, due),
                        None => format!("- {}", item.text),
                    })
                    .collect();
                Ok(HandlerResult::reply(format!(
                    "I remember:\n{}",
                    lines.join("\n")
                )))
            }
            MemoryCommand::Clear => {
                if let Some(denied) = require_permission(message, ctx, Permission::MemoryDelete).await
                {
                    return Ok(denied);
                }
                let Some(security) = &ctx.security else {
                    // Without a confirmation service the wipe happens immediately.
                    let removed = self.book.clear(&message.channel_id);
                    self.book.persist(&message.channel_id, ctx).await?;
                    return Ok(HandlerResult::reply(format!("Forgot {} item(s).", removed)));
                };
                security.confirmations.request(
                    &message.channel_id,
                    &message.user_id,
                    CLEAR_MEMORY_ACTION,
                    "Forget everything remembered in this channel?",
                );
                Ok(HandlerResult::reply(
                    "Forget everything remembered in this channel? Answer yes or no.",
                ))
            }
        }
    }

    fn memory(&self, channel_id: &str) -> Option<serde_json::Value> {
        self.book.snapshot(channel_id)
    }

    fn set_memory(&self, channel_id: &str, blob: serde_json::Value) {
        if let Err(e) = self.book.restore(channel_id, blob) {
            tracing::warn!(channel_id = %channel_id, error = %e, "Ignoring invalid memory blob");
        }
    }
}

/// Consumes the answer after the memory skill asked what to remember.
///
/// Must be registered before the memory skill and any catch-all skill.
pub struct ClarificationSkill {
    book: Arc<MemoryBook>,
}

impl ClarificationSkill {
    pub fn new(book: Arc<MemoryBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl Handler for ClarificationSkill {
    fn name(&self) -> &str {
        "clarification"
    }

    fn can_handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        self.book.is_awaiting(&message.channel_id, &message.user_id)
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> Result<HandlerResult> {
        // A concurrent dispatch may already have consumed the clarification.
        if !self.book.take_awaiting(&message.channel_id, &message.user_id) {
            return Ok(HandlerResult::reply(CLARIFICATION_TAKEN_REPLY));
        }

        let text = message.content.trim();
        if text.is_empty() {
            return Ok(HandlerResult::reply("Never mind then."));
        }
        if let Some(denied) = require_permission(message, ctx, Permission::MemoryWrite).await {
            return Ok(denied);
        }
        let item = self.book.remember(text, message, ctx).await?;
        Ok(HandlerResult::reply(confirmation_text(&item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use husk_core::testing::{test_context, InMemoryStore, RecordingSender};
    use husk_core::{Extraction, Extractor};

    struct DateExtractor;

    #[async_trait]
    impl Extractor for DateExtractor {
        async fn extract(&self, text: &str) -> Result<Vec<Extraction>> {
            if text.contains("fredag") {
                Ok(vec![
                    Extraction {
                        kind: "date".to_string(),
                        value: "2026-10-23".to_string(),
                        confidence: 0.9,
                    },
                    Extraction {
                        kind: "date".to_string(),
                        value: "2026-10-30".to_string(),
                        confidence: 0.4,
                    },
                ])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl husk_core::MemoryStore for BrokenStore {
        async fn load(&self, _channel_id: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }

        async fn save(&self, _channel_id: &str, _blob: &serde_json::Value) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    async fn run(skill: &dyn Handler, ctx: &HandlerContext, text: &str) -> HandlerResult {
        let msg = IncomingMessage::new("c1", "u1", text);
        assert!(skill.can_handle(&msg, ctx), "{} should match", text);
        skill.handle(&msg, ctx).await.unwrap()
    }

    fn ctx() -> HandlerContext {
        test_context(&IncomingMessage::new("c1", "u1", ""), RecordingSender::new())
    }

    #[test]
    fn test_patterns() {
        let p = MemoryPatterns::new().unwrap();
        assert!(matches!(p.parse("husk melk"), Some(MemoryCommand::Store(t)) if t == "melk"));
        assert!(matches!(p.parse("Remember  the milk "), Some(MemoryCommand::Store(t)) if t == "the milk"));
        assert!(matches!(p.parse("husk"), Some(MemoryCommand::AskWhat)));
        assert!(matches!(p.parse("Hva husker du?"), Some(MemoryCommand::List)));
        assert!(matches!(p.parse("glem alt"), Some(MemoryCommand::Clear)));
        assert!(p.parse("huskelapp").is_none());
        assert!(p.parse("hello").is_none());
    }

    #[tokio::test]
    async fn test_store_and_list() {
        let book = MemoryBook::new();
        let skill = MemorySkill::new(book.clone()).unwrap();
        let ctx = ctx();

        let result = run(&skill, &ctx, "husk melk").await;
        assert_eq!(
            result.response.as_deref(),
            Some("Got it, I'll remember \"melk\".")
        );

        let result = run(&skill, &ctx, "hva husker du").await;
        assert_eq!(result.response.as_deref(), Some("I remember:\n- melk"));
        assert_eq!(book.items("c2").len(), 0);
    }

    #[tokio::test]
    async fn test_extracted_date_is_attached() {
        let skill = MemorySkill::new(MemoryBook::new()).unwrap();
        let extractor: Arc<dyn Extractor> = Arc::new(DateExtractor);
        let ctx = ctx().with_extractor(Some(extractor));

        let result = run(&skill, &ctx, "husk tannlege fredag").await;
        assert_eq!(
            result.response.as_deref(),
            Some("Got it, I'll remember \"tannlege fredag\" (2026-10-23).")
        );
    }

    #[tokio::test]
    async fn test_persists_and_loads_through_store() {
        let store = InMemoryStore::new();
        let ctx = ctx().with_memory(Some(store.clone() as Arc<dyn husk_core::MemoryStore>));

        let first = MemorySkill::new(MemoryBook::new()).unwrap();
        run(&first, &ctx, "husk melk").await;
        assert!(store.get("c1").is_some());

        // A fresh skill instance sees what the first one saved.
        let second = MemorySkill::new(MemoryBook::new()).unwrap();
        let result = run(&second, &ctx, "what do you remember").await;
        assert_eq!(result.response.as_deref(), Some("I remember:\n- melk"));
    }

    #[tokio::test]
    async fn test_clarification_flow() {
        let book = MemoryBook::new();
        let memory = MemorySkill::new(book.clone()).unwrap();
        let clarify = ClarificationSkill::new(book.clone());
        let ctx = ctx();

        let result = run(&memory, &ctx, "husk").await;
        assert_eq!(result.response.as_deref(), Some("What should I remember?"));

        let other_user = IncomingMessage::new("c1", "u2", "brød");
        assert!(!clarify.can_handle(&other_user, &ctx));

        let result = run(&clarify, &ctx, "brød").await;
        assert_eq!(
            result.response.as_deref(),
            Some("Got it, I'll remember \"brød\".")
        );
        assert!(!book.is_awaiting("c1", "u1"));
    }

    #[tokio::test]
    async fn test_clear_without_security_is_immediate() {
        let book = MemoryBook::new();
        let skill = MemorySkill::new(book.clone()).unwrap();
        let ctx = ctx();
        run(&skill, &ctx, "husk a").await;
        run(&skill, &ctx, "husk b").await;

        let result = run(&skill, &ctx, "forget everything").await;
        assert_eq!(result.response.as_deref(), Some("Forgot 2 item(s)."));
        assert!(book.items("c1").is_empty());
    }

    #[test]
    fn test_memory_snapshot_round_trips_through_handler() {
        let skill = MemorySkill::new(MemoryBook::new()).unwrap();
        assert!(skill.memory("c1").is_none());

        let blob = serde_json::json!([{
            "text": "melk",
            "added_by": "u1",
            "added_at": "2026-10-17T10:00:00Z"
        }]);
        skill.set_memory("c1", blob);
        let snapshot = skill.memory("c1").unwrap();
        assert_eq!(snapshot[0]["text"], "melk");
    }

    #[tokio::test]
    async fn test_failed_save_leaves_cache_untouched() {
        let book = MemoryBook::new();
        book.restore(
            "c1",
            serde_json::json!([{
                "text": "brød",
                "added_by": "u1",
                "added_at": "2026-10-17T10:00:00Z"
            }]),
        )
        .unwrap();
        let skill = MemorySkill::new(book.clone()).unwrap();
        let store: Arc<dyn husk_core::MemoryStore> = Arc::new(BrokenStore);
        let ctx = ctx().with_memory(Some(store));

        let msg = IncomingMessage::new("c1", "u1", "husk melk");
        let err = skill.handle(&msg, &ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));

        let items = book.items("c1");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "brød");
    }

    #[tokio::test]
    async fn test_clarification_already_consumed_still_replies() {
        let book = MemoryBook::new();
        let clarify = ClarificationSkill::new(book.clone());
        let ctx = ctx();
        book.await_clarification("c1", "u1");

        let msg = IncomingMessage::new("c1", "u1", "brød");
        assert!(clarify.can_handle(&msg, &ctx));
        // A concurrent dispatch wins the race between can_handle and handle.
        assert!(book.take_awaiting("c1", "u1"));

        let result = clarify.handle(&msg, &ctx).await.unwrap();
        assert!(result.handled);
        assert_eq!(result.response.as_deref(), Some(CLARIFICATION_TAKEN_REPLY));
        assert!(book.items("c1").is_empty());
    }
}
