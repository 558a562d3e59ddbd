// ABOUTME: Yes/no answers to pending confirmations
// ABOUTME: Runs the confirmed action (currently the channel memory wipe) or cancels it

use anyhow::Result;
use async_trait::async_trait;
use husk_core::audit::{details, AuditAction};
use husk_core::{Handler, HandlerContext, HandlerResult, IncomingMessage};
use std::sync::Arc;

use super::memory::{MemoryBook, CLEAR_MEMORY_ACTION};

/// Reply when the pending confirmation is gone by the time we act on it.
pub const NOTHING_TO_CONFIRM_REPLY: &str = "Nothing to confirm.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
}

fn parse_answer(text: &str) -> Option<Answer> {
    let word = text
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase();
    match word.as_str() {
        "yes" | "y" | "ja" | "j" => Some(Answer::Yes),
        "no" | "n" | "nei" => Some(Answer::No),
        _ => None,
    }
}

pub struct ConfirmationSkill {
    book: Arc<MemoryBook>,
}

impl ConfirmationSkill {
    pub fn new(book: Arc<MemoryBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl Handler for ConfirmationSkill {
    fn name(&self) -> &str {
        "confirmation"
    }

    fn can_handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> bool {
        let Some(security) = &ctx.security else {
            return false;
        };
        parse_answer(&message.content).is_some()
            && security
                .confirmations
                .has_pending(&message.channel_id, &message.user_id)
    }

    async fn handle(&self, message: &IncomingMessage, ctx: &HandlerContext) -> Result<HandlerResult> {
        let (Some(security), Some(answer)) = (&ctx.security, parse_answer(&message.content)) else {
            return Ok(HandlerResult::not_handled());
        };
        let confirmations = &security.confirmations;

        if answer == Answer::No {
            return Ok(match confirmations.cancel(&message.channel_id, &message.user_id) {
                Some(_) => HandlerResult::reply("Okay, cancelled."),
                None => HandlerResult::reply(NOTHING_TO_CONFIRM_REPLY),
            });
        }

        let Some(pending) = confirmations.confirm(&message.channel_id, &message.user_id) else {
            return Ok(HandlerResult::reply(
                "That request expired. Ask again if you still want it.",
            ));
        };

        match pending.action.as_str() {
            CLEAR_MEMORY_ACTION => {
                let removed = self.book.clear(&message.channel_id);
                self.book.persist(&message.channel_id, ctx).await?;
                security.audit.log(
                    AuditAction::MemoryDelete,
                    &message.user_id,
                    &message.channel_id,
                    details([("removed", removed.into())]),
                    true,
                );
                tracing::info!(channel_id = %message.channel_id, removed, "Channel memory cleared");
                Ok(HandlerResult::reply(format!("Done. Forgot {} item(s).", removed)))
            }
            other => {
                tracing::warn!(action = %other, "Confirmed action has no executor");
                Ok(HandlerResult::failed(format!("unknown confirmed action '{}'", other)))
            }
        }
    }
}
