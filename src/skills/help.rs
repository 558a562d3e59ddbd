// ABOUTME: Help skill listing what the bot understands
// ABOUTME: Answers "help" and "hjelp"

use anyhow::Result;
use async_trait::async_trait;
use husk_core::{Handler, HandlerContext, HandlerResult, IncomingMessage};
use regex::Regex;

pub struct HelpSkill {
    text: String,
    pattern: Regex,
}

impl HelpSkill {
    pub fn new(bot_name: &str, topics: Vec<String>) -> Result<Self> {
        let mut text = format!("Hi, I'm {}. Things you can say:", bot_name);
        for topic in &topics {
            text.push_str("\n- ");
            text.push_str(topic);
        }
        Ok(Self {
            text,
            pattern: Regex::new(r"(?i)^\s*(?:help|hjelp)\s*[?!.]?\s*$")?,
        })
    }
}

#[async_trait]
impl Handler for HelpSkill {
    fn name(&self) -> &str {
        "help"
    }

    fn can_handle(&self, message: &IncomingMessage, _ctx: &HandlerContext) -> bool {
        self.pattern.is_match(&message.content)
    }

    async fn handle(&self, _message: &IncomingMessage, _ctx: &HandlerContext) -> Result<HandlerResult> {
        Ok(HandlerResult::reply(self.text.clone()))
    }
}
