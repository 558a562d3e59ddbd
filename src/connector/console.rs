// ABOUTME: Console connector: one message per stdin line, replies printed to stdout
// ABOUTME: Lines look like "user: text"; plain lines come from the default user

use anyhow::Result;
use async_trait::async_trait;
use husk_core::{Connector, InboundSink, IncomingMessage, MessageSender, OutboundOptions};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

pub const DEFAULT_CHANNEL: &str = "console";
pub const DEFAULT_USER: &str = "local";

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Prints outbound messages to stdout.
#[derive(Debug, Default, Clone)]
pub struct ConsoleSender {
    bot_name: String,
}

impl ConsoleSender {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
        }
    }
}

#[async_trait]
impl MessageSender for ConsoleSender {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        options: Option<OutboundOptions>,
    ) -> Result<()> {
        println!("[{}] {}: {}", channel_id, self.bot_name, text);
        if let Some(path) = options.and_then(|o| o.attachment_path) {
            println!("[{}] {}: (attachment {})", channel_id, self.bot_name, path);
        }
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<()> {
        println!("[dm:{}] {}: {}", user_id, self.bot_name, text);
        Ok(())
    }
}

fn message_for(channel_id: &str, default_user: &str, line: &str) -> IncomingMessage {
    let (user, text) = parse_line(line);
    IncomingMessage::new(channel_id, user.unwrap_or(default_user), text)
}

/// Split an input line into (user, text). A leading `name:` prefix without
/// spaces in the name selects the user.
pub fn parse_line(line: &str) -> (Option<&str>, &str) {
    if let Some((user, text)) = line.split_once(':') {
        let user = user.trim();
        if !user.is_empty() && !user.contains(char::is_whitespace) {
            return (Some(user), text.trim());
        }
    }
    (None, line.trim())
}

pub struct ConsoleConnector {
    channel_id: String,
    default_user: String,
    sender: Arc<ConsoleSender>,
    input: Mutex<Option<LineSource>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleConnector {
    /// Connector reading from stdin.
    pub fn new(bot_name: &str) -> Self {
        Self::with_input(bot_name, BufReader::new(tokio::io::stdin()))
    }

    /// Connector reading lines from `input` instead of stdin.
    pub fn with_input(bot_name: &str, input: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            channel_id: DEFAULT_CHANNEL.to_string(),
            default_user: DEFAULT_USER.to_string(),
            sender: Arc::new(ConsoleSender::new(bot_name)),
            input: Mutex::new(Some(Box::new(input))),
            reader: Mutex::new(None),
        }
    }

    pub fn channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn default_user(mut self, user_id: impl Into<String>) -> Self {
        self.default_user = user_id.into();
        self
    }

    /// Wait until the input is exhausted and every dispatched line is done.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for ConsoleConnector {
    fn id(&self) -> &str {
        "console"
    }

    fn sender(&self) -> Arc<dyn MessageSender> {
        self.sender.clone()
    }

    async fn start(&self, sink: Arc<dyn InboundSink>) -> Result<()> {
        let Some(input) = self.input.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            anyhow::bail!("console connector already started");
        };

        let channel_id = self.channel_id.clone();
        let default_user = self.default_user.clone();
        let handle = tokio::spawn(async move {
            let mut lines = input.lines();
            let mut in_flight = Vec::new();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read console input");
                        break;
                    }
                };
                let message = message_for(&channel_id, &default_user, &line);
                // Each line dispatches on its own task so a slow skill never
                // blocks the next line.
                let sink = sink.clone();
                in_flight.push(tokio::spawn(async move {
                    sink.handle_incoming(message).await;
                }));
                in_flight.retain(|h: &JoinHandle<()>| !h.is_finished());
            }
            for handle in in_flight {
                let _ = handle.await;
            }
            tracing::info!("Console input closed");
        });

        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        tracing::info!(channel_id = %self.channel_id, "Console connector listening");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        Ok(())
    }
}
