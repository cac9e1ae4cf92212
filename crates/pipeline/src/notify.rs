use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one Markdown message to `chat_id`.
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Bot API `sendMessage` client.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .context("failed building notifier http client")?;
        Ok(Self {
            client,
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(anyhow!("notify chat id is not configured"));
        }
        if self.bot_token.is_empty() {
            return Err(anyhow!("telegram bot token is not configured"));
        }
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        // The bot token is part of the URL, so transport errors are reported
        // without it.
        let response = self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await
            .map_err(|error| anyhow!("telegram sendMessage request failed: {}", error.without_url()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|error| anyhow!("telegram sendMessage body invalid: {}", error.without_url()))?;
        if !status.is_success() || body.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(anyhow!(
                "telegram sendMessage rejected: status={} description={}",
                status.as_u16(),
                description
            ));
        }
        Ok(())
    }
}
