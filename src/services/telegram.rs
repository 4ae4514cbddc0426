use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ChatId, TelegramConfig};
use crate::error::{AppError, Result};

use super::Notifier;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a ChatId,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Posts plain-text messages through the Telegram Bot API.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };

        // The token is part of the url; keep it out of transport error messages.
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Notifier(format!("sendMessage failed: {}", e.without_url())))?;

        let status = response.status();
        let body: ApiResponse = response.json().await.map_err(|e| {
            AppError::Notifier(format!("unreadable API response (HTTP {}): {}", status, e.without_url()))
        })?;

        if !status.is_success() || !body.ok {
            return Err(AppError::Notifier(format!(
                "API error (HTTP {}): {}",
                status,
                body.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        tracing::debug!(chat_id = %self.chat_id, "Message sent");
        Ok(())
    }
}
