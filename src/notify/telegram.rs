//! Telegram notifier: posts pool events to admin chats via the Bot API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::Notifier;
use crate::accounts::Account;
use crate::config::TelegramNotifierConfig;
use crate::error::NotifyError;
use crate::monitor::SweepReport;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Sends plain-text notices to every configured admin chat.
pub struct TelegramNotifier {
    bot_token: SecretString,
    chat_ids: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramNotifierConfig) -> Self {
        Self::with_api_base(config, TELEGRAM_API_BASE)
    }

    /// Point the notifier at a different Bot API host.
    pub fn with_api_base(config: TelegramNotifierConfig, api_base: &str) -> Self {
        Self {
            bot_token: config.bot_token,
            chat_ids: config.chat_ids,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    async fn broadcast(&self, text: &str) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for chat_id in &self.chat_ids {
            if let Err(e) = self.send_message(chat_id, text).await {
                tracing::warn!(chat_id = %chat_id, error = %e, "Telegram notification failed");
                failures.push(format!("{chat_id}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::DeliveryFailed {
                name: "telegram".into(),
                reason: failures.join("; "),
            })
        }
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(NotifyError::DeliveryFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }
        Ok(())
    }
}

/// Render a sweep report as a short admin message.
pub fn format_report(report: &SweepReport) -> String {
    format!(
        "Account check\nTotal: {}\nActive: {}\nDisabled: {}\nBlocked: {}",
        report.total, report.active, report.disabled, report.blocked
    )
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn status_report(&self, report: &SweepReport) -> Result<(), NotifyError> {
        self.broadcast(&format_report(report)).await
    }

    async fn account_blocked(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        self.broadcast(&format!("Account {} blocked\nReason: {reason}", account.phone))
            .await
    }

    async fn account_disabled(&self, account: &Account, reason: &str) -> Result<(), NotifyError> {
        self.broadcast(&format!("Account {} disabled\nReason: {reason}", account.phone))
            .await
    }
}
