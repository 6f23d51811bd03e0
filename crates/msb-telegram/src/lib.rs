//! Telegram adapter (teloxide).
//!
//! Implements the `msb-core` ChannelPort over the Telegram Bot API:
//! notifications go out as plain messages, operator replies come back
//! through long-poll `getUpdates`.

use std::sync::Arc;

use async_trait::async_trait;

use teloxide::{prelude::*, types::UpdateKind};

use tokio::time::sleep;

use msb_core::{
    domain::{ChannelMessageId, UpdateCursor},
    errors::Error,
    ports::{ChannelCredentials, ChannelFactory, ChannelPort, InboundItem},
    Result,
};

/// Long-poll window for one `getUpdates` call, in seconds. Short enough
/// that a reconcile tick returns promptly when nothing arrived.
const POLL_TIMEOUT_SECS: u32 = 5;

#[derive(Clone)]
pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::ChannelUnavailable(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

fn to_inbound(update: &Update) -> Option<InboundItem> {
    let UpdateKind::Message(msg) = &update.kind else {
        return None;
    };
    let text = msg.text()?.to_string();
    Some(InboundItem {
        id: UpdateCursor(update.id as i64),
        sender: msg
            .from()
            .map(|u| u.full_name())
            .unwrap_or_else(|| "unknown".to_string()),
        text,
        timestamp: msg.date.timestamp(),
        reply_to_text: msg
            .reply_to_message()
            .and_then(|m| m.text())
            .map(str::to_string),
    })
}

fn startup_notice() -> String {
    "Message sync online. Reply to a notification to answer the client.".to_string()
}

#[async_trait]
impl ChannelPort for TelegramChannel {
    async fn verify(&self) -> Result<bool> {
        match self.bot.get_me().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("telegram getMe failed: {e}");
                Ok(false)
            }
        }
    }

    async fn send(&self, destination: i64, text: &str) -> Result<ChannelMessageId> {
        let msg = self
            .with_retry(|| self.bot.send_message(ChatId(destination), text.to_string()))
            .await?;
        Ok(ChannelMessageId(msg.id.0 as i64))
    }

    async fn poll_since(&self, cursor: UpdateCursor) -> Result<Vec<InboundItem>> {
        let updates = self
            .with_retry(|| {
                self.bot
                    .get_updates()
                    .offset((cursor.0 + 1) as i32)
                    .timeout(POLL_TIMEOUT_SECS)
            })
            .await?;
        Ok(updates
            .iter()
            .filter(|u| (u.id as i64) > cursor.0)
            .filter_map(to_inbound)
            .collect())
    }

    async fn register_reply_listener(&self, destination: i64) -> Result<()> {
        self.with_retry(|| self.bot.send_message(ChatId(destination), startup_notice()))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) {
        // getUpdates holds no server-side resource between calls; the Bot
        // can simply be dropped.
    }
}

pub struct TelegramChannelFactory;

impl ChannelFactory for TelegramChannelFactory {
    fn build(&self, creds: &ChannelCredentials) -> Arc<dyn ChannelPort> {
        Arc::new(TelegramChannel::new(Bot::new(creds.token.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_notice_mentions_replying() {
        assert!(startup_notice().contains("Reply"));
    }
}
