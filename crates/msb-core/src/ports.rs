use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{ChannelMessageId, PartyId, RoomId, UpdateCursor},
    Result,
};

/// Latest-message payload pulled from the source for one account.
#[derive(Clone, Debug)]
pub struct MessagePayload {
    /// Source-side message id; 0 when the source omits one.
    pub source_id: u64,
    pub room_id: RoomId,
    /// Who wrote the message (the counterparty for inbound traffic).
    pub sender: PartyId,
    /// The account's own source-side identity, as reported by the source.
    pub admin: PartyId,
    pub text: String,
}

/// Result of one unread-inbox poll.
#[derive(Clone, Debug)]
pub struct SourceInbox {
    /// Total unread messages reported by the source. Negative means the
    /// counter was unreadable (sentinel) — treat the poll as unavailable.
    pub total_unread: i64,
    pub latest: Option<MessagePayload>,
}

/// Source-site collaborator: scrape/automation surface for login, inbox
/// polling and reply push-back.
#[async_trait]
pub trait SourcePort: Send + Sync {
    /// Full login with stored credentials. Returns a fresh opaque session
    /// token (cookie-equivalent) or `Error::AuthFailure`.
    async fn authenticate(&self, login_id: &str, secret: &str) -> Result<String>;

    /// Pull the most recent message payload. `Error::AuthFailure` when the
    /// session token is rejected, `Error::SourceUnavailable` when the source
    /// cannot be read this tick.
    async fn fetch_latest(&self, session_token: &str) -> Result<SourceInbox>;

    /// Push an operator reply back to the source surface. Automation-backed,
    /// slow, single-flight per account — implementations serialize calls.
    async fn push_reply(
        &self,
        session_token: &str,
        room: RoomId,
        counterparty: PartyId,
        text: &str,
    ) -> Result<()>;
}

/// One inbound item from the notification channel.
#[derive(Clone, Debug)]
pub struct InboundItem {
    pub id: UpdateCursor,
    pub sender: String,
    pub text: String,
    pub timestamp: i64,
    /// Text of the message this item replies to, when it is a reply. The
    /// correlation token is recovered from here.
    pub reply_to_text: Option<String>,
}

/// Notification-channel collaborator.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Connectivity check. `Ok(false)` for a clean "not reachable".
    async fn verify(&self) -> Result<bool>;

    async fn send(&self, destination: i64, text: &str) -> Result<ChannelMessageId>;

    /// Inbound items strictly after `cursor`, oldest first.
    async fn poll_since(&self, cursor: UpdateCursor) -> Result<Vec<InboundItem>>;

    /// Best-effort registration of passive reply listening (startup notice,
    /// command hints — whatever the channel supports).
    async fn register_reply_listener(&self, destination: i64) -> Result<()>;

    /// Release the polling resource so a successor client can start cleanly.
    async fn shutdown(&self);
}

/// Credentials for building a channel client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelCredentials {
    pub token: String,
    pub destination: i64,
}

/// Builds channel clients for the supervisor-owned singleton lifecycle.
/// Callers never hold a global — they ask the supervisor for the current
/// handle, which may be unavailable.
pub trait ChannelFactory: Send + Sync {
    fn build(&self, creds: &ChannelCredentials) -> Arc<dyn ChannelPort>;
}
