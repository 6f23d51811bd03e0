//! Reply reconciler: polls the channel for operator replies, maps them back
//! to the room they answer and pushes them to the source.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    domain::{LocalId, PartyId, RoomId, UpdateCursor},
    fingerprint::{content_fingerprint, FingerprintFn},
    ports::{ChannelPort, InboundItem, SourcePort},
    store::{Flag, MessageFlags, NewMessage, SyncStore},
    token::CorrelationToken,
    Error, Result,
};

/// What one reconciliation pass did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass holds the cursor; skipped without polling.
    Busy,
    /// Channel feed had nothing past the cursor.
    NoNewItems,
    /// Newest item was not a reply to one of our notifications; consumed.
    NotAReply,
    /// Reply carried no recoverable correlation token; consumed and dropped.
    Unresolvable,
    /// Reply recorded against its room. `synced` reports whether the push
    /// to the source succeeded; unsynced replies retry on later passes.
    Replied {
        room: RoomId,
        local_id: LocalId,
        synced: bool,
    },
}

pub struct Reconciler {
    store: Arc<SyncStore>,
    source: Arc<dyn SourcePort>,
    /// Cursor doubles as the reentrancy guard: `try_lock` failure means a
    /// pass is already in flight and this tick is skipped.
    cursor: Mutex<UpdateCursor>,
    fingerprint: FingerprintFn,
}

impl Reconciler {
    pub fn new(store: Arc<SyncStore>, source: Arc<dyn SourcePort>) -> Self {
        Self {
            store,
            source,
            cursor: Mutex::new(UpdateCursor::default()),
            fingerprint: content_fingerprint,
        }
    }

    /// One reconciliation pass: poll, consume the newest inbound item, then
    /// retry any replies still waiting to reach the source.
    pub async fn run_once(&self, channel: &Arc<dyn ChannelPort>) -> Result<ReconcileOutcome> {
        let Ok(mut cursor) = self.cursor.try_lock() else {
            return Ok(ReconcileOutcome::Busy);
        };

        let items = channel.poll_since(*cursor).await?;
        let Some(latest) = items.into_iter().max_by_key(|i| i.id) else {
            self.sync_pending().await;
            return Ok(ReconcileOutcome::NoNewItems);
        };

        // Everything up to and including the newest item is consumed, even
        // when it turns out unusable. Older unconsumed items are abandoned
        // with it; the feed only ever answers the most recent notification.
        *cursor = latest.id;

        let outcome = self.apply(latest).await;
        self.sync_pending().await;
        Ok(outcome)
    }

    async fn apply(&self, item: InboundItem) -> ReconcileOutcome {
        let Some(quoted) = item.reply_to_text.as_deref() else {
            tracing::debug!("[reconcile] inbound item {} is not a reply", item.id.0);
            return ReconcileOutcome::NotAReply;
        };
        let Some(token) = CorrelationToken::parse(quoted) else {
            tracing::warn!(
                "[reconcile] reply without a correlation token discarded (from {})",
                item.sender
            );
            return ReconcileOutcome::Unresolvable;
        };
        if self.store.get(token.room, token.local_id).is_none() {
            tracing::warn!(
                "[reconcile] reply names no live message ({} in room {}), discarded",
                token.local_id,
                token.room
            );
            return ReconcileOutcome::Unresolvable;
        }

        // The operator has read the message they replied to. Set both flags
        // even when dispatch already did; mark is a clean no-op then.
        self.store.mark(token.room, token.local_id, Flag::Seen);
        self.store
            .mark(token.room, token.local_id, Flag::DeliveredToChannel);

        let (admin, counterparty) = self.store.room_parties(token.room);
        let identity = self
            .store
            .account_by_admin(admin)
            .map(|a| a.login_id)
            .unwrap_or_else(|| admin.0.to_string());

        let (local_id, inserted) = self.store.append(
            token.room,
            NewMessage {
                source_id: 0,
                sender: admin,
                counterparty,
                admin,
                text: item.text.clone(),
                fingerprint: (self.fingerprint)(&item.text, &identity),
                flags: MessageFlags::default()
                    .with(Flag::Seen)
                    .with(Flag::DeliveredToChannel),
            },
        );
        if inserted {
            tracing::info!(
                "[reconcile] reply recorded for room {} (local id {local_id})",
                token.room
            );
        }

        let synced = match self.push(token.room, admin, counterparty, &item.text).await {
            Ok(()) => {
                self.store.mark(token.room, local_id, Flag::SyncedToSource);
                true
            }
            Err(e) => {
                tracing::warn!("[reconcile] push to source failed for room {}: {e}", token.room);
                false
            }
        };

        ReconcileOutcome::Replied {
            room: token.room,
            local_id,
            synced,
        }
    }

    /// Retry replies recorded on earlier passes that never reached the
    /// source (channel outage, expired session).
    async fn sync_pending(&self) {
        for room in self.store.room_ids() {
            let (admin, counterparty) = self.store.room_parties(room);
            let pending: Vec<_> = self
                .store
                .list(room)
                .into_iter()
                .filter(|m| {
                    m.sender == admin
                        && m.flags.contains(Flag::DeliveredToChannel)
                        && !m.flags.contains(Flag::SyncedToSource)
                })
                .collect();
            for message in pending.into_iter().rev() {
                match self.push(room, admin, counterparty, &message.text).await {
                    Ok(()) => {
                        self.store.mark(room, message.local_id, Flag::SyncedToSource);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[reconcile] pending reply {} still unsynced: {e}",
                            message.local_id
                        );
                        break;
                    }
                }
            }
        }
    }

    /// Push one reply through the source, re-logging in once on a rejected
    /// session token.
    async fn push(
        &self,
        room: RoomId,
        admin: PartyId,
        counterparty: PartyId,
        text: &str,
    ) -> Result<()> {
        let Some(account) = self.store.account_by_admin(admin) else {
            return Err(Error::Config(format!(
                "no account known for room {room} admin {}",
                admin.0
            )));
        };

        match self
            .source
            .push_reply(&account.session_token, room, counterparty, text)
            .await
        {
            Ok(()) => return Ok(()),
            Err(Error::AuthFailure(_)) => {
                tracing::info!(
                    "[reconcile] session token rejected for {}, re-logging in",
                    account.login_id
                );
            }
            Err(e) => return Err(e),
        }

        let fresh = self
            .source
            .authenticate(&account.login_id, &account.secret)
            .await?;
        self.store.update_session_token(&account.login_id, &fresh);
        self.source
            .push_reply(&fresh, room, counterparty, text)
            .await
    }
}
