//! Ingestion/dedup engine: pulls the latest message payload from the source
//! for each account, fingerprints it and feeds the store.

use std::sync::Arc;

use crate::{
    domain::{LocalId, RoomId},
    fingerprint::{content_fingerprint, FingerprintFn},
    ports::{SourceInbox, SourcePort},
    store::{MessageFlags, NewMessage, SyncStore},
    Error, Result,
};

/// What one ingestion pass for one account did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new message was inserted — callers may trigger downstream refresh.
    Inserted { room: RoomId, local_id: LocalId },
    /// Same payload seen before; absorbed by the fingerprint dedup.
    Duplicate,
    /// Source reports nothing unread.
    NothingUnread,
    /// Unread counter unreadable, or a positive count with an empty page.
    /// Retried next tick, no state change.
    SourceUnavailable,
    /// Session token rejected and re-login failed. Next tick retries the
    /// full login.
    AuthFailure,
}

pub struct IngestEngine {
    store: Arc<SyncStore>,
    source: Arc<dyn SourcePort>,
    fingerprint: FingerprintFn,
}

impl IngestEngine {
    pub fn new(store: Arc<SyncStore>, source: Arc<dyn SourcePort>) -> Self {
        Self {
            store,
            source,
            fingerprint: content_fingerprint,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: FingerprintFn) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Ingest the latest payload for one account.
    pub async fn ingest(&self, login_id: &str) -> Result<IngestOutcome> {
        let Some(account) = self.store.account(login_id) else {
            return Err(Error::Config(format!("unknown account: {login_id}")));
        };

        let inbox = match self.fetch_with_relogin(login_id, &account.secret, &account.session_token).await {
            Ok(inbox) => inbox,
            Err(Error::AuthFailure(e)) => {
                tracing::warn!("[ingest] auth failed for {login_id}: {e}");
                return Ok(IngestOutcome::AuthFailure);
            }
            Err(Error::SourceUnavailable(e)) | Err(Error::External(e)) => {
                tracing::warn!("[ingest] source unavailable for {login_id}: {e}");
                return Ok(IngestOutcome::SourceUnavailable);
            }
            Err(e) => return Err(e),
        };

        if inbox.total_unread < 0 {
            // Sentinel: the unread counter could not be read this tick.
            return Ok(IngestOutcome::SourceUnavailable);
        }
        if inbox.total_unread == 0 {
            return Ok(IngestOutcome::NothingUnread);
        }
        let Some(payload) = inbox.latest else {
            // Positive count but an empty page: transient, retry next tick.
            tracing::debug!(
                "[ingest] {login_id}: {} unread but empty page, retrying next tick",
                inbox.total_unread
            );
            return Ok(IngestOutcome::SourceUnavailable);
        };

        if account.admin_id != Some(payload.admin) {
            self.store.set_admin_id(login_id, payload.admin);
        }

        let fingerprint = (self.fingerprint)(&payload.text, login_id);
        let (local_id, inserted) = self.store.append(
            payload.room_id,
            NewMessage {
                source_id: payload.source_id,
                sender: payload.sender,
                counterparty: payload.sender,
                admin: payload.admin,
                text: payload.text,
                fingerprint,
                flags: MessageFlags::default(),
            },
        );

        if inserted {
            tracing::info!(
                "[ingest] new message in room {} (local id {local_id}) for {login_id}",
                payload.room_id
            );
            Ok(IngestOutcome::Inserted {
                room: payload.room_id,
                local_id,
            })
        } else {
            Ok(IngestOutcome::Duplicate)
        }
    }

    /// Ingest every stored account, isolating per-account failures.
    /// Returns the number of newly inserted messages.
    pub async fn ingest_all(&self) -> usize {
        let mut inserted = 0usize;
        for account in self.store.accounts() {
            match self.ingest(&account.login_id).await {
                Ok(IngestOutcome::Inserted { .. }) => inserted += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("[ingest] account {} failed: {e}", account.login_id);
                }
            }
        }
        inserted
    }

    /// Fetch with the saved token; on rejection, re-login once, persist the
    /// refreshed token and retry.
    async fn fetch_with_relogin(
        &self,
        login_id: &str,
        secret: &str,
        session_token: &str,
    ) -> Result<SourceInbox> {
        match self.source.fetch_latest(session_token).await {
            Ok(inbox) => return Ok(inbox),
            Err(Error::AuthFailure(_)) => {
                tracing::info!("[ingest] session token rejected for {login_id}, re-logging in");
            }
            Err(e) => return Err(e),
        }

        let fresh = self.source.authenticate(login_id, secret).await?;
        self.store.update_session_token(login_id, &fresh);
        self.source.fetch_latest(&fresh).await
    }
}
