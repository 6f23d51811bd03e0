use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LocalId, PartyId, RoomId};

/// The closed set of per-message state flags.
///
/// Flags are monotonic: once set they never clear. All transitions funnel
/// through [`MessageFlags::set`] so monotonicity is checkable in one place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flag {
    /// Operator has read the message.
    Seen,
    /// Forwarded to the notification channel.
    DeliveredToChannel,
    /// Operator's reply has been pushed back to the source.
    SyncedToSource,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags(u8);

impl MessageFlags {
    const SEEN: u8 = 1 << 0;
    const DELIVERED: u8 = 1 << 1;
    const SYNCED: u8 = 1 << 2;

    fn bit(flag: Flag) -> u8 {
        match flag {
            Flag::Seen => Self::SEEN,
            Flag::DeliveredToChannel => Self::DELIVERED,
            Flag::SyncedToSource => Self::SYNCED,
        }
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0 & Self::bit(flag) != 0
    }

    /// Set a flag. Returns true when this call changed state (0 -> 1).
    /// There is deliberately no way to clear a flag.
    pub fn set(&mut self, flag: Flag) -> bool {
        let bit = Self::bit(flag);
        let changed = self.0 & bit == 0;
        self.0 |= bit;
        changed
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.set(flag);
        self
    }
}

/// One persisted message. Immutable except for its flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub local_id: LocalId,
    pub room_id: RoomId,
    /// Source-side message id; 0 until (or unless) resolved.
    pub source_id: u64,
    pub sender: PartyId,
    /// The room's counterparty, constant across the room.
    pub counterparty: PartyId,
    pub text: String,
    pub fingerprint: u64,
    pub flags: MessageFlags,
    pub created_at: DateTime<Utc>,
}

/// Input for `SyncStore::append` — everything but the store-assigned id,
/// flags and timestamp.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub source_id: u64,
    pub sender: PartyId,
    pub counterparty: PartyId,
    /// The owning account's source-side identity (room metadata).
    pub admin: PartyId,
    pub text: String,
    pub fingerprint: u64,
    /// Initial flags for synthesized outbound messages; inbound ingestion
    /// passes the default (all clear).
    pub flags: MessageFlags,
}

/// One source-side identity the operator registered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub login_id: String,
    pub secret: String,
    /// Opaque session token (cookie-equivalent); refreshed on re-login.
    pub session_token: String,
    /// Source-side admin id, resolved on first successful ingestion.
    pub admin_id: Option<PartyId>,
}
