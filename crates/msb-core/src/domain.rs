use serde::{Deserialize, Serialize};

/// External room id (one conversation thread on the source site).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId(pub i64);

/// Store-assigned message id, stable for the lifetime of the store. Used as
/// the reconciliation key for replies; never handed to the channel directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(pub i64);

/// Source-side participant id (account admin or counterparty).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId(pub i64);

/// Monotonic position marker into the channel's inbound update feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct UpdateCursor(pub i64);

/// Channel-side id of a sent notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelMessageId(pub i64);

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
