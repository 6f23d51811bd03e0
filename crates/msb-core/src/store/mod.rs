//! Persisted account/message store — the single source of truth for sync
//! state.
//!
//! Rooms self-heal: any operation against an unknown room provisions it
//! instead of failing, matching the behavior observed on the source system.
//! The whole store is snapshot-persisted as JSON after each mutation;
//! a failed write is logged and never fails the mutating operation.

pub mod types;

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::Mutex,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{LocalId, PartyId, RoomId},
    Result,
};

pub use types::{Account, Flag, Message, MessageFlags, NewMessage};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Room {
    /// Owning account's source-side identity; 0 until learned.
    admin: PartyId,
    /// The other side of the conversation; 0 until learned.
    counterparty: PartyId,
    messages: Vec<Message>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    accounts: Vec<Account>,
    rooms: BTreeMap<i64, Room>,
    next_local_id: i64,
}

pub struct SyncStore {
    state: Mutex<StoreState>,
    path: Option<PathBuf>,
}

impl SyncStore {
    /// Load from a snapshot file, or start empty when the file is absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    /// Store with no persistence backing.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            path: None,
        }
    }

    // ===== Room / message operations =====

    /// Idempotent room provisioning. Never fails on existing rooms.
    pub fn ensure_room(&self, room: RoomId) {
        let mut st = self.state.lock().expect("store lock");
        st.rooms.entry(room.0).or_default();
        self.persist(&st);
    }

    pub fn room_exists(&self, room: RoomId) -> bool {
        self.state
            .lock()
            .expect("store lock")
            .rooms
            .contains_key(&room.0)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.state
            .lock()
            .expect("store lock")
            .rooms
            .keys()
            .map(|id| RoomId(*id))
            .collect()
    }

    /// Room metadata: (admin, counterparty). Zeroes for unknown rooms.
    pub fn room_parties(&self, room: RoomId) -> (PartyId, PartyId) {
        let st = self.state.lock().expect("store lock");
        st.rooms
            .get(&room.0)
            .map(|r| (r.admin, r.counterparty))
            .unwrap_or((PartyId(0), PartyId(0)))
    }

    /// Idempotent insert keyed on the content fingerprint.
    ///
    /// Returns the message's local id plus whether this call actually
    /// inserted (false for duplicates — the store's primary defense against
    /// repeated ingestion of the same "latest message").
    pub fn append(&self, room: RoomId, msg: NewMessage) -> (LocalId, bool) {
        let mut st = self.state.lock().expect("store lock");

        let entry = st.rooms.entry(room.0).or_default();
        if let Some(existing) = entry
            .messages
            .iter()
            .find(|m| m.fingerprint == msg.fingerprint)
        {
            return (existing.local_id, false);
        }

        if entry.admin.0 == 0 && msg.admin.0 != 0 {
            entry.admin = msg.admin;
        }
        if entry.counterparty.0 == 0 && msg.counterparty.0 != 0 {
            entry.counterparty = msg.counterparty;
        }

        st.next_local_id += 1;
        let local_id = LocalId(st.next_local_id);
        let message = Message {
            local_id,
            room_id: room,
            source_id: msg.source_id,
            sender: msg.sender,
            counterparty: msg.counterparty,
            text: msg.text,
            fingerprint: msg.fingerprint,
            flags: msg.flags,
            created_at: Utc::now(),
        };
        st.rooms
            .get_mut(&room.0)
            .expect("room just provisioned")
            .messages
            .push(message);

        self.persist(&st);
        (local_id, true)
    }

    /// All messages for a room, newest first by date (local id breaks ties).
    pub fn list(&self, room: RoomId) -> Vec<Message> {
        let st = self.state.lock().expect("store lock");
        let Some(r) = st.rooms.get(&room.0) else {
            return Vec::new();
        };
        let mut out = r.messages.clone();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.local_id.cmp(&a.local_id))
        });
        out
    }

    pub fn get(&self, room: RoomId, local_id: LocalId) -> Option<Message> {
        let st = self.state.lock().expect("store lock");
        st.rooms
            .get(&room.0)?
            .messages
            .iter()
            .find(|m| m.local_id == local_id)
            .cloned()
    }

    /// Set one flag. No-op (returns false) when already set — flags are
    /// monotonic and never transition back.
    pub fn mark(&self, room: RoomId, local_id: LocalId, flag: Flag) -> bool {
        let mut st = self.state.lock().expect("store lock");
        let Some(r) = st.rooms.get_mut(&room.0) else {
            return false;
        };
        let Some(m) = r.messages.iter_mut().find(|m| m.local_id == local_id) else {
            return false;
        };
        let changed = m.flags.set(flag);
        if changed {
            self.persist(&st);
        }
        changed
    }

    /// Messages pending dispatch: `seen=0 and delivered_to_channel=0`,
    /// oldest first so the channel shows the conversation chronologically.
    pub fn unseen_undelivered(&self, room: RoomId) -> Vec<Message> {
        let st = self.state.lock().expect("store lock");
        let Some(r) = st.rooms.get(&room.0) else {
            return Vec::new();
        };
        let mut out: Vec<Message> = r
            .messages
            .iter()
            .filter(|m| {
                !m.flags.contains(Flag::Seen) && !m.flags.contains(Flag::DeliveredToChannel)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.local_id.cmp(&b.local_id))
        });
        out
    }

    // ===== Account operations =====

    /// Register an account. Idempotent by login id (duplicates ignored).
    pub fn add_account(&self, account: Account) {
        let mut st = self.state.lock().expect("store lock");
        if st.accounts.iter().any(|a| a.login_id == account.login_id) {
            return;
        }
        st.accounts.push(account);
        self.persist(&st);
    }

    pub fn account_exists(&self, login_id: &str) -> bool {
        self.state
            .lock()
            .expect("store lock")
            .accounts
            .iter()
            .any(|a| a.login_id == login_id)
    }

    pub fn account(&self, login_id: &str) -> Option<Account> {
        self.state
            .lock()
            .expect("store lock")
            .accounts
            .iter()
            .find(|a| a.login_id == login_id)
            .cloned()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.state.lock().expect("store lock").accounts.clone()
    }

    pub fn account_by_admin(&self, admin: PartyId) -> Option<Account> {
        self.state
            .lock()
            .expect("store lock")
            .accounts
            .iter()
            .find(|a| a.admin_id == Some(admin))
            .cloned()
    }

    pub fn update_session_token(&self, login_id: &str, token: &str) {
        let mut st = self.state.lock().expect("store lock");
        if let Some(a) = st.accounts.iter_mut().find(|a| a.login_id == login_id) {
            a.session_token = token.to_string();
            self.persist(&st);
        }
    }

    pub fn set_admin_id(&self, login_id: &str, admin: PartyId) {
        let mut st = self.state.lock().expect("store lock");
        if let Some(a) = st.accounts.iter_mut().find(|a| a.login_id == login_id) {
            if a.admin_id != Some(admin) {
                a.admin_id = Some(admin);
                self.persist(&st);
            }
        }
    }

    // ===== Persistence =====

    fn persist(&self, state: &StoreState) {
        let Some(path) = &self.path else {
            return;
        };
        let json = match serde_json::to_string(state) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("store snapshot serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(path, json) {
            tracing::warn!("store snapshot write failed: {e}");
        }
    }
}
