//! Shared mock collaborators for unit tests.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use std::sync::Arc;

use crate::{
    domain::{ChannelMessageId, PartyId, RoomId, UpdateCursor},
    ports::{
        ChannelCredentials, ChannelFactory, ChannelPort, InboundItem, MessagePayload,
        SourceInbox, SourcePort,
    },
    Error, Result,
};

/// Scripted source collaborator: queued responses, recorded pushes.
#[derive(Default)]
pub struct MockSource {
    pub inbox_script: Mutex<VecDeque<Result<SourceInbox>>>,
    pub auth_script: Mutex<VecDeque<Result<String>>>,
    pub pushed: Mutex<Vec<(RoomId, PartyId, String)>>,
    pub fail_push: AtomicBool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbox(&self, inbox: Result<SourceInbox>) {
        self.inbox_script.lock().unwrap().push_back(inbox);
    }

    pub fn push_auth(&self, auth: Result<String>) {
        self.auth_script.lock().unwrap().push_back(auth);
    }

    pub fn payload(room: i64, sender: i64, admin: i64, text: &str) -> MessagePayload {
        MessagePayload {
            source_id: 0,
            room_id: RoomId(room),
            sender: PartyId(sender),
            admin: PartyId(admin),
            text: text.to_string(),
        }
    }
}

#[async_trait]
impl SourcePort for MockSource {
    async fn authenticate(&self, _login_id: &str, _secret: &str) -> Result<String> {
        self.auth_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::AuthFailure("no scripted auth".to_string())))
    }

    async fn fetch_latest(&self, _session_token: &str) -> Result<SourceInbox> {
        self.inbox_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(SourceInbox {
                    total_unread: 0,
                    latest: None,
                })
            })
    }

    async fn push_reply(
        &self,
        session_token: &str,
        room: RoomId,
        counterparty: PartyId,
        text: &str,
    ) -> Result<()> {
        if session_token.is_empty() {
            return Err(Error::AuthFailure("empty session token".to_string()));
        }
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(Error::External("push failed".to_string()));
        }
        self.pushed
            .lock()
            .unwrap()
            .push((room, counterparty, text.to_string()));
        Ok(())
    }
}

/// Scripted channel collaborator: records sends, serves queued inbound items.
pub struct MockChannel {
    pub verify_ok: AtomicBool,
    pub fail_sends: AtomicBool,
    pub sent: Mutex<Vec<(i64, String)>>,
    pub inbound: Mutex<Vec<InboundItem>>,
    pub send_delay: Option<Duration>,
    pub listener_registered: AtomicBool,
    pub shutdowns: Mutex<u32>,
    next_id: Mutex<i64>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            verify_ok: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(Vec::new()),
            send_delay: None,
            listener_registered: AtomicBool::new(false),
            shutdowns: Mutex::new(0),
            next_id: Mutex::new(0),
        }
    }
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_delay(delay: Duration) -> Self {
        Self {
            send_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn queue_inbound(&self, item: InboundItem) {
        self.inbound.lock().unwrap().push(item);
    }

    pub fn reply_item(id: i64, text: &str, reply_to_text: Option<&str>) -> InboundItem {
        InboundItem {
            id: UpdateCursor(id),
            sender: "operator".to_string(),
            text: text.to_string(),
            timestamp: 0,
            reply_to_text: reply_to_text.map(|s| s.to_string()),
        }
    }
}

#[async_trait]
impl ChannelPort for MockChannel {
    async fn verify(&self) -> Result<bool> {
        Ok(self.verify_ok.load(Ordering::SeqCst))
    }

    async fn send(&self, destination: i64, text: &str) -> Result<ChannelMessageId> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::ChannelUnavailable("send failed".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((destination, text.to_string()));
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(ChannelMessageId(*id))
    }

    async fn poll_since(&self, cursor: UpdateCursor) -> Result<Vec<InboundItem>> {
        Ok(self
            .inbound
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.id > cursor)
            .cloned()
            .collect())
    }

    async fn register_reply_listener(&self, _destination: i64) -> Result<()> {
        self.listener_registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        *self.shutdowns.lock().unwrap() += 1;
    }
}

/// Factory handing out fresh `MockChannel`s and keeping handles to every
/// client it built, so tests can inspect retired instances.
pub struct MockChannelFactory {
    pub clients: Mutex<Vec<Arc<MockChannel>>>,
    pub verify_ok: AtomicBool,
}

impl MockChannelFactory {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            verify_ok: AtomicBool::new(true),
        }
    }
}

impl ChannelFactory for MockChannelFactory {
    fn build(&self, _creds: &ChannelCredentials) -> Arc<dyn ChannelPort> {
        let client = Arc::new(MockChannel::new());
        client
            .verify_ok
            .store(self.verify_ok.load(Ordering::SeqCst), Ordering::SeqCst);
        self.clients.lock().unwrap().push(client.clone());
        client
    }
}
