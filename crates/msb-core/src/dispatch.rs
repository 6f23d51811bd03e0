//! Notification dispatcher: forwards unseen, undelivered messages to the
//! channel, at most once per message.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    domain::RoomId,
    ports::ChannelPort,
    store::{Flag, Message, SyncStore},
    token::CorrelationToken,
};

/// Per-room exclusion locks. A room's pending set is serialized so two
/// overlapping `dispatch_all` calls can never send the same message twice.
#[derive(Default)]
pub struct RoomLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl RoomLocks {
    pub async fn lock_room(&self, room: RoomId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(room.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Dispatcher {
    store: Arc<SyncStore>,
    locks: RoomLocks,
}

impl Dispatcher {
    pub fn new(store: Arc<SyncStore>) -> Self {
        Self {
            store,
            locks: RoomLocks::default(),
        }
    }

    /// Push every pending message in every room through the channel,
    /// oldest first. Returns how many sends succeeded. Failures leave the
    /// message pending for the next tick.
    pub async fn dispatch_all(&self, channel: &Arc<dyn ChannelPort>, destination: i64) -> usize {
        let mut sent = 0usize;
        for room in self.store.room_ids() {
            sent += self.dispatch_room(channel, destination, room).await;
        }
        if sent > 0 {
            tracing::info!("[dispatch] forwarded {sent} message(s) to the channel");
        }
        sent
    }

    async fn dispatch_room(
        &self,
        channel: &Arc<dyn ChannelPort>,
        destination: i64,
        room: RoomId,
    ) -> usize {
        let _guard = self.locks.lock_room(room).await;

        // Recompute inside the lock: a concurrent call may have delivered
        // some of these while we waited.
        let pending = self.store.unseen_undelivered(room);
        let total = pending.len();

        let mut sent = 0usize;
        for (idx, message) in pending.iter().enumerate() {
            let text = render_notification(message, idx + 1, total);
            match channel.send(destination, &text).await {
                Ok(_) => {
                    self.store
                        .mark(room, message.local_id, Flag::DeliveredToChannel);
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "[dispatch] send failed for room {room} message {}: {e}",
                        message.local_id
                    );
                    // Leave the rest of the room pending; ordering matters.
                    break;
                }
            }
        }
        sent
    }
}

/// Notification body. The first line carries the correlation token so a
/// channel-side reply can be mapped back to (room, local id).
fn render_notification(message: &Message, position: usize, total: usize) -> String {
    let token = CorrelationToken::new(message.room_id, message.local_id);
    format!(
        "New message {} ({position}/{total})\nFrom client {}\n\n{}",
        token.render(),
        message.sender.0,
        message.text
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::PartyId;
    use crate::store::{MessageFlags, NewMessage};
    use crate::testutil::MockChannel;

    fn store_with_pending(room: i64, texts: &[&str]) -> Arc<SyncStore> {
        let store = Arc::new(SyncStore::in_memory());
        for (i, text) in texts.iter().enumerate() {
            store.append(
                RoomId(room),
                NewMessage {
                    source_id: 0,
                    sender: PartyId(555),
                    counterparty: PartyId(555),
                    admin: PartyId(77),
                    text: text.to_string(),
                    fingerprint: i as u64 + 1,
                    flags: MessageFlags::default(),
                },
            );
        }
        store
    }

    #[tokio::test]
    async fn sends_pending_and_marks_delivered() {
        let store = store_with_pending(9, &["one", "two"]);
        let dispatcher = Dispatcher::new(store.clone());
        let channel: Arc<dyn ChannelPort> = Arc::new(MockChannel::new());

        let sent = dispatcher.dispatch_all(&channel, 42).await;
        assert_eq!(sent, 2);
        assert!(store.unseen_undelivered(RoomId(9)).is_empty());

        // Already delivered: second pass sends nothing.
        assert_eq!(dispatcher.dispatch_all(&channel, 42).await, 0);
    }

    #[tokio::test]
    async fn notification_embeds_recoverable_token() {
        let store = store_with_pending(9, &["hello"]);
        let dispatcher = Dispatcher::new(store.clone());
        let mock = Arc::new(MockChannel::new());
        let channel: Arc<dyn ChannelPort> = mock.clone();

        dispatcher.dispatch_all(&channel, 42).await;

        let sent = mock.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (dest, text) = &sent[0];
        assert_eq!(*dest, 42);
        let token = CorrelationToken::parse(text).unwrap();
        assert_eq!(token.room, RoomId(9));
        assert!(text.contains("hello"));
    }

    #[tokio::test]
    async fn send_failure_leaves_message_pending() {
        let store = store_with_pending(9, &["hello"]);
        let dispatcher = Dispatcher::new(store.clone());
        let mock = Arc::new(MockChannel::new());
        mock.fail_sends.store(true, std::sync::atomic::Ordering::SeqCst);
        let channel: Arc<dyn ChannelPort> = mock.clone();

        assert_eq!(dispatcher.dispatch_all(&channel, 42).await, 0);
        assert_eq!(store.unseen_undelivered(RoomId(9)).len(), 1);

        // Channel recovers: the message goes out on the next tick.
        mock.fail_sends.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(dispatcher.dispatch_all(&channel, 42).await, 1);
    }

    #[tokio::test]
    async fn concurrent_dispatch_is_at_most_once() {
        let store = store_with_pending(9, &["one", "two", "three"]);
        let dispatcher = Arc::new(Dispatcher::new(store.clone()));
        let mock = Arc::new(MockChannel::with_send_delay(Duration::from_millis(10)));
        let channel: Arc<dyn ChannelPort> = mock.clone();

        let a = {
            let d = dispatcher.clone();
            let ch = channel.clone();
            tokio::spawn(async move { d.dispatch_all(&ch, 42).await })
        };
        let b = {
            let d = dispatcher.clone();
            let ch = channel.clone();
            tokio::spawn(async move { d.dispatch_all(&ch, 42).await })
        };

        let total = a.await.unwrap() + b.await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(mock.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn oldest_pending_goes_first() {
        let store = store_with_pending(9, &["first", "second"]);
        let dispatcher = Dispatcher::new(store.clone());
        let mock = Arc::new(MockChannel::new());
        let channel: Arc<dyn ChannelPort> = mock.clone();

        dispatcher.dispatch_all(&channel, 42).await;

        let sent = mock.sent.lock().unwrap();
        assert!(sent[0].1.contains("first"));
        assert!(sent[1].1.contains("second"));
    }
}
