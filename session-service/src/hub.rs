//! Per-session push channels feeding long-polls and WebSocket subscribers.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use mongodb::bson::oid::ObjectId;
use schema::view::SessionNotification;
use tokio::sync::broadcast::{self, error::RecvError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
pub struct Hub {
    channels: Mutex<HashMap<ObjectId, broadcast::Sender<SessionNotification>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, session_id: ObjectId) -> broadcast::Receiver<SessionNotification> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribes for as long as the returned guard lives.
    pub fn scoped(&self, session_id: ObjectId) -> Subscription<'_> {
        Subscription {
            hub: self,
            session_id,
            rx: Some(self.subscribe(session_id)),
        }
    }

    /// Sends to current subscribers. Dropped silently when nobody listens.
    pub fn notify(&self, session_id: ObjectId, notification: SessionNotification) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = channels.get(&session_id) {
            if sender.send(notification).is_err() {
                channels.remove(&session_id);
            }
        }
    }

    /// Drops the channel once its last subscriber is gone.
    pub fn release(&self, session_id: ObjectId) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&session_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&session_id);
        }
    }

    /// Tells subscribers the session is gone and drops its channel.
    pub fn close(&self, session_id: ObjectId) {
        let sender = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
        if let Some(sender) = sender {
            let _ = sender.send(SessionNotification::Deleted);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Hub receiver that releases its session channel when dropped.
pub struct Subscription<'a> {
    hub: &'a Hub,
    session_id: ObjectId,
    rx: Option<broadcast::Receiver<SessionNotification>>,
}

impl Subscription<'_> {
    pub async fn recv(&mut self) -> Result<SessionNotification, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        // The receiver has to be gone before the hub checks for subscribers
        self.rx = None;
        self.hub.release(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use schema::SignalRole;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_notifications_until_close() {
        let hub = Hub::new();
        let id = ObjectId::new();
        let mut rx = hub.subscribe(id);

        hub.notify(
            id,
            SessionNotification::Signal {
                role: SignalRole::Offer,
                event_id: "e1".to_string(),
            },
        );
        hub.close(id);

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionNotification::Signal { .. }
        ));
        assert_eq!(rx.recv().await.unwrap(), SessionNotification::Deleted);
        assert!(rx.recv().await.is_err());
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn notify_without_subscribers_keeps_no_channel() {
        let hub = Hub::new();
        let id = ObjectId::new();
        hub.notify(id, SessionNotification::Deleted);
        assert_eq!(hub.channel_count(), 0);

        drop(hub.subscribe(id));
        hub.notify(id, SessionNotification::Deleted);
        assert_eq!(hub.channel_count(), 0);

        let rx = hub.subscribe(id);
        hub.release(id);
        assert_eq!(hub.channel_count(), 1);
        drop(rx);
        hub.release(id);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn scoped_subscription_releases_on_drop() {
        let hub = Hub::new();
        let id = ObjectId::new();
        let first = hub.scoped(id);
        let second = hub.scoped(id);
        drop(first);
        assert_eq!(hub.channel_count(), 1);
        drop(second);
        assert_eq!(hub.channel_count(), 0);
    }
}
