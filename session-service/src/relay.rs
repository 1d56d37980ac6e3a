//! Store-and-forward mailbox for the WebRTC handshake.
//!
//! Each (session, role) pair holds the most recent payload. Readers either
//! poll it or wait for a newer one than the event id they already applied.
use std::time::Duration;

use mongodb::bson::oid::ObjectId;
use schema::{
    SignalRole,
    view::{SessionNotification, SignalView},
};
use serde_json::{Value, json};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, instrument};

use crate::{error::Error, hub::Subscription, manager::SessionManager, store::SessionStore};

fn is_empty_payload(signal: &Value) -> bool {
    match signal {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

impl<S: SessionStore> SessionManager<S> {
    #[instrument(skip(self, signal), err(Debug))]
    pub async fn publish_signal(
        &self,
        session_id: ObjectId,
        role: SignalRole,
        signal: Value,
    ) -> Result<SignalView, Error> {
        if is_empty_payload(&signal) {
            return Err(Error::BadRequest("signal payload is empty".to_string()));
        }
        let event = self
            .append_event(session_id, role.event_kind(), Some(json!({ "signal": signal })))
            .await?;
        debug!(event = %event.id, "published signal");
        Ok(SignalView::from_event(role, &event))
    }

    /// Most recent payload of `role`, or an empty view when none was published.
    pub async fn poll_signal(
        &self,
        session_id: ObjectId,
        role: SignalRole,
    ) -> Result<SignalView, Error> {
        self.load(session_id).await?;
        let latest = self
            .store()
            .latest_event(session_id, &role.event_kind())
            .await?;
        Ok(match latest {
            Some(event) => SignalView::from_event(role, &event),
            None => SignalView::empty(session_id.to_hex(), role),
        })
    }

    /// Returns as soon as a payload newer than `since` exists, or the current
    /// (possibly empty) view once `wait` elapses.
    #[instrument(skip(self), err(Debug))]
    pub async fn wait_signal(
        &self,
        session_id: ObjectId,
        role: SignalRole,
        since: Option<ObjectId>,
        wait: Duration,
    ) -> Result<SignalView, Error> {
        self.load(session_id).await?;
        let mut subscription = self.hub().scoped(session_id);
        self.wait_for_newer(&mut subscription, session_id, role, since, Instant::now() + wait)
            .await
    }

    async fn wait_for_newer(
        &self,
        rx: &mut Subscription<'_>,
        session_id: ObjectId,
        role: SignalRole,
        since: Option<ObjectId>,
        deadline: Instant,
    ) -> Result<SignalView, Error> {
        let since = since.map(|id| id.to_hex());
        loop {
            let current = self.poll_signal(session_id, role).await?;
            let newer = match (&current.event_id, &since) {
                (Some(id), Some(since)) => id != since,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if newer {
                return Ok(current);
            }

            let published = async {
                loop {
                    match rx.recv().await {
                        Ok(SessionNotification::Signal { role: r, .. }) if r == role => {
                            return Ok(());
                        }
                        Ok(SessionNotification::Deleted) | Err(broadcast::error::RecvError::Closed) => {
                            return Err(Error::session_not_found(session_id));
                        }
                        Ok(_) => {}
                        // Missed notifications, re-read the store
                        Err(broadcast::error::RecvError::Lagged(_)) => return Ok(()),
                    }
                }
            };
            match tokio::time::timeout_at(deadline, published).await {
                Err(_elapsed) => return Ok(current),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(())) => {}
            }
        }
    }
}
