use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{manager::SessionManager, store::SessionStore};

/// Runs the cleanup sweep every `interval` until `shutdown` flips or its sender drops.
pub fn spawn_janitor<S: SessionStore>(
    manager: Arc<SessionManager<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "session janitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.sweep().await {
                        Ok(0) => debug!("janitor found nothing to sweep"),
                        Ok(deleted) => info!(deleted, "janitor swept sessions"),
                        Err(e) => warn!(error = ?e, "janitor sweep failed, retrying next tick"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("session janitor shutting down");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{DateTime, oid::ObjectId};
    use schema::{AssessmentKind, ExamSession};

    use super::*;
    use crate::{config::EnvVars, store::MemoryStore};

    #[tokio::test]
    async fn janitor_sweeps_and_stops_on_shutdown() {
        let store = MemoryStore::new();
        let mut done = ExamSession::new(
            ObjectId::new(),
            AssessmentKind::Exam,
            ObjectId::new(),
            DateTime::now(),
        );
        done.completed = true;
        store.insert_session(&done).await.unwrap();

        let manager = Arc::new(SessionManager::new(store.clone(), &EnvVars::default()));
        let (tx, rx) = watch::channel(false);
        let handle = spawn_janitor(manager, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.session_count().await, 0);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
