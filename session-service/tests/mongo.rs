//! Runs against a real cluster: `MONGODB_URI=... cargo test -- --ignored`
use mongodb::bson::{DateTime, oid::ObjectId};
use schema::{AssessmentKind, EventKind, ExamSession, ExamSessionEvent, SignalRole};
use serde_json::json;
use session_service::store::{MongoStore, SessionFilter, SessionStore};

#[tokio::test]
#[ignore = "needs MONGODB_URI"]
async fn mongo_store_round_trip() {
    let mongo_uri = std::env::var("MONGODB_URI").unwrap();
    let client = schema::db::client(&mongo_uri).await.unwrap();
    let db = client.database(&format!("proctor-test-{}", ObjectId::new().to_hex()));
    let store = MongoStore::new(&db);

    let session = ExamSession::new(
        ObjectId::new(),
        AssessmentKind::Exam,
        ObjectId::new(),
        DateTime::now(),
    );
    store.insert_session(&session).await.unwrap();
    let found = store
        .find_sessions(&SessionFilter::for_attempt(session.assessment_id, session.user_id))
        .await
        .unwrap();
    assert_eq!(found, vec![session.clone()]);

    let kind = SignalRole::Offer.event_kind();
    let at = DateTime::now();
    for n in 0..2 {
        let event = ExamSessionEvent::new(session.id, kind.clone(), Some(json!({ "signal": n })), at);
        store.insert_event(&event).await.unwrap();
    }
    let latest = store.latest_event(session.id, &kind).await.unwrap().unwrap();
    assert_eq!(latest.signal(), Some(&json!(1)));
    assert!(
        store
            .latest_event(session.id, &EventKind::KickedOut)
            .await
            .unwrap()
            .is_none()
    );

    let mut stale = session.clone();
    stale.version = 1;
    assert!(!store.replace_session(&stale, Some(7)).await.unwrap());
    assert!(store.replace_session(&stale, Some(0)).await.unwrap());

    stale.completed = true;
    store.replace_session(&stale, None).await.unwrap();
    let eligible = store
        .find_sweep_eligible(&Default::default(), DateTime::now())
        .await
        .unwrap();
    assert_eq!(eligible, vec![session.id]);

    assert_eq!(store.delete_events(&eligible).await.unwrap(), 2);
    assert_eq!(store.delete_sessions(&eligible).await.unwrap(), 1);

    db.drop().await.unwrap();
}
