mod common;

use std::time::Duration;

use mongodb::bson::oid::ObjectId;
use proctor_agent::{
    AgentError, MonitorDevices, MonitorExit, MonitorPhase, ProctorClient, StudentMonitor,
    media::Visibility,
    testing::{ScriptedCamera, ScriptedDetector, ScriptedPeers},
};
use proctor_utils::violation::StrikeCounting;
use schema::{Answers, EventKind, UserRole};
use tokio::sync::mpsc;

use common::{
    WAIT, count, events_reach, fast_config, monitor_reaches, spawn_server, spawn_student,
    spawn_student_as, spawn_student_with,
};

fn correct_answers() -> Answers {
    Answers::from([("q1".to_string(), 1), ("q2".to_string(), 0)])
}

async fn activate(server: &common::TestServer, session_id: &str) {
    let id = ObjectId::parse_str(session_id).unwrap();
    server.manager.set_active(id, true, None).await.unwrap();
}

#[tokio::test]
async fn third_tab_switch_removes_student_once() {
    let server = spawn_server(true).await;
    let student = spawn_student(&server, ScriptedCamera::working());
    let mut status = student.handle.status();

    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    let session_id = waiting.session_id.unwrap();
    activate(&server, &session_id).await;
    monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active && s.camera_on).await;

    for _ in 0..3 {
        student.visibility.send(Visibility::Hidden).await.unwrap();
    }
    let removed = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Removed).await;
    assert_eq!(removed.strikes, 3);

    let kinds = common::event_kinds(&server, &session_id).await;
    assert_eq!(count(&kinds, &EventKind::TabSwitch), 3);
    assert_eq!(count(&kinds, &EventKind::KickedOut), 1);
    assert_eq!(kinds[0], EventKind::KickedOut);

    assert!(matches!(
        student.handle.submit(correct_answers()).await,
        Err(AgentError::Removed)
    ));
    let session = server
        .manager
        .get(ObjectId::parse_str(&session_id).unwrap())
        .await
        .unwrap();
    assert!(!session.completed);

    assert_eq!(student.handle.join().await.unwrap(), MonitorExit::Removed);
    assert!(student.camera.all_stopped());
    assert!(student.peers.record(0).closed);
}

#[tokio::test]
async fn two_violations_leave_the_student_in_the_exam() {
    let server = spawn_server(true).await;
    let student = spawn_student(&server, ScriptedCamera::working());
    let mut status = student.handle.status();

    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    let session_id = waiting.session_id.unwrap();
    activate(&server, &session_id).await;
    monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active).await;

    student.visibility.send(Visibility::Hidden).await.unwrap();
    monitor_reaches(&mut status, |s| s.strikes == 1 && s.obscured).await;
    monitor_reaches(&mut status, |s| !s.obscured).await;
    student.visibility.send(Visibility::Hidden).await.unwrap();
    monitor_reaches(&mut status, |s| s.strikes == 2).await;

    let kinds = events_reach(&server, &session_id, |k| {
        count(k, &EventKind::TabSwitch) == 2
    })
    .await;
    assert_eq!(count(&kinds, &EventKind::KickedOut), 0);

    let result = student.handle.submit(correct_answers()).await.unwrap();
    assert_eq!(result.score, 100.0);
    assert_eq!(result.correct_answers, 2);
    assert_eq!(
        student.handle.join().await.unwrap(),
        MonitorExit::Submitted(result)
    );
    assert!(student.camera.all_stopped());
}

#[tokio::test]
async fn missing_face_counts_as_violation() {
    let server = spawn_server(true).await;
    let student = spawn_student(&server, ScriptedCamera::working());
    let mut status = student.handle.status();

    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    let session_id = waiting.session_id.unwrap();
    activate(&server, &session_id).await;
    monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active && s.camera_on).await;

    student.detector.set_faces(0);
    monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Removed).await;

    let kinds = common::event_kinds(&server, &session_id).await;
    assert_eq!(count(&kinds, &EventKind::FaceLost), 3);
    assert_eq!(count(&kinds, &EventKind::KickedOut), 1);
    assert_eq!(count(&kinds, &EventKind::VideoStreamStarted), 1);
}

#[tokio::test]
async fn camera_failure_is_logged_and_exam_continues() {
    let server = spawn_server(true).await;
    let student = spawn_student(&server, ScriptedCamera::denied());
    let mut status = student.handle.status();

    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    let session_id = waiting.session_id.unwrap();
    activate(&server, &session_id).await;

    let kinds = events_reach(&server, &session_id, |k| {
        k.contains(&EventKind::WebcamAccessFailed)
    })
    .await;
    assert!(!kinds.contains(&EventKind::VideoStreamStarted));
    let active = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active).await;
    assert!(!active.camera_on);
    assert_eq!(student.peers.created(), 0);

    // Tab switches are still watched without a camera
    student.visibility.send(Visibility::Hidden).await.unwrap();
    monitor_reaches(&mut status, |s| s.strikes == 1).await;

    student.handle.stop().await;
    assert_eq!(student.handle.join().await.unwrap(), MonitorExit::Stopped);
}

#[tokio::test]
async fn unproctored_assessment_skips_monitoring() {
    let server = spawn_server(false).await;
    let student = spawn_student(&server, ScriptedCamera::working());
    let mut status = student.handle.status();

    let active = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active).await;
    let session_id = active.session_id.unwrap();
    assert!(!active.camera_on);

    // Not counted when nobody proctors the assessment
    student.visibility.send(Visibility::Hidden).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status.borrow().strikes, 0);

    let result = student.handle.submit(correct_answers()).await.unwrap();
    assert_eq!(result.total_questions, 2);
    assert_eq!(student.camera.open_count(), 0);
    assert_eq!(student.peers.created(), 0);
    assert!(common::event_kinds(&server, &session_id).await.is_empty());
}

#[tokio::test]
async fn resumes_unfinished_session() {
    let server = spawn_server(true).await;
    let user_id = ObjectId::new();
    let existing = server
        .client(user_id, UserRole::Student)
        .create_session(&server.assessment_id())
        .await
        .unwrap();

    let student = spawn_student_as(&server, user_id, ScriptedCamera::working());
    let mut status = student.handle.status();
    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    assert_eq!(waiting.session_id.as_deref(), Some(existing.id.as_str()));
    assert_eq!(server.store.session_count().await, 1);

    assert!(matches!(
        student.handle.submit(correct_answers()).await,
        Err(AgentError::NotActive)
    ));
    student.handle.stop().await;
    assert_eq!(student.handle.join().await.unwrap(), MonitorExit::Stopped);
}

#[tokio::test]
async fn deleted_session_ends_the_monitor() {
    let server = spawn_server(true).await;
    let student = spawn_student(&server, ScriptedCamera::working());
    let mut status = student.handle.status();

    let waiting = monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Waiting).await;
    let id = ObjectId::parse_str(waiting.session_id.as_deref().unwrap()).unwrap();
    server.manager.delete(id).await.unwrap();

    let exit = tokio::time::timeout(WAIT, student.handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, MonitorExit::Ended);
    assert!(status.borrow().phase.is_terminal());
}

#[tokio::test]
async fn unreachable_service_reports_connection_lost() {
    let client = ProctorClient::new(
        "http://127.0.0.1:9",
        ObjectId::new().to_hex(),
        UserRole::Student,
    )
    .unwrap();
    let (_visibility, visibility_rx) = mpsc::channel(1);
    let devices = MonitorDevices {
        camera: ScriptedCamera::working(),
        detector: ScriptedDetector::new(),
        peers: ScriptedPeers::new("student"),
        visibility: visibility_rx,
    };
    let handle = StudentMonitor::new(client, ObjectId::new().to_hex(), fast_config(), devices)
        .spawn();
    let mut status = handle.status();

    let lost = monitor_reaches(&mut status, |s| s.connection_lost).await;
    assert_eq!(lost.phase, MonitorPhase::Joining);

    handle.stop().await;
    assert_eq!(handle.join().await.unwrap(), MonitorExit::Stopped);
}

/// Session of `user_id` with proctoring already active and `history` logged.
async fn session_with_history(
    server: &common::TestServer,
    user_id: ObjectId,
    history: &[EventKind],
) -> String {
    let client = server.client(user_id, UserRole::Student);
    let session = client
        .create_session(&server.assessment_id())
        .await
        .unwrap();
    activate(server, &session.id).await;
    for kind in history {
        client.log_event(&session.id, kind.clone(), None).await.unwrap();
    }
    session.id
}

#[tokio::test]
async fn persisted_violations_count_after_reload() {
    let server = spawn_server(true).await;
    let user_id = ObjectId::new();
    let session_id = session_with_history(
        &server,
        user_id,
        &[EventKind::TabSwitch, EventKind::FaceLost],
    )
    .await;

    let mut config = fast_config();
    config.violations.counting = StrikeCounting::PersistedLog;
    let student = spawn_student_with(&server, user_id, ScriptedCamera::working(), config);
    let mut status = student.handle.status();
    let active = monitor_reaches(&mut status, |s| {
        s.phase == MonitorPhase::Active && s.camera_on
    })
    .await;
    assert_eq!(active.session_id.as_deref(), Some(session_id.as_str()));
    assert_eq!(active.strikes, 2);

    student.visibility.send(Visibility::Hidden).await.unwrap();
    assert_eq!(student.handle.join().await.unwrap(), MonitorExit::Removed);

    let kinds = common::event_kinds(&server, &session_id).await;
    assert_eq!(count(&kinds, &EventKind::KickedOut), 1);
    assert_eq!(count(&kinds, &EventKind::TabSwitch), 2);
}

#[tokio::test]
async fn reload_without_persisted_counting_starts_from_zero() {
    let server = spawn_server(true).await;
    let user_id = ObjectId::new();
    session_with_history(&server, user_id, &[EventKind::TabSwitch, EventKind::TabSwitch]).await;

    let student = spawn_student_as(&server, user_id, ScriptedCamera::working());
    let mut status = student.handle.status();
    monitor_reaches(&mut status, |s| s.phase == MonitorPhase::Active && s.camera_on).await;

    student.visibility.send(Visibility::Hidden).await.unwrap();
    let warned = monitor_reaches(&mut status, |s| s.strikes == 1).await;
    assert_eq!(warned.phase, MonitorPhase::Active);

    student.handle.stop().await;
    assert_eq!(student.handle.join().await.unwrap(), MonitorExit::Stopped);
}

#[tokio::test]
async fn removed_student_stays_removed_after_reload() {
    let server = spawn_server(true).await;
    let user_id = ObjectId::new();
    let session_id = session_with_history(&server, user_id, &[EventKind::KickedOut]).await;

    let student = spawn_student_as(&server, user_id, ScriptedCamera::working());
    let exit = tokio::time::timeout(WAIT, student.handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, MonitorExit::Removed);

    let kinds = common::event_kinds(&server, &session_id).await;
    assert_eq!(kinds, vec![EventKind::KickedOut]);
    assert_eq!(student.camera.open_count(), 0);
    assert_eq!(student.peers.created(), 0);
}
