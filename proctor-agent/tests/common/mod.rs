#![allow(dead_code)]
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
};

use mongodb::bson::oid::ObjectId;
use proctor_agent::{
    AgentConfig, MonitorDevices, MonitorHandle, ProctorClient, StudentMonitor,
    media::Visibility,
    monitor::MonitorStatus,
    testing::{ScriptedCamera, ScriptedDetector, ScriptedPeers},
};
use proctor_utils::backoff::BackoffConfig;
use schema::{Assessment, AssessmentKind, EventKind, Question, UserRole};
use session_service::{
    config::{AppState, EnvVars},
    manager::SessionManager,
    store::MemoryStore,
};
use tokio::sync::{mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestServer {
    pub base_url: String,
    pub store: MemoryStore,
    pub manager: Arc<SessionManager<MemoryStore>>,
    pub assessment: Assessment,
    pub instructor_id: ObjectId,
    /// PATCH requests received, including the ones refused
    pub patches: Arc<AtomicUsize>,
}

/// Serves the session service on an ephemeral local port.
pub async fn spawn_server(requires_proctoring: bool) -> TestServer {
    spawn_flaky_server(requires_proctoring, &[]).await
}

/// Like [`spawn_server`], but answers the listed PATCH requests (counted from 1)
/// with 503 before they reach the service.
pub async fn spawn_flaky_server(
    requires_proctoring: bool,
    failing_patches: &'static [usize],
) -> TestServer {
    let instructor_id = ObjectId::new();
    let assessment = Assessment {
        id: ObjectId::new(),
        kind: AssessmentKind::Exam,
        title: "Ownership and borrowing".to_string(),
        instructor_id,
        requires_proctoring,
        questions: vec![
            Question {
                id: "q1".to_string(),
                prompt: "Who owns a moved value?".to_string(),
                options: vec!["the caller".to_string(), "the callee".to_string()],
                correct_option: 1,
            },
            Question {
                id: "q2".to_string(),
                prompt: "Can two &mut borrows overlap?".to_string(),
                options: vec!["no".to_string(), "yes".to_string()],
                correct_option: 0,
            },
        ],
    };

    let store = MemoryStore::new();
    store.insert_assessment(assessment.clone()).await;
    let env_vars = EnvVars::default();
    let manager = Arc::new(SessionManager::new(store.clone(), &env_vars));
    let patches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&patches);
    let router = session_service::app(AppState {
        manager: Arc::clone(&manager),
        env_vars,
    })
    .layer(middleware::from_fn(move |request: Request, next: Next| {
        let counter = Arc::clone(&counter);
        async move {
            if request.method() == Method::PATCH {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if failing_patches.contains(&n) {
                    return StatusCode::SERVICE_UNAVAILABLE.into_response();
                }
            }
            next.run(request).await
        }
    }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        store,
        manager,
        assessment,
        instructor_id,
        patches,
    }
}

impl TestServer {
    pub fn client(&self, user_id: ObjectId, role: UserRole) -> ProctorClient {
        ProctorClient::new(&self.base_url, user_id.to_hex(), role).unwrap()
    }

    pub fn instructor(&self) -> ProctorClient {
        self.client(self.instructor_id, UserRole::Instructor)
    }

    pub fn assessment_id(&self) -> String {
        self.assessment.id.to_hex()
    }
}

/// Millisecond timings so scenarios finish quickly.
pub fn fast_config() -> AgentConfig {
    let mut config = AgentConfig {
        status_poll_interval: Duration::from_millis(25),
        face_check_interval: Duration::from_millis(25),
        offer_poll_interval: Duration::from_millis(40),
        answer_poll_interval: Duration::from_millis(40),
        ice_poll_interval: Duration::from_millis(25),
        signal_wait: Duration::from_millis(500),
        end_grace_delay: Duration::from_millis(50),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: 0.0,
            failure_threshold: 3,
        },
        ..Default::default()
    };
    config.violations.cooldown = Duration::from_millis(250);
    config
}

pub struct Student {
    pub handle: MonitorHandle,
    pub visibility: mpsc::Sender<Visibility>,
    pub camera: ScriptedCamera,
    pub detector: ScriptedDetector,
    pub peers: ScriptedPeers,
    pub client: ProctorClient,
}

pub fn spawn_student(server: &TestServer, camera: ScriptedCamera) -> Student {
    spawn_student_as(server, ObjectId::new(), camera)
}

pub fn spawn_student_as(server: &TestServer, user_id: ObjectId, camera: ScriptedCamera) -> Student {
    spawn_student_with(server, user_id, camera, fast_config())
}

pub fn spawn_student_with(
    server: &TestServer,
    user_id: ObjectId,
    camera: ScriptedCamera,
    config: AgentConfig,
) -> Student {
    let client = server.client(user_id, UserRole::Student);
    let detector = ScriptedDetector::new();
    let peers = ScriptedPeers::new("student");
    let (visibility, visibility_rx) = mpsc::channel(8);
    let devices = MonitorDevices {
        camera: camera.clone(),
        detector: detector.clone(),
        peers: peers.clone(),
        visibility: visibility_rx,
    };
    let handle =
        StudentMonitor::new(client.clone(), server.assessment_id(), config, devices).spawn();
    Student {
        handle,
        visibility,
        camera,
        detector,
        peers,
        client,
    }
}

/// Waits until the monitor status satisfies `condition`.
pub async fn monitor_reaches(
    status: &mut watch::Receiver<MonitorStatus>,
    condition: impl FnMut(&MonitorStatus) -> bool,
) -> MonitorStatus {
    tokio::time::timeout(WAIT, status.wait_for(condition))
        .await
        .expect("monitor did not reach the expected state")
        .expect("monitor status channel closed")
        .clone()
}

/// Polls `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Events of `session_id` as stored by the service, most recent first.
pub async fn event_kinds(server: &TestServer, session_id: &str) -> Vec<EventKind> {
    let id = ObjectId::parse_str(session_id).unwrap();
    server
        .manager
        .events(id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect()
}

/// Waits until the stored events of `session_id` satisfy `condition`.
pub async fn events_reach(
    server: &TestServer,
    session_id: &str,
    mut condition: impl FnMut(&[EventKind]) -> bool,
) -> Vec<EventKind> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let kinds = event_kinds(server, session_id).await;
        if condition(&kinds) {
            return kinds;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "events never matched: {kinds:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn count(kinds: &[EventKind], kind: &EventKind) -> usize {
    kinds.iter().filter(|k| *k == kind).count()
}
