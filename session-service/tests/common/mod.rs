#![allow(dead_code)]
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use mongodb::bson::oid::ObjectId;
use schema::{Assessment, AssessmentKind, Question, UserRole};
use serde_json::Value;
use session_service::{
    auth::{Caller, USER_ID_HEADER, USER_ROLE_HEADER},
    config::{AppState, EnvVars},
    manager::SessionManager,
    store::MemoryStore,
};
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub manager: Arc<SessionManager<MemoryStore>>,
    pub assessment: Assessment,
}

pub fn caller(role: UserRole) -> Caller {
    Caller {
        user_id: ObjectId::new(),
        role,
    }
}

/// Two-question exam; option 1 is correct for `q1`, option 0 for `q2`.
pub fn exam(instructor_id: ObjectId) -> Assessment {
    let question = |id: &str, correct_option| Question {
        id: id.to_string(),
        prompt: format!("question {id}"),
        options: vec!["first".to_string(), "second".to_string()],
        correct_option,
    };
    Assessment {
        id: ObjectId::new(),
        kind: AssessmentKind::Exam,
        title: "Rust fundamentals".to_string(),
        instructor_id,
        requires_proctoring: true,
        questions: vec![question("q1", 1), question("q2", 0)],
    }
}

pub async fn test_app_with(env_vars: EnvVars, instructor: &Caller) -> TestApp {
    let store = MemoryStore::new();
    let assessment = exam(instructor.user_id);
    store.insert_assessment(assessment.clone()).await;
    let manager = Arc::new(SessionManager::new(store.clone(), &env_vars));
    let router = session_service::app(AppState {
        manager: Arc::clone(&manager),
        env_vars,
    });
    TestApp {
        router,
        store,
        manager,
        assessment,
    }
}

pub async fn test_app(instructor: &Caller) -> TestApp {
    test_app_with(EnvVars::default(), instructor).await
}

impl TestApp {
    /// Sends one request and returns the status and the JSON body (`Null` when empty).
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&Caller>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder
                .header(USER_ID_HEADER, caller.user_id.to_hex())
                .header(USER_ROLE_HEADER, caller.role.as_str());
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Creates a session for `student` and returns its id.
    pub async fn create_session(&self, student: &Caller) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/sessions",
                Some(student),
                Some(serde_json::json!({ "assessmentId": self.assessment.id.to_hex() })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}
