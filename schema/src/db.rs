use mongodb::{Client, Collection, Database, bson::doc, options::ClientOptions};
use tracing::instrument;

use crate::{
    ASSESSMENT_COLLECTION, Assessment, EVENT_COLLECTION, ExamSession, ExamSessionEvent,
    SESSION_COLLECTION,
};

/// Connects and pings the cluster.
#[instrument(skip_all, err(Debug))]
pub async fn client(uri: &str) -> mongodb::error::Result<Client> {
    let mut client_options = ClientOptions::parse(uri).await?;

    client_options.app_name = Some(env!("CARGO_CRATE_NAME").to_string());

    let client = Client::with_options(client_options)?;

    client
        .database("admin")
        .run_command(doc! {"ping": 1})
        .await?;

    Ok(client)
}

/// Typed handles to the collections the proctoring core reads and writes.
#[derive(Clone, Debug)]
pub struct Collections {
    pub sessions: Collection<ExamSession>,
    pub events: Collection<ExamSessionEvent>,
    pub assessments: Collection<Assessment>,
}

impl Collections {
    pub fn new(db: &Database) -> Self {
        Self {
            sessions: db.collection(SESSION_COLLECTION),
            events: db.collection(EVENT_COLLECTION),
            assessments: db.collection(ASSESSMENT_COLLECTION),
        }
    }
}
