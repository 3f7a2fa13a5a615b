// src/firestore.rs
//
// Firestore over REST. Credentials and the project id come from the metadata
// server of the GCP runtime the service is deployed on.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};

use super::error::HeartbeatError;
use super::heartbeat::DocumentStore;

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const TOKEN_SLACK: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

pub struct FirestoreStore {
    http: reqwest::Client,
    configured_project: Option<String>,
    project: OnceCell<String>,
    token: Mutex<Option<AccessToken>>,
}

impl FirestoreStore {
    /// `project` overrides the metadata server lookup.
    pub fn new(project: Option<String>) -> Result<Self, HeartbeatError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            configured_project: project,
            project: OnceCell::new(),
            token: Mutex::new(None),
        })
    }

    async fn project_id(&self) -> Result<&str, HeartbeatError> {
        let project = self
            .project
            .get_or_try_init(|| async {
                if let Some(project) = &self.configured_project {
                    return Ok::<_, HeartbeatError>(project.clone());
                }
                let id = self
                    .metadata("project/project-id")
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                let id = id.trim().to_string();
                if id.is_empty() {
                    return Err(HeartbeatError::Project("metadata server returned no id".into()));
                }
                tracing::debug!(project = %id, "resolved firestore project");
                Ok(id)
            })
            .await?;
        Ok(project.as_str())
    }

    async fn access_token(&self) -> Result<String, HeartbeatError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }
        let fresh: TokenResponse = self
            .metadata("instance/service-accounts/default/token")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(TOKEN_SLACK);
        let value = fresh.access_token;
        *cached = Some(AccessToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    fn metadata(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{METADATA_BASE}/{path}"))
            .header("Metadata-Flavor", "Google")
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn set_timestamp(
        &self,
        collection: &str,
        document: &str,
        now: DateTime<Utc>,
    ) -> Result<(), HeartbeatError> {
        let url = document_url(self.project_id().await?, collection, document);
        let token = self.access_token().await?;
        // PATCH without an update mask replaces the whole document.
        let resp = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&timestamp_document(now))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HeartbeatError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn document_url(project: &str, collection: &str, document: &str) -> String {
    format!("{FIRESTORE_BASE}/projects/{project}/databases/(default)/documents/{collection}/{document}")
}

fn timestamp_document(now: DateTime<Utc>) -> Value {
    json!({
        "fields": {
            "timestamp": {
                "timestampValue": now.to_rfc3339_opts(SecondsFormat::Micros, true)
            }
        }
    })
}
