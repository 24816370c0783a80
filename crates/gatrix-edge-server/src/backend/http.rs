//! Reqwest implementation of [`BackendApi`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use gatrix_edge_core::{ApiTokenRecord, EntityKind, Environment};

use super::{BackendApi, BackendError};

/// Delay before the single retry of a transport-failed GET.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Backend list/detail responses wrap their payload in a `data` field.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a client with a bounded request timeout. Every call this
    /// client makes is capped; the sync engine never blocks unbounded on
    /// the backend.
    pub fn new(
        base_url: &Url,
        application_name: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Application-Name",
            reqwest::header::HeaderValue::from_str(application_name)
                .map_err(|e| BackendError::Transport(e.to_string()))?,
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// GET with one retry on transport errors. HTTP error statuses are
    /// not retried; the sync layer decides what a 5xx means.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, BackendError> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(first) => {
                tracing::debug!(url = %url, error = %first, "backend GET failed, retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| BackendError::Transport(e.to_string()))?
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BackendError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Some(envelope.data))
    }

    /// Like `get_json`, but a 404 is an error: list endpoints always
    /// exist for tracked environments.
    async fn get_list<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        self.get_json(url).await?.ok_or(BackendError::Status {
            status: 404,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn list_environments(&self) -> Result<Vec<Environment>, BackendError> {
        self.get_list(&self.url("/api/v1/server/environments")).await
    }

    async fn list_entities(
        &self,
        environment_id: &str,
        kind: EntityKind,
    ) -> Result<Vec<Value>, BackendError> {
        let url = self.url(&format!(
            "/api/v1/server/environments/{environment_id}/{}",
            kind.path_segment()
        ));
        self.get_list(&url).await
    }

    async fn fetch_entity(
        &self,
        environment_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Value>, BackendError> {
        let url = self.url(&format!(
            "/api/v1/server/environments/{environment_id}/{}/{id}",
            kind.path_segment()
        ));
        self.get_json(&url).await
    }

    async fn list_api_tokens(&self) -> Result<Vec<ApiTokenRecord>, BackendError> {
        self.get_list(&self.url("/api/v1/server/api-tokens")).await
    }

    async fn fetch_api_token(&self, id: &str) -> Result<Option<ApiTokenRecord>, BackendError> {
        self.get_json(&self.url(&format!("/api/v1/server/api-tokens/{id}")))
            .await
    }
}
