//! Client for the read-only listing API (`GET /uploads`).

use std::time::Duration;

use chunkup_protocol::ListedObject;
use tracing::debug;

use crate::client::ClientError;

const UPLOADS_PATH: &str = "/uploads";

/// Lists uploads the storage backend already holds.
pub struct ListingClient {
    http: reqwest::Client,
    base_url: String,
}

impl ListingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches every listed object.
    pub async fn list(&self) -> Result<Vec<ListedObject>, ClientError> {
        let url = format!("{}{UPLOADS_PATH}", self.base_url);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        let objects: Vec<ListedObject> = serde_json::from_slice(&body)?;
        debug!(count = objects.len(), "listed uploads");
        Ok(objects)
    }
}
