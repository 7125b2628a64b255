//! REST client for a PostgREST-style license store.

use async_trait::async_trait;
use kps_core::ports::RemoteAuthority;
use kps_core::{Error, LicenseRecord, MachineRegistration, RecordId, RecordStatus, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info};

const LICENSES: &str = "licenses";
const REGISTRATIONS: &str = "registrations";

/// REST store configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://store.example.com`.
    pub base_url: String,
    /// Sent as both `apikey` and bearer token.
    pub api_key: String,
    /// Transport-level timeout for each request.
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Remote authority over HTTP.
pub struct RestAuthority {
    config: RestConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a> {
    status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    transferred_to: Option<&'a str>,
}

impl RestAuthority {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(table))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "License store request failed");
            return Err(Error::Network(format!("license store returned {}", status)));
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Vec<T>> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn merge(&self, table: &str, on_conflict: &str) -> RequestBuilder {
        self.request(Method::POST, table)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
    }
}

#[async_trait]
impl RemoteAuthority for RestAuthority {
    async fn find(&self, key: &str, machine_id: &str) -> Result<Option<LicenseRecord>> {
        debug!(machine_id = %machine_id, "Looking up license record");
        let request = self.request(Method::GET, LICENSES).query(&[
            ("select", "*".to_string()),
            ("key", format!("eq.{}", key)),
            ("machine_id", format!("eq.{}", machine_id)),
            ("limit", "1".to_string()),
        ]);
        let mut rows: Vec<LicenseRecord> = self.fetch(request).await?;
        Ok(rows.pop())
    }

    async fn update_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
    ) -> Result<()> {
        let patch = StatusPatch {
            status,
            transferred_to,
        };
        let request = self
            .request(Method::PATCH, LICENSES)
            .query(&[("id", format!("eq.{}", id.as_uuid()))])
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request).await?;
        info!(record_id = %id, status = %status, "Updated license status");
        Ok(())
    }

    async fn insert(&self, record: &LicenseRecord) -> Result<()> {
        let request = self
            .request(Method::POST, LICENSES)
            .header("Prefer", "return=minimal")
            .json(record);
        self.send(request).await?;
        info!(record_id = %record.id, machine_id = %record.machine_id, "Inserted license record");
        Ok(())
    }

    async fn upsert_registration(&self, registration: &MachineRegistration) -> Result<()> {
        let request = self.merge(REGISTRATIONS, "machine_id").json(registration);
        self.send(request).await?;
        debug!(machine_id = %registration.machine_id, "Upserted registration");
        Ok(())
    }

    async fn registration(&self, machine_id: &str) -> Result<Option<MachineRegistration>> {
        let request = self.request(Method::GET, REGISTRATIONS).query(&[
            ("select", "*".to_string()),
            ("machine_id", format!("eq.{}", machine_id)),
            ("limit", "1".to_string()),
        ]);
        let mut rows: Vec<MachineRegistration> = self.fetch(request).await?;
        Ok(rows.pop())
    }

    async fn list(&self) -> Result<Vec<LicenseRecord>> {
        let request = self
            .request(Method::GET, LICENSES)
            .query(&[("select", "*"), ("order", "created_at.asc")]);
        self.fetch(request).await
    }

    async fn list_registrations(&self) -> Result<Vec<MachineRegistration>> {
        let request = self
            .request(Method::GET, REGISTRATIONS)
            .query(&[("select", "*"), ("order", "machine_id.asc")]);
        self.fetch(request).await
    }

    async fn restore(&self, records: &[LicenseRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let request = self.merge(LICENSES, "id").json(records);
        self.send(request).await?;
        info!(count = records.len(), "Restored license records");
        Ok(records.len())
    }

    fn name(&self) -> &str {
        "rest"
    }
}
