//! Supplier transport seam
//!
//! Packet delivery, throttling and supplier discovery live in a separate
//! transport gateway. The monitor only needs four things from it: whether a
//! supplier is online, a way to ask for list-files, a way to push one fragment,
//! and a way to ask for a replacement supplier. List-files replies come back
//! through this service's HTTP API.

use async_trait::async_trait;
use haven_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const USER_AGENT: &str = concat!("haven-bm/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait SupplierTransport: Send + Sync {
    async fn is_online(&self, supplier: &str) -> bool;

    /// Ask a supplier for its list of our fragments
    async fn request_list_files(&self, supplier: &str, request_id: Uuid) -> Result<()>;

    /// Upload one fragment file under `packet_id`
    async fn send_fragment(&self, supplier: &str, packet_id: &str, path: &Path) -> Result<()>;

    /// Ask the central service to replace the supplier at `position`
    async fn request_replacement(&self, position: usize) -> Result<()>;
}

/// Transport used when no gateway is configured
///
/// Every supplier reads as offline, so cycles complete without network traffic.
#[derive(Debug, Clone, Default)]
pub struct OfflineTransport;

#[async_trait]
impl SupplierTransport for OfflineTransport {
    async fn is_online(&self, _supplier: &str) -> bool {
        false
    }

    async fn request_list_files(&self, supplier: &str, _request_id: Uuid) -> Result<()> {
        Err(Error::Internal(format!("offline: cannot reach {}", supplier)))
    }

    async fn send_fragment(&self, supplier: &str, packet_id: &str, _path: &Path) -> Result<()> {
        Err(Error::Internal(format!("offline: cannot send {} to {}", packet_id, supplier)))
    }

    async fn request_replacement(&self, position: usize) -> Result<()> {
        Err(Error::Internal(format!("offline: cannot replace supplier {}", position)))
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    online: bool,
}

/// Client for the HTTP transport gateway
///
/// Supplier identities are URLs, so they always travel as query parameters.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("transport client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, request: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Internal(format!("{}: {}", what, e)))?;
        if !response.status().is_success() {
            return Err(Error::Internal(format!("{}: gateway returned {}", what, response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl SupplierTransport for HttpTransport {
    async fn is_online(&self, supplier: &str) -> bool {
        let response = self
            .http_client
            .get(self.url("suppliers/status"))
            .query(&[("supplier", supplier)])
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => response
                .json::<StatusResponse>()
                .await
                .map(|status| status.online)
                .unwrap_or(false),
            Ok(response) => {
                debug!("Status of {} unavailable: {}", supplier, response.status());
                false
            }
            Err(e) => {
                debug!("Status of {} unavailable: {}", supplier, e);
                false
            }
        }
    }

    async fn request_list_files(&self, supplier: &str, request_id: Uuid) -> Result<()> {
        let request_id = request_id.to_string();
        let request = self
            .http_client
            .post(self.url("list-files"))
            .query(&[("supplier", supplier), ("request_id", request_id.as_str())]);
        self.post(request, "list-files request").await
    }

    async fn send_fragment(&self, supplier: &str, packet_id: &str, path: &Path) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        let request = self
            .http_client
            .post(self.url("files"))
            .query(&[("supplier", supplier), ("packet_id", packet_id)])
            .body(body);
        self.post(request, "fragment upload").await
    }

    async fn request_replacement(&self, position: usize) -> Result<()> {
        let position = position.to_string();
        let request = self
            .http_client
            .post(self.url("replace"))
            .query(&[("position", position.as_str())]);
        self.post(request, "replacement request").await
    }
}
