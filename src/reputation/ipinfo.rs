//! ipinfo.io lookup client.

use super::{IpDetails, ReputationClient, ReputationError};
use crate::config::IpInfoConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// ipinfo.io API response.
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    /// Organization, e.g. "AS16276 OVH SAS".
    #[serde(default)]
    org: Option<String>,

    /// ASN block, only present on plans that include it.
    #[serde(default)]
    asn: Option<IpInfoAsn>,

    /// Set for private and reserved addresses.
    #[serde(default)]
    bogon: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IpInfoAsn {
    Detailed { asn: String },
    Plain(String),
}

impl IpInfoAsn {
    fn into_string(self) -> String {
        match self {
            IpInfoAsn::Detailed { asn } => asn,
            IpInfoAsn::Plain(asn) => asn,
        }
    }
}

impl From<IpInfoResponse> for IpDetails {
    fn from(response: IpInfoResponse) -> Self {
        IpDetails {
            asn: response.asn.map(IpInfoAsn::into_string),
            org: response.org,
        }
    }
}

/// ipinfo.io reputation client.
pub struct IpInfoClient {
    config: IpInfoConfig,
    client: Client,
}

impl IpInfoClient {
    /// Create a new ipinfo.io client.
    pub fn new(config: IpInfoConfig) -> Result<Self, ReputationError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { config, client })
    }

    fn lookup_url(&self, ip: &IpAddr) -> String {
        format!("{}/{}/json", self.config.base_url.trim_end_matches('/'), ip)
    }
}

#[async_trait]
impl ReputationClient for IpInfoClient {
    async fn get_details(&self, ip: &IpAddr) -> Result<IpDetails, ReputationError> {
        debug!(ip = %ip, "Querying ipinfo");

        let mut request = self
            .client
            .get(self.lookup_url(ip))
            .header("Accept", "application/json");
        if !self.config.token.is_empty() {
            request = request.bearer_auth(&self.config.token);
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("ipinfo rate limit exceeded");
            return Err(ReputationError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReputationError::InvalidResponse(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: IpInfoResponse = response.json().await.map_err(|e| {
            ReputationError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if body.bogon {
            debug!(ip = %ip, "ipinfo reports bogon address");
            return Ok(IpDetails::default());
        }

        let details = IpDetails::from(body);
        debug!(
            ip = %ip,
            asn = ?details.asn,
            org = ?details.org,
            "ipinfo lookup complete"
        );

        Ok(details)
    }

    fn name(&self) -> &str {
        "ipinfo"
    }
}
