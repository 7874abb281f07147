//! ASN-based reputation classification.
//!
//! The classifier resolves an IP to its autonomous system through an
//! external lookup client, checks the result against the configured ASN
//! blocklist and remembers confirmed blocks in a [`BlockedIpStore`] so the
//! next request from the same IP is answered without another lookup.

pub mod ipinfo;

use crate::config::FailAction;
use crate::known_bots;
use crate::store::BlockedIpStore;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Details returned by a reputation lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IpDetails {
    /// ASN identifier such as `"AS16276"`.
    #[serde(default)]
    pub asn: Option<String>,

    /// Organization string, usually `"AS16276 OVH SAS"`.
    #[serde(default)]
    pub org: Option<String>,
}

impl IpDetails {
    /// The string matched against the blocklist: the ASN, or the
    /// organization when no ASN is present.
    pub fn asn_or_org(&self) -> Option<&str> {
        self.asn
            .as_deref()
            .or(self.org.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Error from a reputation lookup.
#[derive(Debug, Error)]
pub enum ReputationError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    /// Timeout.
    #[error("Request timed out")]
    Timeout,
    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,
    /// Invalid response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ReputationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ReputationError::Timeout
        } else {
            ReputationError::Http(e)
        }
    }
}

/// Client for an external IP reputation service.
#[async_trait]
pub trait ReputationClient: Send + Sync {
    /// Resolve `ip` to its network operator details.
    async fn get_details(&self, ip: &IpAddr) -> Result<IpDetails, ReputationError>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// Hosting and cloud networks whose traffic is not counted as visitors.
pub const DEFAULT_BLOCKED_ASNS: &[&str] = &[
    // OVH
    "AS16276", "AS35540", "AS43996",
    // AWS
    "AS16509", "AS14618",
    // Hetzner
    "AS24940", "AS213230",
    // DigitalOcean
    "AS14061", "AS200130",
    // Linode
    "AS63949",
    // Microsoft
    "AS8075", "AS8068", "AS8069", "AS3598",
];

/// Configured set of blocked ASN entries.
///
/// An entry blocks a resolved ASN/organization string when it equals it
/// exactly or, failing that, occurs anywhere inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnBlocklist {
    entries: Vec<String>,
}

impl AsnBlocklist {
    /// Build from entries, dropping blanks and duplicates but keeping order.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if !entry.is_empty() && !deduped.iter().any(|e| e == entry) {
                deduped.push(entry.to_string());
            }
        }
        Self { entries: deduped }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the entry that blocks `asn`, if any.
    pub fn find_match(&self, asn: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.as_str() == asn)
            .or_else(|| self.entries.iter().find(|entry| asn.contains(entry.as_str())))
            .map(String::as_str)
    }

    pub fn is_blocked(&self, asn: &str) -> bool {
        self.find_match(asn).is_some()
    }
}

impl Default for AsnBlocklist {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_ASNS)
    }
}

/// Resolves IPs to ASNs and caches confirmed blocks.
pub struct ReputationClassifier {
    client: Option<Arc<dyn ReputationClient>>,
    blocklist: AsnBlocklist,
    store: Arc<dyn BlockedIpStore>,
    fail_action: FailAction,
}

impl ReputationClassifier {
    /// Create a classifier. Without a client, only cached blocks are seen.
    pub fn new(
        client: Option<Arc<dyn ReputationClient>>,
        blocklist: AsnBlocklist,
        store: Arc<dyn BlockedIpStore>,
        fail_action: FailAction,
    ) -> Self {
        info!(
            client = client.as_ref().map(|c| c.name()).unwrap_or("none"),
            store = store.name(),
            blocked_asns = blocklist.len(),
            fail_action = ?fail_action,
            "Reputation classifier initialized"
        );

        Self {
            client,
            blocklist,
            store,
            fail_action,
        }
    }

    pub fn blocklist(&self) -> &AsnBlocklist {
        &self.blocklist
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Check whether `ip` is in the blocked-IP cache.
    ///
    /// A store failure is logged and treated as a miss.
    pub async fn is_cached_block(&self, ip: &str) -> bool {
        match self.store.exists(ip).await {
            Ok(hit) => {
                if hit {
                    debug!(ip = %ip, "Blocked IP cache hit");
                }
                hit
            }
            Err(e) => {
                warn!(ip = %ip, store = self.store.name(), error = %e, "Blocked IP cache lookup failed");
                false
            }
        }
    }

    /// Known crawler range or cached block. Never calls the lookup client.
    pub async fn is_known_blocked_ip(&self, ip: &str) -> bool {
        known_bots::is_known_bot_range(ip) || self.is_cached_block(ip).await
    }

    /// Look `ip` up with the reputation client and test it against the
    /// blocklist, caching the IP on a confirmed block.
    ///
    /// Lookup failures resolve through the configured [`FailAction`]; a
    /// fail-closed result is never cached.
    pub async fn classify(&self, ip: &str) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let addr: IpAddr = match ip.trim().parse() {
            Ok(addr) => addr,
            Err(_) => {
                debug!(ip = %ip, "Skipping reputation lookup for unparseable IP");
                return false;
            }
        };

        let details = match client.get_details(&addr).await {
            Ok(details) => details,
            Err(e) => {
                warn!(
                    ip = %ip,
                    client = client.name(),
                    error = %e,
                    fail_action = ?self.fail_action,
                    "Reputation lookup failed"
                );
                return self.fail_action == FailAction::Block;
            }
        };

        let Some(asn) = details.asn_or_org() else {
            debug!(ip = %ip, "Reputation lookup returned no ASN");
            return false;
        };

        let Some(entry) = self.blocklist.find_match(asn) else {
            debug!(ip = %ip, asn = %asn, "ASN not blocklisted");
            return false;
        };

        debug!(ip = %ip, asn = %asn, entry = %entry, "ASN blocklisted");

        if let Err(e) = self.store.upsert(ip).await {
            warn!(
                ip = %ip,
                store = self.store.name(),
                error = %e,
                "Failed to cache blocked IP"
            );
        }

        true
    }
}
