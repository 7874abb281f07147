//! Configuration types for server analytics.

use crate::reputation::DEFAULT_BLOCKED_ASNS;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// IP extraction configuration.
    #[serde(default)]
    pub ip_extraction: IpExtractionConfig,

    /// What the request details snapshot captures.
    #[serde(default)]
    pub request_details: RequestDetailsConfig,

    /// ASN identifiers (or fragments) of networks not counted as visitors.
    #[serde(default = "default_blocked_asn_list")]
    pub blocked_asn_list: Vec<String>,

    /// ipinfo.io lookup configuration.
    #[serde(default)]
    pub ipinfo: Option<IpInfoConfig>,

    /// Blocked IP cache configuration.
    #[serde(default)]
    pub block_cache: BlockCacheConfig,

    /// Exclusions registered at startup.
    #[serde(default)]
    pub exclusions: ExclusionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            ip_extraction: IpExtractionConfig::default(),
            request_details: RequestDetailsConfig::default(),
            blocked_asn_list: default_blocked_asn_list(),
            ipinfo: None,
            block_cache: BlockCacheConfig::default(),
            exclusions: ExclusionsConfig::default(),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exclude requests whose user agent looks like a crawler.
    #[serde(default = "default_true")]
    pub ignore_bot_requests: bool,

    /// Action when the reputation lookup fails.
    #[serde(default)]
    pub fail_action: FailAction,

    /// Log excluded requests.
    #[serde(default = "default_true")]
    pub log_excluded: bool,

    /// Log admitted requests.
    #[serde(default)]
    pub log_admitted: bool,

    /// Entity kind used when relating a request to its authenticated user.
    #[serde(default = "default_user_model")]
    pub user_model: String,

    /// When set, records are delivered on a background task.
    #[serde(default)]
    pub queue_connection: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_bot_requests: true,
            fail_action: FailAction::default(),
            log_excluded: true,
            log_admitted: false,
            user_model: default_user_model(),
            queue_connection: None,
        }
    }
}

fn default_user_model() -> String {
    "user".to_string()
}

/// Action to take when the reputation lookup fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    /// Count the request when lookup fails (fail-open).
    #[default]
    Allow,
    /// Drop the request when lookup fails (fail-closed).
    Block,
}

/// IP extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpExtractionConfig {
    /// Headers to check for client IP, in order of preference.
    #[serde(default = "default_ip_headers")]
    pub headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,
}

impl Default for IpExtractionConfig {
    fn default() -> Self {
        Self {
            headers: default_ip_headers(),
            use_first_ip: true,
        }
    }
}

fn default_ip_headers() -> Vec<String> {
    vec![
        "x-forwarded-for".to_string(),
        "x-real-ip".to_string(),
        "cf-connecting-ip".to_string(),
    ]
}

/// Request details configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestDetailsConfig {
    /// Headers copied into the request details.
    #[serde(default = "default_capture_headers")]
    pub capture_headers: Vec<String>,
}

impl Default for RequestDetailsConfig {
    fn default() -> Self {
        Self {
            capture_headers: default_capture_headers(),
        }
    }
}

fn default_capture_headers() -> Vec<String> {
    vec!["accept-language".to_string()]
}

fn default_blocked_asn_list() -> Vec<String> {
    DEFAULT_BLOCKED_ASNS.iter().map(|s| s.to_string()).collect()
}

/// ipinfo.io configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpInfoConfig {
    /// Enable ipinfo lookups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API token (supports ${ENV_VAR} syntax). Empty uses the anonymous tier.
    #[serde(default)]
    pub token: String,

    /// API base URL.
    #[serde(default = "default_ipinfo_url")]
    pub base_url: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_ipinfo_url() -> String {
    "https://ipinfo.io".to_string()
}

fn default_timeout() -> u64 {
    5000
}

/// Blocked IP cache configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BlockCacheConfig {
    /// JSON file backing the cache. In-memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Exclusions registered at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExclusionsConfig {
    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default)]
    pub routes: Vec<String>,

    #[serde(default)]
    pub methods: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        // An empty entry would substring-match every ASN
        for entry in &self.blocked_asn_list {
            if entry.trim().is_empty() {
                anyhow::bail!("blocked_asn_list contains an empty entry");
            }
        }

        if let Some(ref ipinfo) = self.ipinfo {
            if ipinfo.enabled {
                if !ipinfo.base_url.starts_with("http://") && !ipinfo.base_url.starts_with("https://") {
                    anyhow::bail!("ipinfo base_url must be an http(s) URL: {}", ipinfo.base_url);
                }
                if ipinfo.timeout_ms == 0 {
                    anyhow::bail!("ipinfo timeout_ms must be greater than zero");
                }
            }
        }

        for ip in &self.exclusions.ips {
            if ip.parse::<IpAddr>().is_err() {
                anyhow::bail!("Invalid excluded IP: {}", ip);
            }
        }

        for method in &self.exclusions.methods {
            let method = method.trim();
            if method.is_empty() || !method.chars().all(|c| c.is_ascii_alphabetic()) {
                anyhow::bail!("Invalid excluded method: {:?}", method);
            }
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Server Analytics Configuration

settings:
  enabled: true
  ignore_bot_requests: true    # Drop requests from crawler user agents
  fail_action: allow           # allow or block when the ASN lookup fails
  log_excluded: true
  log_admitted: false
  user_model: "user"           # Entity kind of the authenticated user
  # queue_connection: "background"  # Record on a background task

# IP extraction from request headers
ip_extraction:
  headers:
    - "x-forwarded-for"
    - "x-real-ip"
    - "cf-connecting-ip"
  use_first_ip: true           # Use first IP from X-Forwarded-For

# Headers copied into each recorded request
request_details:
  capture_headers:
    - "accept-language"

# Hosting/cloud networks not counted as visitors.
# Entries match the resolved ASN exactly or as a substring.
blocked_asn_list:
  - "AS16276"                  # OVH
  - "AS16509"                  # AWS
  - "AS24940"                  # Hetzner
  - "AS14061"                  # DigitalOcean
  - "AS63949"                  # Linode
  - "AS8075"                   # Microsoft

# ASN lookups (optional)
ipinfo:
  enabled: true
  token: "${IPINFO_TOKEN}"     # Use environment variable
  timeout_ms: 5000

# Cache of IPs confirmed to belong to a blocked ASN
block_cache:
  path: "/var/lib/zentinel/blocked-ips.json"

# Requests never recorded
exclusions:
  ips:
    - "127.0.0.1"
  routes:
    - "/admin/*"
    - "health"
  methods:
    - "options"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("Env var pattern must compile");

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
