//! Server-side analytics admission for Zentinel.
//!
//! Decides, per inbound HTTP request, whether it is recorded as analytics
//! data and enriches the requests that are.
//!
//! # Features
//!
//! - **Exclusions** - Exact IPs, wildcard routes and HTTP methods
//! - **Known Crawler Ranges** - Published CIDR ranges of search and SEO bots
//! - **ASN Blocklist** - Hosting/cloud networks resolved through ipinfo.io
//! - **Blocked IP Cache** - Confirmed blocks persisted to skip repeat lookups
//! - **Crawler User Agents** - Optional user-agent based bot filtering
//! - **Hooks** - Ordered metadata and relation hooks for admitted requests
//! - **Fail-Open/Closed** - Configurable behavior when the lookup fails
//!
//! # Admission order
//!
//! With `settings.enabled` off every request is excluded. Otherwise:
//!
//! 1. Excluded IP
//! 2. Known crawler range
//! 3. Cached or confirmed blocked ASN
//! 4. Excluded route or method
//! 5. Crawler user agent (when `ignore_bot_requests` is set)
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   ignore_bot_requests: true
//!   fail_action: allow
//!
//! ipinfo:
//!   token: "${IPINFO_TOKEN}"
//!
//! exclusions:
//!   routes: ["/admin/*"]
//!   methods: ["options"]
//! ```

pub mod analytics;
pub mod cidr;
pub mod config;
pub mod crawler;
pub mod exclusions;
pub mod hooks;
pub mod known_bots;
pub mod reputation;
pub mod request;
pub mod sink;
pub mod store;

pub use analytics::{Decision, ExclusionReason, ServerAnalytics};
pub use config::Config;
pub use hooks::{EntityRef, HookResult};
pub use request::{InboundRequest, RequestDetails};
