//! User-configured exclusion rules: IPs, routes and HTTP methods.
//!
//! The three lists only grow. Each `add_*` call appends to what is already
//! registered.

use crate::request::InboundRequest;
use regex::Regex;

/// A compiled route pattern.
///
/// `*` matches any run of characters, `/` included. Leading and trailing
/// slashes are stripped from the pattern unless it is exactly `/`.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Option<Regex>,
}

impl RoutePattern {
    pub fn new(pattern: &str) -> Self {
        let pattern = pattern.trim();
        let source = if pattern == "/" {
            pattern.to_string()
        } else {
            pattern.trim_matches('/').to_string()
        };

        let body = regex::escape(&source).replace(r"\*", ".*");
        // Falls back to exact comparison if the pattern exceeds regex limits.
        let regex = Regex::new(&format!(r"^{}\z", body)).ok();

        Self { source, regex }
    }

    /// The normalized pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a single value.
    pub fn is_match(&self, value: &str) -> bool {
        self.source == value || self.regex.as_ref().is_some_and(|r| r.is_match(value))
    }

    /// Match a request by normalized full URL or by normalized path.
    pub fn matches_request(&self, request: &InboundRequest) -> bool {
        self.is_match(&request.normalized_full_url()) || self.is_match(&request.normalized_path())
    }
}

/// Registered exclusions.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    ips: Vec<String>,
    routes: Vec<RoutePattern>,
    methods: Vec<String>,
}

impl ExclusionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add IPs compared by exact string equality.
    pub fn add_ip_exclusions<I, S>(&mut self, ips: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips.extend(ips.into_iter().map(Into::into));
    }

    /// Add route patterns. Patterns may contain `*` wildcards and may be
    /// full URLs.
    pub fn add_route_exclusions<I, S>(&mut self, routes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.routes
            .extend(routes.into_iter().map(|r| RoutePattern::new(r.as_ref())));
    }

    /// Add HTTP methods, stored upper-cased.
    pub fn add_method_exclusions<I, S>(&mut self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods.extend(
            methods
                .into_iter()
                .map(|m| m.as_ref().trim().to_ascii_uppercase()),
        );
    }

    pub fn excluded_ips(&self) -> &[String] {
        &self.ips
    }

    pub fn excluded_routes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(RoutePattern::as_str)
    }

    pub fn excluded_methods(&self) -> &[String] {
        &self.methods
    }

    pub fn is_excluded_ip(&self, ip: &str) -> bool {
        self.ips.iter().any(|excluded| excluded == ip)
    }

    pub fn is_excluded_route(&self, request: &InboundRequest) -> bool {
        self.routes.iter().any(|route| route.matches_request(request))
    }

    pub fn is_excluded_method(&self, method: &str) -> bool {
        let method = method.trim().to_ascii_uppercase();
        self.methods.iter().any(|excluded| *excluded == method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, url: &str) -> InboundRequest {
        InboundRequest::new("203.0.113.7", method, url)
    }

    #[test]
    fn test_ip_exclusion_is_exact() {
        let mut rules = ExclusionRules::new();
        rules.add_ip_exclusions(["10.0.0.1"]);

        assert!(rules.is_excluded_ip("10.0.0.1"));
        assert!(!rules.is_excluded_ip("10.0.0.10"));
        assert!(!rules.is_excluded_ip("10.0.0.1 "));
    }

    #[test]
    fn test_lists_are_additive() {
        let mut rules = ExclusionRules::new();
        rules.add_ip_exclusions(["1.1.1.1"]);
        rules.add_ip_exclusions(vec!["2.2.2.2".to_string()]);
        rules.add_method_exclusions(["get"]);
        rules.add_method_exclusions(["Head"]);

        assert_eq!(rules.excluded_ips(), &["1.1.1.1", "2.2.2.2"]);
        assert_eq!(rules.excluded_methods(), &["GET", "HEAD"]);
    }

    #[test]
    fn test_route_pattern_normalization() {
        assert_eq!(RoutePattern::new("/admin/*").as_str(), "admin/*");
        assert_eq!(RoutePattern::new("health/").as_str(), "health");
        assert_eq!(RoutePattern::new("/").as_str(), "/");
    }

    #[test]
    fn test_wildcard_route() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["/admin/*"]);

        assert!(rules.is_excluded_route(&request("GET", "/admin/users")));
        assert!(rules.is_excluded_route(&request("GET", "/admin/users/5/edit")));
        // The wildcard needs the separator before it, and request paths
        // lose their trailing slash.
        assert!(!rules.is_excluded_route(&request("GET", "/admin")));
        assert!(!rules.is_excluded_route(&request("GET", "/admin/")));
        assert!(!rules.is_excluded_route(&request("GET", "/administrator")));
        assert!(!rules.is_excluded_route(&request("GET", "/blog/admin/x")));
    }

    #[test]
    fn test_root_route_only_excludes_root() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["/"]);

        assert!(rules.is_excluded_route(&request("GET", "/")));
        assert!(rules.is_excluded_route(&request("GET", "https://example.com/")));
        assert!(!rules.is_excluded_route(&request("GET", "/about")));
    }

    #[test]
    fn test_exact_route() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["health"]);

        assert!(rules.is_excluded_route(&request("GET", "/health")));
        assert!(rules.is_excluded_route(&request("GET", "/health/")));
        assert!(!rules.is_excluded_route(&request("GET", "/healthz")));
    }

    #[test]
    fn test_full_url_route() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["https://example.com/api/*"]);

        assert!(rules.is_excluded_route(&request("GET", "https://example.com/api/v1/ping")));
        assert!(!rules.is_excluded_route(&request("GET", "https://other.com/api/v1/ping")));
    }

    #[test]
    fn test_full_url_route_with_trailing_slash() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["https://example.com/pricing/"]);
        assert!(rules.is_excluded_route(&request("GET", "https://example.com/pricing/")));
        assert!(rules.is_excluded_route(&request("GET", "https://example.com/pricing")));
        assert!(!rules.is_excluded_route(&request("GET", "https://example.com/pricing/plans")));

        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["https://example.com/pricing"]);
        assert!(rules.is_excluded_route(&request("GET", "https://example.com/pricing/")));
    }

    #[test]
    fn test_full_root_url_route() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["https://example.com/"]);

        assert!(rules.is_excluded_route(&request("GET", "https://example.com/")));
        assert!(rules.is_excluded_route(&request("GET", "https://example.com")));
        assert!(!rules.is_excluded_route(&request("GET", "https://example.com/about")));
    }

    #[test]
    fn test_route_ignores_query_on_path_form() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["search"]);

        assert!(rules.is_excluded_route(&request("GET", "https://example.com/search?q=rust")));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let mut rules = ExclusionRules::new();
        rules.add_route_exclusions(["files/report.pdf"]);

        assert!(rules.is_excluded_route(&request("GET", "/files/report.pdf")));
        assert!(!rules.is_excluded_route(&request("GET", "/files/reportXpdf")));
    }

    #[test]
    fn test_method_exclusion_is_case_insensitive() {
        let mut rules = ExclusionRules::new();
        rules.add_method_exclusions(["post"]);

        assert!(rules.is_excluded_method("POST"));
        assert!(rules.is_excluded_method("post"));
        assert!(!rules.is_excluded_method("GET"));
    }

    #[test]
    fn test_empty_rules_never_match() {
        let rules = ExclusionRules::new();
        let req = request("GET", "/");

        assert!(!rules.is_excluded_ip("203.0.113.7"));
        assert!(!rules.is_excluded_route(&req));
        assert!(!rules.is_excluded_method("GET"));
    }
}
