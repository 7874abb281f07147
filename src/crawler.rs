//! User-agent based crawler detection.

use regex::RegexSet;

/// Decides whether a user agent belongs to an automated client.
pub trait CrawlerDetector: Send + Sync {
    fn is_crawler(&self, user_agent: &str) -> bool;
}

/// User-agent fragments of crawlers, scrapers, monitors and HTTP libraries.
const CRAWLER_PATTERNS: &[&str] = &[
    // Generic markers
    r"(?i)bot\b",
    r"(?i)crawl",
    r"(?i)spider",
    r"(?i)slurp",
    r"(?i)scrap",
    r"(?i)headless",
    // Search engines and SEO tools
    r"(?i)googlebot",
    r"(?i)bingbot|bingpreview|msnbot",
    r"(?i)duckduckbot|duckduckgo",
    r"(?i)yandex",
    r"(?i)baiduspider",
    r"(?i)ahrefs",
    r"(?i)semrush",
    r"(?i)mj12bot|majestic",
    r"(?i)dotbot|seekport|blexbot|petalbot",
    r"(?i)ia_archiver|archive\.org_bot",
    // Social and link unfurlers
    r"(?i)facebookexternalhit|facebot",
    r"(?i)skypeuripreview|yahoo link preview|snap url preview service|google web preview",
    r"(?i)twitterbot|linkedinbot|slackbot|discordbot|telegrambot|whatsapp",
    // Monitoring
    r"(?i)uptimerobot|pingdom|statuscake|site24x7|gtmetrix|lighthouse",
    // HTTP libraries and tools
    r"^curl/",
    r"(?i)^wget/",
    r"^python-requests|^python-urllib|^aiohttp",
    r"^Go-http-client",
    r"^Java/|^okhttp",
    r"^libwww-perl",
    r"^axios/|^node-fetch",
    r"(?i)^scrapy|httrack",
];

/// Regex-set detector over a built-in crawler catalog.
pub struct UserAgentCrawlerDetector {
    patterns: RegexSet,
}

impl UserAgentCrawlerDetector {
    /// Detector over the built-in catalog only.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_patterns(std::iter::empty::<&str>())
    }

    /// Built-in patterns plus `extra`.
    pub fn with_patterns<I, S>(extra: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra: Vec<String> = extra.into_iter().map(|s| s.as_ref().to_string()).collect();
        let patterns = RegexSet::new(
            CRAWLER_PATTERNS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )?;
        Ok(Self { patterns })
    }
}

impl CrawlerDetector for UserAgentCrawlerDetector {
    fn is_crawler(&self, user_agent: &str) -> bool {
        let user_agent = user_agent.trim();
        !user_agent.is_empty() && self.patterns.is_match(user_agent)
    }
}
