//! Published network ranges of well-known search and SEO crawlers.

use crate::cidr;

/// A crawler family and the CIDR ranges it operates from.
#[derive(Debug, Clone, Copy)]
pub struct BotFamily {
    pub name: &'static str,
    pub ranges: &'static [&'static str],
}

/// Crawler range catalog. Entry order carries no meaning.
pub const KNOWN_BOT_FAMILIES: &[BotFamily] = &[
    BotFamily {
        name: "googlebot",
        ranges: &[
            "66.249.64.0/19",
            "64.233.160.0/19",
            "72.14.192.0/18",
            "74.125.0.0/16",
            "209.85.128.0/17",
            "216.239.32.0/19",
        ],
    },
    BotFamily {
        name: "bingbot",
        ranges: &[
            "13.66.0.0/16",
            "13.67.0.0/16",
            "13.68.0.0/14",
            "40.77.167.0/24",
            "40.77.188.0/24",
            "52.167.0.0/16",
        ],
    },
    BotFamily {
        name: "duckduckbot",
        ranges: &[
            "20.191.45.212/32",
            "20.185.79.47/32",
            "40.88.21.235/32",
            "40.70.20.60/32",
        ],
    },
    BotFamily {
        name: "yandexbot",
        ranges: &[
            "5.255.252.0/24",
            "5.45.207.0/24",
            "37.9.64.0/18",
            "77.88.0.0/18",
            "84.201.146.0/24",
        ],
    },
    BotFamily {
        name: "baiduspider",
        ranges: &["123.125.71.0/24", "180.76.15.0/24", "180.76.6.0/24"],
    },
    BotFamily {
        name: "ahrefsbot",
        ranges: &[
            "54.36.148.0/24",
            "51.222.253.0/24",
            "167.94.138.0/24",
            "2a03:6f00:1::/48",
        ],
    },
    BotFamily {
        name: "semrushbot",
        ranges: &["46.229.168.0/24", "185.191.171.0/24"],
    },
    BotFamily {
        name: "mj12bot",
        ranges: &["5.45.207.0/24", "37.235.48.0/24", "89.38.96.0/19"],
    },
];

/// Return the crawler family whose ranges contain `ip`, if any.
pub fn find_bot_family(ip: &str) -> Option<&'static str> {
    KNOWN_BOT_FAMILIES
        .iter()
        .find(|family| family.ranges.iter().any(|range| cidr::matches(ip, range)))
        .map(|family| family.name)
}

/// Check whether `ip` belongs to any known crawler range.
pub fn is_known_bot_range(ip: &str) -> bool {
    find_bot_family(ip).is_some()
}

/// Iterate over every catalogued range.
pub fn all_ranges() -> impl Iterator<Item = &'static str> {
    KNOWN_BOT_FAMILIES
        .iter()
        .flat_map(|family| family.ranges.iter().copied())
}
