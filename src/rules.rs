use std::{collections::HashSet, fmt, str::FromStr};

use regex::Regex;

// compiled rule pool consulted by the match engine

/// Request category as reported by the host's interception API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    XmlHttpRequest,
    Ping,
    Media,
    WebSocket,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::MainFrame => "main_frame",
            ResourceType::SubFrame => "sub_frame",
            ResourceType::Stylesheet => "stylesheet",
            ResourceType::Script => "script",
            ResourceType::Image => "image",
            ResourceType::Font => "font",
            ResourceType::Object => "object",
            ResourceType::XmlHttpRequest => "xmlhttprequest",
            ResourceType::Ping => "ping",
            ResourceType::Media => "media",
            ResourceType::WebSocket => "websocket",
            ResourceType::Other(other) => other,
        }
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "main_frame" | "mainframe" | "document" => ResourceType::MainFrame,
            "sub_frame" | "subframe" | "subdocument" => ResourceType::SubFrame,
            "stylesheet" => ResourceType::Stylesheet,
            "script" => ResourceType::Script,
            "image" => ResourceType::Image,
            "font" => ResourceType::Font,
            "object" => ResourceType::Object,
            "xmlhttprequest" | "xhr" => ResourceType::XmlHttpRequest,
            "ping" => ResourceType::Ping,
            "media" => ResourceType::Media,
            "websocket" => ResourceType::WebSocket,
            other => ResourceType::Other(other.to_string()),
        }
    }
}

impl FromStr for ResourceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ResourceType::from(s))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Party restriction carried by `$third-party` / `$~third-party`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    First,
    Third,
}

/// A regex-backed URL rule, used both for blocking and for exceptions.
#[derive(Debug, Clone)]
pub struct PatternRule {
    regex: Regex,
    types: Option<HashSet<ResourceType>>,
    party: Option<Party>,
}

impl PatternRule {
    pub fn new(regex: Regex, types: Option<HashSet<ResourceType>>, party: Option<Party>) -> Self {
        Self {
            regex,
            types: types.filter(|set| !set.is_empty()),
            party,
        }
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn types(&self) -> Option<&HashSet<ResourceType>> {
        self.types.as_ref()
    }

    pub fn party(&self) -> Option<Party> {
        self.party
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }

    pub fn applies_to(&self, resource_type: &ResourceType) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(resource_type))
    }
}

/// Domain, pattern and whitelist rules merged from every parsed list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    domains: HashSet<String>,
    patterns: Vec<PatternRule>,
    whitelist: Vec<PatternRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_domain(&mut self, domain: &str) -> bool {
        let normalized = normalize_domain(domain);
        if normalized.is_empty() {
            return false;
        }
        self.domains.insert(normalized)
    }

    pub fn push_pattern(&mut self, rule: PatternRule) {
        self.patterns.push(rule);
    }

    pub fn push_whitelist(&mut self, rule: PatternRule) {
        self.whitelist.push(rule);
    }

    /// Appends every rule of `other`; insertion order of patterns is kept.
    pub fn merge(&mut self, other: RuleSet) {
        self.domains.extend(other.domains);
        self.patterns.extend(other.patterns);
        self.whitelist.extend(other.whitelist);
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn whitelist_count(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.patterns.is_empty() && self.whitelist.is_empty()
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    pub fn is_whitelisted(&self, url: &str) -> bool {
        self.whitelist.iter().any(|rule| rule.is_match(url))
    }

    /// Checks `host` and each parent suffix, stopping before the bare TLD.
    pub fn is_domain_blocked(&self, host: &str) -> bool {
        let host = normalize_domain(host);
        let mut candidate = host.as_str();

        while let Some(idx) = candidate.find('.') {
            if self.domains.contains(candidate) {
                return true;
            }
            candidate = &candidate[idx + 1..];
        }

        false
    }

    /// First of the leading `limit` pattern rules that blocks the request.
    pub fn matching_pattern(
        &self,
        url: &str,
        resource_type: &ResourceType,
        limit: usize,
    ) -> Option<&PatternRule> {
        self.patterns
            .iter()
            .take(limit)
            .find(|rule| rule.is_match(url) && rule.applies_to(resource_type))
    }
}

pub(crate) fn normalize_domain(input: &str) -> String {
    let mut host = input.trim();
    if let Some(stripped) = host.strip_prefix("http://") {
        host = stripped;
    } else if let Some(stripped) = host.strip_prefix("https://") {
        host = stripped;
    }

    if let Some((before, _)) = host.split_once('/') {
        host = before;
    }

    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            host = &host[1..end];
        }
    } else if let Some(idx) = host.rfind(':') {
        if !host[..idx].contains(':') {
            host = &host[..idx];
        }
    }

    host.trim_end_matches('.').to_ascii_lowercase()
}
