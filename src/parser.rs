//! Adblock Plus filter-list parsing.
//!
//! Every line resolves to a [`ParsedLine`]; lines that cannot be used for
//! request blocking resolve to [`ParsedLine::Skip`] so that one bad entry
//! never aborts the rest of the list.

use std::{collections::HashSet, net::IpAddr};

use regex::RegexBuilder;

use crate::rules::{Party, PatternRule, ResourceType, RuleSet};

/// Regex fragment standing in for the `^` separator placeholder.
const SEPARATOR: &str = r"([^\w\d\-.%]|$)";

/// Regex fragment standing in for a leading `||` domain anchor.
const DOMAIN_ANCHOR: &str = r"^https?://([a-z0-9-]+\.)*";

const UNSUPPORTED_OPTIONS: [&str; 3] = ["$csp=", "$redirect=", "$replace="];

const COSMETIC_MARKERS: [&str; 3] = ["##", "#@#", "#?#"];

const HOSTS_PLACEHOLDERS: [&str; 8] = [
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "0.0.0.0",
    "127.0.0.1",
];

#[derive(Debug)]
pub enum ParsedLine {
    Domain(String),
    /// Hosts-file entries can name several hostnames on one line.
    Domains(Vec<String>),
    Pattern(PatternRule),
    Whitelist(PatternRule),
    Skip,
}

/// Line counters reported after parsing a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub lines: usize,
    pub domains: usize,
    pub patterns: usize,
    pub whitelist: usize,
    pub skipped: usize,
}

/// Parses a whole filter list into a fresh [`RuleSet`].
pub fn parse_list(text: &str) -> (RuleSet, ParseSummary) {
    let mut rules = RuleSet::new();
    let mut summary = ParseSummary::default();

    for line in text.lines() {
        summary.lines += 1;
        match parse_line(line) {
            ParsedLine::Domain(domain) => {
                rules.insert_domain(&domain);
                summary.domains += 1;
            }
            ParsedLine::Domains(domains) => {
                for domain in &domains {
                    rules.insert_domain(domain);
                }
                summary.domains += domains.len();
            }
            ParsedLine::Pattern(rule) => {
                rules.push_pattern(rule);
                summary.patterns += 1;
            }
            ParsedLine::Whitelist(rule) => {
                rules.push_whitelist(rule);
                summary.whitelist += 1;
            }
            ParsedLine::Skip => summary.skipped += 1,
        }
    }

    tracing::debug!(
        lines = summary.lines,
        domains = summary.domains,
        patterns = summary.patterns,
        whitelist = summary.whitelist,
        skipped = summary.skipped,
        "filter list parsed"
    );

    (rules, summary)
}

pub fn parse_line(raw: &str) -> ParsedLine {
    let line = raw.trim();

    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return ParsedLine::Skip;
    }

    // hosts-file comment
    if line.starts_with('#') {
        return ParsedLine::Skip;
    }

    if COSMETIC_MARKERS.iter().any(|marker| line.contains(marker)) {
        return ParsedLine::Skip;
    }

    if UNSUPPORTED_OPTIONS.iter().any(|option| line.contains(option)) {
        return ParsedLine::Skip;
    }

    if let Some(rest) = line.strip_prefix("@@") {
        return match parse_rule(rest) {
            Some(rule) => ParsedLine::Whitelist(rule),
            None => ParsedLine::Skip,
        };
    }

    if let Some((domain, options)) = domain_anchor(line) {
        if options.contains("~third-party") || options.contains("domain=") {
            return ParsedLine::Skip;
        }
        return ParsedLine::Domain(domain.to_ascii_lowercase());
    }

    if let Some(hosts) = hosts_entry(line) {
        return if hosts.is_empty() {
            ParsedLine::Skip
        } else {
            ParsedLine::Domains(hosts)
        };
    }

    match parse_rule(line) {
        Some(rule) => ParsedLine::Pattern(rule),
        None => ParsedLine::Skip,
    }
}

/// Converts one network rule (without any `@@` prefix) into a [`PatternRule`].
pub fn parse_rule(rule: &str) -> Option<PatternRule> {
    let (expression, options) = match rule.rfind('$') {
        Some(idx) if idx > 0 => (&rule[..idx], Some(&rule[idx + 1..])),
        _ => (rule, None),
    };

    let mut types: HashSet<ResourceType> = HashSet::new();
    let mut party = None;

    for option in options.into_iter().flat_map(|opts| opts.split(',')) {
        match option.trim() {
            "third-party" => party = Some(Party::Third),
            "~third-party" => party = Some(Party::First),
            "script" => {
                types.insert(ResourceType::Script);
            }
            "image" => {
                types.insert(ResourceType::Image);
            }
            "stylesheet" => {
                types.insert(ResourceType::Stylesheet);
            }
            "xmlhttprequest" => {
                types.insert(ResourceType::XmlHttpRequest);
            }
            "subdocument" => {
                types.insert(ResourceType::SubFrame);
            }
            _ => {}
        }
    }

    if expression.chars().count() < 3 {
        return None;
    }

    let regex = RegexBuilder::new(&to_regex(expression))
        .case_insensitive(true)
        .build()
        .ok()?;

    let types = if types.is_empty() { None } else { Some(types) };
    Some(PatternRule::new(regex, types, party))
}

/// Translates an Adblock expression into regex source.
pub fn to_regex(expression: &str) -> String {
    let (anchor, rest) = if let Some(rest) = expression.strip_prefix("||") {
        (DOMAIN_ANCHOR, rest)
    } else if let Some(rest) = expression.strip_prefix('|') {
        ("^", rest)
    } else {
        ("", expression)
    };

    let (body, tail) = match rest.strip_suffix('|') {
        Some(body) => (body, "$"),
        None => (rest, ""),
    };

    let mut out = String::with_capacity(anchor.len() + body.len() * 2 + tail.len());
    out.push_str(anchor);

    let mut buf = [0u8; 4];
    for ch in body.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '^' => out.push_str(SEPARATOR),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }

    out.push_str(tail);
    out
}

/// Matches `||domain^` with optional `$options`, returning the domain and
/// the raw option text.
fn domain_anchor(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("||")?;

    let end = rest
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '.'))
        .unwrap_or(rest.len());
    let domain = &rest[..end];

    let first = domain.chars().next()?;
    let last = domain.chars().last()?;
    if domain.len() < 2 || !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return None;
    }

    let remainder = &rest[end..];
    let remainder = remainder.strip_prefix('^').unwrap_or(remainder);

    if remainder.is_empty() {
        Some((domain, ""))
    } else if remainder.starts_with('$') {
        Some((domain, remainder))
    } else {
        None
    }
}

/// Recognises hosts-file lines such as `0.0.0.0 ads.example # note`.
fn hosts_entry(line: &str) -> Option<Vec<String>> {
    let line = line
        .split_once('#')
        .map(|(before, _)| before)
        .unwrap_or(line)
        .trim();

    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    first.parse::<IpAddr>().ok()?;

    let hosts = tokens
        .map(|token| token.trim_end_matches('.').to_ascii_lowercase())
        .filter(|host| !host.is_empty() && !HOSTS_PLACEHOLDERS.contains(&host.as_str()))
        .filter(|host| host.parse::<IpAddr>().is_err())
        .collect();

    Some(hosts)
}
