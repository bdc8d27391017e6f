//! URL → strategy-order routing.
//!
//! A [`Router`] holds an immutable, priority-sorted rule set loaded once at
//! startup. [`Router::resolve`] returns the strategy order of the first rule
//! that matches a URL, or the default order when none do.
//!
//! ## Precedence
//!
//! Rules are sorted by descending `priority`. Equal priorities are broken by
//! specificity (longer pattern first), then by load order, so resolution is
//! fully deterministic for a given rule set.

pub mod rules;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

pub use rules::RuleSet;

/// Built-in rule set, embedded at compile time.
const DEFAULT_ROUTES_JSON: &str = include_str!("default_routes.json");

/// Fallback order when a rule set does not name one.
pub const DEFAULT_ORDER: [StrategyId; 2] = [StrategyId::Static, StrategyId::Browser];

/// A concrete technique for retrieving a URL's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Direct HTTP fetch; no persistent process.
    Static,
    /// Rendered fetch through the supervised browser backend.
    Browser,
}

impl StrategyId {
    pub const ALL: [StrategyId; 2] = [StrategyId::Static, StrategyId::Browser];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Browser => "browser",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "direct" => Ok(Self::Static),
            "browser" => Ok(Self::Browser),
            other => Err(RouteError::UnknownStrategy(other.to_string())),
        }
    }
}

/// How a rule's `pattern` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Host or any sub-domain of it; a leading `*.` restricts to sub-domains.
    Host,
    /// Regular expression over the URL path.
    PathRegex,
    /// Comma-separated list of hosts, each matched like [`PatternKind::Host`].
    AllowList,
}

/// A declarative routing rule, as loaded from the rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub pattern: String,
    pub pattern_kind: PatternKind,
    #[serde(default)]
    pub priority: i32,
    pub strategy_order: Vec<StrategyId>,
}

/// Errors raised while loading rules or resolving URLs.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("rule has an empty pattern")]
    EmptyPattern,

    #[error("rule `{pattern}` has an empty strategy order")]
    EmptyOrder { pattern: String },

    #[error("default strategy order is empty")]
    EmptyDefaultOrder,

    #[error("rule `{pattern}` has an invalid path regex: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),

    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to parse routing rules: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read routing rules from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
enum RuleMatcher {
    Host { suffix: String, subdomains_only: bool },
    PathRegex(Regex),
    AllowList(Vec<String>),
}

impl RuleMatcher {
    fn matches(&self, host: &str, path: &str) -> bool {
        match self {
            Self::Host {
                suffix,
                subdomains_only,
            } => host_matches(host, suffix, *subdomains_only),
            Self::PathRegex(re) => re.is_match(path),
            Self::AllowList(hosts) => hosts.iter().any(|h| host_matches(host, h, false)),
        }
    }
}

#[derive(Debug)]
struct CompiledRule {
    rule: RoutingRule,
    matcher: RuleMatcher,
    specificity: usize,
    load_index: usize,
}

/// Immutable, priority-ordered rule table.
#[derive(Debug)]
pub struct Router {
    rules: Vec<CompiledRule>,
    default_order: Vec<StrategyId>,
}

impl Router {
    /// Compile and sort a rule set. Duplicate strategies inside an order are
    /// dropped (first occurrence kept).
    pub fn new(
        rules: Vec<RoutingRule>,
        default_order: Vec<StrategyId>,
    ) -> Result<Self, RouteError> {
        let default_order = dedup_order(default_order);
        if default_order.is_empty() {
            return Err(RouteError::EmptyDefaultOrder);
        }

        let mut compiled = rules
            .into_iter()
            .enumerate()
            .map(|(load_index, rule)| compile(rule, load_index))
            .collect::<Result<Vec<_>, _>>()?;

        compiled.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then(b.specificity.cmp(&a.specificity))
                .then(a.load_index.cmp(&b.load_index))
        });

        tracing::debug!(rules = compiled.len(), "router initialized");

        Ok(Self {
            rules: compiled,
            default_order,
        })
    }

    /// The rule set shipped with the crate.
    pub fn builtin() -> Result<Self, RouteError> {
        Self::from_json(DEFAULT_ROUTES_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self, RouteError> {
        let set: RuleSet = serde_json::from_str(json)?;
        set.into_router()
    }

    pub fn from_file(path: &Path) -> Result<Self, RouteError> {
        let json = std::fs::read_to_string(path).map_err(|source| RouteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from `path` if given, otherwise the built-in rules.
    pub fn load(path: Option<&Path>) -> Result<Self, RouteError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::builtin(),
        }
    }

    /// Ordered, non-empty, duplicate-free strategy list for a URL.
    pub fn resolve(&self, url: &Url) -> &[StrategyId] {
        match self.matching_rule(url) {
            Some(rule) => &rule.strategy_order,
            None => &self.default_order,
        }
    }

    /// Parse then resolve.
    pub fn resolve_str(&self, url: &str) -> Result<&[StrategyId], RouteError> {
        let parsed = Url::parse(url).map_err(|source| RouteError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(self.resolve(&parsed))
    }

    /// The first rule matching the URL, if any.
    pub fn matching_rule(&self, url: &Url) -> Option<&RoutingRule> {
        let host = url
            .host_str()
            .unwrap_or_default()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let path = url.path();
        self.rules
            .iter()
            .find(|r| r.matcher.matches(&host, path))
            .map(|r| &r.rule)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &RoutingRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    pub fn default_order(&self) -> &[StrategyId] {
        &self.default_order
    }
}

fn compile(mut rule: RoutingRule, load_index: usize) -> Result<CompiledRule, RouteError> {
    let pattern = rule.pattern.trim().to_string();
    if pattern.is_empty() {
        return Err(RouteError::EmptyPattern);
    }
    rule.strategy_order = dedup_order(std::mem::take(&mut rule.strategy_order));
    if rule.strategy_order.is_empty() {
        return Err(RouteError::EmptyOrder { pattern });
    }

    let (matcher, specificity) = match rule.pattern_kind {
        PatternKind::Host => {
            let lowered = pattern.to_ascii_lowercase();
            let specificity = lowered.len();
            let matcher = match lowered.strip_prefix("*.") {
                Some(rest) => RuleMatcher::Host {
                    suffix: rest.to_string(),
                    subdomains_only: true,
                },
                None => RuleMatcher::Host {
                    suffix: lowered,
                    subdomains_only: false,
                },
            };
            (matcher, specificity)
        }
        PatternKind::PathRegex => {
            let re = Regex::new(&pattern).map_err(|source| RouteError::InvalidRegex {
                pattern: pattern.clone(),
                source,
            })?;
            (RuleMatcher::PathRegex(re), pattern.len())
        }
        PatternKind::AllowList => {
            let hosts: Vec<String> = pattern
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
            if hosts.is_empty() {
                return Err(RouteError::EmptyPattern);
            }
            let specificity = hosts.iter().map(String::len).max().unwrap_or(0);
            (RuleMatcher::AllowList(hosts), specificity)
        }
    };

    rule.pattern = pattern;
    Ok(CompiledRule {
        rule,
        matcher,
        specificity,
        load_index,
    })
}

fn dedup_order(order: Vec<StrategyId>) -> Vec<StrategyId> {
    let mut out = Vec::with_capacity(order.len());
    for id in order {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// `host` equals `suffix` or is a sub-domain of it.
fn host_matches(host: &str, suffix: &str, subdomains_only: bool) -> bool {
    if host == suffix {
        return !subdomains_only;
    }
    host.len() > suffix.len()
        && host.ends_with(suffix)
        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}
