//! Declarative rule-source format.
//!
//! ```json
//! {
//!   "default_order": ["static", "browser"],
//!   "rules": [
//!     { "pattern": "medium.com", "pattern_kind": "host",
//!       "priority": 40, "strategy_order": ["browser", "static"] }
//!   ]
//! }
//! ```
//!
//! Rules are loaded once at process start. Changing them requires a restart.

use super::{RouteError, Router, RoutingRule, StrategyId, DEFAULT_ORDER};
use serde::{Deserialize, Serialize};

/// On-disk rule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_order")]
    pub default_order: Vec<StrategyId>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

fn default_order() -> Vec<StrategyId> {
    DEFAULT_ORDER.to_vec()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            default_order: default_order(),
            rules: Vec::new(),
        }
    }
}

impl RuleSet {
    /// Validate and compile into a [`Router`].
    pub fn into_router(self) -> Result<Router, RouteError> {
        Router::new(self.rules, self.default_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PatternKind;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_document() {
        let set: RuleSet = serde_json::from_str(r#"{"rules": []}"#).unwrap();
        assert_eq!(set.default_order, DEFAULT_ORDER.to_vec());
        assert!(set.rules.is_empty());
    }

    #[test]
    fn test_priority_defaults_to_zero() {
        let set: RuleSet = serde_json::from_str(
            r#"{"rules": [{"pattern": "a.test", "pattern_kind": "host", "strategy_order": ["browser"]}]}"#,
        )
        .unwrap();
        assert_eq!(set.rules[0].priority, 0);
        assert_eq!(set.rules[0].pattern_kind, PatternKind::Host);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = Router::from_json(
            r#"{"rules": [{"pattern": "a.test", "pattern_kind": "host", "strategy_order": ["telnet"]}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_order": ["browser"], "rules": [{{"pattern": "^/feed", "pattern_kind": "path_regex", "priority": 3, "strategy_order": ["static"]}}]}}"#
        )
        .unwrap();

        let router = Router::from_file(file.path()).unwrap();
        let feed = url::Url::parse("https://a.test/feed.xml").unwrap();
        let page = url::Url::parse("https://a.test/page").unwrap();
        assert_eq!(router.resolve(&feed), &[StrategyId::Static]);
        assert_eq!(router.resolve(&page), &[StrategyId::Browser]);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Router::from_file(std::path::Path::new("/nonexistent/routes.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/routes.json"));
    }
}
