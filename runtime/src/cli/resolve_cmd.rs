//! `webfetch resolve <url>`: show the strategy order for a URL.

use crate::cli::output::{is_json, print_json};
use crate::config::FetchConfig;
use crate::routing::Router;
use anyhow::{Context, Result};
use std::path::PathBuf;
use url::Url;

pub async fn run(url: &str, routes: Option<PathBuf>) -> Result<()> {
    let path = routes.or(FetchConfig::from_env().routes_path);
    let router = Router::load(path.as_deref()).context("failed to load routing rules")?;
    let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;

    let order = router.resolve(&parsed);
    let rule = router.matching_rule(&parsed);

    if is_json() {
        print_json(&serde_json::json!({
            "url": url,
            "strategy_order": order,
            "rule": rule,
        }));
        return Ok(());
    }

    let names: Vec<&str> = order.iter().map(|s| s.as_str()).collect();
    println!("{url}");
    println!("  order: {}", names.join(" -> "));
    match rule {
        Some(rule) => println!(
            "  rule:  {:?} {} (priority {})",
            rule.pattern_kind, rule.pattern, rule.priority
        ),
        None => println!("  rule:  none (default order)"),
    }
    Ok(())
}
