//! Post-fetch inspection of successful responses.
//!
//! A 200 response is not always the document. Challenge interstitials and
//! script-only shells are turned into faults here so the orchestrator can
//! move to a strategy that can deal with them.

use crate::classify::Fault;
use scraper::{Html, Selector};

/// Documents with less visible text than this, and at least one script, are
/// treated as shells that need a browser to render.
pub const MIN_VISIBLE_TEXT: usize = 256;

const CHALLENGE_TITLES: &[&str] = &[
    "just a moment",
    "attention required",
    "access denied",
    "are you a robot",
    "pardon our interruption",
    "verify you are human",
    "security check",
];

const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf_chl_opt",
    "challenge-platform",
    "_incapsula_resource",
    "px-captcha",
    "g-recaptcha",
    "h-captcha",
];

/// Inspect a statically fetched document.
pub fn inspect_document(content_type: Option<&str>, body: &str) -> Result<(), Fault> {
    if body.trim().is_empty() {
        return Err(Fault::new("empty document"));
    }
    if !is_html(content_type, body) {
        return Ok(());
    }

    let doc = Html::parse_document(body);
    detect_challenge(&doc, body)?;

    if has_scripts(&doc) {
        let visible = visible_text_len(&doc);
        if visible < MIN_VISIBLE_TEXT {
            return Err(Fault::new(format!(
                "script-required shell page: {visible} chars of visible text"
            )));
        }
    }
    Ok(())
}

/// Inspect a browser-rendered document. Only challenges are faults here;
/// a short rendered page is what the site actually serves.
pub fn inspect_rendered(html: &str) -> Result<(), Fault> {
    let doc = Html::parse_document(html);
    detect_challenge(&doc, html)
}

fn is_html(content_type: Option<&str>, body: &str) -> bool {
    match content_type {
        Some(ct) => ct.to_ascii_lowercase().contains("html"),
        None => body.trim_start().starts_with('<'),
    }
}

fn detect_challenge(doc: &Html, raw: &str) -> Result<(), Fault> {
    if let Some(title) = title_text(doc) {
        let lower = title.to_lowercase();
        if let Some(hit) = CHALLENGE_TITLES.iter().find(|t| lower.contains(**t)) {
            return Err(Fault::new(format!(
                "anti-bot challenge page detected (title: {hit})"
            )));
        }
    }
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| raw.contains(**m)) {
        return Err(Fault::new(format!(
            "anti-bot challenge page detected (marker: {marker})"
        )));
    }
    Ok(())
}

fn title_text(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    let title = doc.select(&sel).next()?;
    let text = title.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn has_scripts(doc: &Html) -> bool {
    Selector::parse("script")
        .map(|sel| doc.select(&sel).next().is_some())
        .unwrap_or(false)
}

/// Length of body text outside `script`, `style`, `noscript` and `template`.
fn visible_text_len(doc: &Html) -> usize {
    let Ok(sel) = Selector::parse("body") else {
        return 0;
    };
    let Some(body) = doc.select(&sel).next() else {
        return 0;
    };

    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|a| {
                a.value().as_element().is_some_and(|e| {
                    matches!(e.name(), "script" | "style" | "noscript" | "template")
                })
            });
            (!hidden).then(|| text.split_whitespace().map(str::len).sum::<usize>())
        })
        .sum()
}
