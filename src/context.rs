//! Builds the structured context document the model sees each turn.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capture::Capture;
use crate::plan::Action;

const CONTENT_SELECTORS: [&str; 6] = ["h1", "h2", "h3", "p", "li", "label"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub pages_visited: Vec<String>,
    pub actions_performed: u32,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            pages_visited: Vec::new(),
            actions_performed: 0,
        }
    }

    pub fn record_page(&mut self, url: &str) {
        if !self.pages_visited.iter().any(|u| u == url) {
            self.pages_visited.push(url.to_string());
        }
    }
}

fn whitespace_pattern() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

fn collapse_whitespace(text: &str) -> String {
    whitespace_pattern().replace_all(text.trim(), " ").to_string()
}

/// Derive a bounded text summary of the page from its outer HTML: headings,
/// paragraphs, list items and labels in document order.
pub fn page_text_summary(html: &str, max_len: usize) -> String {
    let document = Html::parse_document(html);
    let mut parts = Vec::new();

    for selector_str in CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            for element_ref in document.select(&selector) {
                let text = element_ref.text().collect::<Vec<_>>().join(" ");
                let text = collapse_whitespace(&text);
                if text.len() > 3 {
                    parts.push(text);
                }
            }
        }
    }

    let mut summary = parts.join(" | ");
    if summary.len() > max_len {
        let cut = (0..=max_len)
            .rev()
            .find(|&i| summary.is_char_boundary(i))
            .unwrap_or(0);
        summary.truncate(cut);
        summary.push_str("...");
    }
    summary
}

/// Assemble the per-turn context document: current screen state, the element
/// map, what already ran, the goal and session bookkeeping.
pub fn build_context(
    goal: &str,
    capture: &Capture,
    content_summary: &str,
    previous_actions: &[Action],
    metadata: &SessionMetadata,
) -> Value {
    let elements: Vec<&crate::registry::InteractableElement> = capture.element_map.iter().collect();
    json!({
        "current_screen": {
            "url": capture.url,
            "title": capture.title,
            "content_summary": content_summary,
            "interactable_elements": elements,
        },
        "previous_actions": previous_actions,
        "main_goal": goal,
        "session_metadata": metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ElementMap, ScanRecord};

    const FIXTURE_HTML: &str = r#"
        <html><head><title>Login</title></head>
        <body>
            <h1>  Welcome
                back  </h1>
            <p>Sign in to continue.</p>
            <ul><li>Fast</li><li>Secure</li></ul>
            <script>var ignored = true;</script>
        </body></html>
    "#;

    #[test]
    fn summary_collects_visible_text_in_document_order() {
        let summary = page_text_summary(FIXTURE_HTML, 500);
        assert!(summary.contains("Welcome back"));
        assert!(summary.contains("Sign in to continue."));
        assert!(summary.contains("Fast"));
        assert!(!summary.contains("ignored"));
    }

    #[test]
    fn summary_is_bounded() {
        let summary = page_text_summary(FIXTURE_HTML, 10);
        assert!(summary.len() <= 13);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn whitespace_runs_collapse_to_single_spaces() {
        assert_eq!(collapse_whitespace("  a \n\t b   c "), "a b c");
    }

    #[test]
    fn context_carries_elements_and_goal() {
        let map = ElementMap::from_records(
            vec![ScanRecord {
                id: 1,
                tag: "button".to_string(),
                label: "Sign in".to_string(),
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 30.0,
                visible: true,
            }],
            5.0,
        );
        let capture = Capture {
            image: "data:image/webp;base64,AAAA".to_string(),
            element_map: map,
            url: "https://example.com/login".to_string(),
            title: "Login".to_string(),
            taken_at: Utc::now(),
        };
        let metadata = SessionMetadata::new("s1");

        let context = build_context("log in", &capture, "Sign in to continue.", &[], &metadata);
        assert_eq!(context["main_goal"], "log in");
        assert_eq!(
            context["current_screen"]["interactable_elements"][0]["id"],
            1
        );
        assert_eq!(
            context["current_screen"]["interactable_elements"][0]["label"],
            "Sign in"
        );
        assert_eq!(context["session_metadata"]["session_id"], "s1");
    }

    #[test]
    fn visited_pages_are_deduplicated() {
        let mut metadata = SessionMetadata::new("s1");
        metadata.record_page("https://a.example");
        metadata.record_page("https://b.example");
        metadata.record_page("https://a.example");
        assert_eq!(metadata.pages_visited.len(), 2);
    }
}
