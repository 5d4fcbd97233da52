//! Plan extraction from raw model output.
//!
//! Model text is unreliable rather than malicious: the plan object may arrive
//! bare, fenced, or buried in prose. Extraction is maximally permissive about
//! surrounding noise and maximally strict about the extracted structure.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::{AgentError, Result};
use crate::plan::Plan;

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```(?:json)?").expect("static fence pattern"))
}

/// Remove code-fence markers the model may wrap its output in.
pub fn strip_code_fences(text: &str) -> String {
    fence_pattern().replace_all(text, "").trim().to_string()
}

/// Locate every top-level balanced `{...}` substring, tracking brace depth
/// and string-literal/escape state. Pure and total: arbitrary input, never
/// fails, candidates returned in the order found.
pub fn find_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if ch == '"' && !escape_next {
                in_string = false;
            }
            escape_next = ch == '\\' && !escape_next;
            continue;
        }
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            candidates.push(text[s..i + ch.len_utf8()].to_string());
                        }
                    }
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }

    candidates
}

/// Strict strip mode: remove fence markers, then parse the remainder as a
/// single object. Used when the upstream contract promises a bare object.
pub fn parse_strict(text: &str) -> Result<Plan> {
    let stripped = strip_code_fences(text);
    let value: Value = serde_json::from_str(&stripped)
        .map_err(|e| AgentError::MalformedPlan(e.to_string()))?;
    Plan::from_value(&value)
}

/// Scan mode as a total function: every schema-valid plan embedded in the
/// text, in the order found. Candidates that fail to parse or validate are
/// discarded.
pub fn extract_plans(text: &str) -> Vec<Plan> {
    find_json_candidates(text)
        .iter()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .filter_map(|value| Plan::from_value(&value).ok())
        .collect()
}

/// Parse a plan from arbitrary model output: strict strip mode first, then
/// the character scan as fallback. `MalformedPlan` when no syntactically
/// valid object exists, `SchemaViolation` when objects parse but none
/// satisfies the plan invariants.
pub fn parse(text: &str) -> Result<Plan> {
    let stripped = strip_code_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(&stripped) {
        return Plan::from_value(&value);
    }

    let candidates = find_json_candidates(text);
    if candidates.is_empty() {
        return Err(AgentError::MalformedPlan(
            "no balanced object substring in model output".to_string(),
        ));
    }

    let mut any_parsed = false;
    let mut last_schema_error: Option<AgentError> = None;
    for candidate in &candidates {
        let value: Value = match serde_json::from_str(candidate) {
            Ok(v) => v,
            Err(_) => continue,
        };
        any_parsed = true;
        match Plan::from_value(&value) {
            Ok(plan) => return Ok(plan),
            Err(e) => last_schema_error = Some(e),
        }
    }

    if any_parsed {
        Err(last_schema_error
            .unwrap_or_else(|| AgentError::SchemaViolation("no valid plan candidate".to_string())))
    } else {
        Err(AgentError::MalformedPlan(
            "balanced substrings found but none parsed as JSON".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Action;

    const VALID_PLAN: &str = r#"{
        "reasoning": "open the login page",
        "proposed_actions": [{"kind": "navigate", "url": "https://example.com/login"}],
        "execution_order": [0],
        "success_criteria": "login form visible",
        "fallback_strategy": "search for a login link"
    }"#;

    #[test]
    fn scanner_returns_empty_on_brace_free_text() {
        assert!(find_json_candidates("no objects here, just prose").is_empty());
        assert!(find_json_candidates("").is_empty());
        assert!(find_json_candidates("unbalanced { opener").is_empty());
    }

    #[test]
    fn scanner_ignores_braces_inside_strings() {
        let text = r#"noise {"a": "value with } and { inside", "b": "esc \" quote }"} tail"#;
        let found = find_json_candidates(text);
        assert_eq!(found.len(), 1);
        assert!(serde_json::from_str::<serde_json::Value>(&found[0]).is_ok());
    }

    #[test]
    fn scanner_finds_multiple_objects_in_order() {
        let text = r#"first {"a": 1} then {"b": {"nested": 2}} done"#;
        let found = find_json_candidates(text);
        assert_eq!(found, vec![r#"{"a": 1}"#, r#"{"b": {"nested": 2}}"#]);
    }

    #[test]
    fn parse_strict_accepts_fenced_object() {
        let fenced = format!("```json\n{}\n```", VALID_PLAN);
        let plan = parse_strict(&fenced).unwrap();
        assert!(matches!(plan.proposed_actions[0], Action::Navigate { .. }));
    }

    #[test]
    fn parse_extracts_plan_from_surrounding_prose() {
        let noisy = format!(
            "Here is what I will do next.\n```json\n{}\n```\nLet me know if that works.",
            VALID_PLAN
        );
        let plan = parse(&noisy).unwrap();
        assert_eq!(plan.reasoning, "open the login page");
    }

    #[test]
    fn parse_fails_malformed_when_no_object_exists() {
        assert!(matches!(
            parse("I could not decide on an action."),
            Err(AgentError::MalformedPlan(_))
        ));
    }

    #[test]
    fn parse_fails_schema_when_object_is_not_a_plan() {
        let text = r#"thinking... {"kind": "click", "note": "not a plan"} done"#;
        assert!(matches!(parse(text), Err(AgentError::SchemaViolation(_))));
    }

    #[test]
    fn extract_plans_discards_invalid_candidates() {
        let text = format!(
            r#"{{"not": "a plan"}} and {} and {{"proposed_actions": "wrong type"}}"#,
            VALID_PLAN
        );
        let plans = extract_plans(&text);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].success_criteria, "login form visible");
    }

    #[test]
    fn extract_plans_is_total_on_garbage() {
        assert!(extract_plans("}{ ... {{{").is_empty());
    }
}
