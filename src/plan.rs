use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::errors::{AgentError, Result};

/// Reference into the current element map. The text is an echo of the label
/// the model saw, kept for validation and logging, never used for lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTarget {
    pub element_id: u32,
    #[serde(default)]
    pub element_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl ScrollDirection {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "top" => Some(Self::Top),
            "bottom" => Some(Self::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    Navigate { url: String },
    Input { target: ActionTarget, value: String },
    Click { target: ActionTarget },
    Wait { duration_ms: u64 },
    Scroll { direction: ScrollDirection },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Input { .. } => "input",
            Action::Click { .. } => "click",
            Action::Wait { .. } => "wait",
            Action::Scroll { .. } => "scroll",
        }
    }

    pub fn target_id(&self) -> Option<u32> {
        match self {
            Action::Input { target, .. } | Action::Click { target } => Some(target.element_id),
            _ => None,
        }
    }

    fn resolves_element(&self) -> bool {
        self.target_id().is_some()
    }
}

/// A validated, ordered batch of actions produced from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub reasoning: String,
    pub proposed_actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<usize>>,
    #[serde(default)]
    pub success_criteria: String,
    #[serde(default)]
    pub fallback_strategy: String,
}

impl Plan {
    /// Validate a decoded JSON value against the plan schema and build the
    /// typed plan. Unknown extra fields are tolerated; structural violations
    /// are not.
    pub fn from_value(value: &Value) -> Result<Plan> {
        let obj = value
            .as_object()
            .ok_or_else(|| schema_err("plan is not a JSON object"))?;

        let raw_actions = obj
            .get("proposed_actions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| schema_err("missing 'proposed_actions' array"))?;

        let mut actions = Vec::with_capacity(raw_actions.len());
        for (i, raw) in raw_actions.iter().enumerate() {
            actions.push(action_from_value(raw, i)?);
        }

        let execution_order = match obj.get("execution_order") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let entries = v
                    .as_array()
                    .ok_or_else(|| schema_err("'execution_order' is not an array"))?;
                let mut order = Vec::with_capacity(entries.len());
                for entry in entries {
                    let idx = entry
                        .as_u64()
                        .ok_or_else(|| schema_err("'execution_order' entry is not an integer"))?;
                    order.push(idx as usize);
                }
                Some(order)
            }
        };

        let plan = Plan {
            reasoning: str_field(obj, "reasoning"),
            proposed_actions: actions,
            execution_order,
            success_criteria: str_field(obj, "success_criteria"),
            fallback_strategy: str_field(obj, "fallback_strategy"),
        };
        plan.validate_order()?;
        Ok(plan)
    }

    /// The indices actions will run in: `execution_order` if given, source
    /// order otherwise.
    pub fn ordered_indices(&self) -> Vec<usize> {
        match &self.execution_order {
            Some(order) => order.clone(),
            None => (0..self.proposed_actions.len()).collect(),
        }
    }

    fn validate_order(&self) -> Result<()> {
        let order = self.ordered_indices();
        let len = self.proposed_actions.len();
        let mut seen = vec![false; len];
        let mut navigated = false;

        for &idx in &order {
            if idx >= len {
                return Err(schema_err(&format!(
                    "execution_order index {} out of range (plan has {} actions)",
                    idx, len
                )));
            }
            if seen[idx] {
                return Err(schema_err(&format!(
                    "execution_order contains duplicate index {}",
                    idx
                )));
            }
            seen[idx] = true;

            let action = &self.proposed_actions[idx];
            // Navigation invalidates every element id assigned before it, so a
            // click or input scheduled after a navigate can never resolve.
            if navigated && action.resolves_element() {
                return Err(schema_err(&format!(
                    "{} action at index {} is scheduled after a navigate",
                    action.kind(),
                    idx
                )));
            }
            if matches!(action, Action::Navigate { .. }) {
                navigated = true;
            }
        }
        Ok(())
    }
}

fn schema_err(msg: &str) -> AgentError {
    AgentError::SchemaViolation(msg.to_string())
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn action_from_value(raw: &Value, index: usize) -> Result<Action> {
    let obj = raw
        .as_object()
        .ok_or_else(|| schema_err(&format!("action {} is not an object", index)))?;

    let kind = obj
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| schema_err(&format!("action {} has no 'kind' tag", index)))?;

    match kind {
        "navigate" => {
            let url = obj
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| schema_err(&format!("navigate action {} has no url", index)))?;
            if url.trim().is_empty() {
                return Err(schema_err(&format!("navigate action {} has empty url", index)));
            }
            Url::parse(url).map_err(|e| {
                schema_err(&format!("navigate action {} has invalid url: {}", index, e))
            })?;
            Ok(Action::Navigate {
                url: url.to_string(),
            })
        }
        "input" => {
            let target = target_from_value(obj, index)?;
            let value = str_field(obj, "value");
            Ok(Action::Input { target, value })
        }
        "click" => {
            let target = target_from_value(obj, index)?;
            Ok(Action::Click { target })
        }
        "wait" => {
            let duration_ms = obj
                .get("duration_ms")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    schema_err(&format!("wait action {} has no integer duration_ms", index))
                })?;
            Ok(Action::Wait { duration_ms })
        }
        "scroll" => {
            let direction = obj
                .get("direction")
                .and_then(|v| v.as_str())
                .and_then(ScrollDirection::from_str)
                .ok_or_else(|| {
                    schema_err(&format!("scroll action {} has no valid direction", index))
                })?;
            Ok(Action::Scroll { direction })
        }
        other => Err(schema_err(&format!(
            "action {} has unrecognized kind '{}'",
            index, other
        ))),
    }
}

fn target_from_value(obj: &serde_json::Map<String, Value>, index: usize) -> Result<ActionTarget> {
    let target = obj
        .get("target")
        .and_then(|v| v.as_object())
        .ok_or_else(|| schema_err(&format!("action {} has no target object", index)))?;

    let element_id = target
        .get("element_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            schema_err(&format!(
                "action {} target has no integer element_id",
                index
            ))
        })?;

    Ok(ActionTarget {
        element_id: element_id as u32,
        element_text: str_field(target, "element_text"),
    })
}
