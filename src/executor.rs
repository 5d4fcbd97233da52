//! Ordered plan execution against a live page.
//!
//! Actions run strictly sequentially in the plan's declared order. A navigate
//! terminates the plan early because it invalidates every element id assigned
//! before it; an unresolvable target aborts the remainder fail-fast. Either
//! way the executor finishes with a fresh capture, so callers always leave
//! with a map that matches the page.

use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, NavigationOutcome};
use crate::capture::{Capture, CaptureService};
use crate::config::ExecutorConfig;
use crate::errors::{AgentError, Result};
use crate::plan::{Action, ActionTarget, Plan};
use crate::registry::ElementRegistry;
use crate::store::FieldValueStore;

#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Every scheduled action ran.
    Completed,
    /// A navigate ran and the rest of the plan was skipped.
    NavigatedEarly { skipped: usize },
    /// An action failed; everything after it was abandoned.
    Aborted { error: AgentError, completed: usize },
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    /// Actions that actually ran, in run order.
    pub executed: Vec<Action>,
    /// State as of the last completed action. Callers must use this map and
    /// discard whatever they held before `execute`.
    pub capture: Capture,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, ExecutionOutcome::Aborted { .. })
    }
}

/// The indices that can run before early termination: the declared order,
/// truncated after the first navigate. Returns the runnable prefix and the
/// count of entries it cuts off.
pub fn execution_prefix(plan: &Plan) -> (Vec<usize>, usize) {
    let order = plan.ordered_indices();
    let mut prefix = Vec::new();
    for &idx in &order {
        prefix.push(idx);
        if matches!(plan.proposed_actions[idx], Action::Navigate { .. }) {
            break;
        }
    }
    let skipped = order.len() - prefix.len();
    (prefix, skipped)
}

enum ActionEffect {
    Continue,
    Navigated,
}

pub struct ActionExecutor {
    config: ExecutorConfig,
}

impl ActionExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(
        &self,
        plan: &Plan,
        session: &BrowserSession,
        registry: &mut ElementRegistry,
        store: &FieldValueStore,
    ) -> Result<ExecutionReport> {
        let (prefix, skipped) = execution_prefix(plan);
        let mut executed = Vec::with_capacity(prefix.len());
        let mut outcome = ExecutionOutcome::Completed;

        for &idx in &prefix {
            let action = &plan.proposed_actions[idx];
            info!(kind = action.kind(), index = idx, "executing action");
            match self.run_action(action, session, registry, store).await {
                Ok(ActionEffect::Continue) => executed.push(action.clone()),
                Ok(ActionEffect::Navigated) => {
                    executed.push(action.clone());
                    outcome = ExecutionOutcome::NavigatedEarly { skipped };
                    break;
                }
                Err(error) => {
                    warn!(kind = action.kind(), index = idx, %error, "action failed, aborting plan");
                    outcome = ExecutionOutcome::Aborted {
                        error,
                        completed: executed.len(),
                    };
                    break;
                }
            }
        }

        // Refresh unconditionally: the map from before this plan ran is dead.
        let capture = CaptureService::capture(session, registry).await?;
        Ok(ExecutionReport {
            outcome,
            executed,
            capture,
        })
    }

    async fn run_action(
        &self,
        action: &Action,
        session: &BrowserSession,
        registry: &mut ElementRegistry,
        store: &FieldValueStore,
    ) -> Result<ActionEffect> {
        match action {
            Action::Navigate { url } => {
                session
                    .navigate(url, self.config.navigation_timeout_ms)
                    .await?;
                Ok(ActionEffect::Navigated)
            }
            Action::Input { target, value } => {
                let label = self.resolve_label(registry, target)?;
                let fill = store
                    .resolve(&label, value, self.config.fill_policy)
                    .to_string();
                let selector = ElementRegistry::selector_for(target.element_id);
                if !session.set_value_selector(&selector, &fill).await? {
                    return Err(AgentError::StaleTarget {
                        id: target.element_id,
                    });
                }
                Ok(ActionEffect::Continue)
            }
            Action::Click { target } => {
                self.resolve_label(registry, target)?;
                let selector = ElementRegistry::selector_for(target.element_id);
                let prior_url = session.current_url();
                if !session.click_selector(&selector).await? {
                    return Err(AgentError::StaleTarget {
                        id: target.element_id,
                    });
                }
                // Best-effort: a click may or may not navigate, and the
                // original loop never told them apart either.
                let outcome = session
                    .wait_for_navigation_outcome(&prior_url, self.config.click_navigation_timeout_ms)
                    .await;
                debug!(?outcome, "post-click navigation race resolved");
                Ok(ActionEffect::Continue)
            }
            Action::Wait { duration_ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(*duration_ms)).await;
                Ok(ActionEffect::Continue)
            }
            Action::Scroll { direction } => {
                session.scroll(*direction).await?;
                Ok(ActionEffect::Continue)
            }
        }
    }

    /// Check the target against the current map and return the label the
    /// registry knows the element by. The echoed text is only compared for
    /// logging, never used for lookup.
    fn resolve_label(&self, registry: &ElementRegistry, target: &ActionTarget) -> Result<String> {
        let element = registry
            .current()
            .get(target.element_id)
            .ok_or(AgentError::StaleTarget {
                id: target.element_id,
            })?;
        if !target.element_text.is_empty() && target.element_text != element.label {
            warn!(
                id = target.element_id,
                expected = %target.element_text,
                actual = %element.label,
                "target text echo does not match current label"
            );
        }
        Ok(element.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ActionTarget, ScrollDirection};

    fn click(id: u32) -> Action {
        Action::Click {
            target: ActionTarget {
                element_id: id,
                element_text: String::new(),
            },
        }
    }

    fn navigate(url: &str) -> Action {
        Action::Navigate {
            url: url.to_string(),
        }
    }

    fn plan(actions: Vec<Action>, order: Option<Vec<usize>>) -> Plan {
        Plan {
            reasoning: String::new(),
            proposed_actions: actions,
            execution_order: order,
            success_criteria: String::new(),
            fallback_strategy: String::new(),
        }
    }

    #[test]
    fn navigate_first_plan_never_schedules_later_actions() {
        let p = plan(
            vec![navigate("https://x.example"), click(5)],
            Some(vec![0, 1]),
        );
        let (prefix, skipped) = execution_prefix(&p);
        assert_eq!(prefix, vec![0]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn plans_without_navigation_run_in_full() {
        let p = plan(
            vec![
                Action::Input {
                    target: ActionTarget {
                        element_id: 3,
                        element_text: String::new(),
                    },
                    value: "a".to_string(),
                },
                click(4),
                Action::Scroll {
                    direction: ScrollDirection::Down,
                },
            ],
            None,
        );
        let (prefix, skipped) = execution_prefix(&p);
        assert_eq!(prefix, vec![0, 1, 2]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn execution_order_controls_the_prefix() {
        let p = plan(
            vec![click(1), navigate("https://x.example"), click(2)],
            Some(vec![2, 0, 1]),
        );
        let (prefix, skipped) = execution_prefix(&p);
        // click(2), click(1), then the navigate terminates the plan.
        assert_eq!(prefix, vec![2, 0, 1]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn mid_plan_navigate_truncates_the_tail() {
        let p = plan(
            vec![
                Action::Wait { duration_ms: 100 },
                navigate("https://x.example"),
                Action::Wait { duration_ms: 100 },
                Action::Scroll {
                    direction: ScrollDirection::Top,
                },
            ],
            None,
        );
        let (prefix, skipped) = execution_prefix(&p);
        assert_eq!(prefix, vec![0, 1]);
        assert_eq!(skipped, 2);
    }
}
