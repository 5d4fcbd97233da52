//! The action loop: capture -> decide -> parse -> execute, one session per
//! browser page, strictly sequential.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser::BrowserSession;
use crate::capture::{Capture, CaptureService};
use crate::config::AgentConfig;
use crate::context::{build_context, page_text_summary, SessionMetadata};
use crate::errors::{AgentError, Result};
use crate::executor::{ActionExecutor, ExecutionOutcome, ExecutionReport};
use crate::history::{SessionHistories, Turn};
use crate::model::ModelClient;
use crate::parser;
use crate::plan::Action;
use crate::registry::ElementRegistry;
use crate::store::FieldValueStore;

const CONTENT_SUMMARY_LEN: usize = 2000;

#[derive(Debug)]
pub enum StepOutcome {
    /// A plan was parsed and executed (possibly aborted part-way).
    Acted(ExecutionReport),
    /// The model answered in prose instead of a plan: the goal is reached or
    /// it needs operator input.
    ModelConcluded(String),
}

#[derive(Debug)]
pub enum RunOutcome {
    Concluded { reply: String, steps: u32 },
    StepLimitReached { steps: u32 },
    AbortedAfterFailures { failures: u32 },
}

pub struct AgentLoop<M: ModelClient> {
    session: BrowserSession,
    registry: ElementRegistry,
    executor: ActionExecutor,
    histories: SessionHistories,
    store: FieldValueStore,
    model: M,
    config: AgentConfig,
    session_id: String,
    metadata: SessionMetadata,
    last_capture: Option<Capture>,
    recent_actions: Vec<Action>,
}

impl<M: ModelClient> AgentLoop<M> {
    pub async fn new(config: AgentConfig, model: M, store: FieldValueStore) -> Result<Self> {
        let session = BrowserSession::new(&config.browser).await?;
        let registry = ElementRegistry::new(config.registry.clone());
        let executor = ActionExecutor::new(config.executor.clone());
        let session_id = Uuid::new_v4().to_string();
        let metadata = SessionMetadata::new(session_id.clone());

        Ok(Self {
            session,
            registry,
            executor,
            histories: SessionHistories::new(),
            store,
            model,
            config,
            session_id,
            metadata,
            last_capture: None,
            recent_actions: Vec::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Load the starting page and take the first capture.
    pub async fn start(&mut self, start_url: &str) -> Result<()> {
        self.session
            .navigate(start_url, self.config.executor.navigation_timeout_ms)
            .await?;
        let capture = CaptureService::capture(&self.session, &mut self.registry).await?;
        self.metadata.record_page(&capture.url);
        self.last_capture = Some(capture);
        Ok(())
    }

    /// One turn of the loop. Parse failures on text with no object at all are
    /// treated as a prose conclusion; schema violations surface so the caller
    /// can request a fresh model turn instead of retrying the same text.
    pub async fn step(&mut self, goal: &str) -> Result<StepOutcome> {
        let capture = match self.last_capture.take() {
            Some(capture) => capture,
            None => CaptureService::capture(&self.session, &mut self.registry).await?,
        };

        let summary = match self.session.outer_html().await {
            Ok(html) => page_text_summary(&html, CONTENT_SUMMARY_LEN),
            Err(e) => {
                warn!(%e, "could not read page HTML for the content summary");
                String::new()
            }
        };

        let context = build_context(goal, &capture, &summary, &self.recent_actions, &self.metadata);
        let input = context.to_string();

        let history = self.histories.replay(&self.session_id);
        let raw = self.model.invoke(&history, &input).await?;
        self.histories.append(
            &self.session_id,
            Turn::user(input).with_visual(capture.image.clone()),
        );
        self.histories
            .append(&self.session_id, Turn::assistant(raw.clone()));

        let plan = match parser::parse(&raw) {
            Ok(plan) => plan,
            Err(AgentError::MalformedPlan(_)) => {
                info!("model replied in prose, no plan to execute");
                return Ok(StepOutcome::ModelConcluded(raw));
            }
            Err(e) => return Err(e),
        };

        info!(
            actions = plan.proposed_actions.len(),
            reasoning = %plan.reasoning,
            "executing plan"
        );
        let report = self
            .executor
            .execute(&plan, &self.session, &mut self.registry, &self.store)
            .await?;

        self.metadata.actions_performed += report.executed.len() as u32;
        self.metadata.record_page(&report.capture.url);
        self.recent_actions = report.executed.clone();
        self.last_capture = Some(report.capture.clone());
        Ok(StepOutcome::Acted(report))
    }

    /// Drive steps until the model concludes, the step limit is hit, or too
    /// many consecutive failures accumulate. Execution-level failures are
    /// caught here and the loop resumes with the last known-good state.
    pub async fn run(&mut self, goal: &str, start_url: &str) -> Result<RunOutcome> {
        self.start(start_url).await?;

        let mut consecutive_failures = 0u32;
        for step in 1..=self.config.loop_limits.max_steps {
            info!(step, "loop iteration");
            match self.step(goal).await {
                Ok(StepOutcome::Acted(report)) => match report.outcome {
                    ExecutionOutcome::Aborted { error, completed } => {
                        warn!(%error, completed, "plan aborted, resuming with refreshed state");
                        consecutive_failures += 1;
                    }
                    _ => consecutive_failures = 0,
                },
                Ok(StepOutcome::ModelConcluded(reply)) => {
                    return Ok(RunOutcome::Concluded { reply, steps: step });
                }
                Err(AgentError::SchemaViolation(msg)) => {
                    // Never retried against the same text: tell the model what
                    // was wrong and ask for a new plan.
                    warn!(%msg, "plan failed validation, requesting a fresh turn");
                    self.histories.append(
                        &self.session_id,
                        Turn::user(format!(
                            "Your previous response could not be used: {}. \
                             Respond with a single valid JSON plan object.",
                            msg
                        )),
                    );
                    consecutive_failures += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(%e, "recoverable step failure, retrying from last good state");
                    consecutive_failures += 1;
                }
                Err(e) => {
                    error!(%e, "unrecoverable step failure");
                    return Err(e);
                }
            }

            if consecutive_failures >= self.config.loop_limits.max_consecutive_failures {
                return Ok(RunOutcome::AbortedAfterFailures {
                    failures: consecutive_failures,
                });
            }
        }

        Ok(RunOutcome::StepLimitReached {
            steps: self.config.loop_limits.max_steps,
        })
    }
}
