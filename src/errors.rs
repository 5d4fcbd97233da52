use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Element scan failed: {0}")]
    ScanFailed(String),

    #[error("No plan object found in model output: {0}")]
    MalformedPlan(String),

    #[error("Plan failed schema validation: {0}")]
    SchemaViolation(String),

    #[error("Stale target: element {id} is not in the current element map")]
    StaleTarget { id: u32 },

    #[error("JavaScript execution failed: {0}")]
    JavaScriptFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Model invocation failed: {0}")]
    ModelFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

// Convert anyhow::Error to AgentError (headless_chrome surfaces anyhow errors)
impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::JavaScriptFailed(err.to_string())
    }
}

impl AgentError {
    /// True for failures the action loop recovers from by retrying with the
    /// last known-good page state instead of surfacing to its caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::ScanFailed(_)
                | AgentError::StaleTarget { .. }
                | AgentError::NavigationFailed(_)
                | AgentError::JavaScriptFailed(_)
        )
    }
}
