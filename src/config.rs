use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Conflict policy when a persisted field value exists but the plan supplies
/// its own value for the same input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    PreferStored,
    PreferPlan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub browser: BrowserConfig,
    pub registry: RegistryConfig,
    pub executor: ExecutorConfig,
    pub loop_limits: LoopLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub disable_images: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Outline qualifying elements on the page. Diagnostic only.
    pub highlight_elements: bool,
    /// Minimum rendered width/height in px for an element to qualify.
    pub min_element_size: f64,
    pub max_label_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub navigation_timeout_ms: u64,
    /// Budget for the best-effort post-click navigation race.
    pub click_navigation_timeout_ms: u64,
    pub fill_policy: FillPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopLimits {
    pub max_steps: u32,
    pub max_consecutive_failures: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::default(),
            registry: RegistryConfig::default(),
            executor: ExecutorConfig::default(),
            loop_limits: LoopLimits::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            disable_images: false,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            highlight_elements: true,
            min_element_size: 5.0,
            max_label_len: 50,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 15000,
            click_navigation_timeout_ms: 3000,
            fill_policy: FillPolicy::PreferPlan,
        }
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: 25,
            max_consecutive_failures: 3,
        }
    }
}
