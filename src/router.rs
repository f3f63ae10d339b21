//! Maps a requested capability to a model tier and request configuration.

use crate::error::ServiceError;
use crate::models::ChatMode;
use serde::{Deserialize, Serialize};

/// Reasoning budget attached whenever deep reasoning is requested.
pub const REASONING_BUDGET: u32 = 32768;

pub const DEFAULT_LITE_MODEL: &str = "gemini-2.5-flash-lite-preview-02-05";
pub const DEFAULT_STANDARD_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ADVANCED_MODEL: &str = "gemini-3-pro-preview";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Low latency, no tools.
    Lite,
    /// Supports search grounding.
    Standard,
    /// Deep reasoning and vision.
    Advanced,
}

/// Concrete model identifiers for each tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelCatalog {
    pub lite: String,
    pub standard: String,
    pub advanced: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            lite: DEFAULT_LITE_MODEL.to_string(),
            standard: DEFAULT_STANDARD_MODEL.to_string(),
            advanced: DEFAULT_ADVANCED_MODEL.to_string(),
        }
    }
}

impl ModelCatalog {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Lite => &self.lite,
            ModelTier::Standard => &self.standard,
            ModelTier::Advanced => &self.advanced,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    SearchGrounding,
}

/// Generation settings sent alongside the content parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub system_instruction: Option<String>,
    pub tools: Vec<Tool>,
    pub reasoning_budget: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

impl RequestConfig {
    pub fn has_search_grounding(&self) -> bool {
        self.tools.contains(&Tool::SearchGrounding)
    }

    /// A reasoning budget cannot be combined with an output-length cap.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.reasoning_budget.is_some() && self.max_output_tokens.is_some() {
            return Err(ServiceError::RequestRejected(
                "reasoning budget cannot be combined with max_output_tokens".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    FastChat,
    SearchChat,
    ThinkingChat,
    IssueAnalysis,
    RegistryCheck,
}

impl Capability {
    pub fn for_mode(mode: ChatMode) -> Self {
        match mode {
            ChatMode::Fast => Capability::FastChat,
            ChatMode::Search => Capability::SearchChat,
            ChatMode::Thinking => Capability::ThinkingChat,
        }
    }
}

/// Per-request flags that influence issue analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    pub use_thinking: bool,
    pub has_image: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub tier: ModelTier,
    pub config: RequestConfig,
}

pub fn select_configuration(capability: Capability, options: SelectionOptions) -> Selection {
    let mut config = RequestConfig::default();
    let tier = match capability {
        Capability::FastChat => ModelTier::Lite,
        Capability::SearchChat | Capability::RegistryCheck => {
            config.tools.push(Tool::SearchGrounding);
            ModelTier::Standard
        }
        Capability::ThinkingChat => {
            config.reasoning_budget = Some(REASONING_BUDGET);
            ModelTier::Advanced
        }
        Capability::IssueAnalysis => {
            if options.use_thinking {
                config.reasoning_budget = Some(REASONING_BUDGET);
            }
            if options.use_thinking || options.has_image {
                ModelTier::Advanced
            } else {
                ModelTier::Standard
            }
        }
    };

    log::debug!("Selected {:?} tier for {:?} ({:?})", tier, capability, options);
    Selection { tier, config }
}
