//! Per-application request policies and token usage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Policy entry applied to every app without its own entry.
pub const DEFAULT_POLICY_APP: &str = "*";

/// Limits enforced for one application. Zero or empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppPolicy {
    /// Logical model names the app may call; matched case-insensitively
    pub allowed_models: Vec<String>,
    pub max_request_bytes: usize,
    /// Upper bound on the estimated prompt size
    pub max_prompt_tokens: u32,
    /// Checked before the request (prompt estimate doubled) and after it
    pub max_total_tokens: u32,
    /// Only checked after the response; overruns are logged
    pub max_completion_tokens: u32,
}

impl AppPolicy {
    pub fn is_unrestricted(&self) -> bool {
        *self == Self::default()
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty()
            || self.allowed_models.iter().any(|m| m.trim().eq_ignore_ascii_case(model.trim()))
    }
}

/// Contents of a policies file: app name → policy.
pub type PolicyMap = BTreeMap<String, AppPolicy>;

/// Token counts reported by an upstream in its `usage` object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}
