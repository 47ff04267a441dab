pub mod client;
pub mod prompt;

use crate::catalog::TestCase;
use crate::classifier::ModuleVerdict;
use crate::error::ImpactError;

/// What the engine hands the reasoning service when its rules run out.
#[derive(Debug, Clone)]
pub struct DelegateQuery {
    /// Every changed file the rules did not discard, in commit order.
    pub changed_files: Vec<String>,
    /// Distinct catalog modules.
    pub modules: Vec<String>,
    pub catalog: Vec<TestCase>,
    /// Files the rules already placed, with their verdicts.
    pub resolved: Vec<(String, ModuleVerdict)>,
    /// Files no rule matched.
    pub unresolved: Vec<String>,
}

/// Raw answer from the reasoning service. Untrusted until parsed.
#[derive(Debug, Clone)]
pub struct DelegateReply {
    pub text: String,
    pub prompt_hash: String,
    pub cached_tokens: Option<u64>,
}

#[cfg(test)]
impl DelegateReply {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt_hash: String::new(),
            cached_tokens: None,
        }
    }
}

/// A slow, fallible oracle. Implementations must bound their own latency.
pub trait ReasoningDelegate: Send + Sync {
    fn ask(&self, query: &DelegateQuery) -> Result<DelegateReply, ImpactError>;
}
