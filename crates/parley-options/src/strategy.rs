//! Strategy contract shared by every option producer.

use thiserror::Error;

use crate::feedback_config::OptionConfig;

/// Inputs visible to a strategy for one resolution.
#[derive(Clone, Copy)]
pub struct OptionContext<'a> {
    pub text: &'a str,
    pub ai_options: Option<&'a [String]>,
    pub config: &'a dyn OptionConfig,
    pub language: &'a str,
}

impl<'a> OptionContext<'a> {
    pub fn new(
        text: &'a str,
        ai_options: Option<&'a [String]>,
        config: &'a dyn OptionConfig,
        language: &'a str,
    ) -> Self {
        Self {
            text,
            ai_options,
            config,
            language,
        }
    }

    /// Character count of the trimmed text.
    pub fn trimmed_text_len(&self) -> usize {
        self.text.trim().chars().count()
    }
}

impl std::fmt::Debug for OptionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionContext")
            .field("text", &self.text)
            .field("ai_options", &self.ai_options)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

/// Static description of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyDescriptor {
    pub name: &'static str,
    pub priority: u32,
    pub min_text_length: usize,
    /// Cap applied by the resolver; `None` keeps the list as produced.
    pub max_options: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub options: Vec<String>,
    pub confidence: f64,
    pub should_stop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("strategy '{strategy}' failed: {reason}")]
pub struct StrategyError {
    pub strategy: String,
    pub reason: String,
}

impl StrategyError {
    pub fn new(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }
}

/// Trait contract for a priority-ordered option producer.
pub trait OptionStrategy: Send + Sync {
    fn descriptor(&self) -> StrategyDescriptor;

    fn is_applicable(&self, context: &OptionContext<'_>) -> bool {
        context.trimmed_text_len() >= self.descriptor().min_text_length
    }

    /// Returns `Ok(None)` when the strategy has nothing to offer.
    fn parse(&self, context: &OptionContext<'_>) -> Result<Option<StrategyOutcome>, StrategyError>;
}
