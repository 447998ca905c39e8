//! Layered reply-option resolution.
//!
//! Strategies run in ascending priority order; the first one producing a
//! non-empty result ends the chain. Strategy failures and panics degrade to
//! "not applicable" so resolution always returns a (possibly empty) list.

pub mod feedback_config;
pub mod resolver;
pub mod strategies;
pub mod strategy;

pub use feedback_config::{
    DisplayMode, FeedbackConfig, FeedbackConfigError, OptionConfig, DEFAULT_TIMEOUT_SECONDS,
    MAX_FALLBACK_OPTIONS, MAX_FALLBACK_OPTION_CHARS,
};
pub use parley_rules::DEFAULT_LANGUAGE;
pub use resolver::{
    OptionResolver, ResolutionReport, ResolvedOptions, StrategyFailure, StrategyRegistry,
};
pub use strategies::{AiOptionsStrategy, FallbackOptionsStrategy, RuleEngineStrategy};
pub use strategy::{
    OptionContext, OptionStrategy, StrategyDescriptor, StrategyError, StrategyOutcome,
};
