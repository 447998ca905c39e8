//! Trigger-based reply option matching for Parley.
//!
//! A [`RuleEngine`] holds per-language rule patterns loaded from an external
//! JSON rule source. Matching normalizes the input text, scans the language's
//! patterns in ascending priority order and returns the options of the first
//! enabled pattern whose triggers hit. Pattern sets are published atomically,
//! so concurrent readers never see a half-applied reload.

mod match_cache;
pub mod pattern_set;
pub mod rule_engine;
pub mod rule_source;
pub mod source_watcher;
pub mod text_normalizer;

pub use pattern_set::RulePattern;
pub use rule_engine::{
    CustomPattern, ReloadOutcome, RuleEngine, RuleEngineOptions, RuleEngineStats, RuleSetOrigin,
    DEFAULT_LANGUAGE,
};
pub use rule_source::{
    builtin_rule_source, load_rule_source, GlobalSettings, LanguageRules, RulePatternSpec,
    RuleSource, RuleSourceError,
};
pub use source_watcher::{start_rule_source_watcher, RuleSourceWatcherHandle};
pub use text_normalizer::normalize_text;
