//! Ordered strategy registry and the resolver that walks it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parley_rules::RuleEngine;
use serde::Serialize;
use tracing::{debug, warn};

use crate::feedback_config::OptionConfig;
use crate::strategies::{AiOptionsStrategy, FallbackOptionsStrategy, RuleEngineStrategy};
use crate::strategy::{OptionContext, OptionStrategy, StrategyOutcome};

/// Strategies kept in ascending priority order.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn OptionStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// AI options, rule engine, then fallback options.
    pub fn with_default_strategies(engine: Arc<RuleEngine>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AiOptionsStrategy));
        registry.register(Arc::new(RuleEngineStrategy::new(engine)));
        registry.register(Arc::new(FallbackOptionsStrategy));
        registry
    }

    /// Inserts after every strategy with the same or lower priority.
    pub fn register(&mut self, strategy: Arc<dyn OptionStrategy>) {
        let priority = strategy.descriptor().priority;
        let position = self
            .strategies
            .iter()
            .position(|existing| existing.descriptor().priority > priority)
            .unwrap_or(self.strategies.len());
        self.strategies.insert(position, strategy);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .map(|strategy| strategy.descriptor().name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn OptionStrategy>> {
        self.strategies.iter()
    }
}

/// Options tagged with the strategy that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOptions {
    pub options: Vec<String>,
    pub strategy: Option<&'static str>,
    pub confidence: f64,
}

impl ResolvedOptions {
    fn empty() -> Self {
        Self {
            options: Vec::new(),
            strategy: None,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
}

/// Outcome of one resolution, including strategies that did not contribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub resolved: ResolvedOptions,
    pub not_applicable: Vec<&'static str>,
    pub empty: Vec<&'static str>,
    pub failed: Vec<StrategyFailure>,
}

enum StrategyRun {
    NotApplicable,
    Empty,
    Produced(StrategyOutcome),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct OptionResolver {
    registry: StrategyRegistry,
}

impl OptionResolver {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    pub fn with_rule_engine(engine: Arc<RuleEngine>) -> Self {
        Self::new(StrategyRegistry::with_default_strategies(engine))
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn resolve(
        &self,
        text: &str,
        ai_options: Option<&[String]>,
        config: &dyn OptionConfig,
        language: &str,
    ) -> Vec<String> {
        self.resolve_with_report(text, ai_options, config, language)
            .resolved
            .options
    }

    #[tracing::instrument(
        level = "debug",
        name = "parley_options.resolve",
        skip_all,
        fields(language = %language, text_chars = text.chars().count())
    )]
    pub fn resolve_with_report(
        &self,
        text: &str,
        ai_options: Option<&[String]>,
        config: &dyn OptionConfig,
        language: &str,
    ) -> ResolutionReport {
        let context = OptionContext::new(text, ai_options, config, language);
        let mut report = ResolutionReport {
            resolved: ResolvedOptions::empty(),
            not_applicable: Vec::new(),
            empty: Vec::new(),
            failed: Vec::new(),
        };

        for strategy in self.registry.iter() {
            let descriptor = strategy.descriptor();
            match run_strategy(strategy.as_ref(), &context) {
                StrategyRun::NotApplicable => report.not_applicable.push(descriptor.name),
                StrategyRun::Empty => report.empty.push(descriptor.name),
                StrategyRun::Failed(reason) => {
                    warn!(
                        reason_code = "option_strategy_failed",
                        strategy = descriptor.name,
                        reason = %reason,
                        "option strategy failed; continuing with next strategy"
                    );
                    report.failed.push(StrategyFailure {
                        strategy: descriptor.name,
                        reason,
                    });
                }
                StrategyRun::Produced(outcome) => {
                    if !outcome.should_stop {
                        debug!(
                            reason_code = "option_strategy_stop_forced",
                            strategy = descriptor.name,
                            "non-empty result ends the chain"
                        );
                    }
                    let mut options = outcome.options;
                    if let Some(cap) = descriptor.max_options {
                        options.truncate(cap);
                    }
                    report.resolved = ResolvedOptions {
                        options,
                        strategy: Some(descriptor.name),
                        confidence: outcome.confidence,
                    };
                    return report;
                }
            }
        }
        debug!(
            reason_code = "option_resolution_empty",
            "no strategy produced options"
        );
        report
    }
}

fn run_strategy(strategy: &dyn OptionStrategy, context: &OptionContext<'_>) -> StrategyRun {
    match catch_unwind(AssertUnwindSafe(|| strategy.is_applicable(context))) {
        Ok(true) => {}
        Ok(false) => return StrategyRun::NotApplicable,
        Err(panic) => return StrategyRun::Failed(panic_message(panic.as_ref())),
    }
    match catch_unwind(AssertUnwindSafe(|| strategy.parse(context))) {
        Ok(Ok(Some(outcome))) if !outcome.options.is_empty() => StrategyRun::Produced(outcome),
        Ok(Ok(_)) => StrategyRun::Empty,
        Ok(Err(error)) => StrategyRun::Failed(error.reason),
        Err(panic) => StrategyRun::Failed(panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
