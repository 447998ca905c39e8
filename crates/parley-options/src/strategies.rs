use std::sync::Arc;

use parley_rules::RuleEngine;

use crate::feedback_config::MAX_FALLBACK_OPTIONS;
use crate::strategy::{
    OptionContext, OptionStrategy, StrategyDescriptor, StrategyError, StrategyOutcome,
};

const AI_CONFIDENCE: f64 = 1.0;
const RULE_BASE_CONFIDENCE: f64 = 0.8;
const FALLBACK_CONFIDENCE: f64 = 0.5;

fn non_blank_trimmed(options: &[String]) -> Vec<String> {
    options
        .iter()
        .map(|option| option.trim())
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect()
}

/// Options proposed by the caller; they always win when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AiOptionsStrategy;

impl OptionStrategy for AiOptionsStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            name: "ai_options",
            priority: 0,
            min_text_length: 0,
            max_options: None,
        }
    }

    fn is_applicable(&self, context: &OptionContext<'_>) -> bool {
        context
            .ai_options
            .is_some_and(|options| options.iter().any(|option| !option.trim().is_empty()))
    }

    fn parse(&self, context: &OptionContext<'_>) -> Result<Option<StrategyOutcome>, StrategyError> {
        let options = non_blank_trimmed(context.ai_options.unwrap_or_default());
        if options.is_empty() {
            return Ok(None);
        }
        Ok(Some(StrategyOutcome {
            options,
            confidence: AI_CONFIDENCE,
            should_stop: true,
        }))
    }
}

/// Options from trigger patterns matched against the prompt text.
#[derive(Debug, Clone)]
pub struct RuleEngineStrategy {
    engine: Arc<RuleEngine>,
}

impl RuleEngineStrategy {
    pub fn new(engine: Arc<RuleEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    fn confidence(options: &[String], context: &OptionContext<'_>) -> f64 {
        if options.is_empty() {
            return 0.0;
        }
        let mut confidence = match options.len() {
            1 => RULE_BASE_CONFIDENCE * 0.7,
            2..=3 => RULE_BASE_CONFIDENCE,
            _ => RULE_BASE_CONFIDENCE * 0.8,
        };

        let text_len = context.trimmed_text_len();
        if text_len < 5 {
            confidence *= 0.7;
        } else if text_len > 20 {
            confidence *= 1.1;
        }

        confidence *= match context.language {
            "zh_CN" => 1.05,
            "en_US" => 1.0,
            _ => 0.9,
        };
        confidence.clamp(0.0, 1.0)
    }
}

impl OptionStrategy for RuleEngineStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            name: "rule_engine",
            priority: 1,
            min_text_length: 2,
            max_options: None,
        }
    }

    fn is_applicable(&self, context: &OptionContext<'_>) -> bool {
        context.config.rule_matching_enabled()
            && context.trimmed_text_len() >= self.descriptor().min_text_length
    }

    fn parse(&self, context: &OptionContext<'_>) -> Result<Option<StrategyOutcome>, StrategyError> {
        let options = self
            .engine
            .match_options(context.text.trim(), context.language);
        if options.is_empty() {
            return Ok(None);
        }
        let confidence = Self::confidence(&options, context);
        Ok(Some(StrategyOutcome {
            options,
            confidence,
            should_stop: true,
        }))
    }
}

/// Statically configured options offered when nothing else matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackOptionsStrategy;

impl OptionStrategy for FallbackOptionsStrategy {
    fn descriptor(&self) -> StrategyDescriptor {
        StrategyDescriptor {
            name: "fallback_options",
            priority: 2,
            min_text_length: 0,
            max_options: Some(MAX_FALLBACK_OPTIONS),
        }
    }

    fn is_applicable(&self, context: &OptionContext<'_>) -> bool {
        context.config.fallback_options_enabled()
    }

    fn parse(&self, context: &OptionContext<'_>) -> Result<Option<StrategyOutcome>, StrategyError> {
        let options = context
            .config
            .fallback_options()
            .into_iter()
            .filter(|option| !option.trim().is_empty())
            .collect::<Vec<_>>();
        if options.is_empty() {
            return Ok(None);
        }
        Ok(Some(StrategyOutcome {
            options,
            confidence: FALLBACK_CONFIDENCE,
            should_stop: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_rules::RuleEngine;

    use super::{AiOptionsStrategy, FallbackOptionsStrategy, RuleEngineStrategy};
    use crate::feedback_config::FeedbackConfig;
    use crate::strategy::{OptionContext, OptionStrategy};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn unit_ai_options_strategy_trims_and_drops_blank_entries() {
        let config = FeedbackConfig::default();
        let ai_options = strings(&["  A ", "", "   ", "B"]);
        let context = OptionContext::new("", Some(&ai_options), &config, "en_US");
        assert!(AiOptionsStrategy.is_applicable(&context));
        let outcome = AiOptionsStrategy
            .parse(&context)
            .expect("parse")
            .expect("outcome");
        assert_eq!(outcome.options, strings(&["A", "B"]));
        assert_eq!(outcome.confidence, 1.0);
        assert!(outcome.should_stop);
    }

    #[test]
    fn unit_ai_options_strategy_is_not_applicable_for_blank_lists() {
        let config = FeedbackConfig::default();
        let blank = strings(&[" ", ""]);
        assert!(!AiOptionsStrategy.is_applicable(&OptionContext::new(
            "text",
            Some(&blank),
            &config,
            "en_US"
        )));
        assert!(!AiOptionsStrategy.is_applicable(&OptionContext::new(
            "text", None, &config, "en_US"
        )));
    }

    #[test]
    fn unit_rule_engine_strategy_confidence_follows_length_and_language() {
        let config = FeedbackConfig::default();
        let three = strings(&["a", "b", "c"]);
        let long_zh = OptionContext::new(
            "这是一个足够长的问题，我们应该继续部署到生产环境吗",
            None,
            &config,
            "zh_CN",
        );
        let confidence = RuleEngineStrategy::confidence(&three, &long_zh);
        assert!((confidence - 0.8 * 1.1 * 1.05).abs() < 1e-9);

        let short_en = OptionContext::new("ok?", None, &config, "en_US");
        let single = strings(&["a"]);
        let confidence = RuleEngineStrategy::confidence(&single, &short_en);
        assert!((confidence - 0.8 * 0.7 * 0.7).abs() < 1e-9);

        let other = OptionContext::new("medium text", None, &config, "fr_FR");
        let many = strings(&["a", "b", "c", "d"]);
        let confidence = RuleEngineStrategy::confidence(&many, &other);
        assert!((confidence - 0.8 * 0.8 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn functional_rule_engine_strategy_respects_config_and_text_length() {
        let strategy = RuleEngineStrategy::new(Arc::new(RuleEngine::builtin()));
        let mut config = FeedbackConfig::default();
        let context = OptionContext::new("Should I continue?", None, &config, "en_US");
        assert!(strategy.is_applicable(&context));
        let outcome = strategy.parse(&context).expect("parse").expect("outcome");
        assert_eq!(outcome.options, strings(&["Yes", "No", "Need more information"]));

        assert!(!strategy.is_applicable(&OptionContext::new(" ? ", None, &config, "en_US")));
        config.enable_rule_engine = false;
        assert!(!strategy.is_applicable(&OptionContext::new(
            "Should I continue?",
            None,
            &config,
            "en_US"
        )));
    }

    #[test]
    fn functional_fallback_strategy_returns_configured_list_in_order() {
        let config = FeedbackConfig {
            fallback_options: strings(&["Later", "Now"]),
            ..FeedbackConfig::default()
        };
        let context = OptionContext::new("anything", None, &config, "en_US");
        assert!(FallbackOptionsStrategy.is_applicable(&context));
        let outcome = FallbackOptionsStrategy
            .parse(&context)
            .expect("parse")
            .expect("outcome");
        assert_eq!(outcome.options, strings(&["Later", "Now"]));
        assert_eq!(outcome.confidence, 0.5);

        let disabled = FeedbackConfig {
            enable_custom_options: false,
            ..FeedbackConfig::default()
        };
        assert!(!FallbackOptionsStrategy.is_applicable(&OptionContext::new(
            "anything", None, &disabled, "en_US"
        )));
    }
}
