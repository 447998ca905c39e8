//! External rule-source schema, validation and the built-in default set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const RULE_SOURCE_VERSION: &str = "1.0";
const DEFAULT_MAX_OPTIONS: usize = 3;

fn default_version() -> String {
    RULE_SOURCE_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_options() -> usize {
    DEFAULT_MAX_OPTIONS
}

/// Errors raised while reading, validating or persisting a rule source.
#[derive(Debug, Error)]
pub enum RuleSourceError {
    #[error("failed to read rule source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rule source {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid rule source: {reason}")]
    Invalid { reason: String },
    #[error("pattern '{name}' not found for language '{language}'")]
    UnknownPattern { language: String, name: String },
    #[error("failed to persist rule source {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

impl RuleSourceError {
    /// Stable reason code used in structured logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "rule_source_read_failed",
            Self::Parse { .. } => "rule_source_parse_failed",
            Self::Invalid { .. } => "rule_source_invalid",
            Self::UnknownPattern { .. } => "rule_source_unknown_pattern",
            Self::Persist { .. } => "rule_source_persist_failed",
        }
    }
}

/// Root document of a rule source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    #[serde(default = "default_version")]
    pub version: String,
    pub languages: BTreeMap<String, LanguageRules>,
    #[serde(default)]
    pub global_settings: GlobalSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LanguageRules {
    pub patterns: BTreeMap<String, RulePatternSpec>,
}

/// One pattern as written in the rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePatternSpec {
    pub triggers: Vec<String>,
    pub options: Vec<String>,
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_max_options")]
    pub max_options: usize,
    /// Accepted for compatibility; matching is always case-folded.
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_true")]
    pub hot_reload: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_options: DEFAULT_MAX_OPTIONS,
            case_sensitive: false,
            cache_enabled: true,
            hot_reload: true,
        }
    }
}

impl RuleSource {
    /// Checks structural constraints serde cannot express.
    pub fn validate(&self) -> Result<(), RuleSourceError> {
        if self.languages.is_empty() {
            return Err(RuleSourceError::Invalid {
                reason: "languages must contain at least one language".to_string(),
            });
        }
        if self.global_settings.max_options == 0 {
            return Err(RuleSourceError::Invalid {
                reason: "global_settings.max_options must be greater than zero".to_string(),
            });
        }
        for (language, rules) in &self.languages {
            if language.trim().is_empty() {
                return Err(RuleSourceError::Invalid {
                    reason: "language code cannot be blank".to_string(),
                });
            }
            for (name, pattern) in &rules.patterns {
                if name.trim().is_empty() {
                    return Err(RuleSourceError::Invalid {
                        reason: format!("language '{language}' has a pattern with a blank name"),
                    });
                }
                pattern.validate().map_err(|reason| RuleSourceError::Invalid {
                    reason: format!("pattern '{language}/{name}': {reason}"),
                })?;
            }
        }
        Ok(())
    }

    /// Serializes the document the way it is persisted on disk.
    pub fn to_pretty_json(&self) -> Result<String, RuleSourceError> {
        serde_json::to_string_pretty(self).map_err(|error| RuleSourceError::Invalid {
            reason: format!("rule source cannot be serialized: {error}"),
        })
    }
}

impl RulePatternSpec {
    fn validate(&self) -> Result<(), String> {
        if !self.triggers.iter().any(|trigger| !trigger.trim().is_empty()) {
            return Err("triggers must contain at least one non-blank entry".to_string());
        }
        if !self.options.iter().any(|option| !option.trim().is_empty()) {
            return Err("options must contain at least one non-blank entry".to_string());
        }
        Ok(())
    }
}

/// Reads and validates a rule source file.
pub fn load_rule_source(path: &Path) -> Result<RuleSource, RuleSourceError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_rule_source(path, &raw)
}

pub(crate) fn parse_rule_source(path: &Path, raw: &str) -> Result<RuleSource, RuleSourceError> {
    if raw.trim().is_empty() {
        return Err(RuleSourceError::Invalid {
            reason: format!("rule source {} is empty", path.display()),
        });
    }
    let source =
        serde_json::from_str::<RuleSource>(raw).map_err(|source| RuleSourceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    source.validate()?;
    Ok(source)
}

fn pattern(triggers: &[&str], options: &[&str], priority: i64) -> RulePatternSpec {
    RulePatternSpec {
        triggers: triggers.iter().map(|value| value.to_string()).collect(),
        options: options.iter().map(|value| value.to_string()).collect(),
        priority,
        enabled: true,
        description: None,
    }
}

/// Small default pattern set used whenever the external source is unusable.
pub fn builtin_rule_source() -> RuleSource {
    let mut zh_patterns = BTreeMap::new();
    zh_patterns.insert(
        "question".to_string(),
        pattern(
            &["?", "？", "是否", "如何", "怎么", "什么", "为什么", "吗"],
            &["是的", "不是", "需要更多信息"],
            1,
        ),
    );
    zh_patterns.insert(
        "confirmation".to_string(),
        pattern(
            &["确认", "同意", "继续", "下一步", "开始", "执行", "好的"],
            &["好的，继续", "我明白了", "暂停一下"],
            2,
        ),
    );

    let mut en_patterns = BTreeMap::new();
    en_patterns.insert(
        "question".to_string(),
        pattern(
            &["?", "should i", "do you want", "would you like", "which"],
            &["Yes", "No", "Need more information"],
            1,
        ),
    );
    en_patterns.insert(
        "confirmation".to_string(),
        pattern(
            &["confirm", "proceed", "continue", "next step", "ready to"],
            &["Go ahead", "Got it", "Hold on"],
            2,
        ),
    );

    let mut languages = BTreeMap::new();
    languages.insert(
        "zh_CN".to_string(),
        LanguageRules {
            patterns: zh_patterns,
        },
    );
    languages.insert(
        "en_US".to_string(),
        LanguageRules {
            patterns: en_patterns,
        },
    );

    RuleSource {
        version: default_version(),
        languages,
        global_settings: GlobalSettings::default(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{builtin_rule_source, load_rule_source, parse_rule_source, RuleSourceError};

    const VALID_SOURCE: &str = r#"{
        "languages": {
            "en_US": {
                "patterns": {
                    "question": {"triggers": ["?"], "options": ["Yes", "No"], "priority": 1}
                }
            }
        }
    }"#;

    #[test]
    fn unit_parse_rule_source_applies_defaults() {
        let source = parse_rule_source(Path::new("rules.json"), VALID_SOURCE).expect("valid");
        assert_eq!(source.version, "1.0");
        assert_eq!(source.global_settings.max_options, 3);
        assert!(source.global_settings.cache_enabled);
        assert!(source.global_settings.hot_reload);
        let pattern = &source.languages["en_US"].patterns["question"];
        assert!(pattern.enabled);
    }

    #[test]
    fn unit_builtin_rule_source_is_valid() {
        let source = builtin_rule_source();
        source.validate().expect("builtin must validate");
        assert!(source.languages.contains_key("zh_CN"));
        assert!(source.languages.contains_key("en_US"));
    }

    #[test]
    fn regression_parse_rule_source_rejects_missing_languages() {
        let error = parse_rule_source(Path::new("rules.json"), r#"{"languages": {}}"#)
            .expect_err("empty languages must fail");
        assert!(matches!(error, RuleSourceError::Invalid { .. }));
    }

    #[test]
    fn regression_parse_rule_source_rejects_non_integer_priority() {
        let raw = r#"{"languages": {"en_US": {"patterns": {
            "q": {"triggers": ["?"], "options": ["Yes"], "priority": "high"}
        }}}}"#;
        let error = parse_rule_source(Path::new("rules.json"), raw).expect_err("must fail");
        assert_eq!(error.reason_code(), "rule_source_parse_failed");
    }

    #[test]
    fn regression_parse_rule_source_rejects_blank_only_triggers() {
        let raw = r#"{"languages": {"en_US": {"patterns": {
            "q": {"triggers": ["  "], "options": ["Yes"], "priority": 1}
        }}}}"#;
        let error = parse_rule_source(Path::new("rules.json"), raw).expect_err("must fail");
        assert!(error.to_string().contains("en_US/q"));
    }

    #[test]
    fn regression_parse_rule_source_rejects_empty_document() {
        let error = parse_rule_source(Path::new("rules.json"), "  \n").expect_err("must fail");
        assert_eq!(error.reason_code(), "rule_source_invalid");
    }

    #[test]
    fn functional_load_rule_source_reports_missing_file_as_io_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = load_rule_source(&temp.path().join("missing.json")).expect_err("missing");
        assert_eq!(error.reason_code(), "rule_source_read_failed");
    }
}
