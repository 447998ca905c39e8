use std::path::{Path, PathBuf};

use parley_core::write_text_atomic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;
pub const MAX_FALLBACK_OPTIONS: usize = 5;
pub const MAX_FALLBACK_OPTION_CHARS: usize = 50;

const DEFAULT_FALLBACK_OPTIONS: [&str; MAX_FALLBACK_OPTIONS] = [
    "好的，我明白了",
    "请继续",
    "需要更多信息",
    "返回上一步",
    "暂停，让我思考一下",
];

/// Config collaborator consumed by option strategies.
pub trait OptionConfig: Send + Sync {
    fn rule_matching_enabled(&self) -> bool;
    fn fallback_options_enabled(&self) -> bool;
    fn fallback_options(&self) -> Vec<String>;
}

#[derive(Debug, Error)]
pub enum FeedbackConfigError {
    #[error("failed to read feedback config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse feedback config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid feedback config: {reason}")]
    Invalid { reason: String },
    #[error("failed to persist feedback config {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

impl FeedbackConfigError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "feedback_config_read_failed",
            Self::Parse { .. } => "feedback_config_parse_failed",
            Self::Invalid { .. } => "feedback_config_invalid",
            Self::Persist { .. } => "feedback_config_persist_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Simple,
    Full,
}

impl DisplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Full => "full",
        }
    }
}

/// Public struct `FeedbackConfig` used across Parley components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub display_mode: DisplayMode,
    pub enable_rule_engine: bool,
    pub enable_custom_options: bool,
    pub fallback_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
    pub default_timeout_seconds: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Simple,
            enable_rule_engine: true,
            enable_custom_options: true,
            fallback_options: DEFAULT_FALLBACK_OPTIONS
                .iter()
                .map(|option| option.to_string())
                .collect(),
            rules_path: None,
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl FeedbackConfig {
    /// Loads the config at `path`, degrading to defaults on any failure.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!(
                reason_code = "feedback_config_missing_using_defaults",
                path = %path.display(),
                "feedback config not found"
            );
            return Self::default();
        }
        match Self::try_load(path) {
            Ok(config) => config,
            Err(error) => {
                warn!(
                    reason_code = error.reason_code(),
                    path = %path.display(),
                    error = %error,
                    "feedback config unusable; using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, FeedbackConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FeedbackConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Err(FeedbackConfigError::Invalid {
                reason: format!("feedback config {} is empty", path.display()),
            });
        }
        let config =
            serde_json::from_str::<Self>(&raw).map_err(|source| FeedbackConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), FeedbackConfigError> {
        self.validate()?;
        let rendered =
            serde_json::to_string_pretty(self).map_err(|error| FeedbackConfigError::Invalid {
                reason: format!("feedback config cannot be serialized: {error}"),
            })?;
        write_text_atomic(path, &rendered).map_err(|error| FeedbackConfigError::Persist {
            path: path.to_path_buf(),
            reason: format!("{error:#}"),
        })
    }

    pub fn validate(&self) -> Result<(), FeedbackConfigError> {
        if self.fallback_options.is_empty() || self.fallback_options.len() > MAX_FALLBACK_OPTIONS
        {
            return Err(FeedbackConfigError::Invalid {
                reason: format!(
                    "fallback_options must hold 1 to {MAX_FALLBACK_OPTIONS} entries, got {}",
                    self.fallback_options.len()
                ),
            });
        }
        for (index, option) in self.fallback_options.iter().enumerate() {
            if option.trim().is_empty() {
                return Err(FeedbackConfigError::Invalid {
                    reason: format!("fallback_options[{index}] cannot be blank"),
                });
            }
            if option.chars().count() > MAX_FALLBACK_OPTION_CHARS {
                return Err(FeedbackConfigError::Invalid {
                    reason: format!(
                        "fallback_options[{index}] exceeds {MAX_FALLBACK_OPTION_CHARS} characters"
                    ),
                });
            }
        }
        if self.default_timeout_seconds == 0 {
            return Err(FeedbackConfigError::Invalid {
                reason: "default_timeout_seconds must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl OptionConfig for FeedbackConfig {
    fn rule_matching_enabled(&self) -> bool {
        self.enable_rule_engine
    }

    fn fallback_options_enabled(&self) -> bool {
        self.enable_custom_options
    }

    fn fallback_options(&self) -> Vec<String> {
        self.fallback_options.clone()
    }
}
