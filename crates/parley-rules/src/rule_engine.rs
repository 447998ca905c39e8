//! Hot-reloadable, cached rule engine.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::{ArcSwap, ArcSwapOption};
use parley_core::write_text_atomic;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::match_cache::{lock_or_recover, MatchCache};
use crate::pattern_set::{PatternSet, RulePattern};
use crate::rule_source::{
    builtin_rule_source, load_rule_source, GlobalSettings, RulePatternSpec, RuleSource,
    RuleSourceError,
};
use crate::text_normalizer::normalize_text;

/// Language used when a request names a language the rule source lacks.
pub const DEFAULT_LANGUAGE: &str = "zh_CN";

const DEFAULT_CACHE_CAPACITY: usize = 512;
const DEFAULT_CUSTOM_PATTERN_PRIORITY: i64 = 10;
const FINGERPRINT_UNCHANGED: &str = "rule_source_fingerprint_unchanged";
const NO_SOURCE_PATH: &str = "rule_source_path_not_configured";

/// Where the currently published pattern set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSetOrigin {
    File,
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SourceFingerprint {
    exists: bool,
    len: Option<u64>,
    modified: Option<SystemTime>,
}

impl SourceFingerprint {
    fn read(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(metadata) => Self {
                exists: true,
                len: Some(metadata.len()),
                modified: metadata.modified().ok(),
            },
            Err(_) => Self {
                exists: false,
                len: None,
                modified: None,
            },
        }
    }
}

#[derive(Debug)]
struct RuleSnapshot {
    generation: u64,
    origin: RuleSetOrigin,
    source: RuleSource,
    patterns: PatternSet,
}

impl RuleSnapshot {
    fn build(
        source: RuleSource,
        origin: RuleSetOrigin,
        generation: u64,
    ) -> Result<Self, RuleSourceError> {
        let patterns = PatternSet::compile(&source)?;
        Ok(Self {
            generation,
            origin,
            source,
            patterns,
        })
    }

    fn builtin(generation: u64) -> Self {
        let source = builtin_rule_source();
        let patterns = PatternSet::compile(&source).unwrap_or_else(|_| PatternSet::empty());
        Self {
            generation,
            origin: RuleSetOrigin::BuiltIn,
            source,
            patterns,
        }
    }

    fn settings(&self) -> GlobalSettings {
        self.source.global_settings
    }
}

/// Tunables that do not live in the rule source itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEngineOptions {
    pub cache_capacity: usize,
    pub default_language: String,
}

impl Default for RuleEngineOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// A pattern added at runtime through [`RuleEngine::add_custom_pattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomPattern {
    pub triggers: Vec<String>,
    pub options: Vec<String>,
    pub priority: i64,
}

impl CustomPattern {
    pub fn new(
        triggers: impl IntoIterator<Item = impl Into<String>>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
            options: options.into_iter().map(Into::into).collect(),
            priority: DEFAULT_CUSTOM_PATTERN_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    fn into_spec(self, name: &str) -> RulePatternSpec {
        RulePatternSpec {
            triggers: self.triggers,
            options: self.options,
            priority: self.priority,
            enabled: true,
            description: Some(format!("custom pattern: {name}")),
        }
    }
}

/// Result of one reload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Applied {
        generation: u64,
        source_path: PathBuf,
    },
    NoChange {
        diagnostic: String,
    },
    Invalid {
        diagnostic: String,
    },
    MissingSource {
        source_path: PathBuf,
    },
}

impl ReloadOutcome {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "rule_source_reloaded",
            Self::NoChange { .. } => "rule_source_no_change",
            Self::Invalid { .. } => "rule_source_invalid_kept_previous",
            Self::MissingSource { .. } => "rule_source_missing_kept_previous",
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEngineStats {
    pub load_count: u64,
    pub match_count: u64,
    pub cache_hit_count: u64,
    pub cache_hit_rate_percent: f64,
    pub error_count: u64,
    pub cache_size: usize,
    pub cache_enabled: bool,
    pub available_languages: Vec<String>,
    pub source_path: Option<String>,
    pub origin: RuleSetOrigin,
    pub generation: u64,
}

/// Matches text against per-language rule patterns.
///
/// Readers load the current pattern set through an [`ArcSwap`] and never
/// block on reloads; reloads and custom-pattern edits serialize on an
/// internal write lock, build the next pattern set completely and publish it
/// with a single swap.
pub struct RuleEngine {
    source_path: Option<PathBuf>,
    options: RuleEngineOptions,
    snapshot: ArcSwap<RuleSnapshot>,
    observed_fingerprint: ArcSwapOption<SourceFingerprint>,
    write_lock: Mutex<()>,
    cache: MatchCache,
    load_count: AtomicU64,
    match_count: AtomicU64,
    cache_hit_count: AtomicU64,
    error_count: AtomicU64,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("RuleEngine")
            .field("source_path", &self.source_path)
            .field("origin", &snapshot.origin)
            .field("generation", &snapshot.generation)
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Engine backed only by the built-in default patterns.
    pub fn builtin() -> Self {
        Self::builtin_with_options(RuleEngineOptions::default())
    }

    pub fn builtin_with_options(options: RuleEngineOptions) -> Self {
        Self::with_snapshot(None, options, RuleSnapshot::builtin(1), None, 0)
    }

    /// Engine backed by the JSON rule source at `path`.
    ///
    /// A missing or malformed source falls back to the built-in patterns; the
    /// engine keeps watching the path and picks the file up once it becomes
    /// valid.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::from_path_with_options(path, RuleEngineOptions::default())
    }

    pub fn from_path_with_options(path: impl Into<PathBuf>, options: RuleEngineOptions) -> Self {
        let path = path.into();
        let fingerprint = SourceFingerprint::read(&path);
        let loaded = load_rule_source(&path)
            .and_then(|source| RuleSnapshot::build(source, RuleSetOrigin::File, 1));
        match loaded {
            Ok(snapshot) => {
                info!(
                    reason_code = "rule_source_loaded",
                    path = %path.display(),
                    languages = snapshot.source.languages.len(),
                    "loaded rule source"
                );
                Self::with_snapshot(Some(path), options, snapshot, Some(fingerprint), 1)
            }
            Err(error) => {
                warn!(
                    reason_code = "rule_source_invalid_fallback_builtin",
                    source_reason_code = error.reason_code(),
                    path = %path.display(),
                    error = %error,
                    "rule source unusable; using built-in patterns"
                );
                let engine = Self::with_snapshot(
                    Some(path),
                    options,
                    RuleSnapshot::builtin(1),
                    Some(fingerprint),
                    0,
                );
                engine.error_count.fetch_add(1, Ordering::Relaxed);
                engine
            }
        }
    }

    fn with_snapshot(
        source_path: Option<PathBuf>,
        options: RuleEngineOptions,
        snapshot: RuleSnapshot,
        fingerprint: Option<SourceFingerprint>,
        load_count: u64,
    ) -> Self {
        let cache = MatchCache::new(options.cache_capacity);
        Self {
            source_path,
            options,
            snapshot: ArcSwap::from_pointee(snapshot),
            observed_fingerprint: ArcSwapOption::new(fingerprint.map(Arc::new)),
            write_lock: Mutex::new(()),
            cache,
            load_count: AtomicU64::new(load_count),
            match_count: AtomicU64::new(0),
            cache_hit_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Returns the options of the first matching pattern, truncated to
    /// `global_settings.max_options`, or an empty list.
    pub fn match_options(&self, text: &str, language: &str) -> Vec<String> {
        self.match_count.fetch_add(1, Ordering::Relaxed);
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.snapshot.load().settings().hot_reload {
            self.refresh_if_source_changed();
        }

        let snapshot = self.snapshot.load_full();
        let settings = snapshot.settings();
        if settings.cache_enabled {
            if let Some(options) = self.cache.get(language, text, snapshot.generation) {
                self.cache_hit_count.fetch_add(1, Ordering::Relaxed);
                return options;
            }
        }

        let options = self.match_uncached(&snapshot, text, language);
        if settings.cache_enabled {
            self.cache
                .insert(language, text, snapshot.generation, options.as_slice());
        }
        options
    }

    fn match_uncached(&self, snapshot: &RuleSnapshot, text: &str, language: &str) -> Vec<String> {
        let compiled = snapshot
            .patterns
            .language(language)
            .or_else(|| snapshot.patterns.language(&self.options.default_language));
        let Some(compiled) = compiled else {
            return Vec::new();
        };
        let normalized = normalize_text(text);
        match compiled.first_match(&normalized) {
            Some(pattern) => {
                debug!(
                    pattern = %pattern.id,
                    language = %language,
                    "rule pattern matched"
                );
                pattern
                    .options
                    .iter()
                    .take(snapshot.settings().max_options)
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn refresh_if_source_changed(&self) {
        let Some(path) = self.source_path.as_deref() else {
            return;
        };
        let current = SourceFingerprint::read(path);
        let previous = self.observed_fingerprint.load_full();
        if previous.as_deref() != Some(&current) {
            let _ = self.reload_if_changed();
        }
    }

    /// Reloads the source when its fingerprint changed since the last check.
    pub fn reload_if_changed(&self) -> ReloadOutcome {
        self.refresh(false)
    }

    /// Reloads the source unconditionally.
    pub fn reload(&self) -> ReloadOutcome {
        self.refresh(true)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn refresh(&self, force: bool) -> ReloadOutcome {
        let _guard = lock_or_recover(&self.write_lock);
        let Some(path) = self.source_path.as_deref() else {
            return ReloadOutcome::NoChange {
                diagnostic: NO_SOURCE_PATH.to_string(),
            };
        };

        let current = SourceFingerprint::read(path);
        let previous = self.observed_fingerprint.load_full();
        let changed = previous.as_deref() != Some(&current);
        let exists = current.exists;
        self.observed_fingerprint.store(Some(Arc::new(current)));
        if !force && !changed {
            return ReloadOutcome::NoChange {
                diagnostic: FINGERPRINT_UNCHANGED.to_string(),
            };
        }

        let outcome = if !exists {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            ReloadOutcome::MissingSource {
                source_path: path.to_path_buf(),
            }
        } else {
            match load_rule_source(path)
                .and_then(|source| self.publish(source, RuleSetOrigin::File))
            {
                Ok(generation) => {
                    self.load_count.fetch_add(1, Ordering::Relaxed);
                    ReloadOutcome::Applied {
                        generation,
                        source_path: path.to_path_buf(),
                    }
                }
                Err(error) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    ReloadOutcome::Invalid {
                        diagnostic: format!("{}: {error}", error.reason_code()),
                    }
                }
            }
        };
        emit_reload_outcome(&outcome);
        outcome
    }

    /// Builds the next snapshot and swaps it in. Callers hold `write_lock`.
    fn publish(&self, source: RuleSource, origin: RuleSetOrigin) -> Result<u64, RuleSourceError> {
        let generation = self.snapshot.load().generation.saturating_add(1);
        let snapshot = RuleSnapshot::build(source, origin, generation)?;
        self.snapshot.store(Arc::new(snapshot));
        self.cache.clear();
        Ok(generation)
    }

    /// Adds (or replaces) a pattern, persists the source and publishes it.
    pub fn add_custom_pattern(
        &self,
        language: &str,
        name: &str,
        pattern: CustomPattern,
    ) -> Result<(), RuleSourceError> {
        let _guard = lock_or_recover(&self.write_lock);
        let mut source = self.snapshot.load().source.clone();
        source
            .languages
            .entry(language.to_string())
            .or_default()
            .patterns
            .insert(name.to_string(), pattern.into_spec(name));
        source.validate()?;
        self.persist_and_publish(source)?;
        info!(
            reason_code = "rule_pattern_added",
            language = %language,
            pattern = %name,
            "custom rule pattern added"
        );
        Ok(())
    }

    /// Removes a pattern, persists the source and publishes it.
    pub fn remove_pattern(&self, language: &str, name: &str) -> Result<(), RuleSourceError> {
        let _guard = lock_or_recover(&self.write_lock);
        let mut source = self.snapshot.load().source.clone();
        let removed = source
            .languages
            .get_mut(language)
            .and_then(|rules| rules.patterns.remove(name));
        if removed.is_none() {
            return Err(RuleSourceError::UnknownPattern {
                language: language.to_string(),
                name: name.to_string(),
            });
        }
        source.validate()?;
        self.persist_and_publish(source)?;
        info!(
            reason_code = "rule_pattern_removed",
            language = %language,
            pattern = %name,
            "rule pattern removed"
        );
        Ok(())
    }

    fn persist_and_publish(&self, source: RuleSource) -> Result<(), RuleSourceError> {
        let origin = match self.source_path.as_deref() {
            Some(path) => {
                let rendered = source.to_pretty_json()?;
                write_text_atomic(path, &rendered).map_err(|error| RuleSourceError::Persist {
                    path: path.to_path_buf(),
                    reason: format!("{error:#}"),
                })?;
                self.observed_fingerprint
                    .store(Some(Arc::new(SourceFingerprint::read(path))));
                RuleSetOrigin::File
            }
            None => self.snapshot.load().origin,
        };
        self.publish(source, origin)?;
        Ok(())
    }

    pub fn available_languages(&self) -> Vec<String> {
        self.snapshot.load().patterns.language_codes()
    }

    /// Patterns of `language` in scan order; empty for unknown languages.
    pub fn patterns_for_language(&self, language: &str) -> Vec<RulePattern> {
        self.snapshot
            .load()
            .patterns
            .language(language)
            .map(|compiled| compiled.patterns().to_vec())
            .unwrap_or_default()
    }

    pub fn max_options(&self) -> usize {
        self.snapshot.load().settings().max_options
    }

    pub fn hot_reload_enabled(&self) -> bool {
        self.snapshot.load().settings().hot_reload
    }

    pub fn origin(&self) -> RuleSetOrigin {
        self.snapshot.load().origin
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.load().generation
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Returns a copy of the rule source document currently published.
    pub fn source_document(&self) -> RuleSource {
        self.snapshot.load().source.clone()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> RuleEngineStats {
        let snapshot = self.snapshot.load();
        let match_count = self.match_count.load(Ordering::Relaxed);
        let cache_hit_count = self.cache_hit_count.load(Ordering::Relaxed);
        let cache_hit_rate_percent = if match_count == 0 {
            0.0
        } else {
            let rate = cache_hit_count as f64 / match_count as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };
        RuleEngineStats {
            load_count: self.load_count.load(Ordering::Relaxed),
            match_count,
            cache_hit_count,
            cache_hit_rate_percent,
            error_count: self.error_count.load(Ordering::Relaxed),
            cache_size: self.cache.len(),
            cache_enabled: snapshot.settings().cache_enabled,
            available_languages: snapshot.patterns.language_codes(),
            source_path: self
                .source_path
                .as_ref()
                .map(|path| path.display().to_string()),
            origin: snapshot.origin,
            generation: snapshot.generation,
        }
    }
}

fn emit_reload_outcome(outcome: &ReloadOutcome) {
    match outcome {
        ReloadOutcome::Applied {
            generation,
            source_path,
        } => info!(
            reason_code = outcome.reason_code(),
            generation = *generation,
            path = %source_path.display(),
            "rule source reloaded"
        ),
        ReloadOutcome::NoChange { diagnostic } => debug!(
            reason_code = outcome.reason_code(),
            diagnostic = %diagnostic,
            "rule source reload observed no change"
        ),
        ReloadOutcome::Invalid { diagnostic } => warn!(
            reason_code = outcome.reason_code(),
            diagnostic = %diagnostic,
            "rule source reload rejected invalid update"
        ),
        ReloadOutcome::MissingSource { source_path } => warn!(
            reason_code = outcome.reason_code(),
            path = %source_path.display(),
            "rule source missing during reload"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::{CustomPattern, ReloadOutcome, RuleEngine, RuleEngineOptions, RuleSetOrigin};
    use crate::rule_source::RuleSourceError;

    fn write_source(path: &Path, body: &str) {
        std::fs::write(path, body).expect("write rule source");
    }

    fn single_pattern_source(language: &str, triggers: &str, options: &str, extra: &str) -> String {
        format!(
            r#"{{
                "languages": {{
                    "{language}": {{
                        "patterns": {{
                            "sample": {{"triggers": {triggers}, "options": {options}, "priority": 1}}
                        }}
                    }}
                }}{extra}
            }}"#
        )
    }

    #[test]
    fn functional_match_options_returns_pattern_options_for_trigger_hit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("zh_CN", r#"["吗", "?"]"#, r#"["Yes", "No", "Unsure"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);

        assert_eq!(engine.origin(), RuleSetOrigin::File);
        assert_eq!(
            engine.match_options("你决定了吗", "zh_CN"),
            vec!["Yes".to_string(), "No".to_string(), "Unsure".to_string()]
        );
        assert!(engine.match_options("nothing special", "zh_CN").is_empty());
    }

    #[test]
    fn functional_match_options_truncates_to_max_options() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source(
                "en_US",
                r#"["deploy"]"#,
                r#"["A", "B", "C", "D"]"#,
                r#", "global_settings": {"max_options": 2}"#,
            ),
        );
        let engine = RuleEngine::from_path(&path);
        assert_eq!(engine.max_options(), 2);
        assert_eq!(
            engine.match_options("Deploy to staging", "en_US"),
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn functional_match_options_falls_back_to_default_language() {
        let engine = RuleEngine::builtin();
        let fallback = engine.match_options("你确认吗", "fr_FR");
        assert_eq!(fallback, engine.match_options("你确认吗", "zh_CN"));
        assert!(!fallback.is_empty());
    }

    #[test]
    fn regression_match_options_without_default_language_returns_empty() {
        let engine = RuleEngine::builtin_with_options(RuleEngineOptions {
            default_language: "xx_XX".to_string(),
            ..RuleEngineOptions::default()
        });
        assert!(engine.match_options("Should I continue?", "fr_FR").is_empty());
    }

    #[test]
    fn regression_blank_text_returns_empty_without_caching() {
        let engine = RuleEngine::builtin();
        assert!(engine.match_options("   ", "zh_CN").is_empty());
        assert_eq!(engine.stats().cache_size, 0);
    }

    #[test]
    fn functional_missing_source_falls_back_to_builtin_patterns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = RuleEngine::from_path(temp.path().join("absent.json"));
        assert_eq!(engine.origin(), RuleSetOrigin::BuiltIn);
        assert_eq!(engine.stats().error_count, 1);
        assert_eq!(
            engine.match_options("Should I continue?", "en_US"),
            vec![
                "Yes".to_string(),
                "No".to_string(),
                "Need more information".to_string()
            ]
        );
    }

    #[test]
    fn regression_malformed_source_falls_back_to_builtin_patterns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(&path, "{ not json");
        let engine = RuleEngine::from_path(&path);
        assert_eq!(engine.origin(), RuleSetOrigin::BuiltIn);
        assert!(engine.available_languages().contains(&"zh_CN".to_string()));
    }

    #[test]
    fn functional_cache_counts_hits_and_respects_cache_disabled() {
        let engine = RuleEngine::builtin();
        let first = engine.match_options("是否继续", "zh_CN");
        let second = engine.match_options("是否继续", "zh_CN");
        assert_eq!(first, second);
        let stats = engine.stats();
        assert_eq!(stats.cache_hit_count, 1);
        assert_eq!(stats.cache_size, 1);
        assert_eq!(stats.match_count, 2);
        assert_eq!(stats.cache_hit_rate_percent, 50.0);

        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source(
                "en_US",
                r#"["go"]"#,
                r#"["Go"]"#,
                r#", "global_settings": {"cache_enabled": false}"#,
            ),
        );
        let uncached = RuleEngine::from_path(&path);
        uncached.match_options("go now", "en_US");
        uncached.match_options("go now", "en_US");
        let stats = uncached.stats();
        assert!(!stats.cache_enabled);
        assert_eq!(stats.cache_size, 0);
        assert_eq!(stats.cache_hit_count, 0);
    }

    #[test]
    fn integration_hot_reload_applies_edit_on_next_match() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha"]"#, r#"["A"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);
        assert!(engine.match_options("beta release", "en_US").is_empty());

        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha", "beta"]"#, r#"["A", "B"]"#, ""),
        );
        assert_eq!(
            engine.match_options("beta release", "en_US"),
            vec!["A".to_string(), "B".to_string()]
        );
        assert_eq!(engine.generation(), 2);
        assert_eq!(engine.stats().load_count, 2);
    }

    #[test]
    fn regression_invalid_reload_keeps_last_good_patterns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha"]"#, r#"["A"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);
        write_source(&path, r#"{"languages": "broken"}"#);

        let outcome = engine.reload();
        assert!(
            matches!(outcome, ReloadOutcome::Invalid { .. }),
            "expected invalid outcome, got {outcome:?}"
        );
        assert_eq!(engine.origin(), RuleSetOrigin::File);
        assert_eq!(engine.match_options("alpha", "en_US"), vec!["A".to_string()]);
        assert_eq!(engine.stats().error_count, 1);
    }

    #[test]
    fn regression_reload_if_changed_reports_no_change_for_untouched_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha"]"#, r#"["A"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);
        assert_eq!(
            engine.reload_if_changed().reason_code(),
            "rule_source_no_change"
        );
        assert!(engine.reload().is_applied());
    }

    #[test]
    fn regression_missing_source_during_reload_keeps_previous_patterns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha"]"#, r#"["A"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);
        std::fs::remove_file(&path).expect("remove");
        assert!(matches!(
            engine.reload_if_changed(),
            ReloadOutcome::MissingSource { .. }
        ));
        assert_eq!(engine.match_options("alpha", "en_US"), vec!["A".to_string()]);
    }

    #[test]
    fn functional_custom_patterns_are_persisted_and_removable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        write_source(
            &path,
            &single_pattern_source("en_US", r#"["alpha"]"#, r#"["A"]"#, ""),
        );
        let engine = RuleEngine::from_path(&path);
        engine
            .add_custom_pattern(
                "en_US",
                "rollout",
                CustomPattern::new(["rollout"], ["Roll out", "Wait"]).with_priority(0),
            )
            .expect("add pattern");
        assert_eq!(
            engine.match_options("start the rollout", "en_US"),
            vec!["Roll out".to_string(), "Wait".to_string()]
        );

        let reopened = RuleEngine::from_path(&path);
        assert_eq!(
            reopened.match_options("start the rollout", "en_US"),
            vec!["Roll out".to_string(), "Wait".to_string()]
        );

        engine
            .remove_pattern("en_US", "rollout")
            .expect("remove pattern");
        assert!(engine.match_options("start the rollout", "en_US").is_empty());
        assert_eq!(
            engine.reload_if_changed().reason_code(),
            "rule_source_no_change",
            "own writes must not trigger a reload"
        );
    }

    #[test]
    fn regression_custom_pattern_validation_and_unknown_removal_fail() {
        let engine = RuleEngine::builtin();
        let error = engine
            .add_custom_pattern("en_US", "empty", CustomPattern::new(["x"], Vec::<String>::new()))
            .expect_err("empty options must fail");
        assert!(matches!(error, RuleSourceError::Invalid { .. }));

        let error = engine
            .remove_pattern("en_US", "missing")
            .expect_err("unknown pattern must fail");
        assert!(matches!(error, RuleSourceError::UnknownPattern { .. }));
        assert_eq!(engine.origin(), RuleSetOrigin::BuiltIn);
    }

    #[test]
    fn integration_concurrent_readers_never_observe_mixed_pattern_sets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.json");
        let source_a = single_pattern_source("en_US", r#"["alpha"]"#, r#"["A1", "A2"]"#, "");
        let source_b = single_pattern_source("en_US", r#"["alpha"]"#, r#"["B1", "B2", "B3"]"#, "");
        write_source(&path, &source_a);
        let engine = Arc::new(RuleEngine::from_path(&path));

        let readers = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let options = engine.match_options("alpha release", "en_US");
                        let consistent = options == ["A1", "A2"] || options == ["B1", "B2", "B3"];
                        assert!(consistent, "observed mixed pattern set: {options:?}");
                    }
                })
            })
            .collect::<Vec<_>>();

        for round in 0..20 {
            let body = if round % 2 == 0 { &source_b } else { &source_a };
            write_source(&path, body);
            engine.reload();
        }
        for reader in readers {
            reader.join().expect("reader thread");
        }
    }
}
