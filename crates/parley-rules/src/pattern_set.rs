//! Compiled, immutable pattern sets built from a [`RuleSource`].

use std::collections::{BTreeMap, BTreeSet};

use aho_corasick::AhoCorasick;
use serde::Serialize;

use crate::rule_source::{LanguageRules, RulePatternSpec, RuleSource, RuleSourceError};
use crate::text_normalizer::normalize_text;

/// A rule pattern with normalized triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulePattern {
    pub id: String,
    pub triggers: BTreeSet<String>,
    pub options: Vec<String>,
    pub priority: i64,
    pub enabled: bool,
}

impl RulePattern {
    fn from_spec(id: &str, spec: &RulePatternSpec) -> Self {
        Self {
            id: id.to_string(),
            triggers: spec
                .triggers
                .iter()
                .map(|trigger| normalize_text(trigger))
                .filter(|trigger| !trigger.is_empty())
                .collect(),
            options: spec
                .options
                .iter()
                .map(|option| option.trim())
                .filter(|option| !option.is_empty())
                .map(str::to_string)
                .collect(),
            priority: spec.priority,
            enabled: spec.enabled,
        }
    }

    fn is_matchable(&self) -> bool {
        self.enabled && !self.triggers.is_empty() && !self.options.is_empty()
    }
}

/// Patterns of one language, sorted by `(priority, id)`, with all triggers of
/// enabled patterns compiled into one automaton.
#[derive(Debug)]
pub(crate) struct CompiledLanguage {
    patterns: Vec<RulePattern>,
    automaton: Option<AhoCorasick>,
    owners: Vec<usize>,
}

impl CompiledLanguage {
    fn compile(language: &str, rules: &LanguageRules) -> Result<Self, RuleSourceError> {
        let mut patterns = rules
            .patterns
            .iter()
            .map(|(id, spec)| RulePattern::from_spec(id, spec))
            .collect::<Vec<_>>();
        patterns.sort_by(|left, right| {
            left.priority
                .cmp(&right.priority)
                .then_with(|| left.id.cmp(&right.id))
        });

        let mut needles = Vec::new();
        let mut owners = Vec::new();
        for (index, pattern) in patterns.iter().enumerate() {
            if !pattern.is_matchable() {
                continue;
            }
            for trigger in &pattern.triggers {
                needles.push(trigger.clone());
                owners.push(index);
            }
        }

        let automaton = if needles.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(&needles).map_err(|error| RuleSourceError::Invalid {
                    reason: format!("language '{language}' triggers failed to compile: {error}"),
                })?,
            )
        };

        Ok(Self {
            patterns,
            automaton,
            owners,
        })
    }

    /// Returns the lowest-ordered enabled pattern with at least one trigger
    /// occurring in `normalized`.
    pub(crate) fn first_match(&self, normalized: &str) -> Option<&RulePattern> {
        let automaton = self.automaton.as_ref()?;
        let mut best: Option<usize> = None;
        for hit in automaton.find_overlapping_iter(normalized) {
            let Some(owner) = self.owners.get(hit.pattern().as_usize()).copied() else {
                continue;
            };
            if best.map_or(true, |current| owner < current) {
                best = Some(owner);
                if owner == 0 {
                    break;
                }
            }
        }
        best.and_then(|index| self.patterns.get(index))
    }

    pub(crate) fn patterns(&self) -> &[RulePattern] {
        &self.patterns
    }
}

/// All compiled languages of one rule-source generation.
#[derive(Debug)]
pub(crate) struct PatternSet {
    languages: BTreeMap<String, CompiledLanguage>,
}

impl PatternSet {
    pub(crate) fn compile(source: &RuleSource) -> Result<Self, RuleSourceError> {
        let mut languages = BTreeMap::new();
        for (language, rules) in &source.languages {
            languages.insert(language.clone(), CompiledLanguage::compile(language, rules)?);
        }
        Ok(Self { languages })
    }

    pub(crate) fn empty() -> Self {
        Self {
            languages: BTreeMap::new(),
        }
    }

    pub(crate) fn language(&self, language: &str) -> Option<&CompiledLanguage> {
        self.languages.get(language)
    }

    pub(crate) fn language_codes(&self) -> Vec<String> {
        self.languages.keys().cloned().collect()
    }
}
