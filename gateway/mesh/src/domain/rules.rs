// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Heuristic Rule Tables
//!
//! Relevance scoring, categorisation, secret redaction and denied-content
//! checks are all driven by versioned `{pattern, category, weight}` tables.
//! [`MeshRules`] is the YAML form; [`CompiledRules`] holds the compiled
//! regular expressions and is what the filter and propagator evaluate.
//!
//! Defaults are embedded from `rules/default_rules.yaml`. A deployment can
//! replace them with `spec.messaging.rules_path`.
//!
//! Every derived score is `min(weighted_hits / saturation, 1.0)`.

use anyhow::{bail, Context};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_RULES_YAML: &str = include_str!("../../rules/default_rules.yaml");

fn default_saturation() -> f64 {
    1.0
}

fn default_residual_secret_ratio() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub pattern: String,
    pub category: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: String,
    #[serde(default = "default_saturation")]
    pub saturation: f64,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityPair {
    pub from: String,
    pub to: String,
    pub score: f64,
}

/// Static role-to-role affinity. Lookups are symmetric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityTable {
    pub default: f64,
    #[serde(default)]
    pub pairs: Vec<AffinityPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRules {
    pub version: String,
    #[serde(default = "default_residual_secret_ratio")]
    pub residual_secret_ratio: f64,
    pub affinity: AffinityTable,
    pub markers: RuleTable,
    pub categories: RuleTable,
    pub strategic: RuleTable,
    pub complexity: RuleTable,
    pub vocabulary: RuleTable,
    pub secrets: RuleTable,
    pub denied_content: RuleTable,
}

impl MeshRules {
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_yaml_str(DEFAULT_RULES_YAML).context("embedded default rules are invalid")
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let rules: Self = serde_yaml::from_str(yaml).context("Failed to parse rule tables")?;
        Ok(rules)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read rules file {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid rules file {}", path.display()))
    }

    /// Override file when given, embedded defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_yaml_file(p),
            None => Self::embedded(),
        }
    }

    pub fn compile(&self) -> anyhow::Result<CompiledRules> {
        if !(0.0..=1.0).contains(&self.residual_secret_ratio) {
            bail!("residual_secret_ratio must be within [0, 1]");
        }
        Ok(CompiledRules {
            version: self.version.clone(),
            residual_secret_ratio: self.residual_secret_ratio,
            affinity: CompiledAffinity::compile(&self.affinity)?,
            markers: CompiledRuleTable::compile("markers", &self.markers)?,
            categories: CompiledRuleTable::compile("categories", &self.categories)?,
            strategic: CompiledRuleTable::compile("strategic", &self.strategic)?,
            complexity: CompiledRuleTable::compile("complexity", &self.complexity)?,
            vocabulary: CompiledRuleTable::compile("vocabulary", &self.vocabulary)?,
            secrets: CompiledRuleTable::compile("secrets", &self.secrets)?,
            denied_content: CompiledRuleTable::compile("denied_content", &self.denied_content)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub regex: Regex,
    pub category: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct CompiledRuleTable {
    pub version: String,
    pub saturation: f64,
    pub rules: Vec<CompiledRule>,
}

impl CompiledRuleTable {
    fn compile(name: &str, table: &RuleTable) -> anyhow::Result<Self> {
        if !(table.saturation.is_finite() && table.saturation > 0.0) {
            bail!("table '{}' saturation must be positive", name);
        }
        let rules = table
            .rules
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                if !(entry.weight.is_finite() && entry.weight >= 0.0) {
                    bail!("table '{}' rule {} has invalid weight {}", name, i, entry.weight);
                }
                let regex = Regex::new(&entry.pattern)
                    .with_context(|| format!("table '{}' rule {} has invalid pattern", name, i))?;
                Ok(CompiledRule {
                    regex,
                    category: entry.category.clone(),
                    weight: entry.weight,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            version: table.version.clone(),
            saturation: table.saturation,
            rules,
        })
    }

    /// Sum of `weight` over every match of every rule.
    pub fn weighted_hits(&self, text: &str) -> f64 {
        self.rules
            .iter()
            .map(|r| r.regex.find_iter(text).count() as f64 * r.weight)
            .sum()
    }

    /// `min(weighted_hits / saturation, 1.0)`.
    pub fn saturated_score(&self, text: &str) -> f64 {
        (self.weighted_hits(text) / self.saturation).min(1.0)
    }

    /// Category with the highest weighted hits. Ties go to the earlier rule.
    pub fn dominant_category(&self, text: &str) -> Option<String> {
        let mut totals: Vec<(String, f64)> = Vec::new();
        for rule in &self.rules {
            let hits = rule.regex.find_iter(text).count() as f64 * rule.weight;
            if hits <= 0.0 {
                continue;
            }
            match totals.iter_mut().find(|(c, _)| *c == rule.category) {
                Some((_, total)) => *total += hits,
                None => totals.push((rule.category.clone(), hits)),
            }
        }
        let mut best: Option<(String, f64)> = None;
        for (category, total) in totals {
            if best.as_ref().map_or(true, |(_, b)| total > *b) {
                best = Some((category, total));
            }
        }
        best.map(|(c, _)| c)
    }

    /// Categories of every rule that matches at least once, in table order.
    pub fn matched_categories(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for rule in &self.rules {
            if rule.regex.is_match(text) && !out.contains(&rule.category) {
                out.push(rule.category.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct CompiledAffinity {
    default: f64,
    pairs: HashMap<(String, String), f64>,
}

impl CompiledAffinity {
    fn compile(table: &AffinityTable) -> anyhow::Result<Self> {
        if !(0.0..=1.0).contains(&table.default) {
            bail!("affinity default must be within [0, 1]");
        }
        let mut pairs = HashMap::new();
        for pair in &table.pairs {
            if !(0.0..=1.0).contains(&pair.score) {
                bail!("affinity {} -> {} must be within [0, 1]", pair.from, pair.to);
            }
            pairs.insert((pair.from.clone(), pair.to.clone()), pair.score);
        }
        Ok(Self {
            default: table.default,
            pairs,
        })
    }

    pub fn lookup(&self, a: &str, b: &str) -> f64 {
        self.pairs
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.pairs.get(&(b.to_string(), a.to_string())))
            .copied()
            .unwrap_or(self.default)
    }
}

/// Rule tables ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub version: String,
    pub residual_secret_ratio: f64,
    pub affinity: CompiledAffinity,
    pub markers: CompiledRuleTable,
    pub categories: CompiledRuleTable,
    pub strategic: CompiledRuleTable,
    pub complexity: CompiledRuleTable,
    pub vocabulary: CompiledRuleTable,
    pub secrets: CompiledRuleTable,
    pub denied_content: CompiledRuleTable,
}

impl CompiledRules {
    pub fn embedded() -> anyhow::Result<Self> {
        MeshRules::embedded()?.compile()
    }
}
