//! Sensitivity classifier for event payloads

use super::rules::{ClassificationRule, RuleTarget, RuleTier};
use crate::error::{Error, Result};
use crate::models::SensitivityLevel;
use crate::payload::walk;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Total weight at which a payload is classified `full` even without a
/// high-tier match
pub const FULL_WEIGHT_THRESHOLD: u32 = 15;

/// Classification result for a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    /// Overall sensitivity level
    pub level: SensitivityLevel,
    /// Deduplicated paths of matched fields, in visit order
    pub fields: Vec<String>,
    /// Individual rule matches
    pub matches: Vec<FieldMatch>,
    /// Confidence score, 0-100
    pub score: u8,
    pub total_weight: u32,
    pub fields_visited: usize,
}

impl ClassificationResult {
    /// Whether any sensitive content was found
    pub fn is_sensitive(&self) -> bool {
        self.level != SensitivityLevel::None
    }
}

/// A single rule match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMatch {
    pub path: String,
    pub rule_name: String,
    pub tier: RuleTier,
    pub weight: u32,
}

/// Pattern-based sensitivity classifier.
///
/// Classification is a pure function of the payload: no state is kept
/// between calls.
pub struct Classifier {
    key_rules: Vec<CompiledRule>,
    value_rules: Vec<CompiledRule>,
}

struct CompiledRule {
    name: String,
    pattern: Regex,
    tier: RuleTier,
    weight: u32,
}

impl Classifier {
    /// Create a new classifier with the given rules
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self> {
        let mut key_rules = Vec::new();
        let mut value_rules = Vec::new();

        for rule in rules {
            let pattern = Regex::new(&rule.pattern).map_err(|e| {
                Error::Config(format!(
                    "Invalid regex pattern for rule '{}': {}",
                    rule.name, e
                ))
            })?;

            let compiled = CompiledRule {
                name: rule.name,
                pattern,
                tier: rule.tier,
                weight: rule.weight,
            };
            match rule.target {
                RuleTarget::Key => key_rules.push(compiled),
                RuleTarget::Value => value_rules.push(compiled),
            }
        }

        Ok(Self {
            key_rules,
            value_rules,
        })
    }

    /// Classifier with the built-in rule set
    pub fn with_default_rules() -> Result<Self> {
        Self::new(super::rules::default_rules())
    }

    /// Classify a payload
    pub fn classify(&self, payload: &Value) -> ClassificationResult {
        let mut matches = Vec::new();
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        let mut visited = 0usize;

        walk(payload, &mut |path, key, value| {
            visited += 1;
            let path_str = path.to_string();
            let before = matches.len();

            // A key counts once, at its highest matching tier
            if let Some(key) = key {
                let normalized = normalize_key(key);
                if let Some(rule) = self
                    .key_rules
                    .iter()
                    .filter(|r| r.pattern.is_match(&normalized))
                    .max_by_key(|r| (r.tier, r.weight))
                {
                    matches.push(FieldMatch {
                        path: path_str.clone(),
                        rule_name: rule.name.clone(),
                        tier: rule.tier,
                        weight: rule.weight,
                    });
                }
            }

            if let Value::String(text) = value {
                let text = text.trim();
                if let Some(rule) = self.value_rules.iter().find(|r| r.pattern.is_match(text)) {
                    matches.push(FieldMatch {
                        path: path_str.clone(),
                        rule_name: rule.name.clone(),
                        tier: rule.tier,
                        weight: rule.weight,
                    });
                }
            }

            if matches.len() > before && seen.insert(path_str.clone()) {
                fields.push(path_str);
            }
        });

        let total_weight: u32 = matches.iter().map(|m| m.weight).sum();
        let has_high = matches.iter().any(|m| m.tier == RuleTier::High);

        let level = if matches.is_empty() {
            SensitivityLevel::None
        } else if has_high || total_weight >= FULL_WEIGHT_THRESHOLD {
            SensitivityLevel::Full
        } else {
            SensitivityLevel::Limited
        };

        let score = if visited == 0 {
            0
        } else {
            ((total_weight as f64 * 10.0 / visited as f64).round() as u32).min(100) as u8
        };

        ClassificationResult {
            level,
            fields,
            matches,
            score,
            total_weight,
            fields_visited: visited,
        }
    }
}

/// Lowercase and fold separators so `patientName`, `Patient-Name` and
/// `patient name` compare alike
fn normalize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '-' | ' ' | '.' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
