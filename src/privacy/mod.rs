//! Sensitivity classification of event payloads
//!
//! Walks arbitrary JSON payloads and matches field names and string values
//! against tiered patterns:
//! - High: government and medical identifiers, diagnoses, medications
//! - Medium: names, birth dates, insurance identifiers
//! - Low: contact details

pub mod classifier;
pub mod rules;

pub use classifier::{ClassificationResult, Classifier, FieldMatch, FULL_WEIGHT_THRESHOLD};
pub use rules::{default_rules, ClassificationRule, RuleTarget, RuleTier};
