//! Built-in sensitivity rules
//!
//! Key rules match normalized field names (lowercase, `-`/space folded to
//! `_`). Value rules match whole string values that are shaped like
//! identifiers or contact data.

use serde::{Deserialize, Serialize};

/// Pattern tier; the highest tier found drives classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Contact details
    Low,
    /// Names, birth dates, insurance identifiers
    Medium,
    /// Government/medical identifiers, diagnoses, medications
    High,
}

/// What a rule is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// Normalized object key
    Key,
    /// String value
    Value,
}

/// A single classification rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    pub name: String,
    pub pattern: String,
    pub target: RuleTarget,
    pub tier: RuleTier,
    /// Contribution to the payload's total weight per match
    pub weight: u32,
    pub description: String,
}

fn rule(name: &str, target: RuleTarget, tier: RuleTier, weight: u32, pattern: &str, description: &str) -> ClassificationRule {
    ClassificationRule {
        name: name.to_string(),
        pattern: pattern.to_string(),
        target,
        tier,
        weight,
        description: description.to_string(),
    }
}

/// Default key and value rules for patient, claim and authorization events
pub fn default_rules() -> Vec<ClassificationRule> {
    use RuleTarget::{Key, Value};
    use RuleTier::{High, Low, Medium};

    vec![
        // ---- High: identifiers, diagnoses, medications ----
        rule(
            "key_government_id",
            Key,
            High,
            10,
            r"(^|_)(ssn|social_?security(_?number)?|tax_?id|passport(_?number)?|drivers?_?license)($|_)",
            "Government identifier field",
        ),
        rule(
            "key_medical_id",
            Key,
            High,
            10,
            r"(^|_)(mrn|medical_?record(_?number)?|patient_?(id|name|identifier)|health_?plan_?(id|number)|beneficiary_?(id|number)|npi)($|_)",
            "Medical record or patient identifier field",
        ),
        rule(
            "key_clinical",
            Key,
            High,
            10,
            r"(diagnos[ie]s|icd_?(9|10)?_?codes?|conditions?|medications?|prescriptions?|dosage|treatments?|procedure_?codes?|lab_?results?|clinical_?notes?|allerg(y|ies))",
            "Diagnosis, medication or clinical field",
        ),
        // ---- Medium: names, birth dates, insurance ----
        rule(
            "key_person_name",
            Key,
            Medium,
            5,
            r"^(name|(first|last|middle|full|given|family|maiden)_?name)$",
            "Personal name field",
        ),
        rule(
            "key_birth_date",
            Key,
            Medium,
            5,
            r"(^|_)(dob|date_?of_?birth|birth_?date|birthday)($|_)",
            "Date of birth field",
        ),
        rule(
            "key_insurance",
            Key,
            Medium,
            5,
            r"(^|_)(insurance(_?(id|number|provider|plan))?|member_?id|policy_?(number|id)|subscriber_?id|group_?number)($|_)",
            "Insurance identifier field",
        ),
        // ---- Low: contact details ----
        rule(
            "key_contact",
            Key,
            Low,
            2,
            r"(e_?mail|phone|mobile|fax|street|address|zip_?code|postal_?code)",
            "Contact information field",
        ),
        // ---- Value shapes ----
        rule(
            "value_ssn",
            Value,
            High,
            10,
            r"^(\d{3}-\d{2}-\d{4}|\d{9})$",
            "Nine-digit or dashed identifier",
        ),
        rule(
            "value_phone",
            Value,
            Low,
            3,
            r"^\+?1?[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4}$",
            "Phone-number-shaped value",
        ),
        rule(
            "value_email",
            Value,
            Low,
            3,
            r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$",
            "Email-shaped value",
        ),
        rule(
            "value_date",
            Value,
            Low,
            2,
            r"^(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4})$",
            "Date-shaped value",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn compiled(name: &str) -> Regex {
        let rule = default_rules()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap();
        Regex::new(&rule.pattern).unwrap()
    }

    #[test]
    fn test_default_rules_compile() {
        for rule in default_rules() {
            assert!(
                Regex::new(&rule.pattern).is_ok(),
                "rule '{}' has invalid pattern: {}",
                rule.name,
                rule.pattern
            );
        }
    }

    #[test]
    fn test_medical_id_keys() {
        let re = compiled("key_medical_id");
        assert!(re.is_match("patient_name"));
        assert!(re.is_match("patientname"));
        assert!(re.is_match("mrn"));
        assert!(re.is_match("primary_mrn"));
        assert!(!re.is_match("note"));
    }

    #[test]
    fn test_person_name_is_exact() {
        let re = compiled("key_person_name");
        assert!(re.is_match("first_name"));
        assert!(re.is_match("name"));
        assert!(!re.is_match("event_name"));
    }

    #[test]
    fn test_value_shapes() {
        assert!(compiled("value_ssn").is_match("123-45-6789"));
        assert!(compiled("value_ssn").is_match("123456789"));
        assert!(!compiled("value_ssn").is_match("1234567890"));
        assert!(compiled("value_phone").is_match("(555) 123-4567"));
        assert!(compiled("value_phone").is_match("+1 555.123.4567"));
        assert!(compiled("value_email").is_match("jane@example.org"));
        assert!(compiled("value_date").is_match("1980-02-29"));
        assert!(compiled("value_date").is_match("2/29/1980"));
        assert!(!compiled("value_date").is_match("f/u visit"));
    }
}
