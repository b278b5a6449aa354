use std::fmt;

use fsri_fusion::Pillar;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// Contextual gate a rule may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherGate {
    /// Fires only while weather is conducive to disease spread.
    Conducive,
}

/// One validated threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    /// Lower-cased audience.
    pub persona: String,
    /// Pillar whose score is compared.
    pub pillar: Pillar,
    /// Inclusive trigger threshold.
    pub threshold: f64,
    /// Optional contextual gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherGate>,
    /// Recommended actions, never empty.
    #[serde(rename = "do")]
    pub actions: Vec<String>,
    /// Parties to notify; never `Some` of an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Vec<String>>,
}

/// Validated rules bucketed by lower-cased `"<crop>.<region>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleTable {
    buckets: IndexMap<String, Vec<ActionRule>>,
}

impl RuleTable {
    /// Parses and validates a YAML (or JSON) rule document.
    pub fn parse(source: &str) -> Result<Self, RuleError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: Value = serde_yaml::from_str(source)?;
        Ok(Self::validate(&document)?)
    }

    /// Validates an already-parsed document, reporting every problem found.
    ///
    /// An empty document is an empty table.
    pub fn validate(document: &Value) -> Result<Self, ValidationErrors> {
        let mapping = match document {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(mapping) => mapping,
            _ => {
                return Err(ValidationErrors(vec![RuleIssue::document(
                    "rule source must be a mapping of '<crop>.<region>' to rule lists",
                )]))
            }
        };

        let mut issues = Vec::new();
        let mut buckets: IndexMap<String, Vec<ActionRule>> = IndexMap::new();
        for (key, rules) in mapping {
            let Some(raw_key) = key.as_str() else {
                issues.push(RuleIssue::bucket(
                    describe(key),
                    "key must be a string of the form '<crop>.<region>'",
                ));
                continue;
            };
            if !raw_key.contains('.') {
                issues.push(RuleIssue::bucket(
                    raw_key,
                    "key must be of the form '<crop>.<region>' (e.g. 'corn.us')",
                ));
                continue;
            }
            let bucket = raw_key.to_lowercase();
            if buckets.contains_key(&bucket) {
                issues.push(RuleIssue::bucket(
                    raw_key,
                    format!("key collides with another bucket as '{bucket}'"),
                ));
                continue;
            }
            let Some(entries) = rules.as_sequence() else {
                issues.push(RuleIssue::bucket(raw_key, "rules must be a list"));
                continue;
            };
            let mut clean = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                let mut context = RuleContext {
                    bucket: raw_key,
                    index,
                    issues: &mut issues,
                };
                if let Some(rule) = context.rule(entry) {
                    clean.push(rule);
                }
            }
            buckets.insert(bucket, clean);
        }

        if issues.is_empty() {
            Ok(Self { buckets })
        } else {
            Err(ValidationErrors(issues))
        }
    }

    /// Rules for a bucket key, which must already be lower-cased.
    #[must_use]
    pub fn bucket(&self, key: &str) -> &[ActionRule] {
        self.buckets.get(key).map_or(&[], Vec::as_slice)
    }

    /// Bucket keys in source order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.buckets.keys().map(String::as_str)
    }

    /// Total number of rules across buckets.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Whether no rules are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_count() == 0
    }
}

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleIssue {
    /// Offending bucket key as written; empty for document-level problems.
    pub bucket: String,
    /// Rule position within the bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Offending field, dotted for nested fields (`when.threshold`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// What is wrong.
    pub message: String,
}

impl RuleIssue {
    fn document(message: impl Into<String>) -> Self {
        Self {
            bucket: String::new(),
            index: None,
            field: None,
            message: message.into(),
        }
    }

    fn bucket(bucket: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            index: None,
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bucket.is_empty() {
            return f.write_str(&self.message);
        }
        write!(f, "'{}'", self.bucket)?;
        if let Some(index) = self.index {
            write!(f, " rule {index}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " field '{field}'")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Every issue found in one rule document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<RuleIssue>);

impl ValidationErrors {
    /// The individual issues.
    #[must_use]
    pub fn issues(&self) -> &[RuleIssue] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid rule entr", self.0.len())?;
        f.write_str(if self.0.len() == 1 { "y" } else { "ies" })?;
        for issue in &self.0 {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Why a rule document was rejected.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Not parseable as YAML.
    #[error("rule source is not valid YAML: {0}")]
    Syntax(#[from] serde_yaml::Error),
    /// Parsed but violates the schema.
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

impl RuleError {
    /// Schema issues, empty for syntax errors.
    #[must_use]
    pub fn issues(&self) -> &[RuleIssue] {
        match self {
            Self::Syntax(_) => &[],
            Self::Invalid(errors) => errors.issues(),
        }
    }
}

struct RuleContext<'a> {
    bucket: &'a str,
    index: usize,
    issues: &'a mut Vec<RuleIssue>,
}

impl RuleContext<'_> {
    fn report(&mut self, field: Option<&str>, message: impl Into<String>) {
        self.issues.push(RuleIssue {
            bucket: self.bucket.to_string(),
            index: Some(self.index),
            field: field.map(str::to_string),
            message: message.into(),
        });
    }

    fn rule(&mut self, entry: &Value) -> Option<ActionRule> {
        let Some(rule) = entry.as_mapping() else {
            self.report(None, "rule must be a mapping");
            return None;
        };
        let before = self.issues.len();

        let persona = match rule.get("persona").and_then(Value::as_str) {
            Some(persona) if !persona.trim().is_empty() => Some(persona.to_lowercase()),
            _ => {
                self.report(Some("persona"), "must be a non-empty string");
                None
            }
        };
        let when = self.condition(rule);
        let actions = match self.strings(rule, "do") {
            Some(actions) if actions.is_empty() => {
                self.report(Some("do"), "must list at least one action");
                None
            }
            Some(actions) => Some(actions),
            None => {
                self.report(Some("do"), "must be a list of strings");
                None
            }
        };
        let notify = match rule.get("notify") {
            None | Some(Value::Null) => None,
            Some(_) => {
                let notify = self.strings(rule, "notify");
                if notify.is_none() {
                    self.report(Some("notify"), "must be a list of strings if provided");
                }
                notify.filter(|names| !names.is_empty())
            }
        };

        if self.issues.len() > before {
            return None;
        }
        let (pillar, threshold, weather) = when?;
        Some(ActionRule {
            persona: persona?,
            pillar,
            threshold,
            weather,
            actions: actions?,
            notify,
        })
    }

    fn condition(&mut self, rule: &Mapping) -> Option<(Pillar, f64, Option<WeatherGate>)> {
        let Some(when) = rule.get("when").and_then(Value::as_mapping) else {
            self.report(Some("when"), "must be a mapping");
            return None;
        };
        let pillar = when
            .get("pillar")
            .and_then(Value::as_str)
            .and_then(|name| name.parse::<Pillar>().ok());
        if pillar.is_none() {
            self.report(
                Some("when.pillar"),
                "must be one of biosecurity, movement, policy, production",
            );
        }
        let threshold = match when.get("threshold").and_then(Value::as_f64) {
            Some(threshold) if threshold.is_finite() => Some(threshold),
            _ => {
                self.report(Some("when.threshold"), "must be a number");
                None
            }
        };
        let weather = match when.get("weather") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(flag)) if flag == "conducive" => Ok(Some(WeatherGate::Conducive)),
            Some(other) => Err(describe(other)),
        };
        let weather = match weather {
            Ok(weather) => weather,
            Err(flag) => {
                self.report(
                    Some("when.weather"),
                    format!("unsupported weather flag {flag}"),
                );
                None
            }
        };
        Some((pillar?, threshold?, weather))
    }

    fn strings(&self, rule: &Mapping, field: &str) -> Option<Vec<String>> {
        rule.get(field)?
            .as_sequence()?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect()
    }
}

fn describe(value: &Value) -> String {
    serde_yaml::to_string(value).map_or_else(
        |_| format!("{value:?}"),
        |text| format!("'{}'", text.trim_end()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r"
Corn.US:
  - persona: Farmer
    when: { pillar: production, threshold: 60 }
    do: [Scout fields]
    notify: []
  - persona: buyer
    when: { pillar: biosecurity, threshold: 40, weather: conducive }
    do: [Review poultry suppliers, Hedge feed]
    notify: [procurement]
wheat.eu: []
";

    #[test]
    fn normalises_keys_personas_and_notify() {
        let table = RuleTable::parse(RULES).unwrap();
        assert_eq!(table.rule_count(), 2);
        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["corn.us", "wheat.eu"]);
        let rules = table.bucket("corn.us");
        assert_eq!(rules[0].persona, "farmer");
        assert_eq!(rules[0].pillar, Pillar::Production);
        assert!(rules[0].notify.is_none());
        assert_eq!(rules[1].weather, Some(WeatherGate::Conducive));
        assert_eq!(rules[1].notify.as_deref(), Some(&["procurement".to_string()][..]));
    }

    #[test]
    fn collects_every_issue_with_location() {
        let source = r"
corn: []
soy.br:
  - persona: ''
    when: { pillar: weather, threshold: high }
    do: [1]
  - not-a-mapping
  - persona: trader
    when: { pillar: policy, threshold: 10, weather: rainy }
    do: []
    notify: nobody
rice.in: not-a-list
";
        let err = RuleTable::parse(source).unwrap_err();
        let issues = err.issues();
        let located = issues
            .iter()
            .map(|issue| (issue.bucket.as_str(), issue.index, issue.field.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(
            located,
            vec![
                ("corn", None, None),
                ("soy.br", Some(0), Some("persona")),
                ("soy.br", Some(0), Some("when.pillar")),
                ("soy.br", Some(0), Some("when.threshold")),
                ("soy.br", Some(0), Some("do")),
                ("soy.br", Some(1), None),
                ("soy.br", Some(2), Some("when.weather")),
                ("soy.br", Some(2), Some("do")),
                ("soy.br", Some(2), Some("notify")),
                ("rice.in", None, None),
            ]
        );
        assert!(err.to_string().contains("'soy.br' rule 2 field 'when.weather'"));
    }

    #[test]
    fn case_colliding_keys_are_rejected() {
        let source = "corn.us: []\nCORN.US: []\n";
        let err = RuleTable::parse(source).unwrap_err();
        assert_eq!(err.issues().len(), 1);
        assert_eq!(err.issues()[0].bucket, "CORN.US");
    }

    #[test]
    fn empty_and_json_documents_are_accepted() {
        assert!(RuleTable::parse("").unwrap().is_empty());
        let json = r#"{"corn.us": [{"persona": "farmer", "when": {"pillar": "movement", "threshold": 55.5}, "do": ["Book barge"]}]}"#;
        let table = RuleTable::parse(json).unwrap();
        assert!((table.bucket("corn.us")[0].threshold - 55.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_mapping_document_and_bad_yaml_fail() {
        assert_eq!(RuleTable::parse("- 1\n- 2\n").unwrap_err().issues().len(), 1);
        assert!(matches!(
            RuleTable::parse("corn.us: [").unwrap_err(),
            RuleError::Syntax(_)
        ));
    }
}
