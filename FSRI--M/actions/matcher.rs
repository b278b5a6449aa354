use fsri_fusion::SubScores;
use serde::{Deserialize, Serialize};

use crate::rules::{ActionRule, RuleTable, WeatherGate};

/// Driver text that marks weather as conducive to disease spread.
pub const CONDUCIVE_WEATHER_MARKER: &str = "conducive weather";

/// Contextual flags consulted by gated rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extras {
    /// Weather currently favours disease spread.
    #[serde(default)]
    pub conducive_weather: bool,
}

impl Extras {
    /// Derives flags from composite drivers.
    #[must_use]
    pub fn from_drivers(drivers: &[String]) -> Self {
        Self {
            conducive_weather: drivers
                .iter()
                .any(|driver| driver.to_lowercase().contains(CONDUCIVE_WEATHER_MARKER)),
        }
    }
}

/// Inputs to one rule match.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    /// Crop, any case.
    pub crop: &'a str,
    /// Region, any case.
    pub region: &'a str,
    /// Composite sub-scores.
    pub sub_scores: &'a SubScores,
    /// Composite drivers, used when `extras` is absent.
    pub drivers: &'a [String],
    /// Explicit flags; derived from `drivers` when `None`.
    pub extras: Option<Extras>,
    /// Case-insensitive persona filter; empty means no filter.
    pub persona: Option<&'a str>,
}

impl MatchRequest<'_> {
    /// Lower-cased bucket key.
    #[must_use]
    pub fn bucket_key(&self) -> String {
        format!("{}.{}", self.crop, self.region).to_lowercase()
    }

    /// Flags in effect for this request.
    #[must_use]
    pub fn effective_extras(&self) -> Extras {
        self.extras
            .unwrap_or_else(|| Extras::from_drivers(self.drivers))
    }
}

/// One recommended action set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSuggestion {
    /// Lower-cased audience.
    pub persona: String,
    /// Recommended actions.
    #[serde(rename = "do")]
    pub actions: Vec<String>,
    /// Trigger, `"<pillar>>=<threshold>"`.
    pub why: String,
    /// Parties to notify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Vec<String>>,
}

impl RuleTable {
    /// Rules triggered by `request`, highest triggering score first.
    ///
    /// Ties keep rule order.
    #[must_use]
    pub fn suggest(&self, request: &MatchRequest<'_>) -> Vec<ActionSuggestion> {
        let rules = self.bucket(&request.bucket_key());
        if rules.is_empty() {
            return Vec::new();
        }
        let persona = request
            .persona
            .filter(|persona| !persona.is_empty())
            .map(str::to_lowercase);
        let extras = request.effective_extras();

        let mut matched = rules
            .iter()
            .filter(|rule| persona.as_ref().map_or(true, |wanted| &rule.persona == wanted))
            .filter(|rule| match rule.weather {
                Some(WeatherGate::Conducive) => extras.conducive_weather,
                None => true,
            })
            .filter_map(|rule| {
                let score = request.sub_scores.get(rule.pillar);
                (score >= rule.threshold).then(|| (score, suggestion(rule)))
            })
            .collect::<Vec<_>>();
        matched.sort_by(|(left, _), (right, _)| right.total_cmp(left));
        matched.into_iter().map(|(_, suggestion)| suggestion).collect()
    }
}

fn suggestion(rule: &ActionRule) -> ActionSuggestion {
    ActionSuggestion {
        persona: rule.persona.clone(),
        actions: rule.actions.clone(),
        why: format!("{}>={}", rule.pillar, truncated(rule.threshold)),
        notify: rule.notify.clone(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncated(threshold: f64) -> i64 {
    threshold.trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r"
corn.us:
  - persona: farmer
    when: { pillar: production, threshold: 60 }
    do: [Scout fields]
  - persona: buyer
    when: { pillar: biosecurity, threshold: 40, weather: conducive }
    do: [Review poultry suppliers]
    notify: [procurement]
  - persona: buyer
    when: { pillar: movement, threshold: 50.7 }
    do: [Book rail capacity]
";

    fn scores(production: f64, movement: f64, biosecurity: f64) -> SubScores {
        SubScores {
            production,
            movement,
            policy: 0.0,
            biosecurity,
        }
    }

    fn request<'a>(sub_scores: &'a SubScores, drivers: &'a [String]) -> MatchRequest<'a> {
        MatchRequest {
            crop: "Corn",
            region: "US",
            sub_scores,
            drivers,
            extras: None,
            persona: None,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let table = RuleTable::parse(RULES).unwrap();
        let below = scores(59.9, 0.0, 0.0);
        assert!(table.suggest(&request(&below, &[])).is_empty());
        let at = scores(60.0, 0.0, 0.0);
        let hits = table.suggest(&request(&at, &[]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].why, "production>=60");
        assert!(hits[0].notify.is_none());
    }

    #[test]
    fn weather_gate_needs_conducive_flag() {
        let table = RuleTable::parse(RULES).unwrap();
        let sub_scores = scores(0.0, 0.0, 45.0);
        assert!(table.suggest(&request(&sub_scores, &[])).is_empty());

        let drivers = vec!["HPAI outbreak nearby with Conducive Weather".to_string()];
        let hits = table.suggest(&request(&sub_scores, &drivers));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].notify.as_deref(), Some(&["procurement".to_string()][..]));

        let explicit = MatchRequest {
            extras: Some(Extras::default()),
            ..request(&sub_scores, &drivers)
        };
        assert!(table.suggest(&explicit).is_empty());
    }

    #[test]
    fn ordered_by_triggering_score_and_filtered_by_persona() {
        let table = RuleTable::parse(RULES).unwrap();
        let sub_scores = scores(62.0, 80.0, 45.0);
        let extras = Some(Extras {
            conducive_weather: true,
        });
        let all = table.suggest(&MatchRequest {
            extras,
            ..request(&sub_scores, &[])
        });
        let whys = all.iter().map(|s| s.why.as_str()).collect::<Vec<_>>();
        assert_eq!(whys, vec!["movement>=50", "production>=60", "biosecurity>=40"]);

        let buyers = table.suggest(&MatchRequest {
            extras,
            persona: Some("BUYER"),
            ..request(&sub_scores, &[])
        });
        assert_eq!(buyers.len(), 2);
        assert!(buyers.iter().all(|s| s.persona == "buyer"));

        let unfiltered = table.suggest(&MatchRequest {
            extras,
            persona: Some(""),
            ..request(&sub_scores, &[])
        });
        assert_eq!(unfiltered.len(), 3);

        let padded = table.suggest(&MatchRequest {
            extras,
            persona: Some(" buyer"),
            ..request(&sub_scores, &[])
        });
        assert!(padded.is_empty());
    }

    #[test]
    fn ties_keep_rule_order() {
        let source = r"
soy.br:
  - persona: a
    when: { pillar: movement, threshold: 10 }
    do: [first]
  - persona: b
    when: { pillar: movement, threshold: 20 }
    do: [second]
";
        let table = RuleTable::parse(source).unwrap();
        let sub_scores = scores(0.0, 30.0, 0.0);
        let hits = table.suggest(&MatchRequest {
            crop: "soy",
            region: "BR",
            ..request(&sub_scores, &[])
        });
        assert_eq!(hits[0].persona, "a");
        assert_eq!(hits[1].persona, "b");
    }

    #[test]
    fn unknown_bucket_is_empty() {
        let table = RuleTable::parse(RULES).unwrap();
        let sub_scores = scores(100.0, 100.0, 100.0);
        let hits = table.suggest(&MatchRequest {
            region: "eu",
            ..request(&sub_scores, &[])
        });
        assert!(hits.is_empty());
    }
}
