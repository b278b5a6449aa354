use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::dataset::{read_observations, DailyObservation, DatasetError, LabelRow};

/// Risk assigned to a site on a day without a reading.
pub const MISSING_READING_RISK: f64 = 0.3;
/// Days ahead, inclusive of today, a low-water event is looked for.
pub const LABEL_HORIZON_DAYS: usize = 7;

/// A river gauge and its low/high water thresholds in feet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSite {
    /// USGS site identifier.
    pub site_id: String,
    /// At or below this height barge movement is disrupted.
    pub low_threshold: f64,
    /// At or above this height movement risk is nil.
    pub high_threshold: f64,
}

impl GaugeSite {
    /// Creates a site.
    pub fn new(site_id: impl Into<String>, low_threshold: f64, high_threshold: f64) -> Self {
        Self {
            site_id: site_id.into(),
            low_threshold,
            high_threshold,
        }
    }

    /// Representative Mississippi/Ohio/Illinois river gauges.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("07374000", 5.0, 10.0),
            Self::new("03612500", 5.0, 10.0),
            Self::new("07032000", 5.0, 10.0),
            Self::new("05567500", 8.0, 15.0),
        ]
    }

    /// Movement risk in `[0, 1]` for one reading.
    #[must_use]
    pub fn risk(&self, gauge_ft: Option<f64>) -> f64 {
        match gauge_ft {
            None => MISSING_READING_RISK,
            Some(g) if g.is_nan() => MISSING_READING_RISK,
            Some(g) if g <= self.low_threshold => 1.0,
            Some(g) if g >= self.high_threshold => 0.0,
            Some(g) => (self.high_threshold - g) / (self.high_threshold - self.low_threshold),
        }
    }

    fn is_low(&self, gauge_ft: Option<f64>) -> bool {
        gauge_ft.is_some_and(|g| g <= self.low_threshold)
    }
}

/// Builds the daily movement score and forward disruption label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelBuilder {
    sites: Vec<GaugeSite>,
}

impl Default for LabelBuilder {
    fn default() -> Self {
        Self::new(GaugeSite::defaults())
    }
}

impl LabelBuilder {
    /// Uses the given gauge catalogue.
    #[must_use]
    pub const fn new(sites: Vec<GaugeSite>) -> Self {
        Self { sites }
    }

    /// Configured sites.
    #[must_use]
    pub fn sites(&self) -> &[GaugeSite] {
        &self.sites
    }

    /// Labels every day for which a full 7-day forward window exists.
    ///
    /// `histories` is keyed by site id; entries for unknown sites are
    /// ignored. Days are the union over matched sites, and a site without a
    /// reading on a day contributes [`MISSING_READING_RISK`].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build(&self, histories: &IndexMap<String, Vec<DailyObservation>>) -> Vec<LabelRow> {
        let matched = self
            .sites
            .iter()
            .filter_map(|site| {
                let history = histories.get(&site.site_id)?;
                let readings = history
                    .iter()
                    .map(|obs| (obs.date, obs.gauge_ft))
                    .collect::<BTreeMap<NaiveDate, Option<f64>>>();
                Some((site, readings))
            })
            .collect::<Vec<_>>();
        if matched.is_empty() {
            return Vec::new();
        }

        let dates = matched
            .iter()
            .flat_map(|(_, readings)| readings.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();

        let daily = dates
            .iter()
            .map(|date| {
                let mut risk_sum = 0.0;
                let mut low_any = false;
                for (site, readings) in &matched {
                    let reading = readings.get(date).copied().flatten();
                    risk_sum += site.risk(reading);
                    low_any |= site.is_low(reading);
                }
                (100.0 * risk_sum / matched.len() as f64, low_any)
            })
            .collect::<Vec<_>>();

        daily
            .windows(LABEL_HORIZON_DAYS)
            .zip(&dates)
            .map(|(window, &date)| LabelRow {
                date,
                mr: window[0].0,
                y: u8::from(window.iter().any(|&(_, low)| low)),
            })
            .collect()
    }

    /// Reads every `usgs_<site>_*.csv` in `dir` and labels the result.
    pub fn build_from_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<LabelRow>, DatasetError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| DatasetError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            let Some(site_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(gauge_site_id)
            else {
                continue;
            };
            if self.sites.iter().any(|site| site.site_id == site_id) {
                files.push((site_id, path));
            }
        }
        if files.is_empty() {
            return Err(DatasetError::NoMatchedSites(dir.to_path_buf()));
        }
        files.sort();

        let mut histories = IndexMap::new();
        for (site_id, path) in files {
            let rows = read_observations(&path)?;
            histories
                .entry(site_id)
                .or_insert_with(Vec::new)
                .extend(rows);
        }
        Ok(self.build(&histories))
    }
}

/// Site id from a `usgs_<site>_<suffix>.csv` file name.
fn gauge_site_id(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".csv")?.strip_prefix("usgs_")?;
    let site = stem.split('_').next().filter(|site| !site.is_empty())?;
    Some(site.to_string())
}
