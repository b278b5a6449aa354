use std::f64::consts::TAU;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dataset::DailyObservation;

/// A [`DailyObservation`] with derived movement features.
///
/// Window features are `None` until their window has enough observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Day.
    pub date: NaiveDate,
    /// Gauge height in feet.
    pub gauge_ft: Option<f64>,
    /// Daily precipitation in millimetres.
    pub precip_mm: Option<f64>,
    /// Mean temperature in Celsius.
    pub temp_c: Option<f64>,
    /// Mean relative humidity in percent.
    pub rh: Option<f64>,
    /// 7-day gauge mean.
    pub ma_7: Option<f64>,
    /// 30-day gauge mean.
    pub ma_30: Option<f64>,
    /// Gauge change over 3 days.
    pub delta_3: Option<f64>,
    /// Gauge change over 7 days.
    pub delta_7: Option<f64>,
    /// Standardised 30-day precipitation.
    pub spi_30: Option<f64>,
    /// Seasonality, sine of ISO week.
    pub woy_sin: f64,
    /// Seasonality, cosine of ISO week.
    pub woy_cos: f64,
}

/// Window lengths and warm-up minimums for [`FeatureBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBuilder {
    short_window: (usize, usize),
    long_window: (usize, usize),
    precip_window: (usize, usize),
    spi_baseline: (usize, usize),
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self {
            short_window: (7, 3),
            long_window: (30, 10),
            precip_window: (30, 15),
            spi_baseline: (180, 60),
        }
    }
}

impl FeatureBuilder {
    /// Derives features; rows are sorted by date first.
    ///
    /// Windows are positional over the sorted rows, so gaps in the calendar
    /// are not filled.
    #[must_use]
    pub fn build(&self, observations: &[DailyObservation]) -> Vec<FeatureRow> {
        let mut rows = observations.to_vec();
        rows.sort_by_key(|row| row.date);

        let gauge = rows.iter().map(|row| row.gauge_ft).collect::<Vec<_>>();
        let precip = rows
            .iter()
            .map(|row| Some(row.precip_mm.unwrap_or(0.0)))
            .collect::<Vec<_>>();

        let ma_7 = rolling(&gauge, self.short_window, mean);
        let ma_30 = rolling(&gauge, self.long_window, mean);
        let delta_3 = difference(&gauge, 3);
        let delta_7 = difference(&gauge, 7);
        let precip_30 = rolling(&precip, self.precip_window, |values| {
            Some(values.iter().sum())
        });
        let baseline_mean = rolling(&precip_30, self.spi_baseline, mean);
        let baseline_std = rolling(&precip_30, self.spi_baseline, sample_std);

        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                let spi_30 = match (precip_30[idx], baseline_mean[idx], baseline_std[idx]) {
                    (Some(total), Some(mu), Some(sd)) if sd > 0.0 => Some((total - mu) / sd),
                    _ => None,
                };
                let angle = TAU * f64::from(row.date.iso_week().week()) / 52.0;
                FeatureRow {
                    date: row.date,
                    gauge_ft: row.gauge_ft,
                    precip_mm: row.precip_mm,
                    temp_c: row.temp_c,
                    rh: row.rh,
                    ma_7: ma_7[idx],
                    ma_30: ma_30[idx],
                    delta_3: delta_3[idx],
                    delta_7: delta_7[idx],
                    spi_30,
                    woy_sin: angle.sin(),
                    woy_cos: angle.cos(),
                }
            })
            .collect()
    }
}

/// Trailing window of `width` positions; `stat` sees only present values and
/// runs once at least `min_present` are available.
fn rolling(
    series: &[Option<f64>],
    (width, min_present): (usize, usize),
    stat: impl Fn(&[f64]) -> Option<f64>,
) -> Vec<Option<f64>> {
    let mut window = Vec::with_capacity(width);
    (0..series.len())
        .map(|end| {
            let start = (end + 1).saturating_sub(width);
            window.clear();
            window.extend(series[start..=end].iter().flatten());
            if window.len() >= min_present.max(1) {
                stat(&window)
            } else {
                None
            }
        })
        .collect()
}

fn difference(series: &[Option<f64>], lag: usize) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|idx| {
            let previous = idx.checked_sub(lag).and_then(|prev| series[prev])?;
            Some(series[idx]? - previous)
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[allow(clippy::cast_precision_loss)]
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mu = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}
