use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{features::FeatureRow, trainer::LabeledScore};

/// Failures reading or writing offline datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Filesystem failure.
    #[error("{path:?}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Malformed CSV.
    #[error("{path:?}: {source}")]
    Csv {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },
    /// No gauge file matched a configured site.
    #[error("no gauge history in {0:?} matched a configured site")]
    NoMatchedSites(PathBuf),
}

/// One day of movement score and forward disruption label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    /// Day.
    pub date: NaiveDate,
    /// Movement score for the day.
    pub mr: f64,
    /// 1 when a low-water event occurs within the next 7 days.
    pub y: u8,
}

impl From<LabelRow> for LabeledScore {
    fn from(row: LabelRow) -> Self {
        Self {
            score: row.mr,
            event: row.y > 0,
        }
    }
}

/// One day of gauge and weather readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyObservation {
    /// Day.
    pub date: NaiveDate,
    /// Gauge height in feet.
    pub gauge_ft: Option<f64>,
    /// Daily precipitation in millimetres.
    #[serde(default)]
    pub precip_mm: Option<f64>,
    /// Mean temperature in Celsius.
    #[serde(default)]
    pub temp_c: Option<f64>,
    /// Mean relative humidity in percent.
    #[serde(default)]
    pub rh: Option<f64>,
}

/// Reads a `date,mr,y` CSV, dropping rows with a missing score or label.
///
/// Labels written as floats (`1.0`) are accepted.
pub fn read_labels(path: impl AsRef<Path>) -> Result<Vec<LabelRow>, DatasetError> {
    #[derive(Deserialize)]
    struct RawLabel {
        date: NaiveDate,
        mr: Option<f64>,
        y: Option<f64>,
    }

    let rows: Vec<RawLabel> = read_csv(path.as_ref())?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let (mr, y) = (row.mr?, row.y?);
            Some(LabelRow {
                date: row.date,
                mr,
                y: u8::from(y >= 0.5),
            })
        })
        .collect())
}

/// Writes labels as `date,mr,y`.
pub fn write_labels(path: impl AsRef<Path>, rows: &[LabelRow]) -> Result<(), DatasetError> {
    write_csv(path.as_ref(), rows)
}

/// Reads a `date,gauge_ft,precip_mm,temp_c,rh` CSV; absent columns read as missing.
pub fn read_observations(path: impl AsRef<Path>) -> Result<Vec<DailyObservation>, DatasetError> {
    read_csv(path.as_ref())
}

/// Writes feature rows, input columns first; undefined features are empty cells.
pub fn write_features(path: impl AsRef<Path>, rows: &[FeatureRow]) -> Result<(), DatasetError> {
    write_csv(path.as_ref(), rows)
}

pub(crate) fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(csv_err)
}

pub(crate) fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| DatasetError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let csv_err = |source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_float_labels_and_drops_gaps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mr_labels.csv");
        fs::write(
            &path,
            "date,mr,y\n2024-05-01,62.5,1.0\n2024-05-02,,0.0\n2024-05-03,40.0,0.0\n2024-05-04,41.0,\n",
        )
        .unwrap();
        let rows = read_labels(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].y, 1);
        assert_eq!(rows[1].y, 0);
        let sample = LabeledScore::from(rows[0]);
        assert!(sample.event);
    }

    #[test]
    fn label_csv_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/labels.csv");
        let rows = vec![LabelRow {
            date: NaiveDate::from_ymd_opt(2024, 7, 9).unwrap(),
            mr: 55.0,
            y: 1,
        }];
        write_labels(&path, &rows).unwrap();
        assert_eq!(read_labels(&path).unwrap(), rows);
    }

    #[test]
    fn observations_tolerate_missing_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usgs_07374000_180d.csv");
        fs::write(&path, "date,gauge_ft\n2024-01-01,7.5\n2024-01-02,\n").unwrap();
        let rows = read_observations(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].gauge_ft, Some(7.5));
        assert!(rows[1].gauge_ft.is_none());
        assert!(rows[0].precip_mm.is_none());
    }

    #[test]
    fn feature_csv_leaves_undefined_cells_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("features.csv");
        let observations = read_observations_from(&dir, "date,gauge_ft\n2024-01-01,7.5\n");
        let rows = crate::features::FeatureBuilder::default().build(&observations);
        write_features(&path, &rows).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert!(lines.next().unwrap().starts_with("date,gauge_ft,precip_mm,temp_c,rh,ma_7"));
        assert!(lines.next().unwrap().starts_with("2024-01-01,7.5,,,,,"));
    }

    fn read_observations_from(dir: &tempfile::TempDir, body: &str) -> Vec<DailyObservation> {
        let path = dir.path().join("input.csv");
        fs::write(&path, body).unwrap();
        read_observations(&path).unwrap()
    }
}
