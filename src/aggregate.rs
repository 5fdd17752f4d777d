//! Result Aggregation and tabular export.
//!
//! Metric records become uniform rows, one per (subject, category, electrode
//! pair). A pair without data keeps its row with every measurement written as
//! `NA`, so "absent electrode" never reads as a zero amplitude.
use std::path::Path;

use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::features::{MetricRecord, PeakMeasure};
use crate::recording::TrialType;
use crate::spectrum::BandPowerRow;

/// Missing-value marker in exported tables.
pub const MISSING: &str = "NA";

/// Serialize `None` as [`MISSING`].
pub fn na<T: Serialize, S: Serializer>(value: &Option<T>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str(MISSING),
    }
}

/// One exported row, columns in export order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub subject_id: String,
    pub category: TrialType,
    pub subject_type: String,
    pub electrode: String,
    #[serde(serialize_with = "na")]
    pub pos_amplitude: Option<f64>,
    #[serde(serialize_with = "na")]
    pub pos_window_start: Option<usize>,
    #[serde(serialize_with = "na")]
    pub pos_window_end: Option<usize>,
    #[serde(serialize_with = "na")]
    pub pos_latency_ms: Option<f64>,
    #[serde(serialize_with = "na")]
    pub neg_amplitude: Option<f64>,
    #[serde(serialize_with = "na")]
    pub neg_window_start: Option<usize>,
    #[serde(serialize_with = "na")]
    pub neg_window_end: Option<usize>,
    #[serde(serialize_with = "na")]
    pub neg_latency_ms: Option<f64>,
}

impl MetricRow {
    fn new(record: &MetricRecord, electrode: String, pos: Option<&PeakMeasure>, neg: Option<&PeakMeasure>) -> Self {
        Self {
            subject_id: record.subject_id.clone(),
            category: record.category,
            subject_type: record.subject_type.clone(),
            electrode,
            pos_amplitude: pos.map(|m| m.amplitude),
            pos_window_start: pos.map(|m| m.average_window.0),
            pos_window_end: pos.map(|m| m.average_window.1),
            pos_latency_ms: pos.map(|m| m.latency_ms),
            neg_amplitude: neg.map(|m| m.amplitude),
            neg_window_start: neg.map(|m| m.average_window.0),
            neg_window_end: neg.map(|m| m.average_window.1),
            neg_latency_ms: neg.map(|m| m.latency_ms),
        }
    }
}

/// Rows of one record, in pair order.
pub fn record_rows(record: &MetricRecord) -> Vec<MetricRow> {
    record
        .pairs
        .iter()
        .map(|slot| match &slot.metrics {
            Some(m) => MetricRow::new(record, m.electrode.clone(), m.positive.as_ref(), m.negative.as_ref()),
            None => MetricRow::new(record, slot.primary.clone(), None, None),
        })
        .collect()
}

/// All rows of `category`, ordered by subject then pair.
pub fn category_rows(records: &[MetricRecord], category: TrialType) -> Vec<MetricRow> {
    let mut selected: Vec<&MetricRecord> = records.iter().filter(|r| r.category == category).collect();
    selected.sort_by(|a, b| (&a.subject_id, &a.source).cmp(&(&b.subject_id, &b.source)));
    selected.into_iter().flat_map(record_rows).collect()
}

/// Write serialisable rows as CSV with a header line.
pub fn write_csv<T: Serialize>(rows: &[T], path: &Path) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    for row in rows {
        w.serialize(row)?;
    }
    w.flush()?;
    Ok(())
}

/// Metric rows of `category` to `path`; returns the number of rows.
pub fn export_category(records: &[MetricRecord], category: TrialType, path: &Path) -> Result<usize> {
    let rows = category_rows(records, category);
    write_csv(&rows, path)?;
    Ok(rows.len())
}

/// Band-power rows to `path`.
pub fn export_band_powers(rows: &[BandPowerRow], path: &Path) -> Result<()> {
    write_csv(rows, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{ElectrodeMetrics, PairSlot};

    fn peak(amp: f64) -> PeakMeasure {
        PeakMeasure {
            amplitude: amp,
            search_window: (125, 188),
            offset: 10,
            average_window: (130, 140),
            latency_ms: 290.0,
        }
    }

    fn record(id: &str, with_pz: bool) -> MetricRecord {
        MetricRecord {
            subject_id: id.into(),
            subject_type: "HC".into(),
            source: format!("sub{id}"),
            category: TrialType::NonResponse,
            n_epochs: 12,
            pairs: vec![
                PairSlot {
                    primary: "Cz".into(),
                    alternate: "CPz".into(),
                    metrics: Some(ElectrodeMetrics {
                        electrode: "CPz".into(),
                        positive: Some(peak(4.5)),
                        negative: Some(peak(-2.0)),
                    }),
                },
                PairSlot {
                    primary: "Pz".into(),
                    alternate: "POz".into(),
                    metrics: with_pz.then(|| ElectrodeMetrics {
                        electrode: "Pz".into(),
                        positive: Some(peak(6.0)),
                        negative: None,
                    }),
                },
            ],
        }
    }

    #[test]
    fn rows_keep_pair_slots_and_order() {
        let rows = category_rows(&[record("012", true), record("003", false)], TrialType::NonResponse);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].subject_id, "003");
        assert_eq!(rows[0].electrode, "CPz");
        assert_eq!(rows[1].electrode, "Pz");
        assert_eq!(rows[1].pos_amplitude, None);
        assert!(category_rows(&[record("1", true)], TrialType::TargetResponse).is_empty());
    }

    #[test]
    fn missing_values_are_written_as_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        export_category(&[record("003", false)], TrialType::NonResponse, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "subject_id,category,subject_type,electrode,pos_amplitude,pos_window_start,pos_window_end,\
             pos_latency_ms,neg_amplitude,neg_window_start,neg_window_end,neg_latency_ms"
        );
        assert_eq!(lines[1], "003,non-response,HC,CPz,4.5,130,140,290.0,-2.0,130,140,290.0");
        assert_eq!(lines[2], "003,non-response,HC,Pz,NA,NA,NA,NA,NA,NA,NA,NA");
    }
}
