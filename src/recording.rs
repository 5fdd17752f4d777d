//! Continuous multi-channel recording and its metadata.
//!
//! A [`Recording`] owns the sample buffer ([C, T], µV) together with one
//! [`Channel`] descriptor per row. Every structural edit goes through methods
//! that keep both in step and append a line to the processing log.
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::ica::IcaSolution;

/// Electrode label plus optional 3-D position in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub label: String,
    pub pos: Option<[f64; 3]>,
}

impl Channel {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), pos: None }
    }

    pub fn with_pos(label: impl Into<String>, pos: [f64; 3]) -> Self {
        Self { label: label.into(), pos: Some(pos) }
    }
}

/// Named event marker; `latency` is a (possibly fractional) sample index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub latency: f64,
}

impl Event {
    pub fn new(name: impl Into<String>, latency: f64) -> Self {
        Self { name: name.into(), latency }
    }
}

/// The two mutually exclusive trial types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrialType {
    TargetResponse,
    NonResponse,
}

impl TrialType {
    pub const ALL: [TrialType; 2] = [TrialType::TargetResponse, TrialType::NonResponse];

    pub fn label(self) -> &'static str {
        match self {
            TrialType::TargetResponse => "target-response",
            TrialType::NonResponse => "non-response",
        }
    }
}

impl std::fmt::Display for TrialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Explicit per-recording metadata attached at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingMeta {
    /// Three-digit subject identifier.
    pub subject_id: String,
    /// Subject group label, `UNKNOWN` when not recognised.
    pub subject_type: String,
    /// File stem of the source recording; used to name outputs.
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct Recording {
    pub channels: Vec<Channel>,
    /// [C, T] samples in µV.
    pub data: Array2<f64>,
    pub sfreq: f64,
    pub events: Vec<Event>,
    /// Human-readable processing history, persisted with the recording.
    pub log: Vec<String>,
    /// Labels of every channel dropped so far, in removal order.
    pub removed_channels: Vec<String>,
    /// Number of independent components projected out, once that stage ran.
    pub removed_components: Option<usize>,
    /// Decomposition (and optionally its classification) awaiting projection.
    pub ica: Option<IcaSolution>,
    pub meta: RecordingMeta,
}

impl Recording {
    /// Build a recording, checking that every data row has a descriptor.
    pub fn new(channels: Vec<Channel>, data: Array2<f64>, sfreq: f64) -> Result<Self> {
        if channels.len() != data.nrows() {
            return Err(PipelineError::ChannelMismatch {
                labels: channels.len(),
                rows: data.nrows(),
            });
        }
        if !(sfreq > 0.0) {
            return Err(PipelineError::Precondition(format!("sampling rate {sfreq} Hz")));
        }
        Ok(Self {
            channels,
            data,
            sfreq,
            events: Vec::new(),
            log: Vec::new(),
            removed_channels: Vec::new(),
            removed_components: None,
            ica: None,
            meta: RecordingMeta::default(),
        })
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }

    pub fn with_meta(mut self, meta: RecordingMeta) -> Self {
        self.meta = meta;
        self
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.data.ncols()
    }

    /// Time of sample `i` in ms from the start of the recording.
    #[inline]
    pub fn time_ms(&self, i: usize) -> f64 {
        i as f64 * 1000.0 / self.sfreq
    }

    pub fn labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.label.clone()).collect()
    }

    /// Index of a channel by label, case-insensitive.
    pub fn channel_index(&self, label: &str) -> Option<usize> {
        find_label(&self.channels, label)
    }

    /// Append an entry to the processing log.
    pub fn note(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        log::debug!("[{}] {entry}", self.meta.source);
        self.log.push(entry);
    }

    /// Drop the named channels (case-insensitive; unknown labels ignored).
    ///
    /// Returns the labels actually removed, which are also appended to
    /// [`Recording::removed_channels`].
    pub fn remove_channels(&mut self, labels: &[String], reason: &str) -> Vec<String> {
        let idx: Vec<usize> = labels
            .iter()
            .filter_map(|l| self.channel_index(l))
            .collect();
        self.remove_channel_indices(&idx, reason)
    }

    /// Drop channels by row index. Duplicates and out-of-range indices are ignored.
    pub fn remove_channel_indices(&mut self, indices: &[usize], reason: &str) -> Vec<String> {
        let n = self.n_channels();
        let mut drop = vec![false; n];
        for &i in indices.iter().filter(|&&i| i < n) {
            drop[i] = true;
        }
        let keep: Vec<usize> = (0..n).filter(|&i| !drop[i]).collect();
        if keep.len() == n {
            return Vec::new();
        }

        let removed: Vec<String> = (0..n)
            .filter(|&i| drop[i])
            .map(|i| self.channels[i].label.clone())
            .collect();

        self.data = self.data.select(Axis(0), &keep);
        self.channels = keep.iter().map(|&i| self.channels[i].clone()).collect();
        // A decomposition no longer matches the channel layout.
        self.ica = None;

        self.note(format!("removed {} channel(s) ({reason}): {}", removed.len(), removed.join(", ")));
        self.removed_channels.extend(removed.iter().cloned());
        removed
    }

    /// Verify the channel/data invariant.
    pub fn check(&self) -> Result<()> {
        if self.channels.len() != self.data.nrows() {
            return Err(PipelineError::ChannelMismatch {
                labels: self.channels.len(),
                rows: self.data.nrows(),
            });
        }
        Ok(())
    }
}

pub(crate) fn find_label(channels: &[Channel], label: &str) -> Option<usize> {
    channels.iter().position(|c| c.label.eq_ignore_ascii_case(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(n: usize) -> Recording {
        let channels = (0..n).map(|i| Channel::new(format!("E{i}"))).collect();
        let data = Array2::from_shape_fn((n, 10), |(c, t)| (c * 100 + t) as f64);
        Recording::new(channels, data, 250.0).unwrap()
    }

    #[test]
    fn mismatched_labels_rejected() {
        let err = Recording::new(vec![Channel::new("A")], Array2::zeros((2, 5)), 250.0);
        assert!(matches!(err, Err(PipelineError::ChannelMismatch { labels: 1, rows: 2 })));
    }

    #[test]
    fn removal_keeps_rows_and_labels_in_step() {
        let mut r = rec(5);
        let removed = r.remove_channels(&["e1".into(), "E3".into(), "nope".into()], "test");
        assert_eq!(removed, vec!["E1", "E3"]);
        assert_eq!(r.labels(), vec!["E0", "E2", "E4"]);
        assert_eq!(r.data.nrows(), 3);
        assert_eq!(r.data[[1, 0]], 200.0);
        assert_eq!(r.removed_channels, vec!["E1", "E3"]);
        assert_eq!(r.log.len(), 1);
        r.check().unwrap();
    }

    #[test]
    fn removing_nothing_leaves_log_untouched() {
        let mut r = rec(3);
        assert!(r.remove_channels(&["X".into()], "test").is_empty());
        assert!(r.log.is_empty());
    }

    #[test]
    fn trial_type_labels() {
        assert_eq!(TrialType::TargetResponse.to_string(), "target-response");
        assert_eq!(
            serde_json::to_string(&TrialType::NonResponse).unwrap(),
            "\"non-response\""
        );
    }
}
