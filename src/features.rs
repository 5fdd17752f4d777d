//! Feature Extractor: positive/negative deflection metrics on the evoked
//! response.
//!
//! For every configured electrode pair the epoch average of the first usable
//! label is taken. Inside each search window the extremum of the matching
//! peak envelope is located, and the raw average over
//! `± round(averaging_width_ms · sfreq / 1000)` samples around it becomes the
//! amplitude.
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::baseline::sample_window;
use crate::config::FeatureConfig;
use crate::epochs::EpochSet;
use crate::error::{PipelineError, Result};
use crate::recording::TrialType;

/// Envelope through the local maxima of `x` and both end points, linearly
/// interpolated at every sample.
pub fn upper_envelope(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 3 {
        return x.to_vec();
    }
    let mut knots = vec![0];
    knots.extend((1..n - 1).filter(|&i| x[i] > x[i - 1] && x[i] >= x[i + 1]));
    knots.push(n - 1);

    let mut env = vec![0.0; n];
    for pair in knots.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b - a) as f64;
        for (i, e) in env.iter_mut().enumerate().take(b + 1).skip(a) {
            let w = (i - a) as f64 / span;
            *e = x[a] * (1.0 - w) + x[b] * w;
        }
    }
    env
}

/// Mirror of [`upper_envelope`] through the local minima.
pub fn lower_envelope(x: &[f64]) -> Vec<f64> {
    let neg: Vec<f64> = x.iter().map(|v| -v).collect();
    upper_envelope(&neg).into_iter().map(|v| -v).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// One located deflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakMeasure {
    /// Mean of the evoked response over `average_window`, µV.
    pub amplitude: f64,
    /// Search window `[start, end)` in samples of the epoch time axis.
    pub search_window: (usize, usize),
    /// Extremum position relative to `search_window.0`.
    pub offset: usize,
    /// Averaged samples `[start, end]`, inclusive, clamped to the epoch.
    pub average_window: (usize, usize),
    /// `times[search_window.0 + offset]`.
    pub latency_ms: f64,
}

impl PeakMeasure {
    #[inline]
    pub fn peak_index(&self) -> usize {
        self.search_window.0 + self.offset
    }
}

/// Locate one deflection in `erp`. `None` when the window misses the time
/// axis.
pub fn measure_peak(
    erp: &[f64],
    times: &[f64],
    window_ms: (f64, f64),
    half_width: usize,
    polarity: Polarity,
) -> Option<PeakMeasure> {
    let window = sample_window(times, window_ms);
    if window.is_empty() || window.end > erp.len() {
        return None;
    }
    let env = match polarity {
        Polarity::Positive => upper_envelope(erp),
        Polarity::Negative => lower_envelope(erp),
    };
    let segment = &env[window.clone()];
    // First occurrence wins on ties.
    let offset = segment
        .iter()
        .enumerate()
        .fold(0, |best, (i, &v)| match polarity {
            Polarity::Positive if v > segment[best] => i,
            Polarity::Negative if v < segment[best] => i,
            _ => best,
        });

    let idx = window.start + offset;
    let lo = idx.saturating_sub(half_width);
    let hi = (idx + half_width).min(erp.len() - 1);
    let amplitude = erp[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;

    Some(PeakMeasure {
        amplitude,
        search_window: (window.start, window.end),
        offset,
        average_window: (lo, hi),
        latency_ms: times[idx],
    })
}

/// Both deflections of one electrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeMetrics {
    /// Label actually measured (primary or alternate).
    pub electrode: String,
    pub positive: Option<PeakMeasure>,
    pub negative: Option<PeakMeasure>,
}

/// One slot per configured electrode pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSlot {
    pub primary: String,
    pub alternate: String,
    /// `None` when neither label carries data.
    pub metrics: Option<ElectrodeMetrics>,
}

/// Terminal record of the Feature Extractor for one (subject, category).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub subject_id: String,
    pub subject_type: String,
    pub source: String,
    pub category: TrialType,
    pub n_epochs: usize,
    pub pairs: Vec<PairSlot>,
}

/// Averaging half-width in samples at `sfreq`.
pub fn half_width_samples(averaging_width_ms: f64, sfreq: f64) -> usize {
    (averaging_width_ms * sfreq / 1000.0).round().max(0.0) as usize
}

/// Measure every configured pair on the epoch average of `set`.
pub fn extract_metrics(set: &EpochSet, cfg: &FeatureConfig) -> Result<MetricRecord> {
    set.check()?;
    let evoked = set.evoked().ok_or_else(|| {
        PipelineError::Precondition(format!("[{}] no epochs to average", set.meta.source))
    })?;
    let half = half_width_samples(cfg.averaging_width_ms, set.sfreq);

    let usable = |label: &str| -> Option<(String, Vec<f64>)> {
        let c = set.channel_index(label)?;
        let row = evoked.row(c).to_vec();
        let has_data = row.iter().all(|v| v.is_finite()) && row.iter().any(|&v| v != 0.0);
        has_data.then(|| (set.channels[c].label.clone(), row))
    };

    let pairs = cfg
        .pairs
        .iter()
        .map(|(primary, alternate)| {
            let found = usable(primary).or_else(|| {
                let alt = usable(alternate);
                if alt.is_some() {
                    debug!("[{}] {primary} unavailable, using {alternate}", set.meta.source);
                }
                alt
            });
            let metrics = match found {
                Some((electrode, erp)) => Some(ElectrodeMetrics {
                    positive: measure_peak(&erp, &set.times, cfg.positive_window_ms, half, Polarity::Positive),
                    negative: measure_peak(&erp, &set.times, cfg.negative_window_ms, half, Polarity::Negative),
                    electrode,
                }),
                None => {
                    warn!(
                        "[{}] {}: neither {primary} nor {alternate} present, pair skipped",
                        set.meta.source, set.trial_type
                    );
                    None
                }
            };
            PairSlot {
                primary: primary.clone(),
                alternate: alternate.clone(),
                metrics,
            }
        })
        .collect();

    Ok(MetricRecord {
        subject_id: set.meta.subject_id.clone(),
        subject_type: set.meta.subject_type.clone(),
        source: set.meta.source.clone(),
        category: set.trial_type,
        n_epochs: set.n_epochs(),
        pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_touches_local_maxima() {
        let x = [0.0, 2.0, 1.0, 1.0, 4.0, 0.0];
        let up = upper_envelope(&x);
        assert_eq!(up[1], 2.0);
        assert_eq!(up[4], 4.0);
        // linear between 2.0 at 1 and 4.0 at 4
        approx::assert_abs_diff_eq!(up[2], 2.0 + 2.0 / 3.0, epsilon = 1e-12);
        assert!(up.iter().zip(&x).all(|(e, v)| e >= v));
        let lo = lower_envelope(&x);
        assert!(lo.iter().zip(&x).all(|(e, v)| e <= v));
    }

    #[test]
    fn half_width_follows_sampling_rate() {
        assert_eq!(half_width_samples(20.0, 250.0), 5);
        assert_eq!(half_width_samples(20.0, 500.0), 10);
        assert_eq!(half_width_samples(20.0, 1000.0), 20);
    }

    #[test]
    fn averaging_window_is_clamped() {
        let times: Vec<f64> = (0..10).map(|i| i as f64 * 4.0).collect();
        let erp = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 3.0];
        let m = measure_peak(&erp, &times, (20.0, 40.0), 3, Polarity::Positive).unwrap();
        assert_eq!(m.peak_index(), 9);
        assert_eq!(m.average_window, (6, 9));
        approx::assert_abs_diff_eq!(m.amplitude, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn window_outside_time_axis_gives_none() {
        let times: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert!(measure_peak(&[0.0; 10], &times, (100.0, 200.0), 1, Polarity::Negative).is_none());
    }
}
