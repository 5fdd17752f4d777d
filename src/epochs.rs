//! Epoch Extractor & Epoch-Quality Filter.
//!
//! ```text
//! cleaned recording [C, T] + events
//!   ├─ extract                [tmin, tmax] ms around each category marker → [E, C, T']
//!   ├─ baseline               subtract the pre-event mean per epoch per channel
//!   ├─ amplitude rejection    any |x| > abs_threshold_uv
//!   ├─ joint-probability      iterative, threshold relaxed when too many go at once
//!   └─ reaction time          target-response only: response within (lo, hi] ms
//! ```
//!
//! The amplitude test runs before the probability test so that gross
//! artifacts never enter the probability statistics.
use log::{debug, info};
use ndarray::{s, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::baseline::{baseline_correct_inplace, sample_window};
use crate::config::EpochConfig;
use crate::error::{PipelineError, Result};
use crate::recording::{find_label, Channel, Recording, RecordingMeta, TrialType};
use crate::stats::trimmed_zscore;

/// Histogram resolution of the sample probability estimate.
const PROB_BINS: usize = 1000;

/// Fraction of sorted values trimmed per side before z-scoring the joint
/// probabilities.
const PROB_TRIM: f64 = 0.1;

/// Epochs dropped per reason, for auditing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionSummary {
    pub out_of_bounds: usize,
    pub amplitude: usize,
    pub probability: usize,
    pub reaction_time: usize,
}

/// Epochs of one trial type cut from one recording.
#[derive(Debug, Clone)]
pub struct EpochSet {
    pub channels: Vec<Channel>,
    /// [E, C, T] in µV.
    pub data: Array3<f64>,
    pub sfreq: f64,
    /// Time of each sample relative to the event, in ms.
    pub times: Vec<f64>,
    pub trial_type: TrialType,
    pub meta: RecordingMeta,
    /// Processing log inherited from the recording, then extended.
    pub log: Vec<String>,
    pub removed_channels: Vec<String>,
    pub removed_components: Option<usize>,
    /// Event latency (samples in the continuous recording) of each epoch.
    pub event_latencies: Vec<f64>,
    /// Reaction time in ms of each epoch, when a response followed.
    pub reaction_times: Vec<Option<f64>>,
    pub rejected: RejectionSummary,
}

impl EpochSet {
    #[inline]
    pub fn n_epochs(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_epochs() == 0
    }

    pub fn channel_index(&self, label: &str) -> Option<usize> {
        find_label(&self.channels, label)
    }

    pub fn note(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        debug!("[{} {}] {entry}", self.meta.source, self.trial_type);
        self.log.push(entry);
    }

    /// Keep the epochs whose flag is `true`; returns how many were dropped.
    pub fn retain(&mut self, keep: &[bool], reason: &str) -> usize {
        let idx: Vec<usize> = (0..self.n_epochs()).filter(|&e| keep.get(e).copied().unwrap_or(false)).collect();
        let dropped = self.n_epochs() - idx.len();
        if dropped == 0 {
            return 0;
        }
        self.data = self.data.select(Axis(0), &idx);
        self.event_latencies = idx.iter().map(|&e| self.event_latencies[e]).collect();
        self.reaction_times = idx.iter().map(|&e| self.reaction_times[e]).collect();
        self.note(format!("rejected {dropped} epoch(s) ({reason}), {} remain", idx.len()));
        dropped
    }

    /// Average over epochs, [C, T]. `None` for an empty set.
    pub fn evoked(&self) -> Option<Array2<f64>> {
        self.data.mean_axis(Axis(0))
    }

    /// Verify the shape invariants.
    pub fn check(&self) -> Result<()> {
        let (e, c, t) = self.data.dim();
        if c != self.channels.len() {
            return Err(PipelineError::ChannelMismatch { labels: self.channels.len(), rows: c });
        }
        if t != self.times.len() || e != self.event_latencies.len() || e != self.reaction_times.len() {
            return Err(PipelineError::Format(format!(
                "epoch set shape [{e}, {c}, {t}] disagrees with {} times / {} events",
                self.times.len(),
                self.event_latencies.len()
            )));
        }
        Ok(())
    }
}

/// Epoch time axis in ms: `round((tmax − tmin) · sfreq / 1000)` samples from `tmin`.
pub fn epoch_times(tmin_ms: f64, tmax_ms: f64, sfreq: f64) -> Vec<f64> {
    let n = ((tmax_ms - tmin_ms) * sfreq / 1000.0).round().max(0.0) as usize;
    (0..n).map(|i| tmin_ms + i as f64 * 1000.0 / sfreq).collect()
}

/// Marker names of `trial_type`.
pub fn markers_for(cfg: &EpochConfig, trial_type: TrialType) -> &[String] {
    match trial_type {
        TrialType::TargetResponse => &cfg.target_markers,
        TrialType::NonResponse => &cfg.nonresponse_markers,
    }
}

fn matches_any(name: &str, markers: &[String]) -> bool {
    let name = name.trim();
    markers.iter().any(|m| m.trim().eq_ignore_ascii_case(name))
}

fn is_stimulus(name: &str, cfg: &EpochConfig) -> bool {
    TrialType::ALL.iter().any(|&t| matches_any(name, markers_for(cfg, t)))
}

/// Cut every window around the markers of `trial_type`.
///
/// Windows that run past either end of the recording are dropped. Each
/// epoch also records the delay to the first response marker after it and
/// before the next stimulus marker of either category.
pub fn extract(rec: &Recording, trial_type: TrialType, cfg: &EpochConfig) -> Result<EpochSet> {
    rec.check()?;
    if !(cfg.tmin_ms < cfg.tmax_ms) {
        return Err(PipelineError::Precondition(format!(
            "epoch window [{}, {}] ms is empty",
            cfg.tmin_ms, cfg.tmax_ms
        )));
    }
    let times = epoch_times(cfg.tmin_ms, cfg.tmax_ms, rec.sfreq);
    let n_t = times.len();
    let offset = cfg.tmin_ms * rec.sfreq / 1000.0;
    let markers = markers_for(cfg, trial_type);

    let mut slabs = Vec::new();
    let mut event_latencies = Vec::new();
    let mut reaction_times = Vec::new();
    let mut out_of_bounds = 0usize;

    for ev in rec.events.iter().filter(|ev| matches_any(&ev.name, markers)) {
        let start = (ev.latency + offset).round();
        if start < 0.0 || start as usize + n_t > rec.n_times() {
            out_of_bounds += 1;
            continue;
        }
        let start = start as usize;
        slabs.push(rec.data.slice(s![.., start..start + n_t]).to_owned());
        event_latencies.push(ev.latency);
        let next_stimulus = rec
            .events
            .iter()
            .filter(|n| n.latency > ev.latency && is_stimulus(&n.name, cfg))
            .map(|n| n.latency)
            .fold(f64::INFINITY, f64::min);
        reaction_times.push(
            rec.events
                .iter()
                .filter(|r| {
                    r.latency > ev.latency
                        && r.latency < next_stimulus
                        && matches_any(&r.name, &cfg.response_markers)
                })
                .map(|r| (r.latency - ev.latency) * 1000.0 / rec.sfreq)
                .min_by(f64::total_cmp),
        );
    }

    let mut data = Array3::zeros((slabs.len(), rec.n_channels(), n_t));
    for (mut dst, src) in data.axis_iter_mut(Axis(0)).zip(&slabs) {
        dst.assign(src);
    }

    let mut set = EpochSet {
        channels: rec.channels.clone(),
        data,
        sfreq: rec.sfreq,
        times,
        trial_type,
        meta: rec.meta.clone(),
        log: rec.log.clone(),
        removed_channels: rec.removed_channels.clone(),
        removed_components: rec.removed_components,
        event_latencies,
        reaction_times,
        rejected: RejectionSummary { out_of_bounds, ..RejectionSummary::default() },
    };
    set.note(format!(
        "extracted {} {} epoch(s) of [{}, {}] ms ({} samples), {out_of_bounds} out of bounds",
        set.n_epochs(),
        trial_type,
        cfg.tmin_ms,
        cfg.tmax_ms,
        n_t
    ));
    Ok(set)
}

/// Subtract the mean over `baseline_ms` from every epoch and channel.
pub fn apply_baseline(set: &mut EpochSet, baseline_ms: (f64, f64)) {
    let window = sample_window(&set.times, baseline_ms);
    baseline_correct_inplace(&mut set.data, window.clone());
    set.note(format!(
        "baseline [{}, {}] ms removed ({} samples)",
        baseline_ms.0,
        baseline_ms.1,
        window.len()
    ));
}

/// Epochs with any sample beyond ±`threshold`.
pub fn amplitude_outliers(data: &Array3<f64>, threshold: f64) -> Vec<bool> {
    data.axis_iter(Axis(0))
        .map(|epoch| epoch.iter().any(|v| v.abs() > threshold))
        .collect()
}

/// Drop epochs failing the absolute amplitude test.
pub fn reject_amplitude(set: &mut EpochSet, threshold: f64) -> usize {
    let keep: Vec<bool> = amplitude_outliers(&set.data, threshold).into_iter().map(|r| !r).collect();
    let n = set.retain(&keep, &format!("|amplitude| > {threshold} µV"));
    set.rejected.amplitude += n;
    n
}

/// Probability of each value under the histogram of all `values`.
fn sample_probabilities(values: &[f64]) -> Vec<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(hi > lo) {
        return vec![1.0; values.len()];
    }
    let bin = |v: f64| ((v - lo) / (hi - lo) * (PROB_BINS - 1) as f64).floor() as usize;
    let mut counts = vec![0usize; PROB_BINS];
    for &v in values {
        counts[bin(v)] += 1;
    }
    let n = values.len() as f64;
    values.iter().map(|&v| counts[bin(v)] as f64 / n).collect()
}

/// Joint log-probability of each epoch: per channel [C, E] and over all
/// channels together [E]. Larger means less likely.
pub fn joint_probability(data: &Array3<f64>) -> (Array2<f64>, Vec<f64>) {
    let (n_e, n_c, n_t) = data.dim();
    let mut local = Array2::zeros((n_c, n_e));
    for c in 0..n_c {
        let values: Vec<f64> = data.slice(s![.., c, ..]).iter().copied().collect();
        let p = sample_probabilities(&values);
        for (e, chunk) in p.chunks(n_t.max(1)).enumerate() {
            local[[c, e]] = -chunk.iter().map(|v| v.ln()).sum::<f64>();
        }
    }
    let all: Vec<f64> = data.iter().copied().collect();
    let p = sample_probabilities(&all);
    let global = p
        .chunks((n_c * n_t).max(1))
        .map(|chunk| -chunk.iter().map(|v| v.ln()).sum::<f64>())
        .collect();
    (local, global)
}

/// Worst joint-probability z-score of each epoch: the largest `|z|` over the
/// all-channel statistic and every per-channel one. Fewer than three epochs
/// score zero.
pub fn probability_scores(data: &Array3<f64>) -> Vec<f64> {
    let n_e = data.len_of(Axis(0));
    if n_e < 3 {
        return vec![0.0; n_e];
    }
    let (local, global) = joint_probability(data);
    let mut scores: Vec<f64> = trimmed_zscore(&global, PROB_TRIM).into_iter().map(f64::abs).collect();
    for row in local.rows() {
        let z = trimmed_zscore(&row.to_vec(), PROB_TRIM);
        for (s, z) in scores.iter_mut().zip(z) {
            *s = s.max(z.abs());
        }
    }
    scores
}

/// One pass of the joint-probability test at `threshold_sd`.
pub fn probability_outliers(data: &Array3<f64>, threshold_sd: f64) -> Vec<bool> {
    probability_scores(data).into_iter().map(|z| z > threshold_sd).collect()
}

/// Threshold at which at most `limit` of `scores` exceed it, starting from
/// `base` and relaxing in 0.5 SD steps. `None` when more than `limit` scores
/// are infinite, so no finite threshold gets there.
fn relaxed_threshold(scores: &[f64], base: f64, limit: f64) -> Option<f64> {
    let allowed = limit.max(0.0).floor() as usize;
    let mut sorted: Vec<f64> = scores.iter().copied().filter(|z| !z.is_nan()).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));
    // The smallest threshold passing is the first score that may not exceed it.
    let Some(&pivot) = sorted.get(allowed) else {
        return Some(base);
    };
    if pivot.is_infinite() {
        return None;
    }
    if pivot <= base {
        return Some(base);
    }
    let mut threshold = base + 0.5 * ((pivot - base) / 0.5).ceil();
    if threshold < pivot {
        threshold += 0.5;
    }
    Some(threshold)
}

/// Iterative joint-probability rejection.
///
/// Every round recomputes the statistics on the surviving epochs and starts
/// from `prob_threshold_sd`. While more than `max_reject_fraction` of the
/// epochs would go, the threshold is raised by 0.5 SD; the epochs over the
/// first threshold that passes are removed and the next round starts from
/// the base threshold again. The pass ends once a round removes nothing, so
/// running it again on its own output removes nothing either.
pub fn reject_probability(set: &mut EpochSet, cfg: &EpochConfig) -> usize {
    let base = cfg.prob_threshold_sd;
    let mut total = 0usize;
    loop {
        let scores = probability_scores(&set.data);
        let limit = cfg.max_reject_fraction * set.n_epochs() as f64;
        let Some(threshold) = relaxed_threshold(&scores, base, limit) else {
            debug!(
                "[{} {}] too many epochs with degenerate probability statistics, stopping",
                set.meta.source, set.trial_type
            );
            break;
        };
        let keep: Vec<bool> = scores.iter().map(|&z| !(z > threshold)).collect();
        if keep.iter().all(|&k| k) {
            break;
        }
        if threshold > base {
            debug!(
                "[{} {}] probability limit relaxed to {threshold} SD",
                set.meta.source, set.trial_type
            );
        }
        total += set.retain(&keep, &format!("joint probability > {threshold} SD"));
    }
    set.rejected.probability += total;
    total
}

/// Amplitude test, then iterative probability test.
pub fn reject_epochs(set: &mut EpochSet, cfg: &EpochConfig) -> usize {
    reject_amplitude(set, cfg.abs_threshold_uv) + reject_probability(set, cfg)
}

/// Drop epochs without a response in `(lo, hi]` ms.
pub fn filter_reaction_times(set: &mut EpochSet, (lo, hi): (f64, f64)) -> usize {
    let keep: Vec<bool> = set
        .reaction_times
        .iter()
        .map(|rt| rt.is_some_and(|rt| rt > lo && rt <= hi))
        .collect();
    let n = set.retain(&keep, &format!("no response within ({lo}, {hi}] ms"));
    set.rejected.reaction_time += n;
    n
}

/// Full epoch stage for one trial type. `Ok(None)` when no epoch survives.
pub fn process_category(rec: &Recording, trial_type: TrialType, cfg: &EpochConfig) -> Result<Option<EpochSet>> {
    let mut set = extract(rec, trial_type, cfg)?;
    apply_baseline(&mut set, cfg.baseline_ms);
    reject_epochs(&mut set, cfg);
    if trial_type == TrialType::TargetResponse {
        filter_reaction_times(&mut set, cfg.rt_window_ms);
    }
    set.check()?;

    let r = set.rejected;
    info!(
        "[{}] {trial_type}: {} epoch(s) kept; dropped {} out of bounds, {} amplitude, {} probability, {} reaction time",
        rec.meta.source,
        set.n_epochs(),
        r.out_of_bounds,
        r.amplitude,
        r.probability,
        r.reaction_time
    );
    if set.is_empty() {
        info!("[{}] {trial_type}: no epochs left, nothing to save", rec.meta.source);
        return Ok(None);
    }
    Ok(Some(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::Event;

    fn flat_rec(n_times: usize, events: Vec<Event>) -> Recording {
        let channels = vec![Channel::new("Cz"), Channel::new("Pz")];
        let data = Array2::from_shape_fn((2, n_times), |(c, t)| c as f64 + t as f64 * 0.01);
        Recording::new(channels, data, 250.0).unwrap().with_events(events)
    }

    #[test]
    fn time_axis_rounds_half_up() {
        let t = epoch_times(-250.0, 1000.0, 250.0);
        assert_eq!(t.len(), 313);
        assert_eq!(t[0], -250.0);
        approx::assert_abs_diff_eq!(t[62], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn edge_events_are_dropped() {
        let rec = flat_rec(1000, vec![Event::new("go", 10.0), Event::new("go", 500.0), Event::new("go", 990.0)]);
        let set = extract(&rec, TrialType::TargetResponse, &EpochConfig::default()).unwrap();
        assert_eq!(set.n_epochs(), 1);
        assert_eq!(set.rejected.out_of_bounds, 2);
        // start = round(500 - 62.5) = 438
        approx::assert_abs_diff_eq!(set.data[[0, 0, 0]], 438.0 * 0.01, epsilon = 1e-12);
    }

    #[test]
    fn markers_are_case_insensitive_and_category_specific() {
        let rec = flat_rec(2000, vec![Event::new("GO", 500.0), Event::new("nogo", 1000.0)]);
        let cfg = EpochConfig::default();
        assert_eq!(extract(&rec, TrialType::TargetResponse, &cfg).unwrap().n_epochs(), 1);
        assert_eq!(extract(&rec, TrialType::NonResponse, &cfg).unwrap().n_epochs(), 1);
    }

    #[test]
    fn reaction_time_window_is_half_open() {
        let rec = flat_rec(
            4000,
            vec![
                Event::new("go", 500.0),
                Event::new("R 1", 525.0), // 100 ms: excluded
                Event::new("go", 1500.0),
                Event::new("R 1", 1550.0), // 200 ms
                Event::new("go", 2500.0),
                Event::new("go", 3000.0),
                Event::new("R 1", 3250.0), // 1000 ms: included
            ],
        );
        let mut set = extract(&rec, TrialType::TargetResponse, &EpochConfig::default()).unwrap();
        assert_eq!(set.reaction_times[0], Some(100.0));
        // The response at 3250 belongs to the stimulus at 3000, not 2500.
        assert_eq!(set.reaction_times[2], None);
        assert_eq!(set.reaction_times[3], Some(1000.0));
        let dropped = filter_reaction_times(&mut set, (100.0, 1000.0));
        assert_eq!(dropped, 2);
        assert_eq!(set.event_latencies, vec![1500.0, 3000.0]);
    }

    #[test]
    fn response_after_another_stimulus_is_not_paired() {
        let rec = flat_rec(
            3000,
            vec![
                Event::new("go", 500.0),
                Event::new("nogo", 1000.0),
                Event::new("R 1", 1100.0),
                Event::new("go", 2000.0),
                Event::new("R 1", 2100.0),
            ],
        );
        let set = extract(&rec, TrialType::TargetResponse, &EpochConfig::default()).unwrap();
        assert_eq!(set.reaction_times, vec![None, Some(400.0)]);
    }

    #[test]
    fn relaxation_stops_at_first_passing_step() {
        // 20 epochs at 5 %: one may go.
        let mut scores = vec![0.5; 20];
        scores[3] = 9.2;
        scores[8] = 6.1;
        assert_eq!(relaxed_threshold(&scores, 5.0, 1.0), Some(6.5));
        scores[8] = 1.0;
        assert_eq!(relaxed_threshold(&scores, 5.0, 1.0), Some(5.0));
        assert_eq!(relaxed_threshold(&[0.5; 20], 5.0, 1.0), Some(5.0));
        scores[3] = f64::INFINITY;
        scores[8] = f64::INFINITY;
        assert_eq!(relaxed_threshold(&scores, 5.0, 1.0), None);
    }

    #[test]
    fn amplitude_threshold_is_strict() {
        let mut data = Array3::zeros((3, 1, 4));
        data[[1, 0, 2]] = 100.0;
        data[[2, 0, 3]] = -100.5;
        assert_eq!(amplitude_outliers(&data, 100.0), vec![false, false, true]);
    }

    #[test]
    fn histogram_probabilities_sum_per_bin() {
        let p = sample_probabilities(&[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(p, vec![0.5; 4]);
        assert_eq!(sample_probabilities(&[2.0; 3]), vec![1.0; 3]);
    }

    #[test]
    fn no_epochs_is_none() {
        let rec = flat_rec(1000, vec![]);
        assert!(process_category(&rec, TrialType::NonResponse, &EpochConfig::default()).unwrap().is_none());
    }
}
