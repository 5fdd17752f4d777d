//! Channel-Quality Filter.
//!
//! ```text
//! raw [C, T]
//!   ├─ flatline detection        constant for > flatline_secs
//!   ├─ highpass (l_freq)         zero-phase FIR
//!   ├─ correlation criterion     windowed r with robust neighbour estimate
//!   ├─ line-noise criterion      robust z of (above-mains / below-mains) MAD ratio
//!   ├─ drop bad channels
//!   ├─ lowpass (h_freq)          completes the bandpass
//!   ├─ average reference         exclusion set left out of the mean
//!   └─ drop exclusion set + reference channel
//! ```
//!
//! Detection runs between the two filter halves so that slow drifts do not
//! dominate the correlations while mains energy is still visible.
use log::{info, warn};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::config::ChannelQualityConfig;
use crate::error::{PipelineError, Result};
use crate::filter::{apply_fir_zero_phase, design_highpass, design_lowpass};
use crate::recording::{Channel, Recording};
use crate::reference::average_reference_inplace;
use crate::stats::{mad, median, pearson, scaled};

/// Differences below this are "no change" for the flatline test.
const FLAT_JITTER: f64 = 1e-9;

/// Floor on the line-noise ratio spread. Ratios closer than this are not
/// treated as distinct.
const MIN_NOISE_SPREAD: f64 = 0.01;

/// MAD → σ for Gaussian data.
const MAD_TO_SD: f64 = 1.4826;

/// What the Channel-Quality Filter removed, by reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub flat: Vec<String>,
    pub uncorrelated: Vec<String>,
    pub line_noise: Vec<String>,
    pub excluded: Vec<String>,
    pub reference: Option<String>,
}

impl ChannelReport {
    /// Every channel dropped by this stage.
    pub fn total_removed(&self) -> usize {
        self.flat.len()
            + self.uncorrelated.len()
            + self.line_noise.len()
            + self.excluded.len()
            + usize::from(self.reference.is_some())
    }
}

/// Run the full Channel-Quality Filter on `rec` in place.
pub fn clean_channels(rec: &mut Recording, cfg: &ChannelQualityConfig) -> Result<ChannelReport> {
    rec.check()?;
    let sfreq = rec.sfreq;
    if !(0.0 < cfg.l_freq && cfg.l_freq < cfg.h_freq && cfg.h_freq < sfreq / 2.0) {
        return Err(PipelineError::Precondition(format!(
            "bandpass {}–{} Hz impossible at {sfreq} Hz",
            cfg.l_freq, cfg.h_freq
        )));
    }
    let mut report = ChannelReport::default();
    let is_excluded = |label: &str| cfg.exclude.iter().any(|e| e.eq_ignore_ascii_case(label));

    // 1. Flat channels, on the unfiltered signal.
    let flat = flat_channels(&rec.data, sfreq, cfg.flatline_secs);
    let flat: Vec<usize> = flat.into_iter().filter(|&i| !is_excluded(&rec.channels[i].label)).collect();
    report.flat = rec.remove_channel_indices(&flat, "flatline");

    // 2. Highpass.
    apply_fir_zero_phase(&mut rec.data, &design_highpass(cfg.l_freq, sfreq))?;
    rec.note(format!("highpass FIR {} Hz (zero-phase)", cfg.l_freq));

    // 3. Statistical criteria on scalp channels only.
    let scalp: Vec<usize> = (0..rec.n_channels())
        .filter(|&i| !is_excluded(&rec.channels[i].label))
        .collect();
    let uncorrelated = uncorrelated_channels(rec, &scalp, cfg);
    let noisy = line_noise_channels(rec, &scalp, cfg)?;
    let noisy: Vec<usize> = noisy.into_iter().filter(|i| !uncorrelated.contains(i)).collect();

    let labels_of = |idx: &[usize]| -> Vec<String> {
        idx.iter().map(|&i| rec.channels[i].label.clone()).collect()
    };
    let (unc_labels, noisy_labels) = (labels_of(&uncorrelated), labels_of(&noisy));
    report.uncorrelated = rec.remove_channels(&unc_labels, "low neighbour correlation");
    report.line_noise = rec.remove_channels(&noisy_labels, "line noise");

    // 4. Lowpass.
    apply_fir_zero_phase(&mut rec.data, &design_lowpass(cfg.h_freq, sfreq))?;
    rec.note(format!("lowpass FIR {} Hz (zero-phase); passband {}–{} Hz", cfg.h_freq, cfg.l_freq, cfg.h_freq));

    // 5. Average reference without the exclusion set.
    let excluded_rows: Vec<usize> = (0..rec.n_channels())
        .filter(|&i| is_excluded(&rec.channels[i].label))
        .collect();
    let n_avg = average_reference_inplace(&mut rec.data, &excluded_rows);
    if n_avg == 0 {
        warn!("[{}] no channels left for the average reference", rec.meta.source);
    }
    rec.note(format!(
        "average reference over {n_avg} channel(s), excluding {}",
        cfg.exclude.join(", ")
    ));

    // 6. Exclusion set and reference channel leave the channel set for good.
    report.excluded = rec.remove_channels(&cfg.exclude, "excluded from scalp set");
    if let Some(refch) = &cfg.reference_channel {
        report.reference = rec.remove_channels(std::slice::from_ref(refch), "reference channel").pop();
    }

    rec.check()?;
    info!(
        "[{}] channel filter: {} flat, {} uncorrelated, {} line-noise, {} excluded, {} remain",
        rec.meta.source,
        report.flat.len(),
        report.uncorrelated.len(),
        report.line_noise.len(),
        report.excluded.len(),
        rec.n_channels()
    );
    Ok(report)
}

/// Rows whose longest constant run exceeds `max_secs`.
pub fn flat_channels(data: &Array2<f64>, sfreq: f64, max_secs: f64) -> Vec<usize> {
    let limit = (max_secs * sfreq).round() as usize;
    data.rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| {
            let (mut run, mut longest) = (0usize, 0usize);
            for w in row.windows(2) {
                if (w[1] - w[0]).abs() < FLAT_JITTER {
                    run += 1;
                    longest = longest.max(run);
                } else {
                    run = 0;
                }
            }
            longest > limit
        })
        .map(|(i, _)| i)
        .collect()
}

/// Channels whose correlation with the median of their neighbours falls
/// below the criterion in too many windows.
///
/// Neighbours are the `cfg.neighbours` nearest candidates when every
/// candidate has a position, otherwise all other candidates.
pub fn uncorrelated_channels(rec: &Recording, candidates: &[usize], cfg: &ChannelQualityConfig) -> Vec<usize> {
    if candidates.len() < 3 {
        return Vec::new();
    }
    let neighbours = neighbour_sets(&rec.channels, candidates, cfg.neighbours);
    let win = ((cfg.window_secs * rec.sfreq).round() as usize).clamp(2, rec.n_times().max(2));
    let n_win = (rec.n_times() / win).max(1);

    let mut bad = Vec::new();
    for (k, &c) in candidates.iter().enumerate() {
        let mut broken = 0usize;
        for w in 0..n_win {
            let (lo, hi) = (w * win, ((w + 1) * win).min(rec.n_times()));
            let own = rec.data.slice(s![c, lo..hi]).to_vec();
            let estimate: Vec<f64> = (lo..hi)
                .map(|t| {
                    let vals: Vec<f64> = neighbours[k].iter().map(|&j| rec.data[[j, t]]).collect();
                    median(&vals)
                })
                .collect();
            if pearson(&own, &estimate) < cfg.channel_criterion {
                broken += 1;
            }
        }
        if broken as f64 / n_win as f64 > cfg.max_broken_fraction {
            bad.push(c);
        }
    }
    bad
}

fn neighbour_sets(channels: &[Channel], candidates: &[usize], k: usize) -> Vec<Vec<usize>> {
    let positions: Option<Vec<[f64; 3]>> = candidates.iter().map(|&i| channels[i].pos).collect();
    candidates
        .iter()
        .enumerate()
        .map(|(a, &ca)| {
            let mut others: Vec<usize> = candidates.iter().copied().filter(|&cb| cb != ca).collect();
            if let Some(pos) = &positions {
                let dist = |b: usize| -> f64 {
                    let pb = pos[candidates.iter().position(|&c| c == b).unwrap_or(a)];
                    (0..3).map(|d| (pos[a][d] - pb[d]).powi(2)).sum::<f64>()
                };
                others.sort_by(|&x, &y| dist(x).total_cmp(&dist(y)));
                others.truncate(k.max(2));
            }
            others
        })
        .collect()
}

/// Channels whose above-mains noise ratio is a robust outlier.
///
/// `ratio = MAD(x - lowpass(x)) / MAD(lowpass(x))`, z-scored with the median
/// and scaled MAD across candidates. Skipped (with a warning) when the mains
/// frequency is too close to Nyquist to separate.
pub fn line_noise_channels(rec: &Recording, candidates: &[usize], cfg: &ChannelQualityConfig) -> Result<Vec<usize>> {
    if candidates.len() < 3 {
        return Ok(Vec::new());
    }
    if rec.sfreq / 2.0 - cfg.line_freq < 2.0 {
        warn!(
            "[{}] line-noise criterion skipped: {} Hz mains at {} Hz sampling",
            rec.meta.source, cfg.line_freq, rec.sfreq
        );
        return Ok(Vec::new());
    }
    let h = design_lowpass(cfg.line_freq, rec.sfreq);
    let mut low = rec.data.select(ndarray::Axis(0), candidates);
    apply_fir_zero_phase(&mut low, &h)?;

    let ratios: Vec<f64> = candidates
        .iter()
        .enumerate()
        .map(|(k, &c)| {
            let lo = low.row(k).to_vec();
            let hi: Vec<f64> = rec.data.row(c).iter().zip(&lo).map(|(x, l)| x - l).collect();
            scaled(mad(&hi), mad(&lo))
        })
        .collect();

    let centre = median(&ratios);
    let spread = (MAD_TO_SD * mad(&ratios)).max(MIN_NOISE_SPREAD);
    Ok(candidates
        .iter()
        .zip(&ratios)
        .filter(|&(_, &r)| (r - centre) / spread > cfg.line_noise_criterion)
        .map(|(&c, _)| c)
        .collect())
}
