//! Welch power spectra and band-power summaries.
//!
//! `welch` matches `scipy.signal.welch(x, fs, window='hann', nperseg=n,
//! noverlap=n//2, scaling='density')` for real input: one-sided, constant
//! detrend per segment, mean of the segment periodograms.
use std::f64::consts::PI;

use log::warn;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::config::SpectrumConfig;
use crate::recording::Recording;

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    pub freqs: Vec<f64>,
    /// Power per Hz at each frequency in `freqs`.
    pub power: Vec<f64>,
}

impl Psd {
    /// Frequency resolution in Hz.
    pub fn df(&self) -> f64 {
        match self.freqs.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Integrated power over `lo <= f < hi` (rectangle rule).
    pub fn band_power(&self, lo: f64, hi: f64) -> f64 {
        let df = self.df();
        self.freqs
            .iter()
            .zip(&self.power)
            .filter(|&(&f, _)| f >= lo && f < hi)
            .map(|(_, &p)| p * df)
            .sum()
    }
}

/// Welch PSD of `x` with Hann segments of `nperseg` samples, 50 % overlap.
///
/// `nperseg` is clamped to the signal length.
pub fn welch(x: &[f64], sfreq: f64, nperseg: usize) -> Psd {
    let n = nperseg.min(x.len());
    if n < 2 {
        return Psd { freqs: vec![0.0], power: vec![0.0] };
    }
    let step = (n - n / 2).max(1);
    let window: Vec<f64> = (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect();
    let win_energy: f64 = window.iter().map(|w| w * w).sum();
    let scale = 1.0 / (sfreq * win_energy);

    let n_freqs = n / 2 + 1;
    let mut acc = vec![0.0_f64; n_freqs];
    let fft = FftPlanner::<f64>::new().plan_fft_forward(n);
    let mut n_seg = 0usize;

    for start in (0..=x.len() - n).step_by(step) {
        let seg = &x[start..start + n];
        // detrend='constant'
        let mean = seg.iter().sum::<f64>() / n as f64;
        let mut buf: Vec<Complex<f64>> = seg
            .iter()
            .zip(&window)
            .map(|(v, w)| Complex::new((v - mean) * w, 0.0))
            .collect();
        fft.process(&mut buf);
        for (a, c) in acc.iter_mut().zip(&buf[..n_freqs]) {
            *a += c.norm_sqr();
        }
        n_seg += 1;
    }

    let power: Vec<f64> = acc
        .iter()
        .enumerate()
        .map(|(k, &p)| {
            let one_sided = if k == 0 || (n % 2 == 0 && k == n / 2) { 1.0 } else { 2.0 };
            p * scale * one_sided / n_seg as f64
        })
        .collect();
    let freqs = (0..n_freqs).map(|k| k as f64 * sfreq / n as f64).collect();
    Psd { freqs, power }
}

/// Absolute and relative power of one named band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPower {
    pub band: String,
    pub absolute: f64,
    /// `None` when the normalising total power is zero or not finite.
    pub relative: Option<f64>,
}

/// Band powers of a spectrum for every band in `cfg`.
pub fn band_powers(psd: &Psd, cfg: &SpectrumConfig) -> Vec<BandPower> {
    let total = psd.band_power(cfg.total_range.0, cfg.total_range.1);
    let usable = total.is_finite() && total > 0.0;
    cfg.bands
        .iter()
        .map(|(name, lo, hi)| {
            let absolute = psd.band_power(*lo, *hi);
            BandPower {
                band: name.clone(),
                absolute,
                relative: usable.then(|| absolute / total),
            }
        })
        .collect()
}

/// One exportable band-power row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandPowerRow {
    pub subject_id: String,
    pub subject_type: String,
    pub source: String,
    pub channel: String,
    pub band: String,
    pub absolute: f64,
    #[serde(serialize_with = "crate::aggregate::na")]
    pub relative: Option<f64>,
}

/// Per-channel band powers of a cleaned continuous recording.
pub fn recording_band_powers(rec: &Recording, cfg: &SpectrumConfig) -> Vec<BandPowerRow> {
    let nperseg = (cfg.segment_secs * rec.sfreq).round() as usize;
    let mut rows = Vec::new();
    for (ch, row) in rec.channels.iter().zip(rec.data.rows()) {
        let psd = welch(&row.to_vec(), rec.sfreq, nperseg);
        let bands = band_powers(&psd, cfg);
        if bands.iter().any(|b| b.relative.is_none()) {
            warn!(
                "[{}] {}: zero total power in {:?} Hz, relative power left empty",
                rec.meta.source, ch.label, cfg.total_range
            );
        }
        rows.extend(bands.into_iter().map(|b| BandPowerRow {
            subject_id: rec.meta.subject_id.clone(),
            subject_type: rec.meta.subject_type.clone(),
            source: rec.meta.source.clone(),
            channel: ch.label.clone(),
            band: b.band,
            absolute: b.absolute,
            relative: b.relative,
        }));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amp: f64, sfreq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| amp * (2.0 * PI * freq * i as f64 / sfreq).sin()).collect()
    }

    #[test]
    fn peak_at_sine_frequency() {
        let psd = welch(&sine(10.0, 1.0, 250.0, 5000), 250.0, 500);
        let (k, _) = psd
            .power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        approx::assert_abs_diff_eq!(psd.freqs[k], 10.0, epsilon = 0.5);
    }

    #[test]
    fn parseval_total_power_matches_variance() {
        // Variance of A·sin = A²/2.
        let psd = welch(&sine(10.0, 2.0, 250.0, 10_000), 250.0, 500);
        let total = psd.band_power(0.0, 125.1);
        approx::assert_abs_diff_eq!(total, 2.0, epsilon = 0.05);
    }

    #[test]
    fn alpha_dominates_alpha_sine() {
        let cfg = SpectrumConfig::default();
        let bands = band_powers(&welch(&sine(10.0, 1.0, 250.0, 5000), 250.0, 500), &cfg);
        let alpha = bands.iter().find(|b| b.band == "alpha").unwrap();
        assert!(alpha.relative.unwrap() > 0.9);
    }

    #[test]
    fn zero_signal_has_no_relative_power() {
        let cfg = SpectrumConfig::default();
        let bands = band_powers(&welch(&vec![0.0; 1000], 250.0, 500), &cfg);
        assert!(bands.iter().all(|b| b.relative.is_none() && b.absolute == 0.0));
    }
}
