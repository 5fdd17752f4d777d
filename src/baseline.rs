//! Epoch baseline correction.
//!
//! `baseline_correct_inplace` matches `epochs.apply_baseline((tmin, tmax))`:
//!   for each epoch, each channel: epoch[ch, :] -= mean(epoch[ch, window])
use std::ops::Range;

use ndarray::{s, Array3, Axis};

/// Sample range of `times` (ms) covered by `[lo, hi]`, both ends inclusive.
///
/// Empty when the window misses the time axis entirely.
pub fn sample_window(times: &[f64], (lo, hi): (f64, f64)) -> Range<usize> {
    const EPS: f64 = 1e-9;
    let start = times.iter().position(|&t| t >= lo - EPS).unwrap_or(times.len());
    let end = times
        .iter()
        .rposition(|&t| t <= hi + EPS)
        .map_or(0, |i| i + 1);
    if start < end {
        start..end
    } else {
        0..0
    }
}

/// Per-epoch, per-channel baseline correction.
/// `epochs`: [E, C, T]. An empty `window` leaves the data untouched.
pub fn baseline_correct_inplace(epochs: &mut Array3<f64>, window: Range<usize>) {
    if window.is_empty() {
        return;
    }
    for mut epoch in epochs.axis_iter_mut(Axis(0)) {
        for mut channel in epoch.axis_iter_mut(Axis(0)) {
            let m = channel.slice(s![window.clone()]).mean().unwrap_or(0.0);
            channel.mapv_inplace(|v| v - m);
        }
    }
}
