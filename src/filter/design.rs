//! Windowed-sinc FIR design following MNE's `create_filter(fir_design='firwin')`.
//!
//! Transition bandwidths are chosen automatically:
//!   • highpass edge: `min(max(0.25 * l_freq, 2.0), l_freq)`
//!   • lowpass edge:  `min(max(0.25 * h_freq, 2.0), sfreq / 2 - h_freq)`
//!
//! and the filter length is `ceil(3.3 / trans_bw * sfreq)` rounded up to odd
//! (Hamming window). Highpass kernels come from spectral inversion of the
//! matching lowpass.
use std::f64::consts::PI;

/// Transition bandwidth for a highpass edge at `l_freq`.
pub fn highpass_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Transition bandwidth for a lowpass edge at `h_freq`.
///
/// Never wider than the gap between `h_freq` and Nyquist.
pub fn lowpass_trans_bandwidth(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of FIR taps for a transition bandwidth, always odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Zero-phase highpass kernel with its edge at `l_freq` Hz.
pub fn design_highpass(l_freq: f64, sfreq: f64) -> Vec<f64> {
    let trans_bw = highpass_trans_bandwidth(l_freq);
    let n = auto_filter_length(trans_bw, sfreq);
    // firwin cutoff sits mid-transition.
    firwin(n, l_freq - trans_bw / 2.0, sfreq, false)
}

/// Zero-phase lowpass kernel with its edge at `h_freq` Hz.
///
/// `h_freq` must lie strictly below Nyquist.
pub fn design_lowpass(h_freq: f64, sfreq: f64) -> Vec<f64> {
    let trans_bw = lowpass_trans_bandwidth(h_freq, sfreq);
    let n = auto_filter_length(trans_bw, sfreq);
    firwin(n, h_freq + trans_bw / 2.0, sfreq, true)
}

/// Hamming-windowed sinc of odd length `n`, cutoff at the -6 dB point.
///
/// `pass_zero = true` gives a lowpass with unit DC gain; `false` gives the
/// spectrally inverted highpass.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, pass_zero: bool) -> Vec<f64> {
    assert!(n % 2 == 1, "firwin requires odd N for linear-phase filter");
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = win
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * w
        })
        .collect();

    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_have_odd_length() {
        for f in [0.5, 1.0, 2.0, 5.0] {
            assert_eq!(design_highpass(f, 250.0).len() % 2, 1);
        }
        for f in [30.0, 40.0, 45.0] {
            assert_eq!(design_lowpass(f, 250.0).len() % 2, 1);
        }
    }

    #[test]
    fn highpass_blocks_dc() {
        let s: f64 = design_highpass(1.0, 250.0).iter().sum();
        assert!(s.abs() < 1e-9, "highpass sum = {s}");
    }

    #[test]
    fn lowpass_passes_dc() {
        let s: f64 = design_lowpass(40.0, 250.0).iter().sum();
        approx::assert_abs_diff_eq!(s, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn kernels_are_symmetric() {
        let h = design_lowpass(40.0, 250.0);
        let n = h.len();
        for i in 0..n / 2 {
            approx::assert_abs_diff_eq!(h[i], h[n - 1 - i], epsilon = 1e-12);
        }
    }

    #[test]
    fn lowpass_transition_clamped_by_nyquist() {
        // 45 Hz edge at 100 Hz leaves only 5 Hz before Nyquist.
        approx::assert_abs_diff_eq!(lowpass_trans_bandwidth(45.0, 100.0), 5.0);
        approx::assert_abs_diff_eq!(lowpass_trans_bandwidth(40.0, 250.0), 10.0);
    }

    #[test]
    fn highpass_known_length_250hz() {
        // 1 Hz edge: trans_bw = 1 Hz → ceil(3.3 * 250) = 825 taps.
        assert_eq!(design_highpass(1.0, 250.0).len(), 825);
    }
}
