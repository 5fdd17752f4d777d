//! Overlap-add zero-phase FIR convolution.
//!
//! Zero phase comes from shifting the linear-phase output left by `(N-1)/2`
//! samples. Edges are padded with `N-1` reflect-limited samples on each side
//! to suppress the start-up transient.
use anyhow::Result;
use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, FftPlanner};

/// Filter every row of `data` ([C, T]) in place with the odd-length kernel `h`.
pub fn apply_fir_zero_phase(data: &mut Array2<f64>, h: &[f64]) -> Result<()> {
    let mut planner = FftPlanner::<f64>::new();
    for mut row in data.rows_mut() {
        let x = row.to_vec();
        let y = filter_1d_with(&mut planner, &x, h)?;
        row.assign(&ArrayView1::from(&y));
    }
    Ok(())
}

/// Filter a single signal; output has the same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Result<Vec<f64>> {
    filter_1d_with(&mut FftPlanner::new(), x, h)
}

fn filter_1d_with(planner: &mut FftPlanner<f64>, x: &[f64], h: &[f64]) -> Result<Vec<f64>> {
    let n_x = x.len();
    let n_h = h.len();
    if n_x == 0 {
        return Ok(vec![]);
    }
    anyhow::ensure!(n_h % 2 == 1, "zero-phase FIR needs an odd kernel, got {n_h} taps");

    let shift = (n_h - 1) / 2;
    let n_edge = n_h - 1;
    let x_ext = reflect_limited_pad(x, n_edge);
    let n_ext = x_ext.len();

    let n_fft = choose_fft_len(n_h, n_ext);
    let n_seg = n_fft - n_h + 1;

    let fwd = planner.plan_fft_forward(n_fft);
    let inv = planner.plan_fft_inverse(n_fft);

    let mut h_fft = zero_padded(h, n_fft);
    fwd.process(&mut h_fft);

    let inv_scale = 1.0 / n_fft as f64;
    let mut out = vec![0.0_f64; n_ext];

    for start in (0..n_ext).step_by(n_seg) {
        let stop = (start + n_seg).min(n_ext);
        let mut buf = zero_padded(&x_ext[start..stop], n_fft);
        fwd.process(&mut buf);
        buf.iter_mut().zip(&h_fft).for_each(|(b, hf)| *b *= hf);
        inv.process(&mut buf);

        // Accumulate, compensating the (N-1)/2 group delay.
        let out_start = start.saturating_sub(shift);
        let prod_start = shift.saturating_sub(start);
        for (o, p) in (out_start..n_ext).zip(prod_start..n_fft) {
            out[o] += buf[p].re * inv_scale;
        }
    }

    Ok(out[n_edge..n_edge + n_x].to_vec())
}

/// Odd reflection around the first/last sample, zero-filled once the signal
/// is shorter than the requested padding.
fn reflect_limited_pad(x: &[f64], n_pad: usize) -> Vec<f64> {
    let n = x.len();
    let avail = n_pad.min(n - 1);
    let first = x[0];
    let last = x[n - 1];

    let mut out = Vec::with_capacity(n + 2 * n_pad);
    out.extend(std::iter::repeat(0.0).take(n_pad - avail));
    out.extend((1..=avail).rev().map(|i| 2.0 * first - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=avail).map(|i| 2.0 * last - x[n - 1 - i]));
    out.extend(std::iter::repeat(0.0).take(n_pad - avail));
    out
}

/// Power-of-two block size minimising MNE's overlap-add cost estimate:
/// `ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`.
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;
    let max_pow = ((n_x as f64).log2().ceil() as u32 + 1).max(min_pow);

    (min_pow..=max_pow)
        .map(|pow| {
            let n = 1_usize << pow;
            let n_seg = (n - n_h + 1) as f64;
            let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
                + 4e-5 * n as f64 * n_x as f64;
            (n, cost)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(n, _)| n)
        .unwrap_or(1 << min_pow)
}

fn zero_padded(x: &[f64], n: usize) -> Vec<Complex<f64>> {
    x.iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::default()))
        .take(n)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::design::{design_highpass, design_lowpass};
    use std::f64::consts::PI;

    #[test]
    fn filter_preserves_length() {
        let x: Vec<f64> = (0..1000).map(|i| (i as f64 / 100.0).sin()).collect();
        let y = filter_1d(&x, &design_highpass(1.0, 250.0)).unwrap();
        assert_eq!(y.len(), x.len());
    }

    #[test]
    fn highpass_removes_dc() {
        let x = vec![3.0_f64; 5000];
        let h = design_highpass(1.0, 250.0);
        let y = filter_1d(&x, &h).unwrap();
        let interior = &y[h.len()..y.len() - h.len()];
        let max = interior.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(max < 1e-3, "DC not removed: max={max}");
    }

    #[test]
    fn lowpass_keeps_in_band_sine_in_phase() {
        let sfreq = 250.0;
        let x: Vec<f64> = (0..5000)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / sfreq).sin())
            .collect();
        let y = filter_1d(&x, &design_lowpass(40.0, sfreq)).unwrap();
        for i in 1000..4000 {
            approx::assert_abs_diff_eq!(y[i], x[i], epsilon = 1e-2);
        }
    }

    #[test]
    fn reflect_pad_is_odd_reflection() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let p = reflect_limited_pad(&x, 3);
        assert_eq!(&p[..3], &[-2.0, -1.0, 0.0]);
        assert_eq!(&p[3..8], &x[..]);
        assert_eq!(&p[8..], &[6.0, 7.0, 8.0]);
    }

    #[test]
    fn short_signal_is_zero_filled() {
        let p = reflect_limited_pad(&[1.0, 2.0], 3);
        assert_eq!(p, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
    }
}
