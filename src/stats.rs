//! Small robust-statistics helpers shared by the quality criteria.
//!
//! Non-finite inputs are the caller's problem; empty inputs give `0.0`.

/// Median of `x` (average of the two middle values for even length).
pub fn median(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let mut v = x.to_vec();
    v.sort_by(f64::total_cmp);
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    }
}

/// Median absolute deviation from the median (unscaled).
pub fn mad(x: &[f64]) -> f64 {
    let m = median(x);
    let dev: Vec<f64> = x.iter().map(|v| (v - m).abs()).collect();
    median(&dev)
}

/// Population mean and standard deviation (`ddof = 0`).
pub fn mean_std(x: &[f64]) -> (f64, f64) {
    if x.is_empty() {
        return (0.0, 0.0);
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Pearson correlation; `0.0` when either side has no variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (ma, _) = mean_std(&a[..n]);
    let (mb, _) = mean_std(&b[..n]);
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return 0.0;
    }
    sab / (saa * sbb).sqrt()
}

/// Excess kurtosis `E[(x-μ)^4] / σ^4 - 3`; `0.0` for constant input.
pub fn kurtosis(x: &[f64]) -> f64 {
    if x.len() < 4 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let m2 = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m4 = x.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    if m2 < 1e-20 {
        return 0.0;
    }
    m4 / (m2 * m2) - 3.0
}

/// z-score each value against the mean/std of the central part of `x`,
/// dropping `trim` (fraction, per side) of the sorted values first.
///
/// A zero spread maps values equal to the centre to `0` and everything else
/// to `±inf`.
pub fn trimmed_zscore(x: &[f64], trim: f64) -> Vec<f64> {
    if x.is_empty() {
        return Vec::new();
    }
    let mut sorted = x.to_vec();
    sorted.sort_by(f64::total_cmp);
    let cut = ((sorted.len() as f64) * trim).floor() as usize;
    let core = if sorted.len() > 2 * cut { &sorted[cut..sorted.len() - cut] } else { &sorted[..] };
    let (mean, std) = mean_std(core);
    x.iter().map(|&v| scaled(v - mean, std)).collect()
}

/// `num / den`, with a zero denominator giving `0` or `±inf`.
pub(crate) fn scaled(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else if num == 0.0 {
        0.0
    } else {
        num.signum() * f64::INFINITY
    }
}
