//! Common average reference with an exclusion list.
//!
//! Matches `pop_reref(EEG, [], 'exclude', idx)`: the reference is the mean of
//! the non-excluded channels at each time point and is subtracted from those
//! channels only. Excluded rows (EOG, mastoids, …) are left untouched.
//!
//! `data`: [C, T]  →  `data[c, t] -= mean(data[k, t] for k ∉ exclude)`  for c ∉ exclude
use ndarray::{Array1, Array2, Axis};

/// Re-reference `data` in place; returns the number of channels averaged.
///
/// With every channel excluded the data is left as is and `0` is returned.
pub fn average_reference_inplace(data: &mut Array2<f64>, exclude: &[usize]) -> usize {
    let included: Vec<usize> = (0..data.nrows()).filter(|i| !exclude.contains(i)).collect();
    if included.is_empty() {
        return 0;
    }
    let reference: Array1<f64> = data
        .select(Axis(0), &included)
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(data.ncols()));
    for &c in &included {
        let mut row = data.row_mut(c);
        row -= &reference;
    }
    included.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn channel_sum_is_zero_after_reference() {
        let mut data = Array2::from_shape_fn((8, 512), |(c, t)| ((c * 7 + t * 3) as f64).sin());
        assert_eq!(average_reference_inplace(&mut data, &[]), 8);
        for &s in data.sum_axis(Axis(0)).iter() {
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn excluded_channels_untouched_and_ignored() {
        // Rows 0,1 = 2 and 4, row 2 (excluded) = 100.
        let mut data = Array2::from_shape_fn((3, 10), |(c, _)| [2.0, 4.0, 100.0][c]);
        assert_eq!(average_reference_inplace(&mut data, &[2]), 2);
        for t in 0..10 {
            approx::assert_abs_diff_eq!(data[[0, t]], -1.0);
            approx::assert_abs_diff_eq!(data[[1, t]], 1.0);
            approx::assert_abs_diff_eq!(data[[2, t]], 100.0);
        }
    }

    #[test]
    fn all_excluded_is_noop() {
        let mut data = Array2::from_elem((2, 4), 3.0);
        assert_eq!(average_reference_inplace(&mut data, &[0, 1]), 0);
        assert!(data.iter().all(|&v| v == 3.0));
    }
}
