//! Seeded extended Infomax, with EEGLAB `runica` defaults.
//!
//! ```text
//! X [C, T]
//!   ├─ remove channel means
//!   ├─ PCA sphering             P = diag(2/√λ) · Eᵀ over the numeric rank
//!   ├─ natural-gradient Infomax W ← W + η (b·I − K·tanh(U)·Uᵀ − U·Uᵀ) W
//!   │                           (logistic rule when `extended` is off)
//!   └─ unmixing W·P, mixing E · diag(√λ/2) · W⁻¹, ordered by variance
//! ```
//!
//! Every random draw (per-pass sample order, kurtosis subsamples) comes from
//! one `StdRng` seeded with [`IcaConfig::seed`], so a fixed seed reproduces
//! the decomposition bit for bit.
use log::{debug, warn};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::IcaSolution;
use crate::config::IcaConfig;
use crate::error::{PipelineError, Result};

const MAX_WEIGHT: f64 = 1e8;
const BLOWUP: f64 = 1e9;
const BLOWUP_FAC: f64 = 0.8;
const RESTART_FAC: f64 = 0.9;
const MIN_LRATE: f64 = 1e-6;
/// Degrees between successive weight changes that trigger annealing.
const ANNEAL_DEG: f64 = 60.0;
const MAX_KURT_SIZE: usize = 6000;
const SIGNS_BIAS: f64 = 0.02;
const EXT_MOMENTUM: f64 = 0.5;
const SIGN_COUNT_THRESHOLD: usize = 25;
const SIGN_COUNT_STEP: usize = 2;

/// Decompose `data` ([C, T]) into at most C independent components.
pub fn decompose(data: &Array2<f64>, cfg: &IcaConfig) -> Result<IcaSolution> {
    let (n_chan, n_times) = data.dim();
    if n_chan == 0 || n_times <= n_chan {
        return Err(PipelineError::Precondition(format!(
            "ICA needs more samples than channels, got [{n_chan}, {n_times}]"
        )));
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Precondition("non-finite samples".into()));
    }

    let means = data
        .mean_axis(Axis(1))
        .ok_or_else(|| PipelineError::Decomposition("empty data".into()))?;
    let centered = data - &means.view().insert_axis(Axis(1));

    let (sphere, desphere) = sphering(&centered, cfg.rank_tolerance)?;
    if sphere.nrows() < n_chan {
        debug!("ICA: rank {} < {n_chan} channels, reduced by PCA", sphere.nrows());
    }
    let white = sphere.dot(&centered);
    let fit = train(&white, cfg)?;

    let unmixing = fit.weights.dot(&sphere);
    let mixing = desphere.dot(&invert(&fit.weights)?);
    let order = variance_order(&unmixing, &mixing, &centered);

    Ok(IcaSolution {
        unmixing: unmixing.select(Axis(0), &order),
        mixing: mixing.select(Axis(1), &order),
        means,
        steps: fit.steps,
        converged: fit.converged,
        labels: None,
    })
}

/// Sphering matrix [K, C] and its pseudo-inverse [C, K] over the
/// eigen-directions above `rank_tol × λ_max`.
fn sphering(centered: &Array2<f64>, rank_tol: f64) -> Result<(Array2<f64>, Array2<f64>)> {
    let (c, t) = centered.dim();
    let cov = centered.dot(&centered.t()) / (t as f64 - 1.0);
    let eig = SymmetricEigen::new(DMatrix::from_fn(c, c, |i, j| cov[[i, j]]));

    let mut order: Vec<usize> = (0..c).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
    let lmax = eig.eigenvalues[order[0]];
    if !(lmax > 0.0) {
        return Err(PipelineError::Decomposition("data has no variance".into()));
    }
    let keep: Vec<usize> = order
        .into_iter()
        .filter(|&i| eig.eigenvalues[i] > rank_tol * lmax)
        .collect();

    let k = keep.len();
    let sphere = Array2::from_shape_fn((k, c), |(r, ch)| {
        2.0 / eig.eigenvalues[keep[r]].sqrt() * eig.eigenvectors[(ch, keep[r])]
    });
    let desphere = Array2::from_shape_fn((c, k), |(ch, r)| {
        eig.eigenvectors[(ch, keep[r])] * eig.eigenvalues[keep[r]].sqrt() / 2.0
    });
    Ok((sphere, desphere))
}

struct Fit {
    weights: Array2<f64>,
    steps: usize,
    converged: bool,
}

enum Attempt {
    Done(Fit),
    BlowUp,
}

/// Train on sphered data, restarting with a smaller learning rate whenever
/// the weights diverge.
fn train(x: &Array2<f64>, cfg: &IcaConfig) -> Result<Fit> {
    let n = x.nrows();
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut lrate = 0.00065 / (n.max(2) as f64).ln();
    loop {
        match attempt(x, cfg, lrate, &mut rng) {
            Attempt::Done(fit) => return Ok(fit),
            Attempt::BlowUp => {
                lrate *= RESTART_FAC;
                if lrate < MIN_LRATE {
                    return Err(PipelineError::Decomposition(
                        "weights diverged below the minimum learning rate".into(),
                    ));
                }
                warn!("ICA: weights blew up, restarting with learning rate {lrate:.3e}");
            }
        }
    }
}

fn attempt(x: &Array2<f64>, cfg: &IcaConfig, mut lrate: f64, rng: &mut StdRng) -> Attempt {
    let (n, frames) = x.dim();
    let block = ((5.0 * (frames as f64).ln()).min(0.3 * frames as f64).ceil() as usize).clamp(1, frames);
    let anneal_step = if cfg.extended { 0.98 } else { 0.90 };
    let kurt_size = frames.min(MAX_KURT_SIZE);
    let block_eye = Array2::<f64>::eye(n) * block as f64;

    let mut weights = Array2::<f64>::eye(n);
    let mut old_weights = weights.clone();
    let mut bias = Array1::<f64>::zeros(n);

    // One component starts out modelled as sub-Gaussian.
    let mut signs = Array1::from_shape_fn(n, |i| if i == 0 { -1.0 } else { 1.0 });
    let mut old_signs = signs.clone();
    let mut old_kurt = Array1::<f64>::zeros(n);
    let mut sign_count = 0usize;
    let mut ext_blocks = 1usize;
    let mut block_no = 1usize;

    let mut old_delta: Option<(Array1<f64>, f64)> = None;
    let mut order: Vec<usize> = (0..frames).collect();
    let mut step = 0usize;

    while step < cfg.max_steps {
        order.shuffle(rng);
        for start in (0..=frames - block).step_by(block) {
            let xb = x.select(Axis(1), &order[start..start + block]);
            let u = weights.dot(&xb) + &bias.view().insert_axis(Axis(1));
            let grad = if cfg.extended {
                let y = u.mapv(f64::tanh);
                bias.scaled_add(-2.0 * lrate, &y.sum_axis(Axis(1)));
                let signed = &y * &signs.view().insert_axis(Axis(1));
                &block_eye - &signed.dot(&u.t()) - &u.dot(&u.t())
            } else {
                let g = u.mapv(|v| 1.0 - 2.0 / (1.0 + (-v).exp()));
                bias.scaled_add(lrate, &g.sum_axis(Axis(1)));
                &block_eye + &g.dot(&u.t())
            };
            weights.scaled_add(lrate, &grad.dot(&weights));
            if weights.iter().any(|w| !w.is_finite() || w.abs() > MAX_WEIGHT) {
                return Attempt::BlowUp;
            }

            if cfg.extended && block_no % ext_blocks == 0 {
                let act = if kurt_size < frames {
                    let cols: Vec<usize> = (0..kurt_size).map(|_| rng.gen_range(0..frames)).collect();
                    weights.dot(&x.select(Axis(1), &cols))
                } else {
                    weights.dot(x)
                };
                let kurt = excess_kurtosis_rows(&act);
                let kurt = &old_kurt * EXT_MOMENTUM + &kurt * (1.0 - EXT_MOMENTUM);
                signs = kurt.mapv(|k| if k + SIGNS_BIAS >= 0.0 { 1.0 } else { -1.0 });
                old_kurt = kurt;
                if signs == old_signs {
                    sign_count += 1;
                } else {
                    sign_count = 0;
                }
                old_signs = signs.clone();
                if sign_count >= SIGN_COUNT_THRESHOLD {
                    ext_blocks *= SIGN_COUNT_STEP;
                    sign_count = 0;
                }
            }
            block_no += 1;
        }

        step += 1;
        let delta: Array1<f64> = (&weights - &old_weights).into_iter().collect();
        let change = delta.dot(&delta);
        if !change.is_finite() {
            return Attempt::BlowUp;
        }

        if step > 2 {
            if let Some((prev, prev_change)) = &old_delta {
                let cos = delta.dot(prev) / (change * prev_change).sqrt();
                let angle = cos.clamp(-1.0, 1.0).acos().to_degrees();
                if angle > ANNEAL_DEG {
                    lrate *= anneal_step;
                    old_delta = Some((delta.clone(), change));
                }
            }
        } else if step == 1 {
            old_delta = Some((delta.clone(), change));
        }

        if step > 2 && change < cfg.tolerance {
            debug!("ICA converged after {step} step(s), change {change:.3e}");
            return Attempt::Done(Fit { weights, steps: step, converged: true });
        }
        if change > BLOWUP {
            lrate *= BLOWUP_FAC;
        }
        old_weights.assign(&weights);
    }

    debug!("ICA stopped at max_steps = {}", cfg.max_steps);
    Attempt::Done(Fit { weights, steps: step, converged: false })
}

/// Excess kurtosis of every row, around zero mean.
fn excess_kurtosis_rows(act: &Array2<f64>) -> Array1<f64> {
    act.rows()
        .into_iter()
        .map(|row| {
            let n = row.len() as f64;
            let m2 = row.iter().map(|v| v * v).sum::<f64>() / n;
            let m4 = row.iter().map(|v| v.powi(4)).sum::<f64>() / n;
            if m2 > 0.0 {
                m4 / (m2 * m2) - 3.0
            } else {
                0.0
            }
        })
        .collect()
}

fn invert(m: &Array2<f64>) -> Result<Array2<f64>> {
    let n = m.nrows();
    let inv = DMatrix::from_fn(n, n, |i, j| m[[i, j]])
        .try_inverse()
        .ok_or_else(|| PipelineError::Decomposition("weight matrix is singular".into()))?;
    Ok(Array2::from_shape_fn((n, n), |(i, j)| inv[(i, j)]))
}

/// Component indices ordered by back-projected variance, largest first.
fn variance_order(unmixing: &Array2<f64>, mixing: &Array2<f64>, centered: &Array2<f64>) -> Vec<usize> {
    let sources = unmixing.dot(centered);
    let t = centered.ncols() as f64;
    let var: Vec<f64> = (0..unmixing.nrows())
        .map(|k| {
            let s2 = sources.row(k).iter().map(|v| v * v).sum::<f64>() / t;
            let a2 = mixing.column(k).iter().map(|v| v * v).sum::<f64>();
            s2 * a2
        })
        .collect();
    let mut order: Vec<usize> = (0..var.len()).collect();
    order.sort_by(|&a, &b| var[b].total_cmp(&var[a]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::pearson;
    use std::f64::consts::PI;

    fn mixed_sines(n_times: usize) -> (Array2<f64>, Array2<f64>) {
        let sources = Array2::from_shape_fn((2, n_times), |(k, t)| {
            let f = [7.0, 13.0][k];
            (2.0 * PI * f * t as f64 / 250.0).sin()
        });
        let mix = ndarray::arr2(&[[1.0, 0.6], [0.4, 1.0]]);
        (mix.dot(&sources), sources)
    }

    fn quick() -> IcaConfig {
        IcaConfig { max_steps: 200, ..IcaConfig::default() }
    }

    #[test]
    fn recovers_mixed_sines() {
        let (data, truth) = mixed_sines(5000);
        let sol = decompose(&data, &quick()).unwrap();
        let est = sol.sources(&data).unwrap();
        for k in 0..2 {
            let best = (0..2)
                .map(|j| pearson(&est.row(j).to_vec(), &truth.row(k).to_vec()).abs())
                .fold(0.0, f64::max);
            assert!(best > 0.97, "source {k} best |r| = {best}");
        }
    }

    #[test]
    fn unmixing_inverts_mixing() {
        let (data, _) = mixed_sines(3000);
        let sol = decompose(&data, &quick()).unwrap();
        let prod = sol.unmixing.dot(&sol.mixing);
        for ((i, j), &v) in prod.indexed_iter() {
            approx::assert_abs_diff_eq!(v, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-8);
        }
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let (data, _) = mixed_sines(2000);
        let a = decompose(&data, &quick()).unwrap();
        let b = decompose(&data, &quick()).unwrap();
        assert_eq!(a.unmixing, b.unmixing);
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn rank_deficient_data_gives_fewer_components() {
        let (two, _) = mixed_sines(2000);
        let mut data = Array2::zeros((3, 2000));
        data.row_mut(0).assign(&two.row(0));
        data.row_mut(1).assign(&two.row(1));
        let sum = &two.row(0) + &two.row(1);
        data.row_mut(2).assign(&sum);
        let sol = decompose(&data, &quick()).unwrap();
        assert_eq!(sol.n_components(), 2);
        assert_eq!(sol.mixing.dim(), (3, 2));
    }

    #[test]
    fn too_few_samples_is_a_precondition_error() {
        let data = Array2::from_shape_fn((4, 3), |(c, t)| (c + t) as f64);
        assert!(matches!(decompose(&data, &quick()), Err(PipelineError::Precondition(_))));
    }
}
