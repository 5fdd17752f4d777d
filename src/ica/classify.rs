//! Component classification into the seven ICLabel categories.
//!
//! [`ComponentClassifier`] is the seam for any model that can score
//! components. [`FeatureClassifier`] is the built-in one: it derives each
//! class score from the component's spectrum, its kurtosis and its scalp map,
//! then normalises the scores into probabilities.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::IcaSolution;
use crate::error::Result;
use crate::recording::Recording;
use crate::spectrum::welch;
use crate::stats::kurtosis;

/// Categories in ICLabel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentClass {
    Brain,
    Muscle,
    Eye,
    Heart,
    LineNoise,
    ChannelNoise,
    Other,
}

impl ComponentClass {
    pub const ALL: [ComponentClass; 7] = [
        ComponentClass::Brain,
        ComponentClass::Muscle,
        ComponentClass::Eye,
        ComponentClass::Heart,
        ComponentClass::LineNoise,
        ComponentClass::ChannelNoise,
        ComponentClass::Other,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            ComponentClass::Brain => "brain",
            ComponentClass::Muscle => "muscle",
            ComponentClass::Eye => "eye",
            ComponentClass::Heart => "heart",
            ComponentClass::LineNoise => "line_noise",
            ComponentClass::ChannelNoise => "channel_noise",
            ComponentClass::Other => "other",
        }
    }
}

impl fmt::Display for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Probability per [`ComponentClass`], indexed by [`ComponentClass::index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentLabels {
    pub probabilities: [f64; 7],
}

impl ComponentLabels {
    pub fn new(probabilities: [f64; 7]) -> Self {
        Self { probabilities }
    }

    #[inline]
    pub fn get(&self, class: ComponentClass) -> f64 {
        self.probabilities[class.index()]
    }

    /// Class with the highest probability (first one on ties).
    pub fn most_likely(&self) -> ComponentClass {
        ComponentClass::ALL
            .iter()
            .copied()
            .fold(ComponentClass::Brain, |best, c| if self.get(c) > self.get(best) { c } else { best })
    }
}

/// Anything that can assign class probabilities to the components of a
/// decomposition of `rec`.
pub trait ComponentClassifier: Send + Sync {
    /// One label set per component, in component order.
    fn classify(&self, rec: &Recording, solution: &IcaSolution) -> Result<Vec<ComponentLabels>>;
}

/// Spectral/statistical heuristic classifier.
///
/// | class          | raw score                                                  |
/// |----------------|------------------------------------------------------------|
/// | line noise     | power within ±1 Hz of the mains frequency / total power    |
/// | muscle         | power above 20 Hz (mains excluded) / total, ramp 0.35–0.70 |
/// | eye            | power below 4 Hz / total, ramp 0.4–0.8, × frontal weight   |
/// | heart          | kurtosis, ramp 4–12, damped by the eye score               |
/// | channel noise  | scalp-map focality (largest squared weight share), 0.7–0.95 |
/// | other          | constant floor 0.1                                         |
/// | brain          | 1 − the largest artifact score                             |
///
/// Scores are normalised to sum to one.
#[derive(Debug, Clone)]
pub struct FeatureClassifier {
    /// Mains frequency in Hz.
    pub line_freq: f64,
    /// Label prefixes counted as frontal for the eye score.
    pub frontal_prefixes: Vec<String>,
}

impl Default for FeatureClassifier {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl FeatureClassifier {
    pub fn new(line_freq: f64) -> Self {
        Self {
            line_freq,
            frontal_prefixes: vec!["Fp".into(), "AF".into()],
        }
    }

    /// Label one component from its activation and its scalp map.
    pub fn component_labels(&self, source: &[f64], topo: &[f64], labels: &[String], sfreq: f64) -> ComponentLabels {
        let psd = welch(source, sfreq, (2.0 * sfreq).round() as usize);
        let nyquist = sfreq / 2.0;
        let top = nyquist + psd.df();
        let total = psd.band_power(0.0, top);
        if !(total > 0.0) {
            let mut p = [0.0; 7];
            p[ComponentClass::Other.index()] = 1.0;
            return ComponentLabels::new(p);
        }

        let (line_lo, line_hi) = (self.line_freq - 1.0, self.line_freq + 1.0);
        let line_power = if line_hi < nyquist { psd.band_power(line_lo, line_hi) } else { 0.0 };
        let line = line_power / total;

        let hf_line = if line_lo >= 20.0 { line_power } else { 0.0 };
        let hf = ((psd.band_power(20.0, top) - hf_line) / total).max(0.0);
        let muscle = ramp(hf, 0.35, 0.70);

        let weights: Vec<f64> = topo.iter().map(|w| w * w).collect();
        let weight_sum: f64 = weights.iter().sum();
        let frontal = if weight_sum > 0.0 {
            weights
                .iter()
                .zip(labels)
                .filter(|&(_, l)| self.is_frontal(l))
                .map(|(w, _)| w)
                .sum::<f64>()
                / weight_sum
        } else {
            0.0
        };
        let eye = ramp(psd.band_power(0.0, 4.0) / total, 0.4, 0.8) * (0.5 + 0.5 * frontal);

        let heart = ramp(kurtosis(source), 4.0, 12.0) * (1.0 - eye);

        // With very few channels every map looks focal.
        let channel = if weights.len() >= 4 && weight_sum > 0.0 {
            let focality = weights.iter().copied().fold(0.0, f64::max) / weight_sum;
            ramp(focality, 0.7, 0.95)
        } else {
            0.0
        };

        let other = 0.1;
        let worst = [muscle, eye, heart, line, channel].into_iter().fold(0.0, f64::max);
        let brain = 1.0 - worst;

        let raw = [brain, muscle, eye, heart, line, channel, other];
        let sum: f64 = raw.iter().sum();
        ComponentLabels::new(raw.map(|v| v / sum))
    }

    fn is_frontal(&self, label: &str) -> bool {
        let lower = label.to_ascii_lowercase();
        self.frontal_prefixes
            .iter()
            .any(|p| lower.starts_with(&p.to_ascii_lowercase()))
    }
}

impl ComponentClassifier for FeatureClassifier {
    fn classify(&self, rec: &Recording, solution: &IcaSolution) -> Result<Vec<ComponentLabels>> {
        let sources = solution.sources(&rec.data)?;
        let labels = rec.labels();
        Ok((0..solution.n_components())
            .map(|k| {
                self.component_labels(
                    &sources.row(k).to_vec(),
                    &solution.mixing.column(k).to_vec(),
                    &labels,
                    rec.sfreq,
                )
            })
            .collect())
    }
}

/// Linear 0→1 ramp between `lo` and `hi`.
fn ramp(x: f64, lo: f64, hi: f64) -> f64 {
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    const SFREQ: f64 = 250.0;

    fn sine(freq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / SFREQ).sin()).collect()
    }

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("C{i}")).collect()
    }

    #[test]
    fn mains_sine_is_line_noise() {
        let l = FeatureClassifier::default().component_labels(&sine(50.0, 5000), &[1.0; 6], &labels(6), SFREQ);
        assert_eq!(l.most_likely(), ComponentClass::LineNoise);
        assert!(l.get(ComponentClass::LineNoise) >= 0.8);
    }

    #[test]
    fn alpha_sine_with_broad_map_is_brain() {
        let l = FeatureClassifier::default().component_labels(&sine(10.0, 5000), &[1.0, 0.8, 1.2, 0.9, 1.1, 1.0], &labels(6), SFREQ);
        assert_eq!(l.most_likely(), ComponentClass::Brain);
        approx::assert_abs_diff_eq!(l.probabilities.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn white_noise_is_muscle() {
        let mut rng = StdRng::seed_from_u64(3);
        let x: Vec<f64> = (0..5000).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let l = FeatureClassifier::default().component_labels(&x, &[1.0; 6], &labels(6), SFREQ);
        assert_eq!(l.most_likely(), ComponentClass::Muscle);
    }

    #[test]
    fn single_electrode_map_is_channel_noise() {
        let l = FeatureClassifier::default().component_labels(
            &sine(10.0, 5000),
            &[0.0, 0.0, 5.0, 0.0, 0.1, 0.0],
            &labels(6),
            SFREQ,
        );
        assert_eq!(l.most_likely(), ComponentClass::ChannelNoise);
    }

    #[test]
    fn frontal_slow_wave_is_eye() {
        let names: Vec<String> = ["Fp1", "Fp2", "AF3", "Cz", "Pz", "Oz"].iter().map(|s| s.to_string()).collect();
        let l = FeatureClassifier::default().component_labels(&sine(1.0, 5000), &[1.0, 1.0, 0.8, 0.1, 0.05, 0.0], &names, SFREQ);
        assert_eq!(l.most_likely(), ComponentClass::Eye);
        assert!(l.get(ComponentClass::Eye) >= 0.5);
    }

    #[test]
    fn silent_component_is_other() {
        let l = FeatureClassifier::default().component_labels(&[0.0; 1000], &[1.0; 4], &labels(4), SFREQ);
        assert_eq!(l.most_likely(), ComponentClass::Other);
    }
}
