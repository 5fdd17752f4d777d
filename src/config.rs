//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the cleaning and
//! feature pipeline, grouped per stage. It is built once per run and passed by
//! reference into each stage; nothing in the crate reads global state.
//!
//! Every struct is `#[serde(default)]`, so a JSON file only needs the fields
//! it overrides:
//!
//! ```
//! use erpclean::PipelineConfig;
//!
//! let cfg: PipelineConfig = serde_json::from_str(
//!     r#"{ "ica": { "seed": 7 }, "epochs": { "abs_threshold_uv": 150.0 } }"#,
//! ).unwrap();
//! assert_eq!(cfg.ica.seed, 7);
//! assert_eq!(cfg.ica.tolerance, 1e-10);
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ica::ArtifactBands;

/// Top-level configuration for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channels: ChannelQualityConfig,
    pub ica: IcaConfig,
    pub epochs: EpochConfig,
    pub features: FeatureConfig,
    pub spectrum: SpectrumConfig,
    pub metadata: MetadataConfig,
}

impl PipelineConfig {
    /// Load a (possibly partial) configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Channel-Quality Filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelQualityConfig {
    /// Lower edge of the zero-phase bandpass in Hz.
    ///
    /// Default: `1.0` Hz.
    pub l_freq: f64,

    /// Upper edge of the zero-phase bandpass in Hz.
    ///
    /// Default: `40.0` Hz.
    pub h_freq: f64,

    /// A channel constant for longer than this many seconds is flat.
    ///
    /// Default: `5.0` s.
    pub flatline_secs: f64,

    /// Minimum correlation with the channel's robust neighbour estimate.
    ///
    /// A window is "broken" when the correlation drops below this value.
    ///
    /// Default: `0.8`.
    pub channel_criterion: f64,

    /// Robust z-score above which a channel's line-noise ratio is excessive.
    ///
    /// Default: `4.0`.
    pub line_noise_criterion: f64,

    /// Mains frequency in Hz.
    ///
    /// Default: `50.0` Hz.
    pub line_freq: f64,

    /// Window length for the correlation criterion in seconds.
    ///
    /// Default: `5.0` s.
    pub window_secs: f64,

    /// A channel broken in more than this fraction of windows is removed.
    ///
    /// Default: `0.4`.
    pub max_broken_fraction: f64,

    /// Number of nearest neighbours used for the robust estimate when channel
    /// positions are known. Falls back to all other channels otherwise.
    ///
    /// Default: `6`.
    pub neighbours: usize,

    /// Channels excluded from the average reference and dropped afterwards
    /// (ocular and non-scalp electrodes).
    ///
    /// Default: `["VEOG", "HEOG", "EOG", "ECG", "M1", "M2"]`.
    pub exclude: Vec<String>,

    /// Channel removed permanently once the average reference is applied.
    ///
    /// Default: `"FCz"`.
    pub reference_channel: Option<String>,
}

impl Default for ChannelQualityConfig {
    fn default() -> Self {
        Self {
            l_freq: 1.0,
            h_freq: 40.0,
            flatline_secs: 5.0,
            channel_criterion: 0.8,
            line_noise_criterion: 4.0,
            line_freq: 50.0,
            window_secs: 5.0,
            max_broken_fraction: 0.4,
            neighbours: 6,
            exclude: ["VEOG", "HEOG", "EOG", "ECG", "M1", "M2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            reference_channel: Some("FCz".into()),
        }
    }
}

/// Source Separation & Classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcaConfig {
    /// Weight-change threshold that stops the Infomax iteration.
    ///
    /// Default: `1e-10`.
    pub tolerance: f64,

    /// Seed for the per-step sample shuffle. Fixed seed ⇒ identical output.
    ///
    /// Default: `5489`.
    pub seed: u64,

    /// Enable extended Infomax (sub-Gaussian sources such as line noise).
    ///
    /// Default: `true`.
    pub extended: bool,

    /// Upper bound on training passes over the data.
    ///
    /// Default: `512`.
    pub max_steps: usize,

    /// Eigenvalues below `rank_tolerance × λ_max` are treated as null space.
    ///
    /// Default: `1e-7`.
    pub rank_tolerance: f64,

    /// Per-category probability bands that flag a component for removal.
    pub bands: ArtifactBands,
}

impl Default for IcaConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            seed: 5489,
            extended: true,
            max_steps: 512,
            rank_tolerance: 1e-7,
            bands: ArtifactBands::default(),
        }
    }
}

/// Epoch Extractor & Epoch-Quality Filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochConfig {
    /// Epoch window start relative to the event, in ms.
    ///
    /// Default: `-250.0` ms.
    pub tmin_ms: f64,

    /// Epoch window end relative to the event, in ms.
    ///
    /// Default: `1000.0` ms.
    pub tmax_ms: f64,

    /// Baseline window `(start, end)` in ms; its mean is subtracted.
    ///
    /// Default: `(-250.0, 0.0)`.
    pub baseline_ms: (f64, f64),

    /// Any sample beyond ±this amplitude (µV) rejects the epoch.
    ///
    /// Default: `1000.0` µV.
    pub abs_threshold_uv: f64,

    /// Joint-probability z-score threshold in standard deviations.
    ///
    /// Default: `5.0`.
    pub prob_threshold_sd: f64,

    /// If one round would reject more than this fraction of the remaining
    /// epochs, the probability threshold is relaxed by `0.5` SD and retried.
    ///
    /// Default: `0.05`.
    pub max_reject_fraction: f64,

    /// Stimulus marker names of the target-response category.
    pub target_markers: Vec<String>,

    /// Stimulus marker names of the non-response category.
    pub nonresponse_markers: Vec<String>,

    /// Behavioural response marker names.
    pub response_markers: Vec<String>,

    /// Valid reaction time window `(min, max]` in ms after the stimulus.
    ///
    /// Default: `(100.0, 1000.0)`.
    pub rt_window_ms: (f64, f64),
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            tmin_ms: -250.0,
            tmax_ms: 1000.0,
            baseline_ms: (-250.0, 0.0),
            abs_threshold_uv: 1000.0,
            prob_threshold_sd: 5.0,
            max_reject_fraction: 0.05,
            target_markers: vec!["S 11".into(), "go".into()],
            nonresponse_markers: vec!["S 21".into(), "nogo".into()],
            response_markers: vec!["R 1".into(), "response".into()],
            rt_window_ms: (100.0, 1000.0),
        }
    }
}

/// Feature Extractor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Search window `(start, end)` in ms for the positive deflection.
    ///
    /// Default: `(250.0, 500.0)`.
    pub positive_window_ms: (f64, f64),

    /// Search window `(start, end)` in ms for the negative deflection.
    ///
    /// Default: `(200.0, 350.0)`.
    pub negative_window_ms: (f64, f64),

    /// Half-width in ms of the window averaged around each located extremum.
    ///
    /// Converted to samples with the recording's own sampling rate.
    ///
    /// Default: `20.0` ms.
    pub averaging_width_ms: f64,

    /// Electrode pairs `(primary, alternate)`; the alternate is used when the
    /// primary is absent.
    ///
    /// Default: `[("Cz", "CPz"), ("Pz", "POz")]`.
    pub pairs: Vec<(String, String)>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            positive_window_ms: (250.0, 500.0),
            negative_window_ms: (200.0, 350.0),
            averaging_width_ms: 20.0,
            pairs: vec![
                ("Cz".into(), "CPz".into()),
                ("Pz".into(), "POz".into()),
            ],
        }
    }
}

/// Spectral band-power settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Welch segment length in seconds (50 % overlap, Hann window).
    ///
    /// Default: `2.0` s.
    pub segment_secs: f64,

    /// Named frequency bands `(name, low, high)` in Hz, low-inclusive.
    pub bands: Vec<(String, f64, f64)>,

    /// Range `(low, high)` in Hz whose power normalises relative band power.
    ///
    /// Default: `(1.0, 45.0)`.
    pub total_range: (f64, f64),
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            segment_secs: 2.0,
            bands: vec![
                ("delta".into(), 1.0, 4.0),
                ("theta".into(), 4.0, 8.0),
                ("alpha".into(), 8.0, 13.0),
                ("beta".into(), 13.0, 30.0),
                ("gamma".into(), 30.0, 45.0),
            ],
            total_range: (1.0, 45.0),
        }
    }
}

/// Keyword sets for the legacy filename metadata parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Case-insensitive keywords identifying target-response files.
    pub target_keywords: Vec<String>,

    /// Case-insensitive keywords identifying non-response files.
    pub nonresponse_keywords: Vec<String>,

    /// Recognised subject-type labels; anything else becomes `UNKNOWN`.
    pub subject_types: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            target_keywords: vec!["go".into(), "target".into()],
            nonresponse_keywords: vec!["nogo".into(), "nonresponse".into(), "non-response".into()],
            subject_types: vec!["HC".into(), "PD".into(), "AD".into()],
        }
    }
}
