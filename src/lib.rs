//! # erpclean: EEG cleaning, epoching and ERP metrics in pure Rust
//!
//! `erpclean` turns raw per-subject EEG recordings into cleaned,
//! condition-segmented epochs and per-electrode event-related metrics (an
//! early positive deflection and an early negative deflection), plus
//! spectral band-power summaries. Numerics are pure Rust: FIR filtering and
//! Welch spectra on [RustFFT](https://crates.io/crates/rustfft), extended
//! Infomax on [ndarray](https://crates.io/crates/ndarray) and
//! [nalgebra](https://crates.io/crates/nalgebra).
//!
//! ## Pipeline overview
//!
//! ```text
//! subject_rec.safetensors  [C, T] µV + events
//!   │
//!   ├─ channels::clean_channels()   flatline / correlation / line-noise rejection,
//!   │                               1–40 Hz zero-phase FIR, average reference,
//!   │                               exclusion set + reference channel dropped
//!   ├─ ica::run_ica()               seeded extended Infomax + component classification
//!   ├─ ica::remove_artifacts()      project out components inside an artifact band
//!   │
//!   ├─ epochs::process_category()   per trial type: [-250, 1000] ms epochs, baseline,
//!   │                               amplitude + joint-probability rejection,
//!   │                               reaction-time filter (target-response)
//!   ├─ features::extract_metrics()  envelope peak/dip search, windowed mean amplitude
//!   │
//!   └─ aggregate::export_category() one CSV per trial type, `NA` for missing values
//! ```
//!
//! [`pipeline::run_batch`] runs that chain for every recording on the rayon
//! pool and aggregates after all of them have finished.
//!
//! ## Quick start
//!
//! ```no_run
//! use erpclean::{load_recording, process_recording, FeatureClassifier, PipelineConfig};
//!
//! let cfg = PipelineConfig::default();
//! let rec = load_recording("data/HC_001_go.safetensors".as_ref()).unwrap();
//! let classifier = FeatureClassifier::new(cfg.channels.line_freq);
//!
//! let outcome = process_recording(rec, &cfg, &classifier).unwrap();
//! for record in &outcome.metrics {
//!     println!("{} {}: {} epochs", record.subject_id, record.category, record.n_epochs);
//! }
//! ```
//!
//! ## Running individual stages
//!
//! ```no_run
//! use erpclean::{clean_channels, process_category, run_ica, remove_artifacts};
//! use erpclean::{FeatureClassifier, PipelineConfig, TrialType};
//!
//! let cfg = PipelineConfig::default();
//! let mut rec = erpclean::load_recording("sub.safetensors".as_ref()).unwrap();
//!
//! let report = clean_channels(&mut rec, &cfg.channels).unwrap();
//! println!("dropped {} channel(s)", report.total_removed());
//!
//! run_ica(&mut rec, &cfg.ica, &FeatureClassifier::default()).unwrap();
//! let removed = remove_artifacts(&mut rec, &cfg.ica.bands).unwrap();
//! println!("removed {removed:?} component(s)");
//!
//! if let Some(set) = process_category(&rec, TrialType::NonResponse, &cfg.epochs).unwrap() {
//!     println!("{} epochs × {} samples", set.n_epochs(), set.n_times());
//! }
//! ```

pub mod aggregate;
pub mod baseline;
pub mod channels;
pub mod config;
pub mod discover;
pub mod epochs;
pub mod error;
pub mod features;
pub mod filter;
pub mod ica;
pub mod io;
pub mod pipeline;
pub mod recording;
pub mod reference;
pub mod spectrum;
pub mod stats;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config + errors
pub use config::{
    ChannelQualityConfig, EpochConfig, FeatureConfig, IcaConfig, MetadataConfig,
    PipelineConfig, SpectrumConfig,
};
pub use error::{PipelineError, Result};

// data model
pub use recording::{Channel, Event, Recording, RecordingMeta, TrialType};

// stages
pub use channels::{clean_channels, ChannelReport};
pub use ica::{
    decompose, remove_artifacts, run_ica, ArtifactBands, ComponentClass,
    ComponentClassifier, ComponentLabels, FeatureClassifier, IcaSolution,
};
pub use epochs::{process_category, EpochSet, RejectionSummary};
pub use features::{extract_metrics, MetricRecord, PeakMeasure};
pub use spectrum::{recording_band_powers, welch, BandPowerRow};

// collaborators
pub use aggregate::{export_band_powers, export_category, MetricRow};
pub use discover::{find_files, infer_category, plan_jobs, Manifest, Requirement};
pub use io::{load_epochs, load_recording, save_epochs, save_recording};
pub use pipeline::{process_recording, run_batch, BatchSummary, Job, SubjectOutcome};
