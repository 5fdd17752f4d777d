//! Source Separation & Classification.
//!
//! ```text
//! cleaned recording [C, T]
//!   ├─ infomax::decompose()        seeded extended Infomax → unmixing [K, C], mixing [C, K]
//!   ├─ ComponentClassifier         7 class probabilities per component
//!   └─ artifact::remove_artifacts  X − A[:, flagged] · S[flagged, :]
//! ```
//!
//! The decomposition and its labels travel on [`Recording::ica`] between the
//! two halves so that a run can stop after classification and resume later.
pub mod artifact;
pub mod classify;
pub mod infomax;

use log::info;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::IcaConfig;
use crate::error::{PipelineError, Result};
use crate::recording::Recording;

pub use artifact::{flagged_components, remove_artifacts, ArtifactBands};
pub use classify::{ComponentClass, ComponentClassifier, ComponentLabels, FeatureClassifier};
pub use infomax::decompose;

/// Linear decomposition `S = W · (X − μ)`, `X − μ ≈ A · S`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcaSolution {
    /// [K, C]
    pub unmixing: Array2<f64>,
    /// [C, K]
    pub mixing: Array2<f64>,
    /// Per-channel means removed before unmixing.
    pub means: Array1<f64>,
    /// Training passes actually run.
    pub steps: usize,
    /// Whether the weight change fell below the tolerance.
    pub converged: bool,
    /// Per-component class probabilities, once a classifier has run.
    pub labels: Option<Vec<ComponentLabels>>,
}

impl IcaSolution {
    pub fn n_components(&self) -> usize {
        self.unmixing.nrows()
    }

    /// Component activations [K, T] of `data` ([C, T]).
    pub fn sources(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.nrows() != self.unmixing.ncols() {
            return Err(PipelineError::ChannelMismatch {
                labels: self.unmixing.ncols(),
                rows: data.nrows(),
            });
        }
        let centered = data - &self.means.view().insert_axis(Axis(1));
        Ok(self.unmixing.dot(&centered))
    }
}

/// Decompose `rec`, classify every component and attach the result to
/// `rec.ica`. Projection is left to [`remove_artifacts`].
pub fn run_ica(rec: &mut Recording, cfg: &IcaConfig, classifier: &dyn ComponentClassifier) -> Result<()> {
    rec.check()?;
    let mut solution = decompose(&rec.data, cfg)?;
    rec.note(format!(
        "extended Infomax: {} component(s) from {} channel(s), {} step(s), seed {}, converged: {}",
        solution.n_components(),
        rec.n_channels(),
        solution.steps,
        cfg.seed,
        solution.converged
    ));

    let labels = classifier.classify(rec, &solution)?;
    if labels.len() != solution.n_components() {
        return Err(PipelineError::Decomposition(format!(
            "classifier returned {} label set(s) for {} component(s)",
            labels.len(),
            solution.n_components()
        )));
    }
    info!(
        "[{}] ICA: {} component(s) classified, {} flagged by the artifact bands",
        rec.meta.source,
        labels.len(),
        labels.iter().filter(|l| cfg.bands.is_artifact(l)).count()
    );
    solution.labels = Some(labels);
    rec.ica = Some(solution);
    rec.note("component classification attached");
    Ok(())
}
