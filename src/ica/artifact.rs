//! Artifact-band policy and component projection.
use log::{info, warn};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

use super::classify::{ComponentClass, ComponentLabels};
use crate::error::Result;
use crate::recording::Recording;

/// Inclusive `[lo, hi]` probability band per class; `None` never flags.
///
/// A component is an artifact when ANY of its class probabilities lies
/// inside that class's band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactBands {
    pub brain: Option<(f64, f64)>,
    pub muscle: Option<(f64, f64)>,
    pub eye: Option<(f64, f64)>,
    pub heart: Option<(f64, f64)>,
    pub line_noise: Option<(f64, f64)>,
    pub channel_noise: Option<(f64, f64)>,
    pub other: Option<(f64, f64)>,
}

impl Default for ArtifactBands {
    fn default() -> Self {
        Self {
            brain: None,
            muscle: Some((0.8, 1.0)),
            eye: Some((0.5, 1.0)),
            heart: Some((0.8, 1.0)),
            line_noise: Some((0.8, 1.0)),
            channel_noise: Some((0.8, 1.0)),
            other: None,
        }
    }
}

impl ArtifactBands {
    pub fn band(&self, class: ComponentClass) -> Option<(f64, f64)> {
        match class {
            ComponentClass::Brain => self.brain,
            ComponentClass::Muscle => self.muscle,
            ComponentClass::Eye => self.eye,
            ComponentClass::Heart => self.heart,
            ComponentClass::LineNoise => self.line_noise,
            ComponentClass::ChannelNoise => self.channel_noise,
            ComponentClass::Other => self.other,
        }
    }

    /// Classes whose band contains the component's probability.
    pub fn matching_classes(&self, labels: &ComponentLabels) -> Vec<ComponentClass> {
        ComponentClass::ALL
            .iter()
            .copied()
            .filter(|&c| {
                self.band(c)
                    .is_some_and(|(lo, hi)| (lo..=hi).contains(&labels.get(c)))
            })
            .collect()
    }

    pub fn is_artifact(&self, labels: &ComponentLabels) -> bool {
        !self.matching_classes(labels).is_empty()
    }
}

/// Indices of the components flagged by `bands`, in component order.
pub fn flagged_components(labels: &[ComponentLabels], bands: &ArtifactBands) -> Vec<usize> {
    labels
        .iter()
        .enumerate()
        .filter(|(_, l)| bands.is_artifact(l))
        .map(|(k, _)| k)
        .collect()
}

/// Subtract every flagged component's back-projection from all channels.
///
/// Consumes `rec.ica`. Without a decomposition, or without labels on it, the
/// data is left unchanged, a warning is logged and `Ok(None)` is returned.
/// Otherwise returns the number of components removed, which is also stored
/// in [`Recording::removed_components`].
pub fn remove_artifacts(rec: &mut Recording, bands: &ArtifactBands) -> Result<Option<usize>> {
    let Some(solution) = rec.ica.take() else {
        warn!("[{}] no decomposition attached, artifact removal skipped", rec.meta.source);
        rec.note("artifact removal skipped: no decomposition");
        return Ok(None);
    };
    if solution.labels.is_none() {
        warn!("[{}] components were never classified, artifact removal skipped", rec.meta.source);
        rec.note("artifact removal skipped: no classification");
        rec.ica = Some(solution);
        return Ok(None);
    }
    let labels = solution.labels.as_deref().unwrap_or_default();

    let flagged = flagged_components(labels, bands);
    if !flagged.is_empty() {
        let sources = solution.sources(&rec.data)?;
        let mixing = solution.mixing.select(Axis(1), &flagged);
        let activations = sources.select(Axis(0), &flagged);
        rec.data -= &mixing.dot(&activations);
    }

    let described: Vec<String> = flagged
        .iter()
        .map(|&k| {
            let classes: Vec<&str> = bands.matching_classes(&labels[k]).iter().map(|c| c.label()).collect();
            format!("IC{k} ({})", classes.join("/"))
        })
        .collect();
    rec.note(format!(
        "projected out {} of {} component(s){}{}",
        flagged.len(),
        labels.len(),
        if described.is_empty() { "" } else { ": " },
        described.join(", ")
    ));
    info!(
        "[{}] removed {} artifact component(s) of {}",
        rec.meta.source,
        flagged.len(),
        labels.len()
    );
    rec.removed_components = Some(flagged.len());
    Ok(Some(flagged.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(p: [f64; 7]) -> ComponentLabels {
        ComponentLabels::new(p)
    }

    #[test]
    fn band_bounds_are_inclusive() {
        let bands = ArtifactBands::default();
        // eye exactly at 0.5
        assert!(bands.is_artifact(&labels([0.5, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0])));
        // muscle just under 0.8
        assert!(!bands.is_artifact(&labels([0.21, 0.79, 0.0, 0.0, 0.0, 0.0, 0.0])));
        // brain and other never flag
        assert!(!bands.is_artifact(&labels([1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])));
        assert!(!bands.is_artifact(&labels([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0])));
    }

    #[test]
    fn flags_in_component_order() {
        let ls = vec![
            labels([0.9, 0.0, 0.0, 0.0, 0.0, 0.0, 0.1]),
            labels([0.1, 0.0, 0.0, 0.0, 0.9, 0.0, 0.0]),
            labels([0.3, 0.0, 0.6, 0.0, 0.0, 0.0, 0.1]),
        ];
        assert_eq!(flagged_components(&ls, &ArtifactBands::default()), vec![1, 2]);
    }

    #[test]
    fn missing_decomposition_is_skipped() {
        let mut rec = Recording::new(
            vec![crate::recording::Channel::new("Cz")],
            ndarray::Array2::from_elem((1, 8), 2.0),
            250.0,
        )
        .unwrap();
        assert_eq!(remove_artifacts(&mut rec, &ArtifactBands::default()).unwrap(), None);
        assert!(rec.data.iter().all(|&v| v == 2.0));
        assert_eq!(rec.removed_components, None);
    }
}
