mod common;
use common::{sine, SFREQ};
use erpclean::ica::{ComponentClass, ComponentClassifier, ComponentLabels, IcaSolution};
use erpclean::{remove_artifacts, run_ica, Channel, FeatureClassifier, IcaConfig, Recording};
use ndarray::Array2;

const LABELS: [&str; 6] = ["Cz", "Pz", "C3", "C4", "P3", "P4"];

/// 7, 11 and 15.5 Hz "brain" sources plus a 50 Hz mains source, mixed into
/// six channels.
fn mixed_recording(secs: f64) -> Recording {
    let n = (secs * SFREQ) as usize;
    let sources = [
        sine(7.0, 10.0, n, SFREQ),
        sine(11.0, 8.0, n, SFREQ),
        sine(15.5, 6.0, n, SFREQ),
        sine(50.0, 12.0, n, SFREQ),
    ];
    let mixing = [
        [1.0, 0.6, -0.4, 0.8],
        [0.7, -0.9, 0.5, 0.9],
        [-0.5, 0.8, 1.0, 0.7],
        [0.9, 0.4, 0.7, -0.8],
        [0.6, -0.7, -0.9, 1.0],
        [-0.8, 0.9, 0.6, 0.6],
    ];
    let data = Array2::from_shape_fn((LABELS.len(), n), |(c, t)| {
        (0..4).map(|k| mixing[c][k] * sources[k][t]).sum()
    });
    let channels = LABELS.iter().map(|&l| Channel::new(l)).collect();
    Recording::new(channels, data, SFREQ).unwrap()
}

fn quick() -> IcaConfig {
    IcaConfig {
        max_steps: 200,
        ..IcaConfig::default()
    }
}

#[test]
fn artifact_removal_is_idempotent() {
    let mut rec = mixed_recording(20.0);
    let cfg = quick();
    let classifier = FeatureClassifier::default();

    run_ica(&mut rec, &cfg, &classifier).unwrap();
    assert_eq!(rec.ica.as_ref().unwrap().n_components(), 4);
    let first = remove_artifacts(&mut rec, &cfg.bands).unwrap().unwrap();
    assert!(first >= 1, "mains component not flagged");

    run_ica(&mut rec, &cfg, &classifier).unwrap();
    let second = remove_artifacts(&mut rec, &cfg.bands).unwrap().unwrap();
    assert_eq!(second, 0);
    assert_eq!(rec.removed_components, Some(0));
}

/// Flags a fixed component as ocular.
struct FlagOne(usize);

impl ComponentClassifier for FlagOne {
    fn classify(&self, _rec: &Recording, solution: &IcaSolution) -> erpclean::Result<Vec<ComponentLabels>> {
        Ok((0..solution.n_components())
            .map(|k| {
                let mut p = [0.0; 7];
                let class = if k == self.0 { ComponentClass::Eye } else { ComponentClass::Brain };
                p[class.index()] = 1.0;
                ComponentLabels::new(p)
            })
            .collect())
    }
}

#[test]
fn projection_cancels_the_flagged_activation() {
    let mut rec = mixed_recording(8.0);
    let cfg = quick();
    run_ica(&mut rec, &cfg, &FlagOne(1)).unwrap();
    let solution = rec.ica.clone().unwrap();
    let before = solution.sources(&rec.data).unwrap();

    assert_eq!(remove_artifacts(&mut rec, &cfg.bands).unwrap(), Some(1));
    assert!(rec.ica.is_none());

    let after = solution.sources(&rec.data).unwrap();
    let scale = before.row(1).iter().fold(0.0f64, |m, v| m.max(v.abs()));
    for (k, row) in after.rows().into_iter().enumerate() {
        for (t, &v) in row.iter().enumerate() {
            let expected = if k == 1 { 0.0 } else { before[[k, t]] };
            approx::assert_abs_diff_eq!(v, expected, epsilon = 1e-8 * scale.max(1.0));
        }
    }
    assert!(rec.log.iter().any(|l| l.contains("IC1 (eye)")));
}

#[test]
fn removal_without_decomposition_is_skipped() {
    let mut rec = mixed_recording(2.0);
    let untouched = rec.data.clone();
    assert_eq!(remove_artifacts(&mut rec, &quick().bands).unwrap(), None);
    assert_eq!(rec.data, untouched);
    assert_eq!(rec.removed_components, None);
}

#[test]
fn removal_without_classification_is_skipped() {
    let mut rec = mixed_recording(4.0);
    let cfg = quick();
    let mut solution = erpclean::decompose(&rec.data, &cfg).unwrap();
    solution.labels = None;
    rec.ica = Some(solution);
    let untouched = rec.data.clone();

    assert_eq!(remove_artifacts(&mut rec, &cfg.bands).unwrap(), None);
    assert_eq!(rec.data, untouched);
    // Decomposition kept for a later classification.
    assert!(rec.ica.is_some());
}

#[test]
fn same_seed_same_labels() {
    let cfg = quick();
    let mut a = mixed_recording(6.0);
    let mut b = mixed_recording(6.0);
    run_ica(&mut a, &cfg, &FeatureClassifier::default()).unwrap();
    run_ica(&mut b, &cfg, &FeatureClassifier::default()).unwrap();
    assert_eq!(a.ica, b.ica);
}
