/// Shared synthetic-recording builders.
use std::f64::consts::PI;

use erpclean::epochs::{EpochSet, RejectionSummary};
use erpclean::{Channel, Event, Recording, RecordingMeta, TrialType};
use ndarray::{Array2, Array3};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const SFREQ: f64 = 250.0;

/// Ten-channel montage used by the end-to-end scenarios.
pub const MONTAGE: [&str; 10] = ["Fp1", "Fp2", "F3", "F4", "FCz", "Cz", "C3", "C4", "Pz", "Oz"];

#[allow(unused)]
pub fn gaussian(rng: &mut StdRng) -> f64 {
    // Box–Muller
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[allow(unused)]
pub fn sine(freq: f64, amp: f64, n: usize, sfreq: f64) -> Vec<f64> {
    (0..n).map(|i| amp * (2.0 * PI * freq * i as f64 / sfreq).sin()).collect()
}

#[allow(unused)]
/// Shared 10 Hz + 6 Hz activity on every channel with slightly different
/// gains, plus 1 µV independent noise per channel.
pub fn scalp_recording(labels: &[&str], secs: f64, seed: u64) -> Recording {
    let n = (secs * SFREQ) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let alpha = sine(10.0, 10.0, n, SFREQ);
    let theta = sine(6.0, 8.0, n, SFREQ);
    let mut data = Array2::zeros((labels.len(), n));
    for (c, mut row) in data.rows_mut().into_iter().enumerate() {
        let ga = 0.9 + 0.2 * (c as f64 / labels.len() as f64);
        let gt = 1.1 - 0.2 * (c as f64 / labels.len() as f64);
        for (t, v) in row.iter_mut().enumerate() {
            *v = ga * alpha[t] + gt * theta[t] + gaussian(&mut rng);
        }
    }
    let channels = labels.iter().map(|&l| Channel::new(l)).collect();
    Recording::new(channels, data, SFREQ).unwrap()
}

#[allow(unused)]
/// Replace `label` with independent white noise of standard deviation `sd`.
pub fn make_noise_channel(rec: &mut Recording, label: &str, sd: f64, seed: u64) {
    let c = rec.channel_index(label).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    rec.data.row_mut(c).mapv_inplace(|_| sd * gaussian(&mut rng));
}

#[allow(unused)]
/// Add a mains sinusoid of `amp` µV to `label`.
pub fn add_line_noise(rec: &mut Recording, label: &str, amp: f64, freq: f64) {
    let c = rec.channel_index(label).unwrap();
    let line = sine(freq, amp, rec.n_times(), rec.sfreq);
    for (v, l) in rec.data.row_mut(c).iter_mut().zip(line) {
        *v += l;
    }
}

#[allow(unused)]
/// Alternating go ("S 11") / no-go ("S 21") stimuli every 2 s from 2 s on,
/// each go answered ("R 1") after 400 ms.
pub fn task_events(secs: f64) -> Vec<Event> {
    let mut events = Vec::new();
    let mut k = 0;
    let mut t = 2.0;
    while t + 1.5 < secs {
        let lat = t * SFREQ;
        if k % 2 == 0 {
            events.push(Event::new("S 11", lat));
            events.push(Event::new("R 1", lat + 0.4 * SFREQ));
        } else {
            events.push(Event::new("S 21", lat));
        }
        k += 1;
        t += 2.0;
    }
    events
}

#[allow(unused)]
/// Ten channels, `C3` pure noise and `C4` swamped by 50 Hz, with task events.
pub fn noisy_task_recording(secs: f64, seed: u64) -> Recording {
    let mut rec = scalp_recording(&MONTAGE, secs, seed);
    make_noise_channel(&mut rec, "C3", 50.0, seed + 1);
    add_line_noise(&mut rec, "C4", 50.0, 50.0);
    rec.with_events(task_events(secs))
}

#[allow(unused)]
/// Epoch set around an arbitrary [E, C, T] buffer.
pub fn epoch_set(labels: &[&str], data: Array3<f64>, times: Vec<f64>, sfreq: f64) -> EpochSet {
    let n_e = data.dim().0;
    EpochSet {
        channels: labels.iter().map(|&l| Channel::new(l)).collect(),
        data,
        sfreq,
        times,
        trial_type: TrialType::NonResponse,
        meta: RecordingMeta {
            subject_id: "001".into(),
            subject_type: "HC".into(),
            source: "HC_001".into(),
        },
        log: Vec::new(),
        removed_channels: Vec::new(),
        removed_components: None,
        event_latencies: (0..n_e).map(|e| e as f64 * 500.0).collect(),
        reaction_times: vec![None; n_e],
        rejected: RejectionSummary::default(),
    }
}
