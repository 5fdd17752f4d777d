use std::f64::consts::PI;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use erpclean::filter::{apply_fir_zero_phase, design_highpass, design_lowpass};
use erpclean::{decompose, IcaConfig};
use ndarray::Array2;

const SFREQ: f64 = 250.0;

/// Deterministic multi-sine test signal, [C, T].
fn signal(n_chan: usize, n_times: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_chan, n_times), |(c, t)| {
        let x = t as f64 / SFREQ;
        (2.0 * PI * (6.0 + c as f64) * x).sin()
            + 0.5 * (2.0 * PI * (17.0 + 2.0 * c as f64) * x).cos()
            + 0.1 * ((c * 7919 + t * 104_729) % 1000) as f64 / 1000.0
    })
}

fn bench_bandpass(c: &mut Criterion) {
    let data = signal(32, 60 * SFREQ as usize);
    let hp = design_highpass(1.0, SFREQ);
    let lp = design_lowpass(40.0, SFREQ);
    c.bench_function("bandpass 1–40 Hz [32×15000]", |b| {
        b.iter(|| {
            let mut d = data.clone();
            apply_fir_zero_phase(&mut d, black_box(&hp)).unwrap();
            apply_fir_zero_phase(&mut d, black_box(&lp)).unwrap();
            black_box(d[[0, 0]])
        })
    });
}

fn bench_decompose(c: &mut Criterion) {
    let data = signal(8, 20 * SFREQ as usize);
    let cfg = IcaConfig {
        max_steps: 50,
        ..IcaConfig::default()
    };
    let mut group = c.benchmark_group("ica");
    group.sample_size(10);
    group.bench_function("extended infomax [8×5000], 50 steps", |b| {
        b.iter(|| {
            let sol = decompose(black_box(&data), &cfg).unwrap();
            black_box(sol.steps)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_bandpass, bench_decompose);
criterion_main!(benches);
