//! FIR filter design and application.
//!
//! - [`design`]: Hamming-windowed sinc highpass/lowpass design with MNE's
//!   automatic transition bandwidth and length rules.
//! - [`apply`]: overlap-add zero-phase convolution.
//!
//! A bandpass is run as highpass followed by lowpass; both kernels are linear
//! phase so the cascade is zero phase as well.

pub mod apply;
pub mod design;

pub use apply::{apply_fir_zero_phase, filter_1d};
pub use design::{
    auto_filter_length, design_highpass, design_lowpass, firwin, hamming,
    highpass_trans_bandwidth, lowpass_trans_bandwidth,
};
