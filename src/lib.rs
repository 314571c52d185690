#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_lossless,
    clippy::cast_precision_loss,
    clippy::many_single_char_names,
    clippy::similar_names
)]
//! Flexible audio source separation.
//!
//! A stereo mixture is modelled as a sum of Gaussian sources, each described
//! by a spatial component (instantaneous or convolutive mixing) and spectral
//! components (products of non-negative factorizations, optionally with
//! discrete state time constraints). The parameters are estimated with a
//! generalized EM algorithm and the sources are recovered by multichannel
//! Wiener filtering.
use nalgebra::Complex;

mod audio;
pub use audio::*;
mod builder;
pub use builder::{CaponSteering, MixingKind, ModelConfig, RandomSteering, SpatialInitializer};
mod covariance;
pub use covariance::{Annealing, NoisePsd, SignalCovariance};
pub mod directivity;
pub use directivity::DirectivityConfig;
mod error;
pub use error::{Error, Result};
mod estimator;
pub use estimator::{expectation, SufficientStatistics};
mod gem;
pub use gem::{run_gem, Gem, GemConfig, GemState};
pub mod hermitian;
pub use hermitian::Hermitian;
mod mixing;
pub use mixing::update_mixing;
pub mod model;
pub use model::{
    DiscreteStates, Factor, Freedom, Mixing, ParametricModel, Part, SpatialComponent, SpatialId,
    SpectralComponent, StateDynamics, StateKind, TimeConstraint,
};
pub mod nmf;
mod normalize;
pub use normalize::renormalize;
pub mod separation;
pub use separation::{separate, Grouping, WienerGain};
pub mod sparsity;
mod spectral;
pub use spectral::{update_spectral, Decorrelation, FactorPart, UpdateRule};
pub mod states;
mod stft;
pub use stft::{Stft, StftConfig, TimeFrequencyTransform};
mod utils;

pub type F = f64;
pub type C = Complex<F>;

/// Default floor of divisions and determinants.
pub const EPSILON: F = 1e-10;
