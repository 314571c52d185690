//! Ready made model structures and transformations between them.
use std::f64::consts::PI;

use itertools::Itertools;
use log::warn;
use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::covariance::SignalCovariance;
use crate::directivity::{directivity, steering, DirectivityConfig};
use crate::error::{check_shape, Error, Result};
use crate::model::{
    DiscreteStates, Factor, Freedom, Mixing, ParametricModel, Part, SpatialComponent,
    SpectralComponent, StateDynamics, StateKind, TimeConstraint,
};
use crate::normalize::renormalize;
use crate::utils::{normal, positive_random};
use crate::{C, F};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MixingKind {
    #[default]
    Instantaneous,
    Convolutive,
}

/// Multichannel NMF model: one spatial component per source, each with a
/// single factor NMF spectral component.
#[derive(SmartDefault, Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    #[default = 3]
    pub sources: usize,
    /// NMF components per source.
    #[default = 4]
    pub components: usize,
    #[default = 2]
    pub spatial_rank: usize,
    pub mixing: MixingKind,
    /// Discrete state constraint on the time weights, plain NMF if `None`.
    pub states: Option<StateKind>,
    /// Standard deviation of the noise added to the initial mixing.
    #[default = 0.1]
    pub jitter: F,
    /// Median filter length of the sparsity reweighting.
    pub sparsity: Option<usize>,
}

impl ModelConfig {
    /// Builds the model for a `bins x frames` representation.
    ///
    /// Sources start spread over the stereo quarter circle.
    pub fn create(&self, bins: usize, frames: usize, rng: &mut impl Rng) -> Result<ParametricModel> {
        if self.sources == 0 || self.components == 0 || self.spatial_rank == 0 {
            return Err(Error::IncompatibleConfiguration(
                "sources, components and spatial rank must be positive".into(),
            ));
        }
        let mut model = ParametricModel::new(bins, frames);
        for j in 0..self.sources {
            let angle = (j + 1) as F * PI / (2. * (self.sources + 1) as F);
            let mixing = Array2::from_shape_fn((2, self.spatial_rank), |(c, _)| {
                let direction = if c == 0 { angle.sin() } else { angle.cos() };
                direction + self.jitter * normal(rng)
            });
            let spatial = model.add_spatial(SpatialComponent::instantaneous(mixing, Freedom::Free))?;
            let mut component = SpectralComponent::new(
                spatial,
                vec![Factor::nmf(
                    positive_random((bins, self.components), rng),
                    positive_random((self.components, frames), rng),
                )],
            );
            component.sparsity = self.sparsity;
            model.add_spectral(component)?;
        }
        renormalize(&mut model, crate::EPSILON, rng);

        if self.mixing == MixingKind::Convolutive {
            model.make_convolutive();
        }
        match self.states {
            None => {}
            Some(StateKind::Hmm) => model.make_hmm(),
            Some(StateKind::Shmm) => model.make_shmm(),
            Some(kind) => model.set_states(|states| DiscreteStates::new(kind, states)),
        }
        Ok(model)
    }
}

/// Source of initial convolutive mixing parameters.
pub trait SpatialInitializer {
    /// Steering vectors `sources x bins x channels` for a
    /// `bins x frames x channels` mixture spectrogram.
    fn estimate(&self, x_ft: ArrayView3<C>, sources: usize) -> Result<Array3<C>>;
}

/// Complex Gaussian steering vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomSteering {
    pub seed: u64,
}

impl SpatialInitializer for RandomSteering {
    fn estimate(&self, x_ft: ArrayView3<C>, sources: usize) -> Result<Array3<C>> {
        let (bins, _, channels) = x_ft.dim();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(Array3::from_shape_simple_fn((sources, bins, channels), || {
            C::new(normal(&mut rng), normal(&mut rng))
        }))
    }
}

/// Steering vectors of the deepest valleys of the Capon directivity.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaponSteering(pub DirectivityConfig);

impl CaponSteering {
    /// Angles of the `sources` strongest local maxima of the inverse of the
    /// bin summed directivity, evenly spread angles fill in missing peaks.
    fn peaks(diagram: &Array2<F>, theta: &Array1<F>, sources: usize) -> Vec<F> {
        let score = diagram.map_axis(Axis(1), |row| 1. / row.sum().max(F::MIN_POSITIVE));
        let n = score.len();
        let maxima = (0..n)
            .filter(|&i| {
                (i == 0 || score[i] > score[i - 1]) && (i + 1 == n || score[i] >= score[i + 1])
            })
            .sorted_by(|&a, &b| score[b].total_cmp(&score[a]))
            .map(|i| theta[i])
            .take(sources)
            .collect_vec();
        let missing = sources - maxima.len();
        maxima
            .into_iter()
            .chain(crate::directivity::angles(missing))
            .collect()
    }
}

impl SpatialInitializer for CaponSteering {
    fn estimate(&self, x_ft: ArrayView3<C>, sources: usize) -> Result<Array3<C>> {
        let covariance = SignalCovariance::from_spectrogram(x_ft)?;
        let (diagram, theta) = directivity(&covariance, &self.0)?;
        let bins = covariance.bins();
        let fft_size = 2 * bins.saturating_sub(1).max(1);
        let angles = Self::peaks(&diagram, &theta, sources);
        Ok(Array3::from_shape_fn((sources, bins, 2), |(j, f, c)| {
            let frequency = f as F * self.0.sample_rate / fft_size as F;
            steering(c, frequency, angles[j], &self.0)
        }))
    }
}

impl ParametricModel {
    /// Turns every instantaneous spatial component convolutive.
    pub fn make_convolutive(&mut self) {
        let bins = self.bins();
        for (j, component) in self.spatial_mut().iter_mut().enumerate() {
            if !component.make_convolutive(bins) {
                warn!("spatial component {j} already convolutive, skipping");
            }
        }
    }

    /// Sets a discrete constraint on every factor's time weights.
    pub fn set_states(&mut self, mut states: impl FnMut(usize) -> DiscreteStates) {
        for component in self.spectral_mut() {
            for factor in &mut component.factors {
                factor.constraint = TimeConstraint::Discrete(states(factor.states()));
            }
        }
    }

    /// Markov chain of states with uniform, re-estimated transitions.
    pub fn make_hmm(&mut self) {
        self.set_states(|states| DiscreteStates::new(StateKind::Hmm, states));
    }

    /// Scaled Markov chain of states with fixed transitions favouring
    /// staying in the same state.
    pub fn make_shmm(&mut self) {
        self.set_states(|states| DiscreteStates {
            kind: StateKind::Shmm,
            dynamics: StateDynamics::sticky(states),
            freedom: Freedom::Fixed,
            all_weights: None,
        });
    }

    /// Replaces the first factor's frequency basis, with identity frequency
    /// weights and fresh random NMF time weights.
    pub fn set_freq_basis(
        &mut self,
        spectral: usize,
        basis: Array2<F>,
        freedom: Freedom,
        rng: &mut impl Rng,
    ) -> Result<()> {
        check_shape("freq_basis rows", &[self.bins()], &[basis.nrows()])?;
        let frames = self.frames();
        let component = self
            .spectral_mut()
            .get_mut(spectral)
            .ok_or(Error::UnknownComponent {
                kind: "spectral",
                index: spectral,
            })?;
        let count = basis.ncols();
        let factor = Factor {
            freq_basis: Part {
                value: basis,
                freedom,
            },
            freq_weights: Part::fixed(Array2::eye(count)),
            time_weights: Part::free(positive_random((count, frames), rng)),
            time_basis: None,
            constraint: TimeConstraint::Nmf,
        };
        match component.factors.first_mut() {
            Some(first) => *first = factor,
            None => component.factors.push(factor),
        }
        Ok(())
    }

    /// Replaces the mixing of every spatial component by convolutive
    /// parameters estimated by `initializer` from the mixture spectrogram,
    /// every rank of a component starting at its steering vector.
    pub fn seed_convolutive(
        &mut self,
        initializer: &impl SpatialInitializer,
        x_ft: ArrayView3<C>,
    ) -> Result<()> {
        let (bins, sources) = (self.bins(), self.spatial().len());
        let steering = initializer.estimate(x_ft, sources)?;
        check_shape("steering vectors", &[sources, bins, 2], steering.shape())?;
        for (j, component) in self.spatial_mut().iter_mut().enumerate() {
            if !component.mixing.is_instantaneous() {
                warn!("spatial component {j} already convolutive, overwriting");
            }
            let vector = steering.index_axis(Axis(0), j);
            let rank = component.rank();
            component.mixing = Mixing::Convolutive(Array3::from_shape_fn(
                (rank, 2, bins),
                |(_, c, f)| vector[(f, c)],
            ));
        }
        Ok(())
    }
}
