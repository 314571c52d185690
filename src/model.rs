//! Parametric model: spatial components (mixing) and spectral components
//! (non-negative factorizations) linked by handle.
#![allow(clippy::module_name_repetitions)]
use std::ops::Range;

use itertools::Itertools;
use ndarray::{Array1, Array2, Array3, Axis, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::error::{check_shape, Error, Result};
use crate::hermitian::Hermitian;
use crate::{C, F};

/// Handle of a spatial component inside a [`ParametricModel`].
pub type SpatialId = usize;

/// Whether the M-step may modify a parameter.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Freedom {
    #[default]
    Free,
    Fixed,
}

impl Freedom {
    #[must_use]
    pub fn is_free(self) -> bool {
        self == Self::Free
    }
}

/// Mixing coefficients of one spatial component.
#[derive(Clone, Debug, PartialEq)]
pub enum Mixing {
    /// `channels x rank`, the same for every bin.
    Instantaneous(Array2<F>),
    /// `rank x channels x bins`.
    Convolutive(Array3<C>),
}

impl Mixing {
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Mixing::Instantaneous(a) => a.ncols(),
            Mixing::Convolutive(a) => a.dim().0,
        }
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        match self {
            Mixing::Instantaneous(a) => a.nrows(),
            Mixing::Convolutive(a) => a.dim().1,
        }
    }

    #[must_use]
    pub fn is_instantaneous(&self) -> bool {
        matches!(self, Self::Instantaneous(_))
    }

    /// Coefficient of sub-source `rank` on `channel` at `bin`.
    #[must_use]
    pub fn coefficient(&self, rank: usize, channel: usize, bin: usize) -> C {
        match self {
            Mixing::Instantaneous(a) => C::from(a[(channel, rank)]),
            Mixing::Convolutive(a) => a[(rank, channel, bin)],
        }
    }

    /// Coefficients expanded to `rank x channels x bins`.
    #[must_use]
    pub fn per_bin(&self, bins: usize) -> Array3<C> {
        match self {
            Mixing::Instantaneous(a) => {
                Array3::from_shape_fn((a.ncols(), a.nrows(), bins), |(r, c, _)| C::from(a[(c, r)]))
            }
            Mixing::Convolutive(a) => a.clone(),
        }
    }

    /// Mean squared magnitude of all coefficients.
    #[must_use]
    pub fn energy(&self) -> F {
        match self {
            Mixing::Instantaneous(a) => a.mapv(|v| v * v).mean().unwrap_or(0.),
            Mixing::Convolutive(a) => a.mapv(|v| v.norm_sqr()).mean().unwrap_or(0.),
        }
    }

    pub fn scale(&mut self, factor: F) {
        match self {
            Mixing::Instantaneous(a) => *a *= factor,
            Mixing::Convolutive(a) => a.mapv_inplace(|v| v * factor),
        }
    }

    /// Spatial covariance `sum_r a_r a_r^H` for every bin.
    #[must_use]
    pub fn covariance(&self, bins: usize) -> Hermitian<Ix1> {
        let mut out = Hermitian::zeros(Ix1(bins));
        for bin in 0..bins {
            for r in 0..self.rank() {
                let a0 = self.coefficient(r, 0, bin);
                let a1 = self.coefficient(r, 1, bin);
                out.diag0[bin] += a0.norm_sqr();
                out.diag1[bin] += a1.norm_sqr();
                out.off[bin] += a0 * a1.conj();
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpatialComponent {
    pub mixing: Mixing,
    pub freedom: Freedom,
}

impl SpatialComponent {
    #[must_use]
    pub fn instantaneous(mixing: Array2<F>, freedom: Freedom) -> Self {
        Self {
            mixing: Mixing::Instantaneous(mixing),
            freedom,
        }
    }

    #[must_use]
    pub fn convolutive(mixing: Array3<C>, freedom: Freedom) -> Self {
        Self {
            mixing: Mixing::Convolutive(mixing),
            freedom,
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.mixing.rank()
    }

    /// Replaces instantaneous mixing by the equivalent convolutive one.
    ///
    /// Returns `false` if the component already was convolutive.
    pub fn make_convolutive(&mut self, bins: usize) -> bool {
        if let Mixing::Instantaneous(_) = self.mixing {
            self.mixing = Mixing::Convolutive(self.mixing.per_bin(bins));
            true
        } else {
            false
        }
    }
}

/// One non-negative matrix of a factor with its update flag.
#[derive(Clone, Debug, PartialEq)]
pub struct Part {
    pub value: Array2<F>,
    pub freedom: Freedom,
}

impl Part {
    #[must_use]
    pub fn free(value: Array2<F>) -> Self {
        Self {
            value,
            freedom: Freedom::Free,
        }
    }

    #[must_use]
    pub fn fixed(value: Array2<F>) -> Self {
        Self {
            value,
            freedom: Freedom::Fixed,
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.freedom.is_free()
    }
}

/// Discrete state model used for the time weights.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Independent states with prior probabilities, unit weights.
    Gmm,
    /// Like [`StateKind::Gmm`] with a gain re-estimated per state.
    Gsmm,
    /// Markov chain of states, unit weights.
    Hmm,
    /// Like [`StateKind::Hmm`] with a gain re-estimated per state.
    Shmm,
}

impl StateKind {
    /// Decoded with a transition matrix instead of priors.
    #[must_use]
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::Hmm | Self::Shmm)
    }

    /// Each state carries its own re-estimated gain.
    #[must_use]
    pub fn is_scaled(self) -> bool {
        matches!(self, Self::Gsmm | Self::Shmm)
    }
}

/// Prior knowledge on the state sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum StateDynamics {
    /// One probability per state.
    Priors(Array1<F>),
    /// `from x to` transition probabilities.
    Transitions(Array2<F>),
}

impl StateDynamics {
    #[must_use]
    pub fn uniform(kind: StateKind, states: usize) -> Self {
        let p = 1. / states.max(1) as F;
        if kind.is_sequential() {
            Self::Transitions(Array2::from_elem((states, states), p))
        } else {
            Self::Priors(Array1::from_elem(states, p))
        }
    }

    /// Transitions favouring staying in the same state, `(9 I + 1)` row
    /// normalized.
    #[must_use]
    pub fn sticky(states: usize) -> Self {
        let mut t = Array2::eye(states) * 9. + 1.;
        for mut row in t.rows_mut() {
            let sum = row.sum();
            row /= sum;
        }
        Self::Transitions(t)
    }

    #[must_use]
    pub fn states(&self) -> usize {
        match self {
            StateDynamics::Priors(p) => p.len(),
            StateDynamics::Transitions(t) => t.nrows(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteStates {
    pub kind: StateKind,
    pub dynamics: StateDynamics,
    pub freedom: Freedom,
    /// Weights every state would have if it were active, created on the
    /// first update.
    pub all_weights: Option<Array2<F>>,
}

impl DiscreteStates {
    /// Uniform dynamics that are re-estimated.
    #[must_use]
    pub fn new(kind: StateKind, states: usize) -> Self {
        Self {
            kind,
            dynamics: StateDynamics::uniform(kind, states),
            freedom: Freedom::Free,
            all_weights: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum TimeConstraint {
    /// Arbitrary non-negative activations.
    #[default]
    Nmf,
    /// A single active row per frame.
    Discrete(DiscreteStates),
}

impl TimeConstraint {
    #[must_use]
    pub fn discrete(&self) -> Option<&DiscreteStates> {
        match self {
            TimeConstraint::Nmf => None,
            TimeConstraint::Discrete(states) => Some(states),
        }
    }

    /// Discrete constraint whose states all have unit weight.
    #[must_use]
    pub fn has_unit_states(&self) -> bool {
        self.discrete().is_some_and(|s| !s.kind.is_scaled())
    }
}

/// `freq_basis x freq_weights x time_weights (x time_basis)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Factor {
    pub freq_basis: Part,
    pub freq_weights: Part,
    pub time_weights: Part,
    pub time_basis: Option<Part>,
    pub constraint: TimeConstraint,
}

impl Factor {
    /// Plain NMF factor with free basis and activations and fixed identity
    /// frequency weights.
    #[must_use]
    pub fn nmf(freq_basis: Array2<F>, time_weights: Array2<F>) -> Self {
        let k = freq_basis.ncols();
        Self {
            freq_basis: Part::free(freq_basis),
            freq_weights: Part::fixed(Array2::eye(k)),
            time_weights: Part::free(time_weights),
            time_basis: None,
            constraint: TimeConstraint::Nmf,
        }
    }

    /// `freq_basis x freq_weights`, `bins x K'`.
    #[must_use]
    pub fn frequency_part(&self) -> Array2<F> {
        self.freq_basis.value.dot(&self.freq_weights.value)
    }

    /// `time_weights (x time_basis)`, `K' x frames`.
    #[must_use]
    pub fn time_part(&self) -> Array2<F> {
        match &self.time_basis {
            Some(tb) => self.time_weights.value.dot(&tb.value),
            None => self.time_weights.value.clone(),
        }
    }

    /// Power spectrogram synthesized by this factor.
    #[must_use]
    pub fn power(&self) -> Array2<F> {
        self.frequency_part().dot(&self.time_part())
    }

    #[must_use]
    pub fn states(&self) -> usize {
        self.time_weights.value.nrows()
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        [&self.freq_basis, &self.freq_weights, &self.time_weights]
            .into_iter()
            .chain(self.time_basis.as_ref())
    }

    pub(crate) fn validate(&self, bins: usize, frames: usize) -> Result<()> {
        let (fb, fw, tw) = (
            &self.freq_basis.value,
            &self.freq_weights.value,
            &self.time_weights.value,
        );
        check_shape("freq_basis rows", &[bins], &[fb.nrows()])?;
        check_shape("freq_weights rows", &[fb.ncols()], &[fw.nrows()])?;
        check_shape("time_weights rows", &[fw.ncols()], &[tw.nrows()])?;
        match &self.time_basis {
            Some(tb) => {
                check_shape("time_basis rows", &[tw.ncols()], &[tb.value.nrows()])?;
                check_shape("time_basis columns", &[frames], &[tb.value.ncols()])?;
            }
            None => check_shape("time_weights columns", &[frames], &[tw.ncols()])?,
        }
        if let Some(states) = self.constraint.discrete() {
            if self.time_basis.is_some() {
                return Err(incompatible_time_basis());
            }
            check_shape("state dynamics", &[tw.nrows()], &[states.dynamics.states()])?;
        }
        if self.parts().any(|p| p.value.iter().any(|&v| v < 0.)) {
            return Err(Error::IncompatibleConfiguration(
                "factor parts must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn incompatible_time_basis() -> Error {
    Error::IncompatibleConfiguration(
        "a time basis can not be combined with discrete state time weights".into(),
    )
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpectralComponent {
    pub spatial: SpatialId,
    pub factors: Vec<Factor>,
    /// Median filter length of the sparsity reweighting, disabled if `None`.
    pub sparsity: Option<usize>,
}

impl SpectralComponent {
    #[must_use]
    pub fn new(spatial: SpatialId, factors: Vec<Factor>) -> Self {
        Self {
            spatial,
            factors,
            sparsity: None,
        }
    }

    /// Product of the factor powers, leaving out `skip`.
    #[must_use]
    pub fn power_without(&self, skip: Option<usize>, bins: usize, frames: usize) -> Array2<F> {
        let mut power = Array2::ones((bins, frames));
        for (_, factor) in self
            .factors
            .iter()
            .enumerate()
            .filter(|&(i, _)| Some(i) != skip)
        {
            power *= &factor.power();
        }
        power
    }
}

/// Sub-sources obtained by flattening the ranks of every spatial component.
#[derive(Clone, Debug)]
pub struct SubSources {
    /// `R x bins x frames`
    pub powers: Array3<F>,
    /// `R x channels x bins`
    pub mixing: Array3<C>,
    /// Sub-source indices of every spatial component.
    pub ranges: Vec<Range<usize>>,
}

impl SubSources {
    #[must_use]
    pub fn len(&self) -> usize {
        self.powers.dim().0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arena of spatial and spectral components for a stereo mixture.
#[derive(Clone, Debug)]
pub struct ParametricModel {
    bins: usize,
    frames: usize,
    spatial: Vec<SpatialComponent>,
    spectral: Vec<SpectralComponent>,
}

impl ParametricModel {
    #[must_use]
    pub fn new(bins: usize, frames: usize) -> Self {
        Self {
            bins,
            frames,
            spatial: Vec::new(),
            spectral: Vec::new(),
        }
    }

    #[must_use]
    pub fn bins(&self) -> usize {
        self.bins
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        2
    }

    pub fn add_spatial(&mut self, component: SpatialComponent) -> Result<SpatialId> {
        let channels = component.mixing.channels();
        if channels != 2 {
            return Err(Error::UnsupportedChannelCount(channels));
        }
        if component.rank() == 0 {
            return Err(Error::IncompatibleConfiguration(
                "spatial rank must be at least 1".into(),
            ));
        }
        if let Mixing::Convolutive(a) = &component.mixing {
            check_shape("convolutive mixing bins", &[self.bins], &[a.dim().2])?;
        }
        self.spatial.push(component);
        Ok(self.spatial.len() - 1)
    }

    pub fn add_spectral(&mut self, component: SpectralComponent) -> Result<usize> {
        if component.spatial >= self.spatial.len() {
            return Err(Error::UnknownComponent {
                kind: "spatial",
                index: component.spatial,
            });
        }
        for factor in &component.factors {
            factor.validate(self.bins, self.frames)?;
        }
        self.spectral.push(component);
        Ok(self.spectral.len() - 1)
    }

    #[must_use]
    pub fn spatial(&self) -> &[SpatialComponent] {
        &self.spatial
    }

    #[must_use]
    pub fn spectral(&self) -> &[SpectralComponent] {
        &self.spectral
    }

    pub fn spatial_mut(&mut self) -> &mut [SpatialComponent] {
        &mut self.spatial
    }

    pub fn spectral_mut(&mut self) -> &mut [SpectralComponent] {
        &mut self.spectral
    }

    /// Spectral component indices attached to `spatial`.
    pub fn attached(&self, spatial: SpatialId) -> impl Iterator<Item = usize> + '_ {
        self.spectral
            .iter()
            .positions(move |c| c.spatial == spatial)
    }

    /// Power of the spatial component, summed over the attached spectral
    /// components, restricted to `only` if given.
    #[must_use]
    pub fn spatial_power(&self, spatial: SpatialId, only: Option<&[usize]>) -> Array2<F> {
        let mut power = Array2::zeros((self.bins, self.frames));
        for k in self.attached(spatial) {
            if only.map_or(true, |only| only.contains(&k)) {
                power += &self.spectral_power(k);
            }
        }
        power
    }

    /// Power of a single spectral component.
    #[must_use]
    pub fn spectral_power(&self, spectral: usize) -> Array2<F> {
        self.spectral[spectral].power_without(None, self.bins, self.frames)
    }

    /// Sum of the powers of every spatial component.
    #[must_use]
    pub fn total_power(&self) -> Array2<F> {
        (0..self.spatial.len()).fold(Array2::zeros((self.bins, self.frames)), |acc, j| {
            acc + self.spatial_power(j, None)
        })
    }

    /// Covariance contribution of a spatial component restricted to the
    /// spectral components in `only`.
    #[must_use]
    pub fn covariance(&self, spatial: SpatialId, only: Option<&[usize]>) -> Hermitian<Ix2> {
        let power = self.spatial_power(spatial, only);
        let r = self.spatial[spatial].mixing.covariance(self.bins);
        let column = |v: Array1<F>| v.insert_axis(Axis(1));
        Hermitian {
            diag0: &power * &column(r.diag0),
            diag1: &power * &column(r.diag1),
            off: power.mapv(C::from) * &r.off.insert_axis(Axis(1)),
        }
    }

    /// Flattens the ranks of all spatial components.
    #[must_use]
    pub fn subsources(&self) -> SubSources {
        let mut ranges = Vec::with_capacity(self.spatial.len());
        let mut total = 0;
        for component in &self.spatial {
            ranges.push(total..total + component.rank());
            total += component.rank();
        }
        let mut powers = Array3::zeros((total, self.bins, self.frames));
        let mut mixing = Array3::zeros((total, 2, self.bins));
        for (j, component) in self.spatial.iter().enumerate() {
            let power = self.spatial_power(j, None);
            let coefficients = component.mixing.per_bin(self.bins);
            for (local, r) in ranges[j].clone().enumerate() {
                powers.index_axis_mut(Axis(0), r).assign(&power);
                mixing
                    .index_axis_mut(Axis(0), r)
                    .assign(&coefficients.index_axis(Axis(0), local));
            }
        }
        SubSources {
            powers,
            mixing,
            ranges,
        }
    }
}
