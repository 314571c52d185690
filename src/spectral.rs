//! M-step for the spectral components: multiplicative Itakura-Saito updates
//! of every free factor part, with an optional penalty on the correlation
//! between spatial components.
use std::slice;

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

use crate::error::Result;
use crate::model::{incompatible_time_basis, ParametricModel};
use crate::states::update_discrete;
use crate::F;

/// Parameters shared by the multiplicative updates.
#[derive(Clone, Copy, Debug)]
pub struct UpdateRule {
    /// Exponent applied to the update ratios.
    pub step_size: F,
    /// Weight of the decorrelation penalty, disabled at `0`.
    pub decorrelation: F,
    pub eps: F,
}

/// Factor part updated by a multiplicative step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactorPart {
    FreqBasis,
    FreqWeights,
    TimeWeights,
    TimeBasis,
}

impl FactorPart {
    /// The frequency basis sees the other spatial powers unclipped.
    fn clips_others(self) -> bool {
        self != Self::FreqBasis
    }
}

/// Powers entering the decorrelation penalty of one spectral component.
#[derive(Clone, Debug)]
pub struct Decorrelation {
    /// All spatial powers, floored.
    total: Array2<F>,
    /// Powers of the other spatial components.
    others: Array2<F>,
    weight: F,
}

impl Decorrelation {
    /// Penalty of the spatial component `spatial` of `model`.
    #[must_use]
    pub fn new(model: &ParametricModel, spatial: usize, weight: F, eps: F) -> Self {
        let total = model.total_power().mapv_into(|p| p.max(eps));
        let own = model.spatial_power(spatial, None).mapv_into(|p| p.max(eps));
        let others = &total - &own;
        Self::from_powers(total, others, weight, eps)
    }

    /// Penalty from the floored total power and the power of the other
    /// spatial components.
    #[must_use]
    pub fn from_powers(total: Array2<F>, mut others: Array2<F>, weight: F, eps: F) -> Self {
        // Clipped only if already non-negative everywhere.
        if others.iter().all(|&p| p >= 0.) {
            others.mapv_inplace(|p| p.max(eps));
        }
        Self {
            total,
            others,
            weight,
        }
    }

    /// Penalty terms added to the denominator and numerator weights of the
    /// update of `part` with model power `power`.
    #[must_use]
    pub fn terms(&self, power: &Array2<F>, part: FactorPart, eps: F) -> (Array2<F>, Array2<F>) {
        let clip = part.clips_others();
        let den = Zip::from(&self.others)
            .and(&self.total)
            .map_collect(|&others, &total| {
                let others = if clip { others.max(eps) } else { others };
                self.weight * others / (total * total).max(eps)
            });
        let num = Zip::from(&den)
            .and(power)
            .and(&self.total)
            .map_collect(|&den, &p, &total| den * 2. * p / total);
        (den, num)
    }
}

/// Denominator and numerator weights `other (1/P + c)` and
/// `other (W/P^2 + c')`.
fn weights(
    other: &Array2<F>,
    power: &Array2<F>,
    expected: ArrayView2<F>,
    penalty: Option<(Array2<F>, Array2<F>)>,
    floor_square: bool,
    eps: F,
) -> (Array2<F>, Array2<F>) {
    let mut den = Zip::from(other)
        .and(power)
        .map_collect(|&o, &p| o / p);
    let mut num = Zip::from(other)
        .and(power)
        .and(expected)
        .map_collect(|&o, &p, &w| {
            let square = if floor_square { (p * p).max(eps) } else { p * p };
            o * w / square
        });
    if let Some((den_penalty, num_penalty)) = penalty {
        den += &(other * &den_penalty);
        num += &(other * &num_penalty);
    }
    (den, num)
}

/// `value *= (num / max(den, eps))^step`
fn apply(value: &mut Array2<F>, num: &Array2<F>, den: &Array2<F>, rule: UpdateRule) {
    Zip::from(value)
        .and(num)
        .and(den)
        .for_each(|v, &n, &d| *v *= (n / d.max(rule.eps)).powf(rule.step_size));
}

/// Updates every free part of the spectral components in place.
///
/// `expected_power` is the posterior power of each spatial component,
/// `J x bins x frames`.
///
/// # Errors
/// [`crate::Error::IncompatibleConfiguration`] for a discrete state
/// constraint on a factor that has a time basis.
pub fn update_spectral(
    model: &mut ParametricModel,
    expected_power: &Array3<F>,
    rule: UpdateRule,
) -> Result<()> {
    let (bins, frames, eps) = (model.bins(), model.frames(), rule.eps);
    for k in 0..model.spectral().len() {
        let spatial = model.spectral()[k].spatial;
        let expected = expected_power.index_axis(Axis(0), spatial);
        let decorrelation = (rule.decorrelation > 0.)
            .then(|| Decorrelation::new(model, spatial, rule.decorrelation, eps));
        let only = slice::from_ref(&k);
        let penalty = |power: &Array2<F>, part: FactorPart| {
            decorrelation
                .as_ref()
                .map(|d| d.terms(power, part, eps))
        };

        for i in 0..model.spectral()[k].factors.len() {
            let other = model.spectral()[k]
                .power_without(Some(i), bins, frames)
                .mapv_into(|p| p.max(eps));

            if model.spectral()[k].factors[i].freq_basis.is_free() {
                let power = model.spatial_power(spatial, None).mapv_into(|p| p.max(eps));
                let (den_w, num_w) = weights(
                    &other,
                    &power,
                    expected,
                    penalty(&power, FactorPart::FreqBasis),
                    false,
                    eps,
                );
                let factor = &mut model.spectral_mut()[k].factors[i];
                let fw_h = factor.freq_weights.value.dot(&factor.time_part());
                let den = den_w.dot(&fw_h.t());
                let num = num_w.dot(&fw_h.t());
                apply(&mut factor.freq_basis.value, &num, &den, rule);
            }

            if model.spectral()[k].factors[i].freq_weights.is_free() {
                let power = model.spatial_power(spatial, Some(only)).mapv_into(|p| p.max(eps));
                let (den_w, num_w) = weights(
                    &other,
                    &power,
                    expected,
                    penalty(&power, FactorPart::FreqWeights),
                    false,
                    eps,
                );
                let factor = &mut model.spectral_mut()[k].factors[i];
                let h = factor.time_part();
                let fb = &factor.freq_basis.value;
                let den = fb.t().dot(&den_w.dot(&h.t()));
                let num = fb.t().dot(&num_w.dot(&h.t()));
                apply(&mut factor.freq_weights.value, &num, &den, rule);
            }

            if model.spectral()[k].factors[i].time_weights.is_free() {
                if model.spectral()[k].factors[i].constraint.discrete().is_some() {
                    update_discrete(model, k, i, expected, rule.step_size, eps)?;
                } else {
                    let power =
                        model.spatial_power(spatial, Some(only)).mapv_into(|p| p.max(eps));
                    let (den_w, num_w) = weights(
                        &other,
                        &power,
                        expected,
                        penalty(&power, FactorPart::TimeWeights),
                        false,
                        eps,
                    );
                    let factor = &mut model.spectral_mut()[k].factors[i];
                    let w = factor.frequency_part();
                    let (den, num) = match &factor.time_basis {
                        Some(tb) => (
                            w.t().dot(&den_w.dot(&tb.value.t())),
                            w.t().dot(&num_w.dot(&tb.value.t())),
                        ),
                        None => (w.t().dot(&den_w), w.t().dot(&num_w)),
                    };
                    apply(&mut factor.time_weights.value, &num, &den, rule);
                }
            }

            let factor = &model.spectral()[k].factors[i];
            if factor.time_basis.as_ref().is_some_and(|tb| tb.is_free()) {
                if factor.constraint.discrete().is_some() {
                    return Err(incompatible_time_basis());
                }
                let power = model.spatial_power(spatial, Some(only)).mapv_into(|p| p.max(eps));
                let (den_w, num_w) = weights(
                    &other,
                    &power,
                    expected,
                    penalty(&power, FactorPart::TimeBasis),
                    true,
                    eps,
                );
                let factor = &mut model.spectral_mut()[k].factors[i];
                let w = factor.frequency_part().dot(&factor.time_weights.value);
                let den = w.t().dot(&den_w);
                let num = w.t().dot(&num_w);
                if let Some(tb) = &mut factor.time_basis {
                    apply(&mut tb.value, &num, &den, rule);
                }
            }
        }
    }
    Ok(())
}
