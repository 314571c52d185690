//! Sparsity reweighting of the first factor's time weights.
//!
//! The rows of the time weights are read as ordered states with the last row
//! as background. A Gaussian mask centered on the smoothed barycenter of the
//! active states attenuates rows far from it, the background row passes.
use log::trace;
use ndarray::{Array1, Array2, Axis};

use crate::model::ParametricModel;
use crate::utils::{max, median_filter};
use crate::F;

/// Mask variance for `iteration` out of `iterations`, geometric from
/// `max_states^2` down to 9.
#[must_use]
pub fn sigma(iteration: usize, iterations: usize, max_states: usize) -> F {
    let start = ((max_states * max_states) as F).ln();
    let end = 9_f64.ln();
    let slope = (end - start) / (iterations.saturating_sub(1).max(1) as F);
    (start + slope * iteration as F).exp()
}

/// Median filtered barycenter of the non-background rows, per frame.
fn barycenter(weights: &Array2<F>, filter: usize, eps: F) -> Vec<F> {
    let k = weights.nrows();
    let rows = k - 1;
    let prior = |s: usize| ((rows - s) * (rows - s)) as F;
    let centers = weights
        .columns()
        .into_iter()
        .map(|column| {
            let (num, den) = (0..rows).fold((0., 0.), |(num, den), s| {
                (
                    num + s as F * prior(s) * column[s],
                    den + prior(s) * column[s].max(eps),
                )
            });
            num / den
        })
        .collect::<Vec<_>>();
    median_filter(&centers, filter)
}

/// Mask with rows `exp(-(s - mu)^2 / (2 sigma))` and the background row
/// normalized to one.
#[must_use]
pub fn mask(states: usize, centers: &[F], sigma: F) -> Array2<F> {
    let mut mask = Array2::from_shape_fn((states, centers.len()), |(s, t)| {
        (-0.5 * (s as F - centers[t]).powi(2) / sigma).exp()
    });
    let peak: Array1<F> = mask.map_axis(Axis(0), |column| max(column));
    mask.row_mut(states - 1).assign(&peak);
    for (mut column, &peak) in mask.columns_mut().into_iter().zip(&peak) {
        if peak > 0. {
            column /= peak;
        }
    }
    mask
}

/// Applies the reweighting to every spectral component with a sparsity
/// filter length and more than two states in its first factor.
pub fn reweight(model: &mut ParametricModel, sigma: F, eps: F) {
    for (k, component) in model.spectral_mut().iter_mut().enumerate() {
        let Some(filter) = component.sparsity else {
            continue;
        };
        let Some(factor) = component.factors.first_mut() else {
            continue;
        };
        let weights = &mut factor.time_weights.value;
        let states = weights.nrows();
        if states <= 2 {
            continue;
        }
        let centers = barycenter(weights, filter, eps);
        trace!("sparsity mask of component {k} with sigma {sigma}");
        *weights *= &mask(states, &centers, sigma);
    }
}

/// Largest number of first factor states over all spectral components.
#[must_use]
pub fn max_states(model: &ParametricModel) -> usize {
    model
        .spectral()
        .iter()
        .filter_map(|c| c.factors.first())
        .map(|f| f.states())
        .max()
        .unwrap_or(0)
}
