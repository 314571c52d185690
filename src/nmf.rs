//! Itakura-Saito NMF of the mixture power, used to initialize the spectral
//! components.
use log::debug;
use ndarray::{s, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::covariance::SignalCovariance;
use crate::error::{check_shape, Error, Result};
use crate::model::ParametricModel;
use crate::normalize::renormalize;
use crate::utils::{safe_div, sort_i_dec, squared_normal};
use crate::F;

/// Multiplicative IS-NMF `power ~ basis x weights`.
///
/// The basis columns are kept at unit sum, their scale moved into the
/// weights.
#[must_use]
pub fn is_nmf(
    power: ArrayView2<F>,
    mut basis: Array2<F>,
    mut weights: Array2<F>,
    iterations: usize,
    (update_basis, update_weights): (bool, bool),
    eps: F,
) -> (Array2<F>, Array2<F>) {
    let unit_sum = |basis: &mut Array2<F>, weights: &mut Array2<F>| {
        let sum = basis
            .sum_axis(Axis(0))
            .mapv_into(|s| if s > 0. { s } else { 1. });
        *basis /= &sum;
        *weights *= &sum.insert_axis(Axis(1));
    };
    if update_basis {
        unit_sum(&mut basis, &mut weights);
    }
    for i in 0..iterations {
        if update_basis {
            let estimate = basis.dot(&weights);
            let num = safe_div(&power, &estimate.mapv(|e| e * e), eps).dot(&weights.t());
            let den = estimate.mapv(|e| 1. / e.max(eps)).dot(&weights.t());
            basis *= &safe_div(&num, &den, eps);
            unit_sum(&mut basis, &mut weights);
        }
        if update_weights {
            let estimate = basis.dot(&weights);
            let num = basis.t().dot(&safe_div(&power, &estimate.mapv(|e| e * e), eps));
            let den = basis.t().dot(&estimate.mapv(|e| 1. / e.max(eps)));
            weights *= &safe_div(&num, &den, eps);
        }
        debug!("IS-NMF iteration {} of {iterations}", i + 1);
    }
    (basis, weights)
}

/// Strategy of [`initialize_with_nmf`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NmfInit {
    /// The first factors of all components are refined jointly, starting
    /// from their current values.
    #[default]
    Individual,
    /// One decomposition, sorted by energy, is copied into every component.
    Same,
}

/// Initializes the first factor of every spectral component from an NMF of
/// the channel averaged mixture power, then renormalizes the model.
///
/// # Errors
/// [`Error::IncompatibleConfiguration`] if a first factor has a time basis or
/// non-square frequency weights, or
/// for [`NmfInit::Same`] if a component has more than one factor.
pub fn initialize_with_nmf(
    model: &mut ParametricModel,
    covariance: &SignalCovariance,
    init: NmfInit,
    iterations: usize,
    eps: F,
    rng: &mut impl Rng,
) -> Result<()> {
    let (bins, frames) = (model.bins(), model.frames());
    check_shape(
        "signal covariance",
        &[bins, frames],
        &[covariance.bins(), covariance.frames()],
    )?;
    if model
        .spectral()
        .iter()
        .filter_map(|c| c.factors.first())
        .any(|f| f.time_basis.is_some() || !f.freq_weights.value.is_square())
    {
        return Err(Error::IncompatibleConfiguration(
            "nmf initialization needs square frequency weights and no time basis".into(),
        ));
    }
    let power = covariance.channel_average();
    let sizes = model
        .spectral()
        .iter()
        .map(|c| c.factors.first().map_or(0, |f| f.freq_basis.value.ncols()))
        .collect::<Vec<_>>();

    match init {
        NmfInit::Individual => {
            let total = sizes.iter().sum::<usize>();
            let mut basis = Array2::zeros((bins, total));
            let mut weights = Array2::zeros((total, frames));
            let mut start = 0;
            for (component, &size) in model.spectral().iter().zip(&sizes) {
                if let Some(factor) = component.factors.first() {
                    basis
                        .slice_mut(s![.., start..start + size])
                        .assign(&factor.freq_basis.value);
                    weights
                        .slice_mut(s![start..start + size, ..])
                        .assign(&factor.time_weights.value);
                }
                start += size;
            }
            let (basis, weights) =
                is_nmf(power.view(), basis, weights, iterations, (true, true), eps);
            let mut start = 0;
            for (component, &size) in model.spectral_mut().iter_mut().zip(&sizes) {
                if let Some(factor) = component.factors.first_mut() {
                    factor.freq_basis.value = basis
                        .slice(s![.., start..start + size])
                        .mapv(|v| v.max(eps));
                    factor.time_weights.value = weights
                        .slice(s![start..start + size, ..])
                        .mapv(|v| v.max(eps));
                }
                start += size;
            }
        }
        NmfInit::Same => {
            if model.spectral().iter().any(|c| c.factors.len() != 1) {
                return Err(Error::IncompatibleConfiguration(
                    "shared nmf initialization needs single factor components".into(),
                ));
            }
            let count = sizes.iter().copied().max().unwrap_or(0);
            let (basis, weights) = is_nmf(
                power.view(),
                squared_normal((bins, count), rng),
                squared_normal((count, frames), rng),
                iterations,
                (true, true),
                eps,
            );
            let order = sort_i_dec(&weights.sum_axis(Axis(1)).to_vec());
            let basis = basis.select(Axis(1), &order);
            let weights = weights.select(Axis(0), &order);
            for (component, &size) in model.spectral_mut().iter_mut().zip(&sizes) {
                if let Some(factor) = component.factors.first_mut() {
                    factor.freq_basis.value = basis.slice(s![.., ..size]).to_owned();
                    factor.time_weights.value = weights.slice(s![..size, ..]).to_owned();
                }
            }
        }
    }
    renormalize(model, eps, rng);
    Ok(())
}
