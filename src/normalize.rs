//! Scale renormalization of the model parameters.
//!
//! Factorizations are only defined up to scale. Renormalizing moves the
//! energy into predictable places without changing any covariance
//! contribution, which keeps the multiplicative updates well conditioned.
use log::debug;
use ndarray::{Array1, Axis};
use rand::Rng;

use crate::model::ParametricModel;
use crate::utils::{column_max_or_one, squared_normal};
use crate::F;

fn nonzero_or_one(values: Array1<F>) -> Array1<F> {
    values.mapv_into(|v| if v > 0. { v } else { 1. })
}

/// Renormalizes all components in place.
///
/// Time weights that collapsed below `eps` are reinitialized to small random
/// values drawn from `rng`.
pub fn renormalize(model: &mut ParametricModel, eps: F, rng: &mut impl Rng) {
    let energies = model
        .spatial_mut()
        .iter_mut()
        .map(|component| {
            let energy = component.mixing.energy();
            if energy > 0. {
                component.mixing.scale(1. / energy.sqrt());
                energy
            } else {
                1.
            }
        })
        .collect::<Vec<_>>();

    for (k, component) in model.spectral_mut().iter_mut().enumerate() {
        let mut carry = energies[component.spatial];
        let last = component.factors.len().saturating_sub(1);
        for (i, factor) in component.factors.iter_mut().enumerate() {
            let fb = &mut factor.freq_basis.value;
            *fb *= carry;
            let scale = column_max_or_one(fb);
            *fb /= &scale;
            factor.freq_weights.value *= &scale.insert_axis(Axis(1));

            if factor.constraint.has_unit_states() {
                carry = 1.;
                continue;
            }

            let fw = &mut factor.freq_weights.value;
            let scale = nonzero_or_one(
                fw.mean_axis(Axis(0))
                    .unwrap_or_else(|| Array1::ones(fw.ncols())),
            );
            *fw /= &scale;
            let tw = &mut factor.time_weights.value;
            *tw *= &scale.insert_axis(Axis(1));

            if tw.sum() < eps {
                debug!("time weights of component {k}, factor {i} collapsed, reinitializing");
                *tw = squared_normal(tw.dim(), rng) * (1e3 * eps);
            }

            if let Some(tb) = &mut factor.time_basis {
                let scale = nonzero_or_one(
                    tb.value
                        .mean_axis(Axis(1))
                        .unwrap_or_else(|| Array1::ones(tb.value.nrows())),
                );
                tb.value /= &scale.view().insert_axis(Axis(1));
                *tw *= &scale;
            }

            carry = tw.mean().filter(|&c| c > 0.).unwrap_or(1.);
            if i != last {
                *tw /= carry;
            }
        }
    }
}
