//! Discrete state constraints on the time weights.
//!
//! Every frame activates exactly one row of the time weights. The active row
//! is chosen by minimizing the Itakura-Saito divergence between the
//! posterior power and the model, traded off against priors (independent
//! states) or transition probabilities (Markov chain).
use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

use crate::error::{Error, Result};
use crate::model::{incompatible_time_basis, ParametricModel, StateDynamics, TimeConstraint};
use crate::utils::{argmin, max, min};
use crate::F;

/// Most likely state sequence for a `states x frames` cost matrix.
///
/// Priors are decoded frame by frame, transitions with the Viterbi
/// algorithm starting from a uniform initial distribution.
#[must_use]
pub fn decode(cost: ArrayView2<F>, dynamics: &StateDynamics, eps: F) -> Vec<usize> {
    match dynamics {
        StateDynamics::Priors(priors) => cost
            .columns()
            .into_iter()
            .map(|column| {
                argmin(
                    column
                        .iter()
                        .zip(priors)
                        .map(|(&cost, &prior)| cost - (prior + eps).ln()),
                )
            })
            .collect(),
        StateDynamics::Transitions(transitions) => viterbi(cost, transitions, eps),
    }
}

fn viterbi(cost: ArrayView2<F>, transitions: &Array2<F>, eps: F) -> Vec<usize> {
    let (states, frames) = cost.dim();
    if frames == 0 || states == 0 {
        return Vec::new();
    }
    let log_transitions = transitions.mapv(|p| (p + eps).ln());
    let mut accumulated = cost.column(0).mapv(|c| c + (states as F).ln());
    let mut antecedent = Array2::<usize>::zeros((states, frames));
    for t in 1..frames {
        let mut next = Array1::zeros(states);
        for to in 0..states {
            let from = argmin((0..states).map(|from| accumulated[from] - log_transitions[(from, to)]));
            antecedent[(to, t)] = from;
            next[to] = accumulated[from] - log_transitions[(from, to)] + cost[(to, t)];
        }
        let floor = min(&next);
        accumulated = next - floor;
    }
    let mut sequence = vec![0; frames];
    sequence[frames - 1] = argmin(accumulated.iter().copied());
    for t in (1..frames).rev() {
        sequence[t - 1] = antecedent[(sequence[t], t)];
    }
    sequence
}

/// Re-estimates priors or transitions from a decoded sequence.
///
/// Transition rows of states that never occur before the last frame are
/// left untouched.
pub fn reestimate(dynamics: &mut StateDynamics, sequence: &[usize]) {
    match dynamics {
        StateDynamics::Priors(priors) => {
            let frames = sequence.len().max(1) as F;
            for (state, prior) in priors.iter_mut().enumerate() {
                *prior = sequence.iter().filter(|&&s| s == state).count() as F / frames;
            }
        }
        StateDynamics::Transitions(transitions) => {
            let pairs = sequence.windows(2).map(|w| (w[0], w[1]));
            let mut counts = Array2::<F>::zeros(transitions.dim());
            for (from, to) in pairs {
                counts[(from, to)] += 1.;
            }
            for (mut row, counts) in transitions
                .axis_iter_mut(Axis(0))
                .zip(counts.axis_iter(Axis(0)))
            {
                let total = counts.sum();
                if total > 0. {
                    row.assign(&(&counts / total));
                }
            }
        }
    }
}

/// Itakura-Saito divergence summed over bins, one value per frame.
fn divergence(expected: ArrayView2<F>, power: &Array2<F>, eps: F) -> Array1<F> {
    let ratio = Zip::from(expected)
        .and(power)
        .map_collect(|&w, &p| w / p.max(eps));
    ratio
        .mapv(|r| r - r.max(eps).ln() - 1.)
        .sum_axis(Axis(0))
}

/// Updates the time weights of `factor` of spectral component `spectral`
/// under its discrete state constraint.
pub(crate) fn update_discrete(
    model: &mut ParametricModel,
    spectral: usize,
    factor: usize,
    expected: ArrayView2<F>,
    step_size: F,
    eps: F,
) -> Result<()> {
    let spatial = model.spectral()[spectral].spatial;
    let current = &model.spectral()[spectral].factors[factor];
    let TimeConstraint::Discrete(states) = &current.constraint else {
        return Ok(());
    };
    if current.time_basis.is_some() {
        return Err(incompatible_time_basis());
    }
    let mut states = states.clone();
    if states.kind.is_sequential() != matches!(states.dynamics, StateDynamics::Transitions(_)) {
        return Err(Error::IncompatibleConfiguration(format!(
            "{:?} states need {} dynamics",
            states.kind,
            if states.kind.is_sequential() {
                "transition"
            } else {
                "prior"
            }
        )));
    }
    let count = current.states();
    let frames = model.frames();
    let mut all_weights = states.all_weights.take().unwrap_or_else(|| {
        let peak = current
            .time_weights
            .value
            .map_axis(Axis(0), |column| max(column));
        Array2::from_shape_fn((count, frames), |(_, t)| peak[t])
    });

    if !states.kind.is_scaled() && (max(&all_weights) > 1. || min(&all_weights) < 1.) {
        let mean = all_weights.mean().unwrap_or(1.);
        model.spectral_mut()[spectral].factors[factor]
            .freq_basis
            .value
            .mapv_inplace(|v| v * mean);
        all_weights.fill(1.);
    }

    let mut cost = Array2::zeros((count, frames));
    for state in 0..count {
        {
            let weights = &mut model.spectral_mut()[spectral].factors[factor].time_weights.value;
            weights.fill(0.);
            weights.row_mut(state).assign(&all_weights.row(state));
        }
        if states.kind.is_scaled() {
            let power = model
                .spatial_power(spatial, Some(std::slice::from_ref(&spectral)))
                .mapv_into(|p| p.max(eps));
            let current = &model.spectral()[spectral].factors[factor];
            let basis = current
                .freq_basis
                .value
                .dot(&current.freq_weights.value.column(state));
            let num_weight = Zip::from(expected)
                .and(&power)
                .map_collect(|&w, &p| w / (p * p).max(eps));
            let num = basis.dot(&num_weight);
            let den = basis.dot(&power.mapv(|p| 1. / p));
            let mut row = all_weights.row_mut(state);
            Zip::from(&mut row)
                .and(&num)
                .and(&den)
                .for_each(|w, &n, &d| *w *= (n / d.max(eps)).powf(step_size));
            model.spectral_mut()[spectral].factors[factor]
                .time_weights
                .value
                .row_mut(state)
                .assign(&row);
        }
        let power = model.spatial_power(spatial, None);
        cost.row_mut(state)
            .assign(&divergence(expected, &power, eps));
    }

    let sequence = decode(cost.view(), &states.dynamics, eps);
    debug!(
        "decoded {} frames of component {spectral}, factor {factor}",
        sequence.len()
    );
    {
        let weights = &mut model.spectral_mut()[spectral].factors[factor].time_weights.value;
        weights.fill(0.);
        for (t, &state) in sequence.iter().enumerate() {
            weights[(state, t)] = all_weights[(state, t)];
        }
    }
    if states.freedom.is_free() {
        reestimate(&mut states.dynamics, &sequence);
    }
    states.all_weights = Some(all_weights);
    model.spectral_mut()[spectral].factors[factor].constraint = TimeConstraint::Discrete(states);
    Ok(())
}
