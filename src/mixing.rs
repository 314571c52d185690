//! M-step for the mixing parameters.
use nalgebra::DMatrix;
use ndarray::{Array3, Axis};

use crate::error::{Error, Result};
use crate::estimator::SufficientStatistics;
use crate::model::{Mixing, ParametricModel};
use crate::{C, F};

/// Right hand side `Rxs[:, U] - A_O Rss[O, U]` for one bin, `channels x |U|`.
fn residual_correlation(
    stats: &SufficientStatistics,
    mixing: &Array3<C>,
    bin: usize,
    update: &[usize],
    other: &[usize],
) -> DMatrix<C> {
    DMatrix::from_fn(2, update.len(), |c, u| {
        let u = update[u];
        other.iter().fold(stats.rxs[(bin, c, u)], |acc, &o| {
            acc - mixing[(o, c, bin)] * stats.rss[(bin, o, u)]
        })
    })
}

fn complement(update: &[usize], total: usize) -> Vec<usize> {
    (0..total).filter(|r| !update.contains(r)).collect()
}

/// Solves `rss^T x = rhs^T`, `None` if singular or not finite.
fn solve<T: nalgebra::ComplexField + Copy>(rss: DMatrix<T>, rhs: &DMatrix<T>) -> Option<DMatrix<T>> {
    let x = rss.transpose().lu().solve(&rhs.transpose())?;
    x.iter().all(|v| v.is_finite()).then_some(x)
}

fn update_instantaneous(
    stats: &SufficientStatistics,
    mixing: &mut Array3<C>,
    update: &[usize],
) -> Result<()> {
    let (total, _, bins) = mixing.dim();
    let other = complement(update, total);
    let mut rhs = DMatrix::<F>::zeros(2, update.len());
    let mut rss = DMatrix::<F>::zeros(update.len(), update.len());
    for bin in 0..bins {
        rhs += residual_correlation(stats, mixing, bin, update, &other).map(|c| c.re);
        rss += DMatrix::from_fn(update.len(), update.len(), |i, k| {
            stats.rss[(bin, update[i], update[k])].re
        });
    }
    let scale = 1. / bins.max(1) as F;
    let x = solve(rss * scale, &(rhs * scale))
        .ok_or(Error::SingularSufficientStatistics { bin: None })?;
    for (i, &r) in update.iter().enumerate() {
        for c in 0..2 {
            mixing
                .index_axis_mut(Axis(0), r)
                .row_mut(c)
                .fill(C::from(x[(i, c)]));
        }
    }
    Ok(())
}

fn update_convolutive(
    stats: &SufficientStatistics,
    mixing: &mut Array3<C>,
    update: &[usize],
) -> Result<()> {
    let (total, _, bins) = mixing.dim();
    let other = complement(update, total);
    for bin in 0..bins {
        let rhs = residual_correlation(stats, mixing, bin, update, &other);
        let rss = DMatrix::from_fn(update.len(), update.len(), |i, k| {
            stats.rss[(bin, update[i], update[k])]
        });
        let x = solve(rss, &rhs)
            .ok_or(Error::SingularSufficientStatistics { bin: Some(bin) })?;
        for (i, &r) in update.iter().enumerate() {
            for c in 0..2 {
                mixing[(r, c, bin)] = x[(i, c)];
            }
        }
    }
    Ok(())
}

/// Re-estimates the free mixing parameters from the sufficient statistics.
///
/// Free instantaneous components are solved jointly from the bin averaged
/// statistics, free convolutive ones per bin afterwards.
///
/// # Errors
/// [`Error::SingularSufficientStatistics`] if the sub-source correlation of
/// the updated components can not be inverted.
pub fn update_mixing(model: &mut ParametricModel, stats: &SufficientStatistics) -> Result<()> {
    let subsources = model.subsources();
    let mut mixing = subsources.mixing;
    let mut instantaneous = Vec::new();
    let mut convolutive = Vec::new();
    for (component, range) in model.spatial().iter().zip(&subsources.ranges) {
        if component.freedom.is_free() {
            if component.mixing.is_instantaneous() {
                instantaneous.extend(range.clone());
            } else {
                convolutive.extend(range.clone());
            }
        }
    }
    if !instantaneous.is_empty() {
        update_instantaneous(stats, &mut mixing, &instantaneous)?;
    }
    if !convolutive.is_empty() {
        update_convolutive(stats, &mut mixing, &convolutive)?;
    }

    for (component, range) in model.spatial_mut().iter_mut().zip(&subsources.ranges) {
        if !component.freedom.is_free() {
            continue;
        }
        match &mut component.mixing {
            Mixing::Instantaneous(a) => {
                for (local, r) in range.clone().enumerate() {
                    for c in 0..2 {
                        a[(c, local)] = mixing[(r, c, 0)].re;
                    }
                }
            }
            Mixing::Convolutive(a) => {
                for (local, r) in range.clone().enumerate() {
                    a.index_axis_mut(Axis(0), local)
                        .assign(&mixing.index_axis(Axis(0), r));
                }
            }
        }
    }
    Ok(())
}
