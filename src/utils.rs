use std::f64::consts::PI;

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use rand::Rng;

use crate::F;

/// Standard normal draw, Box-Muller transform.
pub fn normal(rng: &mut impl Rng) -> F {
    let u1: F = rng.random::<F>().max(F::MIN_POSITIVE);
    let u2: F = rng.random();
    (-2. * u1.ln()).sqrt() * (2. * PI * u2).cos()
}

/// Positive random matrix `0.75 |N(0, 1)| + 0.25`.
pub fn positive_random(shape: (usize, usize), rng: &mut impl Rng) -> Array2<F> {
    Array2::from_shape_simple_fn(shape, || 0.75 * normal(rng).abs() + 0.25)
}

/// Squared standard normal matrix.
pub fn squared_normal(shape: (usize, usize), rng: &mut impl Rng) -> Array2<F> {
    Array2::from_shape_simple_fn(shape, || normal(rng).powi(2))
}

pub fn max<'a>(iter: impl IntoIterator<Item = &'a F>) -> F {
    iter.into_iter().copied().fold(F::NEG_INFINITY, F::max)
}

pub fn min<'a>(iter: impl IntoIterator<Item = &'a F>) -> F {
    iter.into_iter().copied().fold(F::INFINITY, F::min)
}

/// Index of the smallest value, the first one on ties.
pub fn argmin(iter: impl IntoIterator<Item = F>) -> usize {
    iter.into_iter()
        .enumerate()
        .fold((0, F::INFINITY), |(best, value), (i, v)| {
            if v < value {
                (i, v)
            } else {
                (best, value)
            }
        })
        .0
}

/// Indices sorted by decreasing value.
pub fn sort_i_dec(list: &[F]) -> Vec<usize> {
    let mut indices = (0..list.len()).collect::<Vec<_>>();
    indices.sort_by(|&a, &b| list[b].total_cmp(&list[a]));
    indices
}

/// Median of a non-empty slice, mean of the central pair for even lengths.
pub fn median(values: &mut [F]) -> F {
    values.sort_by(F::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.
    }
}

/// Centered running median, windows are truncated at the edges.
pub fn median_filter(values: &[F], len: usize) -> Vec<F> {
    let half = len.max(1) / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            median(&mut values[start..end].to_vec())
        })
        .collect()
}

/// `a / max(b, eps)` element-wise.
pub fn safe_div<S: Data<Elem = F>, T: Data<Elem = F>>(
    a: &ArrayBase<S, Ix2>,
    b: &ArrayBase<T, Ix2>,
    eps: F,
) -> Array2<F> {
    let mut out = a.to_owned();
    out.zip_mut_with(b, |a, &b| *a /= b.max(eps));
    out
}

/// Column maxima with zero columns mapped to 1.
pub fn column_max_or_one<S: Data<Elem = F>>(m: &ArrayBase<S, Ix2>) -> Array1<F> {
    m.map_axis(Axis(0), |col| {
        let peak = max(col);
        if peak > 0. {
            peak
        } else {
            1.
        }
    })
}
