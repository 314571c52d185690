//! Closed form algebra on fields of 2x2 Hermitian matrices.
//!
//! A matrix is stored by its two real diagonal entries and its upper
//! off-diagonal entry `(0, 1)`; the `(1, 0)` entry is the conjugate.
use std::ops::AddAssign;

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};

use crate::{C, F};

/// Field of 2x2 Hermitian matrices, one per element of the arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct Hermitian<D: Dimension> {
    pub diag0: Array<F, D>,
    pub diag1: Array<F, D>,
    pub off: Array<C, D>,
}

/// Inverse of a [`Hermitian`] field together with the floored determinants.
#[derive(Clone, Debug)]
pub struct Inverted<D: Dimension> {
    pub inverse: Hermitian<D>,
    pub det: Array<F, D>,
}

/// Floors the magnitude of `det` at `eps`, keeping its sign.
///
/// Zero counts as positive.
#[must_use]
pub fn floor_det(det: F, eps: F) -> F {
    let sign = if det < 0. { -1. } else { 1. };
    sign * det.abs().max(eps)
}

/// Inverts a single matrix, returning `(inv_diag0, inv_diag1, inv_off, det)`.
#[must_use]
pub fn invert(diag0: F, diag1: F, off: C, eps: F) -> (F, F, C, F) {
    let det = floor_det(diag0 * diag1 - off.norm_sqr(), eps);
    (diag1 / det, diag0 / det, -off / det, det)
}

impl<D: Dimension> Hermitian<D> {
    #[must_use]
    pub fn zeros(dim: D) -> Self {
        Self {
            diag0: Array::zeros(dim.clone()),
            diag1: Array::zeros(dim.clone()),
            off: Array::zeros(dim),
        }
    }

    #[must_use]
    pub fn dim(&self) -> D::Pattern {
        self.diag0.dim()
    }

    /// Determinants before any flooring.
    #[must_use]
    pub fn raw_det(&self) -> Array<F, D> {
        Zip::from(&self.diag0)
            .and(&self.diag1)
            .and(&self.off)
            .map_collect(|&d0, &d1, &off| d0 * d1 - off.norm_sqr())
    }

    /// Element-wise inverse with the determinant magnitude floored at `eps`.
    ///
    /// Never produces `NaN` or infinities for finite input, singular matrices
    /// are treated as if their determinant was `eps`.
    #[must_use]
    pub fn invert(&self, eps: F) -> Inverted<D> {
        let det = self.raw_det().mapv_into(|det| floor_det(det, eps));
        let diag0 = &self.diag1 / &det;
        let diag1 = &self.diag0 / &det;
        let off = Zip::from(&self.off)
            .and(&det)
            .map_collect(|&off, &det| -off / det);
        Inverted {
            inverse: Hermitian { diag0, diag1, off },
            det,
        }
    }

    /// Adds `eye * value` where `value` broadcasts against the diagonal.
    pub fn add_to_diagonal<S: Data<Elem = F>, E: Dimension>(&mut self, value: &ArrayBase<S, E>) {
        self.diag0 += value;
        self.diag1 += value;
    }
}

impl<D: Dimension> AddAssign<&Hermitian<D>> for Hermitian<D> {
    fn add_assign(&mut self, rhs: &Hermitian<D>) {
        self.diag0 += &rhs.diag0;
        self.diag1 += &rhs.diag1;
        self.off += &rhs.off;
    }
}
