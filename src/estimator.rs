//! E-step: posterior statistics of the sub-sources given the mixture.
use std::f64::consts::PI;

use ndarray::{s, Array3, ArrayView1, Axis, Ix1};
use num::Zero;

use crate::covariance::SignalCovariance;
use crate::error::{check_shape, Result};
use crate::hermitian::{invert, Hermitian};
use crate::model::ParametricModel;
use crate::{C, F};

/// Expected statistics computed by [`expectation`].
#[derive(Clone, Debug)]
pub struct SufficientStatistics {
    /// Frame mean of the mixture covariance, per bin.
    pub rxx: Hermitian<Ix1>,
    /// Mixture/sub-source cross correlation, `bins x channels x R`.
    pub rxs: Array3<C>,
    /// Sub-source correlation, `bins x R x R`, Hermitian per bin.
    pub rss: Array3<C>,
    /// Posterior power of every spatial component, `J x bins x frames`.
    pub expected_power: Array3<F>,
    /// Average log-likelihood per time-frequency point.
    pub loglik: F,
}

/// Computes the sufficient statistics of the model for the observed
/// covariance with additive isotropic `noise`.
pub fn expectation(
    model: &ParametricModel,
    covariance: &SignalCovariance,
    noise: ArrayView1<F>,
    eps: F,
) -> Result<SufficientStatistics> {
    let (bins, frames) = (model.bins(), model.frames());
    check_shape(
        "signal covariance",
        &[bins, frames],
        &[covariance.bins(), covariance.frames()],
    )?;
    check_shape("noise", &[bins], noise.shape())?;

    let subsources = model.subsources();
    let rank = subsources.len();
    let owner = subsources
        .ranges
        .iter()
        .enumerate()
        .flat_map(|(j, range)| range.clone().map(move |_| j))
        .collect::<Vec<_>>();
    let (v, a) = (&subsources.powers, &subsources.mixing);
    let (cx00, cx11, cx01) = (covariance.cx00(), covariance.cx11(), covariance.cx01());

    let mut rss = Array3::<C>::zeros((bins, rank, rank));
    let mut rxs = Array3::<C>::zeros((bins, 2, rank));
    let mut expected_power = Array3::<F>::zeros((model.spatial().len(), bins, frames));
    let mut loglik = 0.;
    let mut g0 = vec![C::zero(); rank];
    let mut g1 = vec![C::zero(); rank];

    for f in 0..bins {
        for n in 0..frames {
            let mut d0 = noise[f];
            let mut d1 = noise[f];
            let mut off = C::zero();
            for r in 0..rank {
                let (a0, a1, v) = (a[(r, 0, f)], a[(r, 1, f)], v[(r, f, n)]);
                d0 += a0.norm_sqr() * v;
                d1 += a1.norm_sqr() * v;
                off += a0 * a1.conj() * v;
            }
            let (i0, i1, ioff, det) = invert(d0, d1, off, eps);
            let (c00, c11, c01) = (cx00[(f, n)], cx11[(f, n)], cx01[(f, n)]);
            loglik -= (det.abs() * PI).ln() + i0 * c00 + i1 * c11 + 2. * (ioff * c01.conj()).re;

            // Wiener gains G = V a^H inv(sigma)
            for r in 0..rank {
                let (a0, a1, v) = (a[(r, 0, f)], a[(r, 1, f)], v[(r, f, n)]);
                g0[r] = (a0.conj() * i0 + a1.conj() * ioff.conj()) * v;
                g1[r] = (a0.conj() * ioff + a1.conj() * i1) * v;
            }

            for r1 in 0..rank {
                for r2 in 0..rank {
                    let mut local = g0[r1] * (g0[r2].conj() * c00 + g1[r2].conj() * c01)
                        + g1[r1] * (g1[r2].conj() * c11 + g0[r2].conj() * c01.conj())
                        - (g0[r1] * a[(r2, 0, f)] + g1[r1] * a[(r2, 1, f)]) * v[(r2, f, n)];
                    if r1 == r2 {
                        local += v[(r1, f, n)];
                        expected_power[(owner[r1], f, n)] += local.re.abs();
                    }
                    rss[(f, r1, r2)] += local;
                }
                rxs[(f, 0, r1)] += g0[r1].conj() * c00 + g1[r1].conj() * c01;
                rxs[(f, 1, r1)] += g0[r1].conj() * c01.conj() + g1[r1].conj() * c11;
            }
        }
    }

    let scale = 1. / frames.max(1) as F;
    rss.mapv_inplace(|c| c * scale);
    rxs.mapv_inplace(|c| c * scale);
    for mut bin in rss.axis_iter_mut(Axis(0)) {
        let hermitian = (&bin + &bin.t().mapv(|c| c.conj())).mapv(|c| c * 0.5);
        bin.assign(&hermitian);
    }
    for (j, range) in subsources.ranges.iter().enumerate() {
        expected_power
            .slice_mut(s![j, .., ..])
            .mapv_inplace(|w| w / range.len() as F);
    }

    Ok(SufficientStatistics {
        rxx: covariance.frame_mean(),
        rxs,
        rss,
        expected_power,
        loglik: loglik / (bins * frames).max(1) as F,
    })
}
