//! Multichannel Wiener filtering of the mixture into source images.
use std::collections::BTreeSet;

use ndarray::{Array3, Array4, ArrayView1, ArrayView3, Axis, Ix1, Ix2, Zip};
use num::Zero;
use serde::{Deserialize, Serialize};

use crate::audio::Audio;
use crate::error::{check_shape, Error, Result};
use crate::hermitian::{Hermitian, Inverted};
use crate::model::ParametricModel;
use crate::stft::TimeFrequencyTransform;
use crate::{C, F};

/// How spectral components are grouped into separated sources.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One source per spatial component.
    #[default]
    BySpatial,
    /// One source per spectral component.
    BySpectral,
    /// Explicit lists of spectral component indices.
    Custom(Vec<Vec<usize>>),
}

impl Grouping {
    /// Spectral component indices of every group.
    pub fn groups(&self, model: &ParametricModel) -> Result<Vec<Vec<usize>>> {
        let spectral = model.spectral().len();
        Ok(match self {
            Grouping::BySpatial => (0..model.spatial().len())
                .map(|j| model.attached(j).collect())
                .collect(),
            Grouping::BySpectral => (0..spectral).map(|k| vec![k]).collect(),
            Grouping::Custom(groups) => {
                if let Some(&index) = groups.iter().flatten().find(|&&k| k >= spectral) {
                    return Err(Error::UnknownComponent {
                        kind: "spectral",
                        index,
                    });
                }
                groups.clone()
            }
        })
    }
}

/// Product of two Hermitian matrices given by their upper triangles.
fn product(d0: F, d1: F, off: C, i0: F, i1: F, ioff: C) -> [[C; 2]; 2] {
    [
        [off * ioff.conj() + d0 * i0, ioff * d0 + off * i1],
        [off.conj() * i0 + ioff.conj() * d1, (off * ioff.conj()).conj() + d1 * i1],
    ]
}

/// 2x2 Wiener gains per bin and frame.
#[derive(Clone, Debug)]
pub struct WienerGain {
    /// `bins x frames x 2 x 2`
    pub gain: Array4<C>,
}

impl WienerGain {
    /// `sigma_comp inv(total)` per bin and frame.
    fn new(component: &Hermitian<Ix2>, inverse: &Hermitian<Ix2>) -> Self {
        let (bins, frames) = component.dim();
        let mut gain = Array4::zeros((bins, frames, 2, 2));
        for ((f, n), &d0) in component.diag0.indexed_iter() {
            let (d1, off) = (component.diag1[(f, n)], component.off[(f, n)]);
            let (i0, i1, ioff) = (
                inverse.diag0[(f, n)],
                inverse.diag1[(f, n)],
                inverse.off[(f, n)],
            );
            let entries = product(d0, d1, off, i0, i1, ioff);
            for (c1, c2) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                gain[(f, n, c1, c2)] = entries[c1][c2];
            }
        }
        Self { gain }
    }

    /// Filters a `bins x frames x 2` spectrogram.
    #[must_use]
    pub fn apply(&self, x_ft: ArrayView3<C>) -> Array3<C> {
        let mut out = Array3::zeros(x_ft.dim());
        for ((f, n, c1), y) in out.indexed_iter_mut() {
            *y = (0..2).fold(C::zero(), |acc, c2| {
                acc + self.gain[(f, n, c1, c2)] * x_ft[(f, n, c2)]
            });
        }
        out
    }
}

fn total_inverse(
    model: &ParametricModel,
    components: &[Hermitian<Ix2>],
    noise: ArrayView1<F>,
    eps: F,
) -> Inverted<Ix2> {
    let mut total = Hermitian::zeros(Ix2(model.bins(), model.frames()));
    for component in components {
        total += component;
    }
    total.add_to_diagonal(&noise.insert_axis(Axis(1)));
    total.invert(eps)
}

/// Covariance contribution of a group of spectral components.
fn group_covariance(model: &ParametricModel, group: &[usize]) -> Hermitian<Ix2> {
    let spatial = group
        .iter()
        .map(|&k| model.spectral()[k].spatial)
        .collect::<BTreeSet<_>>();
    let mut sigma = Hermitian::zeros(Ix2(model.bins(), model.frames()));
    for j in spatial {
        sigma += &model.covariance(j, Some(group));
    }
    sigma
}

/// Wiener gains of every group, with the isotropic `noise` in the total
/// covariance.
pub fn wiener_gains(
    model: &ParametricModel,
    noise: ArrayView1<F>,
    grouping: &Grouping,
    eps: F,
) -> Result<Vec<WienerGain>> {
    check_shape("noise", &[model.bins()], noise.shape())?;
    let components = grouping
        .groups(model)?
        .iter()
        .map(|group| group_covariance(model, group))
        .collect::<Vec<_>>();
    let inverse = total_inverse(model, &components, noise, eps).inverse;
    Ok(components
        .iter()
        .map(|component| WienerGain::new(component, &inverse))
        .collect())
}

fn check_spectrogram(model: &ParametricModel, x_ft: ArrayView3<C>) -> Result<()> {
    let (bins, frames, channels) = x_ft.dim();
    if channels != 2 {
        return Err(Error::UnsupportedChannelCount(channels));
    }
    check_shape("spectrogram", &[model.bins(), model.frames()], &[bins, frames])
}

/// Source image spectrograms, `bins x frames x 2` each.
pub fn separate_spectrograms(
    model: &ParametricModel,
    x_ft: ArrayView3<C>,
    noise: ArrayView1<F>,
    grouping: &Grouping,
    eps: F,
) -> Result<Vec<Array3<C>>> {
    check_spectrogram(model, x_ft)?;
    Ok(wiener_gains(model, noise, grouping, eps)?
        .iter()
        .map(|gain| gain.apply(x_ft))
        .collect())
}

/// Separates `audio` into one stereo image per group.
pub fn separate(
    model: &ParametricModel,
    audio: &Audio,
    transform: &impl TimeFrequencyTransform,
    noise: ArrayView1<F>,
    grouping: &Grouping,
    eps: F,
) -> Result<Vec<Audio>> {
    if audio.channels() != 2 {
        return Err(Error::UnsupportedChannelCount(audio.channels()));
    }
    let x_ft = transform.forward(audio.data())?;
    separate_spectrograms(model, x_ft.view(), noise, grouping, eps)?
        .iter()
        .map(|image| {
            Ok(Audio::new(
                audio.sample_rate(),
                transform.inverse_multi(image, audio.samples())?,
            ))
        })
        .collect()
}

/// Beamforming gains from the mixing parameters only, one per spatial
/// component, `bins x 2 x 2`.
///
/// All sources are assumed to have equal power, the gains are normalized by
/// their trace. Instantaneous mixing is broadcast over the bins.
pub fn spatial_filter_gains(model: &ParametricModel, eps: F) -> Vec<Array3<C>> {
    let bins = model.bins();
    let sources = model.spatial().len();
    let covariances = model
        .spatial()
        .iter()
        .map(|c| c.mixing.covariance(bins))
        .collect::<Vec<_>>();
    let mut mean = Hermitian::zeros(Ix1(bins));
    for r in &covariances {
        mean += r;
    }
    let scale = 1. / sources.max(1) as F;
    mean.diag0 *= scale;
    mean.diag1 *= scale;
    mean.off.mapv_inplace(|c| c * scale);
    let inverse = mean.invert(eps).inverse;

    covariances
        .iter()
        .map(|r| {
            let mut gain = Array3::zeros((bins, 2, 2));
            for f in 0..bins {
                let (d0, d1, off) = (r.diag0[f], r.diag1[f], r.off[f]);
                let (i0, i1, ioff) = (inverse.diag0[f], inverse.diag1[f], inverse.off[f]);
                let entries = product(d0, d1, off, i0, i1, ioff);
                let trace = (entries[0][0] + entries[1][1]).re.max(eps);
                for (c1, c2) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    gain[(f, c1, c2)] = entries[c1][c2] / trace;
                }
            }
            gain
        })
        .collect()
}

/// Applies [`spatial_filter_gains`] to a `bins x frames x 2` spectrogram.
pub fn spatial_filter_spectrograms(
    model: &ParametricModel,
    x_ft: ArrayView3<C>,
    eps: F,
) -> Result<Vec<Array3<C>>> {
    check_spectrogram(model, x_ft)?;
    Ok(spatial_filter_gains(model, eps)
        .iter()
        .map(|gain| {
            let mut out = Array3::zeros(x_ft.dim());
            for ((f, n, c1), y) in out.indexed_iter_mut() {
                *y = gain[(f, c1, 0)] * x_ft[(f, n, 0)] + gain[(f, c1, 1)] * x_ft[(f, n, 1)];
            }
            out
        })
        .collect())
}

/// Sum of the gains over all groups, `bins x frames x 2 x 2`.
#[must_use]
pub fn total_gain(gains: &[WienerGain]) -> Option<Array4<C>> {
    gains
        .iter()
        .map(|g| g.gain.clone())
        .reduce(|a, b| a + b)
}

/// Residual `noise inv(total)` per bin and frame, which the gains of a full
/// partition fall short of the identity by.
#[must_use]
pub fn noise_share(
    model: &ParametricModel,
    noise: ArrayView1<F>,
    eps: F,
) -> Hermitian<Ix2> {
    let components = (0..model.spatial().len())
        .map(|j| model.covariance(j, None))
        .collect::<Vec<_>>();
    let mut inverse = total_inverse(model, &components, noise, eps).inverse;
    let noise = noise.insert_axis(Axis(1));
    inverse.diag0 *= &noise;
    inverse.diag1 *= &noise;
    Zip::from(&mut inverse.off)
        .and_broadcast(&noise)
        .for_each(|o, &n| *o *= n);
    inverse
}
