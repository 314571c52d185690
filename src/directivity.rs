//! Array processing of a stereo mixture for a far-field uniform linear
//! array: Capon directivity, MVDR beamforming and GCC-PHAT delays.
use std::f64::consts::PI;

use itertools::Itertools;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Ix1};
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::covariance::SignalCovariance;
use crate::error::{check_shape, Error, Result};
use crate::hermitian::Hermitian;
use crate::{C, F};

#[derive(SmartDefault, Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DirectivityConfig {
    /// Number of evaluated directions in `(-pi/2, pi/2)`.
    #[default = 128]
    pub angles: usize,
    /// Distance between the two microphones in meters.
    #[default = 0.3]
    pub mic_distance: F,
    #[default = 340.0]
    pub speed_of_sound: F,
    #[default = 44100.0]
    pub sample_rate: F,
}

/// Directions of arrival in radians, excluding the endfire directions.
#[must_use]
pub fn angles(count: usize) -> Array1<F> {
    Array1::from_iter(
        (1..=count).map(|n| n as F * PI / (count as F + 1.) - PI / 2.),
    )
}

/// Steering vector of `channel` for a source at `theta` and `frequency` Hz.
#[must_use]
pub fn steering(channel: usize, frequency: F, theta: F, config: &DirectivityConfig) -> C {
    let delay = channel as F * config.mic_distance / config.speed_of_sound * theta.sin();
    C::from_polar(1., -2. * PI * frequency * delay)
}

/// Frequency in Hz of `bin` for a one-sided spectrum of `bins` bins.
fn frequency(bin: usize, bins: usize, sample_rate: F) -> F {
    let fft_size = 2 * bins.saturating_sub(1).max(1);
    bin as F * sample_rate / fft_size as F
}

/// Inverse of the frame averaged covariance of every bin.
#[allow(clippy::float_cmp)]
fn inverse_frame_mean(covariance: &SignalCovariance) -> Result<Hermitian<Ix1>> {
    let mean = covariance.frame_mean();
    if let Some(bin) = mean.raw_det().iter().position(|&det| det == 0.) {
        return Err(Error::IllConditionedCovariance { bin });
    }
    Ok(mean.invert(0.).inverse)
}

/// Capon spectrum `a^H inv(Rxx) a`, `angles x bins`, with the evaluated
/// angles.
///
/// # Errors
/// [`Error::IllConditionedCovariance`] if the frame averaged covariance of a
/// bin is exactly singular.
pub fn directivity(
    covariance: &SignalCovariance,
    config: &DirectivityConfig,
) -> Result<(Array2<F>, Array1<F>)> {
    let inverse = inverse_frame_mean(covariance)?;
    let bins = covariance.bins();
    let theta = angles(config.angles);
    let diagram = Array2::from_shape_fn((theta.len(), bins), |(n, f)| {
        let frequency = frequency(f, bins, config.sample_rate);
        let a0 = steering(0, frequency, theta[n], config);
        let a1 = steering(1, frequency, theta[n], config);
        a0.norm_sqr() * inverse.diag0[f]
            + a1.norm_sqr() * inverse.diag1[f]
            + 2. * (a0.conj() * a1 * inverse.off[f]).re
    });
    Ok((diagram, theta))
}

/// MVDR weights `inv(Rxx) a / (a^H inv(Rxx) a)` steered at `theta`,
/// `bins x channels`, from the frame averaged covariance.
///
/// The response `w^H a` is 1 in the steered direction.
///
/// # Errors
/// [`Error::IllConditionedCovariance`] if the frame averaged covariance of a
/// bin is exactly singular.
pub fn mvdr(
    covariance: &SignalCovariance,
    theta: F,
    config: &DirectivityConfig,
) -> Result<Array2<C>> {
    let inverse = inverse_frame_mean(covariance)?;
    let bins = covariance.bins();
    let mut weights = Array2::zeros((bins, 2));
    for (f, mut w) in weights.rows_mut().into_iter().enumerate() {
        let frequency = frequency(f, bins, config.sample_rate);
        let a0 = steering(0, frequency, theta, config);
        let a1 = steering(1, frequency, theta, config);
        let (i0, i1, ioff) = (inverse.diag0[f], inverse.diag1[f], inverse.off[f]);
        let w0 = a0 * i0 + a1 * ioff;
        let w1 = a0 * ioff.conj() + a1 * i1;
        let response = (a0.conj() * w0 + a1.conj() * w1).re;
        w[0] = w0 / response;
        w[1] = w1 / response;
    }
    Ok(weights)
}

/// Stereo image `a (w^H x)` of a `bins x frames x 2` spectrogram filtered
/// by `weights` steered at `theta`.
///
/// # Errors
/// [`Error::UnsupportedChannelCount`] for other than two channels,
/// [`Error::ShapeMismatch`] if `weights` is not `bins x 2`.
pub fn beamform(
    x_ft: ArrayView3<'_, C>,
    weights: ArrayView2<'_, C>,
    theta: F,
    config: &DirectivityConfig,
) -> Result<Array3<C>> {
    let (bins, frames, channels) = x_ft.dim();
    if channels != 2 {
        return Err(Error::UnsupportedChannelCount(channels));
    }
    check_shape("beamformer weights", &[bins, 2], weights.shape())?;
    Ok(Array3::from_shape_fn((bins, frames, 2), |(f, t, c)| {
        let output = weights[(f, 0)].conj() * x_ft[(f, t, 0)]
            + weights[(f, 1)].conj() * x_ft[(f, t, 1)];
        steering(c, frequency(f, bins, config.sample_rate), theta, config) * output
    }))
}

/// Generalized cross correlation with phase transform between the two
/// channels, `lags x frames` with `2 (bins - 1)` circular lags.
pub fn gcc_phat(covariance: &SignalCovariance) -> Result<Array2<F>> {
    let size = 2 * covariance.bins().saturating_sub(1).max(1);
    let inverse = RealFftPlanner::<F>::new().plan_fft_inverse(size);
    let mut spectrum = inverse.make_input_vec();
    let mut frame = inverse.make_output_vec();
    let mut gcc = Array2::zeros((size, covariance.frames()));
    for (cross, mut lags) in covariance
        .cx01()
        .columns()
        .into_iter()
        .zip(gcc.columns_mut())
    {
        spectrum.fill(C::new(0., 0.));
        for (s, &c) in spectrum.iter_mut().zip(&cross) {
            let norm = c.norm();
            if norm > 0. {
                *s = c / norm;
            }
        }
        spectrum[0].im = 0.;
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.;
        }
        inverse.process(&mut spectrum, &mut frame)?;
        lags.assign(&ArrayView1::from(&frame).mapv(|v| v / size as F));
    }
    Ok(gcc)
}

/// Delay in seconds of channel 1 behind channel 0 for every frame, from the
/// peak of a [`gcc_phat`] correlation.
#[must_use]
pub fn tdoa(gcc: &Array2<F>, sample_rate: F) -> Array1<F> {
    let size = gcc.nrows();
    gcc.map_axis(Axis(0), |lags| {
        let peak = lags
            .iter()
            .position_max_by(|a, b| a.total_cmp(b))
            .unwrap_or(0);
        let lag = if 2 * peak > size {
            peak as F - size as F
        } else {
            peak as F
        };
        -lag / sample_rate
    })
}
