use std::f64::consts::PI;

use fasst::directivity::{angles, beamform, directivity, gcc_phat, mvdr, steering, tdoa};
use fasst::{DirectivityConfig, Error, SignalCovariance, C, F};
use float_cmp::assert_approx_eq;
use ndarray::{s, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn identical_channels_are_ill_conditioned() {
    let power = Array2::from_shape_fn((5, 4), |(f, t)| 1. + (f + t) as F);
    let covariance =
        SignalCovariance::from_parts(power.clone(), power.clone(), power.mapv(C::from)).unwrap();
    assert!(matches!(
        directivity(&covariance, &DirectivityConfig::default()),
        Err(Error::IllConditionedCovariance { bin: 0 })
    ));
}

#[test]
fn angle_grid() {
    let theta = angles(3);
    assert_eq!(theta.len(), 3);
    assert_approx_eq!(F, theta[0], -PI / 4.);
    assert_approx_eq!(F, theta[1], 0.);
    assert_approx_eq!(F, theta[2], PI / 4.);
}

#[test]
fn capon_valley_at_the_source() {
    // spacing of 0.3 m is free of spatial aliasing below ~570 Hz
    let config = DirectivityConfig {
        angles: 91,
        sample_rate: 8000.,
        ..DirectivityConfig::default()
    };
    let (bins, frames) = (33, 40);
    let source = 20_f64.to_radians();
    let fft_size = 2. * (bins - 1) as F;
    // one source plus a weak interference
    let x_ft = Array3::from_shape_fn((bins, frames, 2), |(f, t, c)| {
        let frequency = f as F * config.sample_rate / fft_size;
        let s = C::from_polar(1. + (t % 3) as F, t as F * 0.7 + f as F);
        let noise = C::from_polar(0.01, (t * 7 + f * 3 + c * 11) as F);
        s * steering(c, frequency, source, &config) + noise
    });
    let covariance = SignalCovariance::from_spectrogram(x_ft.view()).unwrap();
    let (diagram, theta) = directivity(&covariance, &config).unwrap();
    assert_eq!(diagram.dim(), (91, bins));
    assert!(diagram.iter().all(|v| v.is_finite()));

    for f in 1..4 {
        let column = diagram.column(f);
        let best = (0..theta.len())
            .min_by(|&a, &b| column[a].total_cmp(&column[b]))
            .unwrap();
        assert!((theta[best] - source).abs() < 0.1, "bin {f}: {}", theta[best]);
    }
}

#[test]
fn gcc_phat_finds_the_delay() {
    let (bins, frames) = (17, 6);
    let size = 2 * (bins - 1);
    let delay = 3.;
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let mut x_ft = Array3::<C>::zeros((bins, frames, 2));
    for f in 0..bins {
        // channel 1 lags channel 0 by `delay` samples
        let shift = C::from_polar(1., -2. * PI * f as F * delay / size as F);
        for t in 0..frames {
            let source = C::from_polar(rng.random_range(0.5..2.), rng.random_range(-PI..PI));
            x_ft[(f, t, 0)] = source;
            x_ft[(f, t, 1)] = source * shift;
        }
    }
    let covariance = SignalCovariance::from_spectrogram(x_ft.view()).unwrap();
    let gcc = gcc_phat(&covariance).unwrap();
    assert_eq!(gcc.dim(), (size, frames));
    // unit magnitude cross spectrum, the peak carries all the energy
    for column in gcc.columns() {
        assert_approx_eq!(F, column[size - 3], 1., epsilon = 1e-9);
    }
    let sample_rate = 16000.;
    for seconds in tdoa(&gcc, sample_rate) {
        assert_approx_eq!(F, seconds, delay / sample_rate, epsilon = 1e-12);
    }
}

#[test]
fn mvdr_is_distortionless() {
    let config = DirectivityConfig {
        sample_rate: 8000.,
        ..DirectivityConfig::default()
    };
    let (bins, frames) = (17, 50);
    let fft_size = 2. * (bins - 1) as F;
    let (target, interference) = (20_f64.to_radians(), -40_f64.to_radians());
    let mut rng = ChaCha8Rng::seed_from_u64(22);
    let mut draw = || C::new(rng.random_range(-1.0..1.), rng.random_range(-1.0..1.));
    let mut source = Array3::<C>::zeros((bins, frames, 2));
    let mut x_ft = Array3::<C>::zeros((bins, frames, 2));
    for f in 0..bins {
        let frequency = f as F * config.sample_rate / fft_size;
        for t in 0..frames {
            let (s, i) = (draw(), draw());
            for c in 0..2 {
                let image = s * steering(c, frequency, target, &config);
                source[(f, t, c)] = image;
                x_ft[(f, t, c)] =
                    image + i * steering(c, frequency, interference, &config) + draw() * 0.01;
            }
        }
    }
    let covariance = SignalCovariance::from_spectrogram(x_ft.view()).unwrap();
    let weights = mvdr(&covariance, target, &config).unwrap();
    assert_eq!(weights.dim(), (bins, 2));
    for f in 0..bins {
        let frequency = f as F * config.sample_rate / fft_size;
        let response = weights[(f, 0)].conj() * steering(0, frequency, target, &config)
            + weights[(f, 1)].conj() * steering(1, frequency, target, &config);
        assert_approx_eq!(F, response.re, 1., epsilon = 1e-9);
        assert_approx_eq!(F, response.im, 0., epsilon = 1e-9);
    }

    // a source in the steered direction passes unchanged
    let filtered = beamform(source.view(), weights.view(), target, &config).unwrap();
    for (a, b) in filtered.iter().zip(&source) {
        assert!((a - b).norm() < 1e-9);
    }
    assert!(matches!(
        beamform(source.view(), weights.slice(s![..3, ..]), target, &config),
        Err(Error::ShapeMismatch { .. })
    ));
}
