use fasst::{
    run_gem, Annealing, Factor, Freedom, GemConfig, GemState, Mixing, MixingKind, ModelConfig,
    NoisePsd, ParametricModel, SignalCovariance, SpatialComponent, SpectralComponent, C, F,
};
use float_cmp::assert_approx_eq;
use ndarray::{arr2, Array1, Array2, Array3, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Covariance of sources with powers `powers[j]` mixed by real `directions[j]`.
fn mixture(powers: &[Array2<F>], directions: &[[F; 2]]) -> SignalCovariance {
    let dim = powers[0].dim();
    let (mut cx00, mut cx11, mut cx01) = (
        Array2::zeros(dim),
        Array2::zeros(dim),
        Array2::<C>::zeros(dim),
    );
    for (power, [a0, a1]) in powers.iter().zip(directions) {
        cx00 += &(power * (a0 * a0));
        cx11 += &(power * (a1 * a1));
        cx01 += &power.mapv(|p| C::from(p * a0 * a1));
    }
    SignalCovariance::from_parts(cx00, cx11, cx01).unwrap()
}

fn fixed_noise(power: F) -> GemConfig {
    GemConfig {
        annealing: Annealing::Fixed,
        noise_high: Some(power),
        noise_low: Some(power),
        ..GemConfig::default()
    }
}

#[test]
fn single_source_fit() {
    let target = arr2(&[
        [1.0, 2.0, 0.5, 1.5],
        [2.0, 4.0, 1.0, 3.0],
        [0.4, 0.8, 0.2, 0.6],
        [3.0, 6.0, 1.5, 4.5],
    ]);
    let direction = [0.6, 0.8];
    let covariance = mixture(&[target.clone()], &[direction]);

    let mut model = ParametricModel::new(4, 4);
    let spatial = model
        .add_spatial(SpatialComponent::instantaneous(
            arr2(&[[0.5], [0.9]]),
            Freedom::Free,
        ))
        .unwrap();
    model
        .add_spectral(SpectralComponent::new(
            spatial,
            vec![Factor::nmf(
                arr2(&[[1.], [1.], [1.], [1.]]),
                arr2(&[[1., 1., 1., 1.]]),
            )],
        ))
        .unwrap();

    let mut gem = fixed_noise(1e-6).create(model, &covariance).unwrap();
    gem.run().unwrap();
    assert_eq!(gem.loglik().len(), 50);

    let fit = gem.model().covariance(spatial, None);
    for ((&estimate, &observed), (&estimate1, &observed1)) in fit
        .diag0
        .iter()
        .zip(covariance.cx00())
        .zip(fit.diag1.iter().zip(covariance.cx11()))
    {
        assert_approx_eq!(F, estimate, observed, epsilon = 0.01 * observed);
        assert_approx_eq!(F, estimate1, observed1, epsilon = 0.01 * observed1);
    }
}

fn direction(mixing: &Mixing) -> F {
    let Mixing::Instantaneous(a) = mixing else {
        panic!("instantaneous mixing expected");
    };
    a[(1, 0)].atan2(a[(0, 0)]).to_degrees().rem_euclid(180.)
}

#[test]
fn two_source_directions() {
    let (bins, frames) = (8, 10);
    let activation = |offset: usize| {
        Array1::from_shape_fn(frames, |t| 0.5 + ((t + offset) % 4) as F)
    };
    let support = |range: std::ops::Range<usize>| {
        Array1::from_shape_fn(bins, |f| if range.contains(&f) { 1. + f as F } else { 0. })
    };
    let outer = |w: Array1<F>, h: Array1<F>| {
        let mut v = Array2::zeros((bins, frames));
        Zip::indexed(&mut v).for_each(|(f, t), v| *v = w[f] * h[t]);
        v
    };
    let low = outer(support(0..4), activation(0));
    let high = outer(support(4..8), activation(2));
    let truth = [30_f64.to_radians(), 60_f64.to_radians()];
    let covariance = mixture(
        &[low, high],
        &[[truth[0].cos(), truth[0].sin()], [truth[1].cos(), truth[1].sin()]],
    );

    let mut model = ParametricModel::new(bins, frames);
    for (start, angle) in [(0, 15_f64), (4, 75.)] {
        let angle = angle.to_radians();
        let spatial = model
            .add_spatial(SpatialComponent::instantaneous(
                arr2(&[[angle.cos()], [angle.sin()]]),
                Freedom::Free,
            ))
            .unwrap();
        let basis = Array2::from_shape_fn((bins, 2), |(f, k)| {
            if (start..start + 4).contains(&f) {
                1. + k as F * 0.5
            } else {
                0.
            }
        });
        model
            .add_spectral(SpectralComponent::new(
                spatial,
                vec![Factor::nmf(basis, Array2::ones((2, frames)))],
            ))
            .unwrap();
    }

    let mut gem = GemConfig {
        iterations: 30,
        ..fixed_noise(1e-6)
    }
    .create(model, &covariance)
    .unwrap();
    gem.run().unwrap();
    let model = gem.model();
    assert_approx_eq!(F, direction(&model.spatial()[0].mixing), 30., epsilon = 5.);
    assert_approx_eq!(F, direction(&model.spatial()[1].mixing), 60., epsilon = 5.);
}

#[test]
fn loglik_never_decreases_with_fixed_noise() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let (bins, frames) = (8, 12);
    let x_ft = Array3::from_shape_simple_fn((bins, frames, 2), || {
        C::new(rng.random_range(-1.0..1.), rng.random_range(-1.0..1.))
    });
    let covariance = SignalCovariance::from_spectrogram(x_ft.view()).unwrap();
    for mixing in [MixingKind::Instantaneous, MixingKind::Convolutive] {
        let model = ModelConfig {
            sources: 2,
            components: 3,
            mixing,
            ..ModelConfig::default()
        }
        .create(bins, frames, &mut rng)
        .unwrap();
        let (_, loglik) = run_gem(
            model,
            &covariance,
            GemConfig {
                iterations: 40,
                ..fixed_noise(1e-2)
            },
        )
        .unwrap();
        assert_eq!(loglik.len(), 40);
        for (i, pair) in loglik.windows(2).enumerate() {
            assert!(
                pair[1] >= pair[0] - 1e-9 * pair[0].abs().max(1.),
                "{mixing:?} loglik dropped at iteration {}: {} -> {}",
                i + 1,
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn state_machine() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let (bins, frames) = (4, 6);
    let model = ModelConfig {
        sources: 2,
        components: 2,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();
    let power = Array2::from_shape_fn((bins, frames), |(f, t)| 1. + (f * t) as F);
    let covariance = mixture(&[power.clone(), power], &[[1., 0.2], [0.3, 1.]]);

    let mut gem = GemConfig {
        iterations: 3,
        ..GemConfig::default()
    }
    .create(model, &covariance)
    .unwrap();
    assert_eq!(gem.state(), GemState::Initialized);
    assert_eq!(gem.step().unwrap(), GemState::Annealing { iteration: 1 });
    assert_eq!(gem.step().unwrap(), GemState::Annealing { iteration: 2 });
    assert_eq!(gem.step().unwrap(), GemState::Converged);
    assert_eq!(gem.step().unwrap(), GemState::Converged);
    assert_eq!(gem.loglik().len(), 3);

    // noise is annealed down to, but not yet at, the low floor
    let (_, noise, _) = gem.into_parts();
    let low = covariance.mean_power() / 10000.;
    let high = covariance.mean_power() / 100.;
    for ((&current, &low), &high) in noise.current().iter().zip(&low).zip(&high) {
        assert!(current > low && current < high);
    }
}

#[test]
fn annealing_schedule() {
    let noise = NoisePsd::constant(2, 100., 1., Annealing::Annealed);
    assert_approx_eq!(F, noise.current()[0], 100.);
    assert_approx_eq!(F, noise.scheduled(0, 10)[1], 100.);
    // interpolated in the square root domain
    assert_approx_eq!(F, noise.scheduled(5, 10)[0], 30.25, epsilon = 1e-12);
    assert_approx_eq!(F, noise.scheduled(10, 10)[0], 1., epsilon = 1e-12);

    let fixed = NoisePsd::constant(2, 100., 1., Annealing::Fixed);
    assert_approx_eq!(F, fixed.scheduled(0, 10)[0], 1.);
}

#[test]
fn mismatched_covariance() {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let model = ModelConfig::default().create(4, 4, &mut rng).unwrap();
    let power = Array2::ones((5, 4));
    let covariance = mixture(&[power], &[[1., 1.]]);
    assert!(GemConfig::default().create(model, &covariance).is_err());
}
