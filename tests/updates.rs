use fasst::{
    expectation, run_gem, update_mixing, update_spectral, Decorrelation, DiscreteStates, Error,
    Factor, FactorPart, Freedom, GemConfig, ModelConfig, ParametricModel, Part, SignalCovariance,
    SpatialComponent, SpectralComponent, StateKind, SufficientStatistics, TimeConstraint,
    UpdateRule, C, F,
};
use float_cmp::assert_approx_eq;
use ndarray::{arr2, Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_covariance(bins: usize, frames: usize, rng: &mut impl Rng) -> SignalCovariance {
    let x_ft = Array3::from_shape_simple_fn((bins, frames, 2), || {
        C::new(rng.random_range(-1.0..1.), rng.random_range(-1.0..1.))
    });
    SignalCovariance::from_spectrogram(x_ft.view()).unwrap()
}

fn assert_non_negative(model: &ParametricModel) {
    for component in model.spectral() {
        for factor in &component.factors {
            let parts = [
                &factor.freq_basis.value,
                &factor.freq_weights.value,
                &factor.time_weights.value,
            ];
            for part in parts.into_iter().chain(factor.time_basis.as_ref().map(|p| &p.value)) {
                assert!(part.iter().all(|&v| v >= 0. && v.is_finite()));
            }
        }
    }
}

#[test]
fn updates_stay_non_negative() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let (bins, frames) = (8, 12);
    let covariance = random_covariance(bins, frames, &mut rng);
    let mut model = ModelConfig {
        sources: 2,
        components: 3,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();

    let spatial = model.spectral()[1].spatial;
    let with_basis = Factor {
        freq_basis: Part::free(Array2::from_elem((bins, 2), 0.5)),
        freq_weights: Part::free(Array2::from_elem((2, 2), 1.)),
        time_weights: Part::free(Array2::from_elem((2, 3), 1.)),
        time_basis: Some(Part::free(Array2::from_shape_fn((3, frames), |(k, t)| {
            1. + ((k + t) % 3) as F
        }))),
        constraint: TimeConstraint::Nmf,
    };
    model
        .add_spectral(SpectralComponent::new(spatial, vec![with_basis]))
        .unwrap();
    let states = model.spectral()[0].factors[0].states();
    model.spectral_mut()[0].factors[0].constraint =
        TimeConstraint::Discrete(DiscreteStates::new(StateKind::Hmm, states));

    let (model, loglik) = run_gem(
        model,
        &covariance,
        GemConfig {
            iterations: 8,
            decorrelation: 0.5,
            ..GemConfig::default()
        },
    )
    .unwrap();
    assert_eq!(loglik.len(), 8);
    assert!(loglik.iter().all(|l| l.is_finite()));
    assert_non_negative(&model);

    // exactly one active state per frame
    let weights = &model.spectral()[0].factors[0].time_weights.value;
    for column in weights.columns() {
        assert!(column.iter().filter(|&&w| w > 0.).count() <= 1);
    }
}

#[test]
fn scaled_states_stay_non_negative() {
    let mut rng = ChaCha8Rng::seed_from_u64(12);
    let (bins, frames) = (6, 10);
    let covariance = random_covariance(bins, frames, &mut rng);
    for kind in [StateKind::Gmm, StateKind::Gsmm, StateKind::Shmm] {
        let model = ModelConfig {
            sources: 2,
            components: 3,
            states: Some(kind),
            ..ModelConfig::default()
        }
        .create(bins, frames, &mut rng)
        .unwrap();
        let (model, _) = run_gem(
            model,
            &covariance,
            GemConfig {
                iterations: 4,
                ..GemConfig::default()
            },
        )
        .unwrap();
        assert_non_negative(&model);
    }
}

#[test]
fn time_basis_with_states_is_rejected() {
    let (bins, frames) = (4, 6);
    let mut model = ParametricModel::new(bins, frames);
    let spatial = model
        .add_spatial(SpatialComponent::instantaneous(
            Array2::ones((2, 1)),
            Freedom::Free,
        ))
        .unwrap();
    let factor = Factor {
        time_weights: Part::free(Array2::ones((2, 3))),
        time_basis: Some(Part::free(Array2::ones((3, frames)))),
        constraint: TimeConstraint::Discrete(DiscreteStates::new(StateKind::Gmm, 2)),
        ..Factor::nmf(Array2::ones((bins, 2)), Array2::ones((2, frames)))
    };
    let err = model
        .add_spectral(SpectralComponent::new(spatial, vec![factor.clone()]))
        .unwrap_err();
    assert!(matches!(err, Error::IncompatibleConfiguration(_)));

    // constraints set after construction are caught by the update
    let nmf = Factor {
        constraint: TimeConstraint::Nmf,
        ..factor
    };
    model
        .add_spectral(SpectralComponent::new(spatial, vec![nmf]))
        .unwrap();
    model.spectral_mut()[0].factors[0].constraint =
        TimeConstraint::Discrete(DiscreteStates::new(StateKind::Gmm, 2));
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let covariance = random_covariance(bins, frames, &mut rng);
    let stats = expectation(
        &model,
        &covariance,
        Array1::from_elem(bins, 1e-3).view(),
        1e-10,
    )
    .unwrap();
    let err = update_spectral(
        &mut model,
        &stats.expected_power,
        UpdateRule {
            step_size: 1.,
            decorrelation: 0.,
            eps: 1e-10,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::IncompatibleConfiguration(_)));
}

#[test]
fn mismatched_dynamics_are_rejected() {
    let (bins, frames) = (4, 5);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut model = ModelConfig {
        sources: 1,
        components: 2,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();
    // Markov chain kind with priors
    model.spectral_mut()[0].factors[0].constraint = TimeConstraint::Discrete(DiscreteStates {
        kind: StateKind::Hmm,
        ..DiscreteStates::new(StateKind::Gmm, 2)
    });
    let covariance = random_covariance(bins, frames, &mut rng);
    let err = run_gem(model, &covariance, GemConfig::default()).unwrap_err();
    assert!(matches!(err, Error::IncompatibleConfiguration(_)));
}

#[test]
fn fixed_mixing_is_untouched() {
    let (bins, frames) = (5, 7);
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let mut model = ModelConfig {
        sources: 2,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();
    model.spatial_mut()[0].freedom = Freedom::Fixed;
    let fixed = model.spatial()[0].mixing.clone();
    let free = model.spatial()[1].mixing.clone();
    let covariance = random_covariance(bins, frames, &mut rng);
    let stats = expectation(
        &model,
        &covariance,
        Array1::from_elem(bins, 1e-2).view(),
        1e-10,
    )
    .unwrap();
    update_mixing(&mut model, &stats).unwrap();
    assert_eq!(model.spatial()[0].mixing, fixed);
    assert_ne!(model.spatial()[1].mixing, free);
}

#[test]
fn decorrelation_clips_all_but_the_frequency_basis() {
    let eps = 1e-10;
    let total = arr2(&[[2., 4.]]);
    let power = arr2(&[[1., 2.]]);
    let clipped = [FactorPart::FreqWeights, FactorPart::TimeWeights, FactorPart::TimeBasis];

    // a negative entry keeps the other powers unclipped
    let penalty = Decorrelation::from_powers(total.clone(), arr2(&[[-0.5, 1.]]), 0.5, eps);
    let (den, num) = penalty.terms(&power, FactorPart::FreqBasis, eps);
    assert_approx_eq!(F, den[(0, 0)], -0.0625);
    assert_approx_eq!(F, num[(0, 0)], -0.0625);
    assert_approx_eq!(F, den[(0, 1)], 0.03125);
    assert_approx_eq!(F, num[(0, 1)], 0.03125);
    for part in clipped {
        let (den, num) = penalty.terms(&power, part, eps);
        assert_approx_eq!(F, den[(0, 0)], 1.25e-11, epsilon = 1e-24);
        assert_approx_eq!(F, num[(0, 0)], 1.25e-11, epsilon = 1e-24);
        assert_approx_eq!(F, den[(0, 1)], 0.03125);
        assert_approx_eq!(F, num[(0, 1)], 0.03125);
    }

    // non-negative powers are clipped for every part
    let penalty = Decorrelation::from_powers(total, arr2(&[[0., 1.]]), 0.5, eps);
    for part in clipped.into_iter().chain([FactorPart::FreqBasis]) {
        let (den, _) = penalty.terms(&power, part, eps);
        assert_approx_eq!(F, den[(0, 0)], 1.25e-11, epsilon = 1e-24);
    }
}

#[test]
fn step_size_is_an_exponent() {
    let (bins, frames) = (3, 4);
    let mut model = ParametricModel::new(bins, frames);
    let spatial = model
        .add_spatial(SpatialComponent::instantaneous(
            arr2(&[[0.8], [0.6]]),
            Freedom::Free,
        ))
        .unwrap();
    let factor = Factor {
        freq_basis: Part::fixed(Array2::from_shape_fn((bins, 2), |(f, k)| {
            1. + ((f + k) % 3) as F * 0.5
        })),
        ..Factor::nmf(
            Array2::ones((bins, 2)),
            Array2::from_shape_fn((2, frames), |(k, t)| 0.5 + ((k * t) % 3) as F),
        )
    };
    model
        .add_spectral(SpectralComponent::new(spatial, vec![factor]))
        .unwrap();
    let expected = Array3::from_shape_fn((1, bins, frames), |(_, f, t)| {
        0.7 + ((f * t) % 5) as F * 0.3
    });
    let update = |step_size: F| {
        let mut model = model.clone();
        let rule = UpdateRule {
            step_size,
            decorrelation: 0.,
            eps: 1e-10,
        };
        update_spectral(&mut model, &expected, rule).unwrap();
        model.spectral()[0].factors[0].time_weights.value.clone()
    };
    let before = &model.spectral()[0].factors[0].time_weights.value;
    let full = update(1.);
    let half = update(0.5);
    assert_ne!(&full, before);
    for ((&half, &full), &before) in half.iter().zip(&full).zip(before) {
        assert_approx_eq!(F, half, before * (full / before).sqrt(), epsilon = 1e-12);
    }
}

#[test]
fn singular_statistics_name_the_bin() {
    let (bins, frames) = (3, 4);
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let covariance = random_covariance(bins, frames, &mut rng);
    let singular = SufficientStatistics {
        rxx: covariance.frame_mean(),
        rxs: Array3::zeros((bins, 2, 1)),
        rss: Array3::zeros((bins, 1, 1)),
        expected_power: Array3::zeros((1, bins, frames)),
        loglik: 0.,
    };
    let mut model = ModelConfig {
        sources: 1,
        spatial_rank: 1,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();

    // the instantaneous system is averaged over the bins
    let err = update_mixing(&mut model, &singular).unwrap_err();
    assert!(matches!(
        err,
        Error::SingularSufficientStatistics { bin: None }
    ));
    assert_eq!(
        err.to_string(),
        "singular sufficient statistics averaged over all bins"
    );

    model.make_convolutive();
    let err = update_mixing(&mut model, &singular).unwrap_err();
    assert!(matches!(
        err,
        Error::SingularSufficientStatistics { bin: Some(0) }
    ));
}
