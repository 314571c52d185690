use fasst::nmf::{initialize_with_nmf, is_nmf, NmfInit};
use fasst::{Error, Factor, ModelConfig, SignalCovariance, C, F};
use float_cmp::assert_approx_eq;
use ndarray::{arr1, Array2, Zip};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn rank_one() -> Array2<F> {
    let w = arr1(&[1., 3., 0.5, 2.]);
    let h = arr1(&[2., 1., 4., 0.5, 1.5]);
    Array2::from_shape_fn((4, 5), |(f, t)| w[f] * h[t])
}

#[test]
fn fits_rank_one_power() {
    let power = rank_one();
    let (basis, weights) = is_nmf(
        power.view(),
        Array2::from_elem((4, 1), 1.),
        Array2::from_elem((1, 5), 1.),
        5,
        (true, true),
        1e-12,
    );
    assert_approx_eq!(F, basis.sum(), 1., epsilon = 1e-12);
    let estimate = basis.dot(&weights);
    for (e, p) in estimate.iter().zip(&power) {
        assert_approx_eq!(F, *e, *p, epsilon = 1e-9 * p);
    }
}

#[test]
fn fixed_parts_stay() {
    let power = rank_one();
    let basis = Array2::from_elem((4, 2), 0.25);
    let (fitted, _) = is_nmf(
        power.view(),
        basis.clone(),
        Array2::ones((2, 5)),
        3,
        (false, true),
        1e-12,
    );
    assert_eq!(fitted, basis);
}

fn covariance(power: &Array2<F>) -> SignalCovariance {
    SignalCovariance::from_parts(
        power.clone(),
        power * 0.5,
        Zip::from(power).map_collect(|&p| C::new(0.3 * p, 0.1 * p)),
    )
    .unwrap()
}

#[test]
fn initialization_keeps_shapes() {
    let power = rank_one();
    for init in [NmfInit::Individual, NmfInit::Same] {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut model = ModelConfig {
            sources: 2,
            components: 2,
            ..ModelConfig::default()
        }
        .create(4, 5, &mut rng)
        .unwrap();
        initialize_with_nmf(&mut model, &covariance(&power), init, 20, 1e-10, &mut rng).unwrap();
        for component in model.spectral() {
            let factor = &component.factors[0];
            assert_eq!(factor.freq_basis.value.dim(), (4, 2));
            assert_eq!(factor.time_weights.value.dim(), (2, 5));
            assert!(factor.freq_basis.value.iter().all(|&v| v >= 0.));
            assert!(factor.time_weights.value.iter().all(|&v| v >= 0.));
        }
    }
}

#[test]
fn same_needs_single_factor() {
    let power = rank_one();
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut model = ModelConfig {
        sources: 1,
        components: 2,
        ..ModelConfig::default()
    }
    .create(4, 5, &mut rng)
    .unwrap();
    let extra = Factor::nmf(Array2::ones((4, 1)), Array2::ones((1, 5)));
    model.spectral_mut()[0].factors.push(extra);
    assert!(matches!(
        initialize_with_nmf(&mut model, &covariance(&power), NmfInit::Same, 5, 1e-10, &mut rng),
        Err(Error::IncompatibleConfiguration(_))
    ));
    // a model of a different size
    assert!(matches!(
        initialize_with_nmf(
            &mut model,
            &covariance(&Array2::ones((3, 5))),
            NmfInit::Individual,
            5,
            1e-10,
            &mut rng
        ),
        Err(Error::ShapeMismatch { .. })
    ));
}
