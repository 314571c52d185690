use fasst::sparsity::{mask, max_states, reweight, sigma};
use fasst::{ModelConfig, F};
use float_cmp::assert_approx_eq;
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[test]
fn sigma_schedule() {
    assert_approx_eq!(F, sigma(0, 10, 6), 36., epsilon = 1e-9);
    assert_approx_eq!(F, sigma(9, 10, 6), 9., epsilon = 1e-9);
    // geometric
    assert_approx_eq!(F, sigma(3, 7, 6), 18., epsilon = 1e-9);
}

#[test]
fn background_row_passes() {
    let mask = mask(4, &[1., 2.], 1.);
    let half = (-0.5_f64).exp();
    let expected = [[half, (-2_f64).exp()], [1., half], [half, 1.], [1., 1.]];
    for (row, expected) in mask.rows().into_iter().zip(expected) {
        for (&actual, expected) in row.iter().zip(expected) {
            assert_approx_eq!(F, actual, expected, epsilon = 1e-12);
        }
    }
}

#[test]
fn reweighting_only_where_enabled() {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    let (bins, frames) = (4, 9);
    let mut model = ModelConfig {
        sources: 2,
        components: 5,
        ..ModelConfig::default()
    }
    .create(bins, frames, &mut rng)
    .unwrap();
    assert_eq!(max_states(&model), 5);
    for component in model.spectral_mut() {
        component.factors[0].time_weights.value = Array2::ones((5, frames));
    }
    model.spectral_mut()[0].sparsity = Some(3);
    reweight(&mut model, 4., 1e-10);

    let sparse = &model.spectral()[0].factors[0].time_weights.value;
    assert!(sparse.row(4).iter().all(|&w| (w - 1.).abs() < 1e-12));
    assert!(sparse.iter().all(|&w| w > 0. && w <= 1. + 1e-12));
    assert!(sparse.iter().any(|&w| w < 1.));
    let untouched = &model.spectral()[1].factors[0].time_weights.value;
    assert!(untouched.iter().all(|&w| w == 1.));
}
