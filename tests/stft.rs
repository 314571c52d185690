use fasst::{Error, StftConfig, TimeFrequencyTransform, F};
use float_cmp::assert_approx_eq;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for (window_length, hop, samples) in [(256, None, 1000), (64, Some(16), 333), (16, None, 5)] {
        let stft = StftConfig { window_length, hop }.create().unwrap();
        let signal = Array2::from_shape_simple_fn((2, samples), || rng.random_range(-1.0..1.));
        let x_ft = stft.forward(signal.view()).unwrap();
        assert_eq!(
            x_ft.dim(),
            (window_length / 2 + 1, stft.frames(samples), 2)
        );
        let restored = stft.inverse_multi(&x_ft, samples).unwrap();
        assert_eq!(restored.dim(), signal.dim());
        for (a, b) in restored.iter().zip(&signal) {
            assert_approx_eq!(F, *a, *b, epsilon = 1e-9);
        }
    }
}

#[test]
fn frame_count() {
    let stft = StftConfig {
        window_length: 8,
        hop: None,
    }
    .create()
    .unwrap();
    assert_eq!(stft.hop(), 4);
    assert_eq!(stft.bins(), 5);
    // padded by window - hop on both sides
    assert_eq!(stft.frames(0), 1);
    assert_eq!(stft.frames(8), 3);
    assert_eq!(stft.frames(9), 4);
}

#[test]
fn invalid_configuration() {
    for (window_length, hop) in [(1, None), (8, Some(0)), (8, Some(9))] {
        assert!(matches!(
            StftConfig { window_length, hop }.create(),
            Err(Error::IncompatibleConfiguration(_))
        ));
    }
}

#[test]
fn wrong_bin_count() {
    let stft = StftConfig::default().create().unwrap();
    let spectrogram = Array2::zeros((10, 3));
    assert!(matches!(
        stft.inverse(spectrogram.view(), 100),
        Err(Error::ShapeMismatch { .. })
    ));
}
