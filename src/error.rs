//! Error types for model estimation and separation.

use thiserror::Error;

/// Errors raised while building, estimating or applying a model.
#[derive(Error, Debug)]
pub enum Error {
    /// The closed-form estimation is only implemented for stereo input.
    #[error("unsupported channel count {0}, only 2 channels are supported")]
    UnsupportedChannelCount(usize),

    /// The expected sub-source correlation is not invertible, at a single
    /// bin or, for `None`, averaged over all bins.
    #[error(
        "singular sufficient statistics {}",
        bin.map_or_else(
            || "averaged over all bins".to_owned(),
            |bin| format!("at frequency bin {bin}")
        )
    )]
    SingularSufficientStatistics { bin: Option<usize> },

    /// A covariance that has to be strictly non-singular has a zero determinant.
    #[error("ill-conditioned covariance at frequency bin {bin}, channels are identical or colinear")]
    IllConditionedCovariance { bin: usize },

    /// Two settings of the model can not be combined.
    #[error("incompatible configuration: {0}")]
    IncompatibleConfiguration(String),

    /// Array dimensions do not agree.
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An index does not refer to an existing component.
    #[error("no {kind} component with index {index}")]
    UnknownComponent { kind: &'static str, index: usize },

    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),

    #[cfg(feature = "wav")]
    #[error("wav i/o failed: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn check_shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
