use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::error::{Error, Result};
use crate::{C, F};

/// Invertible time-frequency representation of multichannel signals.
pub trait TimeFrequencyTransform {
    /// Number of frequency bins per frame.
    fn bins(&self) -> usize;

    /// Number of frames produced for a signal of `samples` samples.
    fn frames(&self, samples: usize) -> usize;

    /// Transforms a `channels x samples` signal into a
    /// `bins x frames x channels` spectrogram.
    fn forward(&self, signal: ArrayView2<F>) -> Result<Array3<C>>;

    /// Reconstructs a single channel of `samples` samples from a
    /// `bins x frames` spectrogram.
    fn inverse(&self, spectrogram: ArrayView2<C>, samples: usize) -> Result<Array1<F>>;

    /// Reconstructs every channel of a `bins x frames x channels`
    /// spectrogram.
    fn inverse_multi(&self, spectrogram: &Array3<C>, samples: usize) -> Result<Array2<F>> {
        let channels = spectrogram.dim().2;
        let mut out = Array2::zeros((channels, samples));
        for (channel, mut row) in out.rows_mut().into_iter().enumerate() {
            row.assign(&self.inverse(spectrogram.index_axis(Axis(2), channel), samples)?);
        }
        Ok(out)
    }
}

#[derive(SmartDefault, Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StftConfig {
    /// Window length in samples.
    #[default = 1024]
    pub window_length: usize,
    /// Hop size in samples, half the window if `None`.
    pub hop: Option<usize>,
}

impl StftConfig {
    pub fn create(self) -> Result<Stft> {
        Stft::new(self)
    }
}

/// Short-time Fourier transform with a sine window and weighted overlap-add
/// inversion.
#[derive(Clone)]
pub struct Stft {
    window: Array1<F>,
    hop: usize,
    forward: Arc<dyn RealToComplex<F>>,
    inverse: Arc<dyn ComplexToReal<F>>,
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft")
            .field("window_length", &self.window.len())
            .field("hop", &self.hop)
            .finish_non_exhaustive()
    }
}

impl Stft {
    pub fn new(config: StftConfig) -> Result<Self> {
        let wlen = config.window_length;
        let hop = config.hop.unwrap_or(wlen / 2);
        if wlen < 2 || hop == 0 || hop > wlen {
            return Err(Error::IncompatibleConfiguration(format!(
                "window length {wlen} with hop {hop}"
            )));
        }
        let window = Array1::from_iter((0..wlen).map(|i| ((i as F + 0.5) / wlen as F * PI).sin()));
        let mut planner = RealFftPlanner::<F>::new();
        Ok(Self {
            window,
            hop,
            forward: planner.plan_fft_forward(wlen),
            inverse: planner.plan_fft_inverse(wlen),
        })
    }

    #[must_use]
    pub fn window_length(&self) -> usize {
        self.window.len()
    }

    #[must_use]
    pub fn hop(&self) -> usize {
        self.hop
    }

    fn padding(&self) -> usize {
        self.window_length() - self.hop
    }

    fn forward_channel(&self, signal: ArrayView1<F>, mut out: ArrayViewMut2<C>) -> Result<()> {
        let wlen = self.window_length();
        let pad = self.padding();
        let frames = self.frames(signal.len());
        let mut padded = Array1::zeros((frames - 1) * self.hop + wlen);
        padded
            .slice_mut(s![pad..pad + signal.len()])
            .assign(&signal);
        let mut spectrum = self.forward.make_output_vec();
        for (t, mut column) in out.columns_mut().into_iter().enumerate() {
            let frame = padded.slice(s![t * self.hop..t * self.hop + wlen]);
            let mut frame = (&frame * &self.window).to_vec();
            self.forward.process(&mut frame, &mut spectrum)?;
            column.assign(&ArrayView1::from(&spectrum));
        }
        Ok(())
    }
}

impl TimeFrequencyTransform for Stft {
    fn bins(&self) -> usize {
        self.window_length() / 2 + 1
    }

    fn frames(&self, samples: usize) -> usize {
        (samples + 2 * self.padding())
            .saturating_sub(self.window_length())
            .div_ceil(self.hop)
            + 1
    }

    fn forward(&self, signal: ArrayView2<F>) -> Result<Array3<C>> {
        let frames = self.frames(signal.ncols());
        let mut x_ft = Array3::zeros((self.bins(), frames, signal.nrows()));
        for (channel, samples) in signal.rows().into_iter().enumerate() {
            self.forward_channel(samples, x_ft.index_axis_mut(Axis(2), channel))?;
        }
        Ok(x_ft)
    }

    fn inverse(&self, spectrogram: ArrayView2<C>, samples: usize) -> Result<Array1<F>> {
        let wlen = self.window_length();
        let frames = spectrogram.ncols();
        if spectrogram.nrows() != self.bins() {
            return Err(Error::ShapeMismatch {
                what: "spectrogram bins",
                expected: vec![self.bins()],
                actual: vec![spectrogram.nrows()],
            });
        }
        let length = frames.saturating_sub(1) * self.hop + wlen;
        let mut signal = Array1::<F>::zeros(length);
        let mut norm = Array1::<F>::zeros(length);
        let mut frame = self.inverse.make_output_vec();
        let last = self.bins() - 1;
        for (t, column) in spectrogram.columns().into_iter().enumerate() {
            let mut spectrum = column.to_vec();
            spectrum[0].im = 0.;
            if wlen % 2 == 0 {
                spectrum[last].im = 0.;
            }
            self.inverse.process(&mut spectrum, &mut frame)?;
            let range = s![t * self.hop..t * self.hop + wlen];
            let mut target = signal.slice_mut(range);
            for ((s, &w), &v) in target.iter_mut().zip(&self.window).zip(&frame) {
                *s += w * v / wlen as F;
            }
            norm.slice_mut(range)
                .zip_mut_with(&self.window, |n, &w| *n += w * w);
        }
        signal.zip_mut_with(&norm, |s, &n| {
            if n > 1e-10 {
                *s /= n;
            }
        });
        let pad = self.padding();
        let end = (pad + samples).min(length);
        let mut out = Array1::zeros(samples);
        if end > pad {
            out.slice_mut(s![..end - pad])
                .assign(&signal.slice(s![pad..end]));
        }
        Ok(out)
    }
}
