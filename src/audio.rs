use std::iter;
#[cfg(feature = "wav")]
use std::path::Path;

#[cfg(feature = "wav")]
pub use hound::SampleFormat as WavFormat;
use derive_more::Constructor;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};

use crate::F;

/// Multichannel signal, one row per channel.
#[must_use]
#[derive(Clone, Debug, PartialEq, Constructor)]
pub struct Audio {
    pub(crate) sample_rate: F,
    pub(crate) data: Array2<F>,
}

impl Audio {
    #[must_use]
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    #[must_use]
    pub fn samples(&self) -> usize {
        self.data.dim().1
    }

    #[must_use]
    pub fn sample_rate(&self) -> F {
        self.sample_rate
    }

    /// `channels x samples`
    #[must_use]
    pub fn data(&self) -> ArrayView2<'_, F> {
        self.data.view()
    }

    #[cfg(feature = "wav")]
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        use std::fs::File;
        let file = File::open(path).map_err(hound::Error::IoError)?;
        Self::from_wav(std::io::BufReader::new(file))
    }

    #[cfg(feature = "wav")]
    pub fn from_wav<R: std::io::Read>(data: R) -> crate::Result<Self> {
        let reader = hound::WavReader::new(data)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map_ok(F::from)
                .collect::<Result<Vec<F>, _>>()?,
            hound::SampleFormat::Int => reader
                .into_samples::<i32>()
                .map_ok(normalize_pcm_wav(spec.bits_per_sample))
                .collect::<Result<Vec<F>, _>>()?,
        };
        Ok(Self::from_interleaved(
            F::from(spec.sample_rate),
            spec.channels.into(),
            samples,
        ))
    }

    pub fn from_interleaved(
        sample_rate: F,
        channels: usize,
        data: impl IntoIterator<Item = impl Into<F>>,
    ) -> Self {
        let data = data.into_iter().map_into::<F>().collect_vec();
        let channels = channels.max(1);
        Self {
            sample_rate,
            data: Array2::from_shape_fn((channels, data.len() / channels), |(c, s)| {
                data[c + s * channels]
            }),
        }
    }

    pub fn from_channels(
        sample_rate: F,
        channels: impl IntoIterator<Item = impl IntoIterator<Item = impl Into<F>>>,
    ) -> Self {
        let mut channels = channels
            .into_iter()
            .map(IntoIterator::into_iter)
            .collect_vec();
        let count = channels.len();
        let mut channel = count.saturating_sub(1);
        Self::from_interleaved(
            sample_rate,
            count,
            iter::from_fn(|| {
                channel = (channel + 1) % count;
                channels[channel].next()
            }),
        )
    }

    pub fn to_interleaved(&self) -> impl Iterator<Item = F> + '_ {
        self.data.t().into_iter().copied()
    }

    /// Encodes as a wav file.
    ///
    /// Integer formats are quantized with clipping to `[-1, 1]`.
    #[cfg(feature = "wav")]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn wav(&self, sample_format: WavFormat, bits_per_sample: u16) -> crate::Result<Vec<u8>> {
        use std::io::Cursor;

        let spec = hound::WavSpec {
            channels: u16::try_from(self.channels()).unwrap_or(u16::MAX),
            sample_rate: self.sample_rate as u32,
            bits_per_sample,
            sample_format,
        };

        let mut out = Vec::new();
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)?;

        match sample_format {
            hound::SampleFormat::Float => {
                for sample in self.to_interleaved() {
                    writer.write_sample(sample as f32)?;
                }
            }
            hound::SampleFormat::Int => {
                let scale = 2f64.powi(i32::from(bits_per_sample.clamp(2, 32)) - 1) - 1.;
                for sample in self.to_interleaved() {
                    writer.write_sample((sample.clamp(-1., 1.) * scale).round() as i32)?;
                }
            }
        }
        writer.finalize()?;
        Ok(out)
    }

    /// Writes a 16 bit integer wav file.
    #[cfg(feature = "wav")]
    pub fn write(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        std::fs::write(path, self.wav(WavFormat::Int, 16)?).map_err(hound::Error::IoError)?;
        Ok(())
    }
}

/// Maps signed integer samples to `[-1, 1)`.
#[cfg(feature = "wav")]
fn normalize_pcm_wav(bits_per_sample: u16) -> impl Fn(i32) -> F {
    let full_scale = 2f64.powi(i32::from(bits_per_sample.clamp(1, 32)) - 1);
    move |s: i32| F::from(s) / full_scale
}
