//! Observed second order statistics and the noise floor added to the model.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis, Ix1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{check_shape, Error, Result};
use crate::hermitian::Hermitian;
use crate::{C, F};

/// Per bin and frame statistics of a stereo mixture.
///
/// Only the upper triangle is kept: the two auto powers and the cross
/// spectrum `x0 * conj(x1)`.
#[derive(Clone, Debug)]
pub struct SignalCovariance {
    cx00: Array2<F>,
    cx11: Array2<F>,
    cx01: Array2<C>,
}

impl SignalCovariance {
    /// Computes the statistics from a `bins x frames x channels` spectrogram.
    pub fn from_spectrogram(x_ft: ArrayView3<C>) -> Result<Self> {
        let channels = x_ft.dim().2;
        if channels != 2 {
            return Err(Error::UnsupportedChannelCount(channels));
        }
        let x0 = x_ft.index_axis(Axis(2), 0);
        let x1 = x_ft.index_axis(Axis(2), 1);
        Ok(Self {
            cx00: x0.mapv(|c| c.norm_sqr()),
            cx11: x1.mapv(|c| c.norm_sqr()),
            cx01: Zip::from(&x0).and(&x1).map_collect(|&a, &b| a * b.conj()),
        })
    }

    /// Builds the statistics from already computed parts.
    pub fn from_parts(cx00: Array2<F>, cx11: Array2<F>, cx01: Array2<C>) -> Result<Self> {
        check_shape("cx11", cx00.shape(), cx11.shape())?;
        check_shape("cx01", cx00.shape(), cx01.shape())?;
        Ok(Self { cx00, cx11, cx01 })
    }

    #[must_use]
    pub fn bins(&self) -> usize {
        self.cx00.nrows()
    }

    #[must_use]
    pub fn frames(&self) -> usize {
        self.cx00.ncols()
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        2
    }

    #[must_use]
    pub fn cx00(&self) -> ArrayView2<'_, F> {
        self.cx00.view()
    }

    #[must_use]
    pub fn cx11(&self) -> ArrayView2<'_, F> {
        self.cx11.view()
    }

    #[must_use]
    pub fn cx01(&self) -> ArrayView2<'_, C> {
        self.cx01.view()
    }

    /// Power averaged over both channels, `bins x frames`.
    #[must_use]
    pub fn channel_average(&self) -> Array2<F> {
        (&self.cx00 + &self.cx11) / 2.
    }

    /// Average power per bin over frames and channels.
    #[must_use]
    pub fn mean_power(&self) -> Array1<F> {
        self.channel_average()
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.bins()))
    }

    /// Statistics averaged over the frames, one matrix per bin.
    #[must_use]
    pub fn frame_mean(&self) -> Hermitian<Ix1> {
        let bins = self.bins();
        Hermitian {
            diag0: self
                .cx00
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(bins)),
            diag1: self
                .cx11
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(bins)),
            off: self
                .cx01
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(bins)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Annealing {
    /// Noise goes from the high floor down to the low floor.
    #[default]
    Annealed,
    /// Noise stays at the low floor.
    Fixed,
}

/// Isotropic noise power per bin, annealed over the GEM iterations.
#[derive(Clone, Debug)]
pub struct NoisePsd {
    high: Array1<F>,
    low: Array1<F>,
    annealing: Annealing,
    current: Array1<F>,
}

impl NoisePsd {
    pub fn new(high: Array1<F>, low: Array1<F>, annealing: Annealing) -> Result<Self> {
        check_shape("noise floor", high.shape(), low.shape())?;
        let current = match annealing {
            Annealing::Annealed => high.clone(),
            Annealing::Fixed => low.clone(),
        };
        Ok(Self {
            high,
            low,
            annealing,
            current,
        })
    }

    /// Same floor for every bin.
    #[must_use]
    pub fn constant(bins: usize, high: F, low: F, annealing: Annealing) -> Self {
        let current = match annealing {
            Annealing::Annealed => high,
            Annealing::Fixed => low,
        };
        Self {
            high: Array1::from_elem(bins, high),
            low: Array1::from_elem(bins, low),
            annealing,
            current: Array1::from_elem(bins, current),
        }
    }

    /// Floors derived from the mean mixture power, missing ones are
    /// `power / 100` (high) and `power / 10000` (low).
    #[must_use]
    pub fn estimate(
        covariance: &SignalCovariance,
        high: Option<F>,
        low: Option<F>,
        annealing: Annealing,
    ) -> Self {
        let power = covariance.mean_power();
        let bins = power.len();
        let high = high.map_or_else(|| &power / 100., |h| Array1::from_elem(bins, h));
        let low = low.map_or_else(|| &power / 10000., |l| Array1::from_elem(bins, l));
        let current = match annealing {
            Annealing::Annealed => high.clone(),
            Annealing::Fixed => low.clone(),
        };
        Self {
            high,
            low,
            annealing,
            current,
        }
    }

    #[must_use]
    pub fn annealing(&self) -> Annealing {
        self.annealing
    }

    #[must_use]
    pub fn current(&self) -> ArrayView1<'_, F> {
        self.current.view()
    }

    /// Noise for `iteration` out of `iterations`, interpolated in the
    /// square root domain.
    #[must_use]
    pub fn scheduled(&self, iteration: usize, iterations: usize) -> Array1<F> {
        match self.annealing {
            Annealing::Fixed => self.low.clone(),
            Annealing::Annealed => {
                let n = iterations.max(1) as F;
                let i = iteration as F;
                Zip::from(&self.high)
                    .and(&self.low)
                    .map_collect(|&high, &low| {
                        ((high.sqrt() * (n - i) + low.sqrt() * i) / n).powi(2)
                    })
            }
        }
    }

    /// Moves the current noise to the scheduled value.
    pub fn anneal(&mut self, iteration: usize, iterations: usize) {
        self.current = self.scheduled(iteration, iterations);
    }
}
