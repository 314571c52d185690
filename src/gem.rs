//! Generalized EM driver alternating the E-step with the mixing and spectral
//! M-steps.
#![allow(clippy::module_name_repetitions)]
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::covariance::{Annealing, NoisePsd, SignalCovariance};
use crate::error::{check_shape, Error, Result};
use crate::estimator::expectation;
use crate::mixing::update_mixing;
use crate::model::ParametricModel;
use crate::normalize::renormalize;
use crate::sparsity::{max_states, reweight, sigma};
use crate::spectral::{update_spectral, UpdateRule};
use crate::F;

#[derive(SmartDefault, Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GemConfig {
    #[default = 50]
    pub iterations: usize,
    pub annealing: Annealing,
    /// Noise power every bin starts annealing from, `mean power / 100` if
    /// unset.
    pub noise_high: Option<F>,
    /// Final noise power, `mean power / 10000` if unset.
    pub noise_low: Option<F>,
    /// Exponent of the multiplicative update ratios.
    #[default = 1.0]
    pub step_size: F,
    /// Weight of the penalty on correlated spatial components.
    pub decorrelation: F,
    #[default = 1e-10]
    pub epsilon: F,
    /// Seed of the factor reinitialization.
    pub seed: u64,
}

impl GemConfig {
    /// Prepares the estimation of `model` on `covariance`, with noise floors
    /// derived from the mixture where not configured.
    pub fn create(self, model: ParametricModel, covariance: &SignalCovariance) -> Result<Gem<'_>> {
        let noise = NoisePsd::estimate(covariance, self.noise_high, self.noise_low, self.annealing);
        Gem::new(model, covariance, noise, self)
    }

    fn rule(&self) -> UpdateRule {
        UpdateRule {
            step_size: self.step_size,
            decorrelation: self.decorrelation,
            eps: self.epsilon,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GemState {
    Initialized,
    /// `iteration` iterations are done.
    Annealing { iteration: usize },
    Converged,
}

/// Estimation in progress, advanced one iteration at a time by
/// [`Gem::step`].
#[derive(Debug)]
pub struct Gem<'a> {
    model: ParametricModel,
    covariance: &'a SignalCovariance,
    noise: NoisePsd,
    config: GemConfig,
    rng: ChaCha8Rng,
    state: GemState,
    loglik: Vec<F>,
}

impl<'a> Gem<'a> {
    /// # Errors
    /// [`Error::ShapeMismatch`] if model, covariance and noise disagree on
    /// their dimensions, [`Error::IncompatibleConfiguration`] for a model
    /// without components.
    pub fn new(
        model: ParametricModel,
        covariance: &'a SignalCovariance,
        noise: NoisePsd,
        config: GemConfig,
    ) -> Result<Self> {
        check_shape(
            "signal covariance",
            &[model.bins(), model.frames()],
            &[covariance.bins(), covariance.frames()],
        )?;
        check_shape("noise", &[model.bins()], noise.current().shape())?;
        if model.spatial().is_empty() || model.spectral().is_empty() {
            return Err(Error::IncompatibleConfiguration(
                "model needs at least one spatial and one spectral component".into(),
            ));
        }
        Ok(Self {
            model,
            covariance,
            noise,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            state: GemState::Initialized,
            loglik: Vec::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> GemState {
        self.state
    }

    #[must_use]
    pub fn model(&self) -> &ParametricModel {
        &self.model
    }

    /// Noise of the last iteration.
    #[must_use]
    pub fn noise(&self) -> &NoisePsd {
        &self.noise
    }

    /// Log-likelihood of every finished iteration.
    #[must_use]
    pub fn loglik(&self) -> &[F] {
        &self.loglik
    }

    /// Runs one iteration unless all are done.
    pub fn step(&mut self) -> Result<GemState> {
        let iterations = self.config.iterations;
        let iteration = match self.state {
            GemState::Initialized => {
                info!(
                    "estimating {} spatial and {} spectral components over {iterations} iterations",
                    self.model.spatial().len(),
                    self.model.spectral().len()
                );
                0
            }
            GemState::Annealing { iteration } => iteration,
            GemState::Converged => return Ok(GemState::Converged),
        };
        if iteration >= iterations {
            self.state = GemState::Converged;
            return Ok(self.state);
        }
        let eps = self.config.epsilon;

        self.noise.anneal(iteration, iterations);
        let stats = expectation(&self.model, self.covariance, self.noise.current(), eps)?;
        update_mixing(&mut self.model, &stats)?;
        update_spectral(&mut self.model, &stats.expected_power, self.config.rule())?;
        if self.model.spectral().iter().any(|c| c.sparsity.is_some()) {
            let sigma = sigma(iteration, iterations, max_states(&self.model));
            reweight(&mut self.model, sigma, eps);
        }
        renormalize(&mut self.model, eps, &mut self.rng);

        match self.loglik.last() {
            Some(&previous) => {
                let improvement = stats.loglik - previous;
                debug!(
                    "iteration {}/{iterations}: loglik {} ({improvement:+e})",
                    iteration + 1,
                    stats.loglik
                );
                if improvement < 0. && self.noise.annealing() == Annealing::Fixed {
                    warn!(
                        "loglik decreased by {} in iteration {}",
                        -improvement,
                        iteration + 1
                    );
                }
            }
            None => debug!("iteration 1/{iterations}: loglik {}", stats.loglik),
        }
        self.loglik.push(stats.loglik);

        self.state = if iteration + 1 == iterations {
            info!("estimation finished with loglik {}", stats.loglik);
            GemState::Converged
        } else {
            GemState::Annealing {
                iteration: iteration + 1,
            }
        };
        Ok(self.state)
    }

    /// Runs the remaining iterations.
    pub fn run(&mut self) -> Result<()> {
        while self.step()? != GemState::Converged {}
        Ok(())
    }

    /// The estimated model, the noise of the last iteration and the
    /// log-likelihood trace.
    #[must_use]
    pub fn into_parts(self) -> (ParametricModel, NoisePsd, Vec<F>) {
        (self.model, self.noise, self.loglik)
    }
}

/// Estimates `model` on `covariance` with all of `config.iterations`.
///
/// Returns the model and the log-likelihood of every iteration.
pub fn run_gem(
    model: ParametricModel,
    covariance: &SignalCovariance,
    config: GemConfig,
) -> Result<(ParametricModel, Vec<F>)> {
    let mut gem = config.create(model, covariance)?;
    gem.run()?;
    let (model, _, loglik) = gem.into_parts();
    Ok((model, loglik))
}
