//! Eigensolver selection and iteration parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};
use crate::solver::{
    AlectonParams, PowerIterationParams, SgdParams, Solver, VarianceReducedParams,
};

/// Name of an eigensolver, as written in TOML or on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverMode {
    /// Deterministic power iteration with optional momentum.
    #[default]
    #[serde(alias = "pi")]
    PowerIteration,
    /// Stochastic power iteration on sampled entries.
    Alecton,
    /// Variance-reduced stochastic power iteration.
    #[serde(alias = "vr")]
    VarianceReduced,
    /// Biased stochastic gradient steps.
    Sgd,
}

impl SolverMode {
    /// Returns all solver modes.
    pub fn all() -> &'static [SolverMode] {
        &[
            SolverMode::PowerIteration,
            SolverMode::Alecton,
            SolverMode::VarianceReduced,
            SolverMode::Sgd,
        ]
    }

    /// Returns the canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverMode::PowerIteration => "power-iteration",
            SolverMode::Alecton => "alecton",
            SolverMode::VarianceReduced => "variance-reduced",
            SolverMode::Sgd => "sgd",
        }
    }
}

impl fmt::Display for SolverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolverMode {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "power-iteration" | "pi" => Ok(SolverMode::PowerIteration),
            "alecton" => Ok(SolverMode::Alecton),
            "variance-reduced" | "vr" => Ok(SolverMode::VarianceReduced),
            "sgd" => Ok(SolverMode::Sgd),
            other => Err(EmbedError::invalid_configuration(format!(
                "unknown solver '{}'. Valid names: {:?}",
                other,
                SolverMode::all().iter().map(|m| m.as_str()).collect::<Vec<_>>()
            ))),
        }
    }
}

/// Configuration for the eigensolver.
///
/// Not every field applies to every mode: `eta` is read by Alecton and SGD,
/// `batch` by the three stochastic modes, `inner_loop` by variance-reduced,
/// and `momentum` by power iteration and variance-reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Which solver to run.
    #[serde(default)]
    pub mode: SolverMode,

    /// Number of iterations (outer iterations for variance-reduced).
    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Step size for the gradient-style solvers.
    #[serde(default = "default_eta")]
    pub eta: f64,

    /// Weight of the previous iterate. 0 disables the momentum buffer.
    #[serde(default)]
    pub momentum: f64,

    /// Orthonormalize every `norm_freq` steps. Must be >= 1.
    #[serde(default = "default_norm_freq")]
    pub norm_freq: i64,

    /// Sampled nonzero entries per stochastic step.
    #[serde(default = "default_batch")]
    pub batch: usize,

    /// Stochastic steps per anchor for variance-reduced.
    #[serde(default = "default_inner_loop")]
    pub inner_loop: usize,

    /// Seed for batch sampling.
    #[serde(default)]
    pub seed: u64,
}

fn default_iterations() -> usize {
    50
}

fn default_eta() -> f64 {
    1e-3
}

fn default_norm_freq() -> i64 {
    1
}

fn default_batch() -> usize {
    100_000
}

fn default_inner_loop() -> usize {
    10
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            mode: SolverMode::default(),
            iterations: default_iterations(),
            eta: default_eta(),
            momentum: 0.0,
            norm_freq: default_norm_freq(),
            batch: default_batch(),
            inner_loop: default_inner_loop(),
            seed: 0,
        }
    }
}

impl SolverConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// - `EmbedError::InvalidConfiguration` if norm_freq < 1
    /// - `EmbedError::InvalidConfiguration` if batch or inner_loop is 0
    /// - `EmbedError::InvalidConfiguration` if eta or momentum is not finite
    pub fn validate(&self) -> EmbedResult<()> {
        if self.norm_freq < 1 {
            return Err(EmbedError::invalid_parameter(
                "norm_freq",
                self.norm_freq,
                "must be a positive integer",
            ));
        }
        if self.batch == 0 {
            return Err(EmbedError::invalid_parameter("batch", self.batch, "must be > 0"));
        }
        if self.inner_loop == 0 {
            return Err(EmbedError::invalid_parameter(
                "inner_loop",
                self.inner_loop,
                "must be > 0",
            ));
        }
        if !self.eta.is_finite() {
            return Err(EmbedError::invalid_parameter("eta", self.eta, "must be finite"));
        }
        if !self.momentum.is_finite() {
            return Err(EmbedError::invalid_parameter(
                "momentum",
                self.momentum,
                "must be finite",
            ));
        }
        Ok(())
    }

    /// Build the solver variant selected by `mode`, carrying only its own
    /// parameters.
    ///
    /// # Errors
    /// Same as [`SolverConfig::validate`].
    pub fn to_solver(&self) -> EmbedResult<Solver> {
        self.validate()?;
        // validate() guarantees norm_freq >= 1
        let norm_freq = self.norm_freq as usize;
        let solver = match self.mode {
            SolverMode::PowerIteration => Solver::PowerIteration(PowerIterationParams {
                iterations: self.iterations,
                momentum: self.momentum,
                norm_freq,
            }),
            SolverMode::Alecton => Solver::Alecton(AlectonParams {
                iterations: self.iterations,
                eta: self.eta,
                norm_freq,
                batch: self.batch,
                seed: self.seed,
            }),
            SolverMode::VarianceReduced => Solver::VarianceReduced(VarianceReducedParams {
                iterations: self.iterations,
                momentum: self.momentum,
                norm_freq,
                batch: self.batch,
                inner_loop: self.inner_loop,
                seed: self.seed,
            }),
            SolverMode::Sgd => Solver::Sgd(SgdParams {
                iterations: self.iterations,
                eta: self.eta,
                norm_freq,
                batch: self.batch,
                seed: self.seed,
            }),
        };
        Ok(solver)
    }
}
