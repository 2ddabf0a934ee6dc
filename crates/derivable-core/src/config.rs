//! Runtime configuration for derivative construction.
//!
//! A process-wide default is available through [`default_config`]; custom
//! configurations are assembled with [`DeriveConfigBuilder`], which checks
//! every value before handing out a [`DeriveConfig`].

use crate::error::{Error, Result};
use crate::guard::GuardedExecutor;
use crate::shape::{ShapeProbe, DEFAULT_MAX_PROBE, DEFAULT_PROBE_SEED};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Settings shared by the dispatcher and the symbolic builder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeriveConfig {
    /// Deadline for symbolic derivation.
    pub timeout: Duration,
    /// Log start, finish and timeout of guarded work.
    pub verbose: bool,
    /// Evaluate compiled symbolic outputs in parallel.
    pub parallel: bool,
    /// Largest vector length tried during shape probing.
    pub max_probe: usize,
    /// Seed of the random probe inputs.
    pub probe_seed: u64,
    /// Evaluate the function once on the declared input shape before
    /// symbolic derivation.
    pub validate_input: bool,
    /// Finite-difference step; `None` picks a step from machine epsilon.
    pub fd_step: Option<f64>,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            timeout: GuardedExecutor::DEFAULT_TIMEOUT,
            verbose: false,
            parallel: false,
            max_probe: DEFAULT_MAX_PROBE,
            probe_seed: DEFAULT_PROBE_SEED,
            validate_input: true,
            fd_step: None,
        }
    }
}

impl DeriveConfig {
    /// Starts a builder from the default settings.
    pub fn builder() -> DeriveConfigBuilder {
        DeriveConfigBuilder::new()
    }

    /// Executor applying this configuration's deadline and verbosity.
    pub fn executor(&self) -> GuardedExecutor {
        GuardedExecutor::new(self.timeout).verbose(self.verbose)
    }

    /// Shape probe applying this configuration's bound and seed.
    pub fn probe(&self) -> ShapeProbe {
        ShapeProbe::new(self.max_probe).with_seed(self.probe_seed)
    }
}

/// Process-wide default configuration.
pub static DEFAULT_CONFIG: Lazy<Arc<DeriveConfig>> = Lazy::new(|| Arc::new(DeriveConfig::default()));

/// Get the process-wide default configuration.
pub fn default_config() -> &'static DeriveConfig {
    &DEFAULT_CONFIG
}

/// Builder for a validated [`DeriveConfig`].
#[derive(Debug, Clone, Default)]
pub struct DeriveConfigBuilder {
    config: DeriveConfig,
}

impl DeriveConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the symbolic derivation deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the deadline in seconds.
    ///
    /// Negative, non-finite or overflowing values are rejected by
    /// [`build`](Self::build).
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.config.timeout = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        self
    }

    /// Enable or disable logging of guarded work.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Enable or disable parallel evaluation of compiled outputs.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Set the largest probed vector length.
    pub fn max_probe(mut self, max_probe: usize) -> Self {
        self.config.max_probe = max_probe;
        self
    }

    /// Set the probe seed.
    pub fn probe_seed(mut self, seed: u64) -> Self {
        self.config.probe_seed = seed;
        self
    }

    /// Enable or disable input validation before symbolic derivation.
    pub fn validate_input(mut self, validate: bool) -> Self {
        self.config.validate_input = validate;
        self
    }

    /// Set a fixed finite-difference step.
    pub fn fd_step(mut self, step: f64) -> Self {
        self.config.fd_step = Some(step);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<DeriveConfig> {
        let config = self.config;
        if config.timeout.is_zero() {
            return Err(Error::invalid_configuration(
                "deadline must be positive and finite",
                "timeout",
                format!("{:?}", config.timeout),
            ));
        }
        if config.max_probe == 0 {
            return Err(Error::invalid_configuration(
                "at least one vector length must be probed",
                "max_probe",
                "0",
            ));
        }
        if let Some(step) = config.fd_step {
            if !(step.is_finite() && step > 0.0) {
                return Err(Error::invalid_configuration(
                    "step must be positive and finite",
                    "fd_step",
                    step.to_string(),
                ));
            }
        }
        Ok(config)
    }
}
