// Copyright 2026 QuTraj Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for the trajectory engine.
//!
//! Configuration is loaded from multiple sources with the following priority
//! (later sources override earlier ones):
//!
//! 1. Built-in defaults
//! 2. qutraj.yaml file
//! 3. Environment variables (QUTRAJ_*)

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Integrator and result options
    #[serde(default)]
    pub solver: SolverOptions,

    /// Orchestration settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        // Load from file if specified
        if let Some(path) = config_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = serde_yaml::from_str(&content)?;
            }
        } else {
            // Try default locations
            for path in &["qutraj.yaml", "qutraj.yml"] {
                let path = Path::new(path);
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    config = serde_yaml::from_str(&content)?;
                    break;
                }
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("QUTRAJ_NUM_CPUS") {
            if let Ok(n) = val.parse() {
                self.solver.num_cpus = n;
            }
        }
        if let Ok(val) = env::var("QUTRAJ_ODE_METHOD") {
            self.solver.method = val.to_lowercase();
        }
        if let Ok(val) = env::var("QUTRAJ_WORKER_TIMEOUT_SEC") {
            if let Ok(secs) = val.parse() {
                self.runtime.worker_timeout_sec = Some(secs);
            }
        }
        if let Ok(val) = env::var("QUTRAJ_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("QUTRAJ_LOG_FORMAT") {
            match val.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                other => tracing::warn!("Ignoring unknown QUTRAJ_LOG_FORMAT '{}'", other),
            }
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let s = &self.solver;
        if s.atol.is_nan() || s.atol <= 0.0 {
            return Err(Error::Config("atol must be positive".into()));
        }
        if s.rtol.is_nan() || s.rtol <= 0.0 {
            return Err(Error::Config("rtol must be positive".into()));
        }
        if s.nsteps == 0 {
            return Err(Error::Config("nsteps cannot be 0".into()));
        }
        if s.first_step < 0.0 || s.min_step < 0.0 || s.max_step < 0.0 {
            return Err(Error::Config("step sizes cannot be negative".into()));
        }
        if s.max_step > 0.0 && s.min_step > s.max_step {
            return Err(Error::Config(format!(
                "min_step ({}) exceeds max_step ({})",
                s.min_step, s.max_step
            )));
        }
        if self.runtime.worker_timeout_sec == Some(0) {
            return Err(Error::Config("worker timeout cannot be 0".into()));
        }
        if crate::job::IntegrationMethod::from_name(&s.method).is_none() {
            // Not fatal: the job falls back to adams.
            tracing::warn!(
                "Unknown ODE method '{}'; adams will be used instead",
                s.method
            );
        }
        Ok(())
    }
}

/// Integrator and result options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Absolute tolerance; also the tidy-up threshold
    #[serde(default = "default_atol")]
    pub atol: f64,

    /// Relative tolerance
    #[serde(default = "default_rtol")]
    pub rtol: f64,

    /// Integration method name (adams, bdf)
    #[serde(default = "default_method")]
    pub method: String,

    /// Maximum method order
    #[serde(default = "default_order")]
    pub order: u32,

    /// Maximum internal steps per output interval
    #[serde(default = "default_nsteps")]
    pub nsteps: u32,

    /// Initial step size (0 = integrator's choice)
    #[serde(default)]
    pub first_step: f64,

    /// Minimum step size (0 = no limit)
    #[serde(default)]
    pub min_step: f64,

    /// Maximum step size (0 = no limit)
    #[serde(default)]
    pub max_step: f64,

    /// Iterations allowed when locating a jump time
    #[serde(default = "default_norm_steps")]
    pub norm_steps: u32,

    /// Tolerance on the norm when locating a jump time
    #[serde(default = "default_norm_tol")]
    pub norm_tol: f64,

    /// Average over trajectories
    #[serde(default = "default_true")]
    pub mc_avg: bool,

    /// Worker count (0 = detected parallelism)
    #[serde(default)]
    pub num_cpus: usize,

    /// Zero tiny amplitudes of the initial state
    #[serde(default = "default_true")]
    pub tidy: bool,

    /// Return averaged states as kets rather than density matrices
    #[serde(default = "default_true")]
    pub states_as_kets: bool,

    /// Retrieve averaged density matrices in compressed-row form
    #[serde(default = "default_true")]
    pub sparse_dms: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            atol: default_atol(),
            rtol: default_rtol(),
            method: default_method(),
            order: default_order(),
            nsteps: default_nsteps(),
            first_step: 0.0,
            min_step: 0.0,
            max_step: 0.0,
            norm_steps: default_norm_steps(),
            norm_tol: default_norm_tol(),
            mc_avg: true,
            num_cpus: 0,
            tidy: true,
            states_as_kets: true,
            sparse_dms: true,
        }
    }
}

fn default_atol() -> f64 {
    1e-8
}

fn default_rtol() -> f64 {
    1e-6
}

fn default_method() -> String {
    "adams".into()
}

fn default_order() -> u32 {
    12
}

fn default_nsteps() -> u32 {
    1000
}

fn default_norm_steps() -> u32 {
    5
}

fn default_norm_tol() -> f64 {
    1e-3
}

fn default_true() -> bool {
    true
}

/// Orchestration settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Give up on workers after this many seconds (None = wait indefinitely)
    #[serde(default)]
    pub worker_timeout_sec: Option<u64>,
}

impl RuntimeConfig {
    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_sec.map(Duration::from_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Mutex;

    // Env overrides are process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.solver.atol, 1e-8);
        assert_eq!(config.solver.rtol, 1e-6);
        assert_eq!(config.solver.method, "adams");
        assert_eq!(config.solver.order, 12);
        assert_eq!(config.solver.nsteps, 1000);
        assert_eq!(config.solver.norm_steps, 5);
        assert_eq!(config.solver.num_cpus, 0);
        assert!(config.solver.mc_avg);
        assert!(config.solver.tidy);
        assert!(config.solver.states_as_kets);
        assert!(config.solver.sparse_dms);
        assert_eq!(config.runtime.worker_timeout(), None);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let mut bad_config = Config::default();
        bad_config.solver.atol = 0.0;
        assert!(bad_config.validate().is_err());

        let mut bad_config = Config::default();
        bad_config.solver.rtol = f64::NAN;
        assert!(bad_config.validate().is_err());
    }

    #[test]
    fn test_validate_step_bounds() {
        let mut config = Config::default();
        config.solver.min_step = 0.5;
        // max_step of 0 means unbounded
        assert!(config.validate().is_ok());

        config.solver.max_step = 0.1;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("min_step"));
    }

    #[test]
    fn test_validate_nsteps_and_timeout() {
        let mut config = Config::default();
        config.solver.nsteps = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.runtime.worker_timeout_sec = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_method_still_passes() {
        let mut config = Config::default();
        config.solver.method = "rk45".into();
        // Should warn but still pass validation
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file() {
        // load() applies QUTRAJ_* overrides
        let _guard = ENV_LOCK.lock().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
solver:
  method: bdf
  atol: 1.0e-10
  num_cpus: 3
  mc_avg: false
runtime:
  worker_timeout_sec: 60
logging:
  format: pretty
"#
        )
        .unwrap();

        let config = Config::load(Some(f.path())).unwrap();
        assert_eq!(config.solver.method, "bdf");
        assert_eq!(config.solver.atol, 1e-10);
        assert_eq!(config.solver.num_cpus, 3);
        assert!(!config.solver.mc_avg);
        // Unspecified fields keep their defaults
        assert_eq!(config.solver.rtol, 1e-6);
        assert!(config.solver.sparse_dms);
        assert_eq!(config.runtime.worker_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        // When a path is provided but doesn't exist, load returns defaults
        let path = std::path::Path::new("/tmp/does_not_exist_qutraj_test.yaml");
        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.solver.order, 12);
    }

    #[test]
    fn test_config_load_invalid_yaml() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{{{not: valid: yaml::::").unwrap();

        let result = Config::load(Some(f.path()));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_num_cpus() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("QUTRAJ_NUM_CPUS", "6");
        config.apply_env_overrides();
        assert_eq!(config.solver.num_cpus, 6);
        std::env::remove_var("QUTRAJ_NUM_CPUS");

        // Unparseable values are ignored
        std::env::set_var("QUTRAJ_NUM_CPUS", "many");
        config.apply_env_overrides();
        assert_eq!(config.solver.num_cpus, 6);
        std::env::remove_var("QUTRAJ_NUM_CPUS");
    }

    #[test]
    fn test_env_override_method() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("QUTRAJ_ODE_METHOD", "BDF");
        config.apply_env_overrides();
        assert_eq!(config.solver.method, "bdf");
        std::env::remove_var("QUTRAJ_ODE_METHOD");
    }

    #[test]
    fn test_env_override_worker_timeout() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("QUTRAJ_WORKER_TIMEOUT_SEC", "120");
        config.apply_env_overrides();
        assert_eq!(config.runtime.worker_timeout_sec, Some(120));
        std::env::remove_var("QUTRAJ_WORKER_TIMEOUT_SEC");
    }

    #[test]
    fn test_env_override_logging() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        std::env::set_var("QUTRAJ_LOG_LEVEL", "debug");
        std::env::set_var("QUTRAJ_LOG_FORMAT", "Pretty");
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Pretty);

        std::env::set_var("QUTRAJ_LOG_FORMAT", "xml");
        config.apply_env_overrides();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        std::env::remove_var("QUTRAJ_LOG_LEVEL");
        std::env::remove_var("QUTRAJ_LOG_FORMAT");
    }
}
