// Runtime configuration for the assessor
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/assessor.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for a single sandboxed call.
    pub call_timeout_ms: u64,
    /// Upper bound on threads the sandbox pool may spawn.
    pub max_workers: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            max_workers: 512,
        }
    }
}

impl SandboxConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Multiplied by the number of submissions to get the batch deadline.
    pub submission_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            submission_timeout_secs: 300,
        }
    }
}

impl BatchConfig {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum edit distance as a fraction of the longer name.
    pub name_tolerance: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { name_tolerance: 0.2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self { threshold: 1.0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    pub sandbox: SandboxConfig,
    pub batch: BatchConfig,
    pub resolver: ResolverConfig,
    pub clustering: ClusteringConfig,
}

impl AssessorConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Assessor config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: AssessorConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default path (config/assessor.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            info!(path = %config_path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Override fields from ASSESSOR_* environment variables.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(value) = env_var("ASSESSOR_CONCURRENCY") {
            self.batch.concurrency = value
                .parse()
                .context("ASSESSOR_CONCURRENCY must be a positive integer")?;
        }
        if let Some(value) = env_var("ASSESSOR_CALL_TIMEOUT_MS") {
            self.sandbox.call_timeout_ms = value
                .parse()
                .context("ASSESSOR_CALL_TIMEOUT_MS must be an integer")?;
        }
        if let Some(value) = env_var("ASSESSOR_SUBMISSION_TIMEOUT_SECS") {
            self.batch.submission_timeout_secs = value
                .parse()
                .context("ASSESSOR_SUBMISSION_TIMEOUT_SECS must be an integer")?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            bail!("batch.concurrency must be at least 1");
        }
        if self.sandbox.max_workers == 0 {
            bail!("sandbox.max_workers must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.resolver.name_tolerance) {
            bail!(
                "resolver.name_tolerance must be within [0, 1], got {}",
                self.resolver.name_tolerance
            );
        }
        if self.sandbox.call_timeout_ms == 0 {
            warn!("sandbox.call_timeout_ms is 0, every call will time out");
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
