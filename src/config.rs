//! Service configuration
//!
//! Security profile and process settings, loaded from environment variables
//! (after `.env`) with fixed defaults. Immutable once loaded.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::limits::MIN_MEMORY_MB;

/// Security constraints applied to every execution container
#[derive(Debug, Clone)]
pub struct SecurityProfile {
    /// Memory limit when the request gives none, in MB
    pub default_memory_mb: u64,
    /// Upper bound for requested memory, in MB
    pub max_memory_mb: u64,
    /// CPU share in units of 1e-9 CPUs (500_000_000 = half a CPU)
    pub nano_cpus: i64,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Maximum number of processes inside the container
    pub pids_limit: i64,
    pub read_only_rootfs: bool,
    /// Size of each tmpfs scratch mount (e.g., "64m")
    pub tmpfs_size: String,
    pub network_disabled: bool,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    /// Non-root user the program runs as
    pub user: String,
    /// Home directory of `user`, mounted as scratch space for toolchain caches
    pub user_home: String,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            default_memory_mb: 128,
            max_memory_mb: 256,
            nano_cpus: 500_000_000,
            default_timeout_secs: 10,
            max_timeout_secs: 30,
            pids_limit: 64,
            read_only_rootfs: true,
            tmpfs_size: "64m".to_string(),
            network_disabled: true,
            cap_drop: vec!["ALL".to_string()],
            security_opt: vec!["no-new-privileges:true".to_string()],
            user: "runner".to_string(),
            user_home: "/home/runner".to_string(),
        }
    }
}

impl SecurityProfile {
    /// Check that every bounded quantity has max >= default
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Docker treats a zero memory limit as unlimited
        if self.default_memory_mb < MIN_MEMORY_MB {
            return Err(ConfigError::InvalidLimit(format!(
                "default memory {}MB is below the {}MB minimum",
                self.default_memory_mb, MIN_MEMORY_MB
            )));
        }
        if self.max_memory_mb < self.default_memory_mb {
            return Err(ConfigError::InvalidLimit(format!(
                "max memory {}MB is below default {}MB",
                self.max_memory_mb, self.default_memory_mb
            )));
        }
        if self.max_timeout_secs < self.default_timeout_secs {
            return Err(ConfigError::InvalidLimit(format!(
                "max timeout {}s is below default {}s",
                self.max_timeout_secs, self.default_timeout_secs
            )));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::InvalidLimit("default timeout must be positive".into()));
        }
        if self.pids_limit <= 0 || self.nano_cpus <= 0 {
            return Err(ConfigError::InvalidLimit(
                "pids limit and cpu share must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Runtime table override; the embedded table is used when unset
    pub languages_path: Option<PathBuf>,
    /// Admission capacity: executions (and containers) running at once
    pub max_concurrent_jobs: usize,
    pub profile: SecurityProfile,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:2000".to_string(),
            languages_path: None,
            max_concurrent_jobs: 5,
            profile: SecurityProfile::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let base = defaults.profile;

        let profile = SecurityProfile {
            default_memory_mb: parse_or(&lookup, "RCE_DEFAULT_MEMORY_MB", base.default_memory_mb)?,
            max_memory_mb: parse_or(&lookup, "RCE_MAX_MEMORY_MB", base.max_memory_mb)?,
            nano_cpus: parse_or(&lookup, "RCE_NANO_CPUS", base.nano_cpus)?,
            default_timeout_secs: parse_or(
                &lookup,
                "RCE_DEFAULT_TIMEOUT_SECS",
                base.default_timeout_secs,
            )?,
            max_timeout_secs: parse_or(&lookup, "RCE_MAX_TIMEOUT_SECS", base.max_timeout_secs)?,
            pids_limit: parse_or(&lookup, "RCE_PIDS_LIMIT", base.pids_limit)?,
            tmpfs_size: lookup("RCE_TMPFS_SIZE").unwrap_or(base.tmpfs_size),
            user: lookup("RCE_RUNNER_USER").unwrap_or(base.user),
            user_home: lookup("RCE_RUNNER_HOME").unwrap_or(base.user_home),
            ..base
        };
        profile.validate()?;

        let max_concurrent_jobs =
            parse_or(&lookup, "MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?;
        if max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidLimit(
                "MAX_CONCURRENT_JOBS must be at least 1".into(),
            ));
        }

        Ok(Self {
            bind_addr: lookup("RCE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            languages_path: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
            max_concurrent_jobs,
            profile,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
