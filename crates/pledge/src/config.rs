//! Runtime configuration, read once at startup.
//!
//! Environment variables:
//! - `PLEDGE_CHECKS`: `fatal` or `silent` (default: `fatal` with debug assertions)
//! - `PLEDGE_POOL_CAPACITY`: idle-set bound for pools (default: 1024)
//! - `PLEDGE_SPIN_LIMIT`: exponential spin rounds before yielding (default: 6)

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::spin::DEFAULT_SPIN_LIMIT;

pub const DEFAULT_POOL_CAPACITY: usize = 1024;

static INSTALLED: OnceLock<RuntimeConfig> = OnceLock::new();

/// How invalid API usage is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Log and panic with a captured backtrace.
    Fatal,
    /// Treat the offending call as a no-op.
    Silent,
}

impl CheckMode {
    /// Mode matching the build profile.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Fatal
        } else {
            Self::Silent
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fatal" | "debug" | "strict" => Some(Self::Fatal),
            "silent" | "release" | "lenient" => Some(Self::Silent),
            _ => None,
        }
    }
}

impl Default for CheckMode {
    fn default() -> Self {
        Self::for_build()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub checks: CheckMode,
    pub pool_capacity: usize,
    pub spin_limit: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            checks: CheckMode::for_build(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let checks = match lookup("PLEDGE_CHECKS") {
            Some(raw) => CheckMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Invalid PLEDGE_CHECKS, using build default");
                defaults.checks
            }),
            None => defaults.checks,
        };

        let pool_capacity = parse_number(&lookup, "PLEDGE_POOL_CAPACITY", defaults.pool_capacity);
        let spin_limit = parse_number(&lookup, "PLEDGE_SPIN_LIMIT", defaults.spin_limit);

        Self {
            checks,
            pool_capacity,
            spin_limit,
        }
    }

    pub fn with_checks(mut self, checks: CheckMode) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_spin_limit(mut self, spin_limit: u32) -> Self {
        self.spin_limit = spin_limit;
        self
    }
}

fn parse_number<N>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: N) -> N
where
    N: std::str::FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            default
        }),
        None => default,
    }
}

/// Install the process-wide configuration. Returns the config back if one
/// was already installed (or already read by [`current`]).
pub fn install(config: RuntimeConfig) -> Result<(), RuntimeConfig> {
    INSTALLED.set(config)
}

/// The process-wide configuration, read from the environment on first use
/// when nothing was installed.
pub fn current() -> &'static RuntimeConfig {
    INSTALLED.get_or_init(RuntimeConfig::from_env)
}
