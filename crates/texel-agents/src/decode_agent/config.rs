// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Construction-time configuration for the decode scheduler.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::engine::EngineConfig;

/// Errors raised while loading or validating a [`DecodeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read decode config '{path}': {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML document is malformed or has fields of the wrong type.
    #[error("invalid decode config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A duration that must be positive is zero.
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
    /// A pool size that is neither a count nor `auto`.
    #[error("invalid pool size '{0}': expected a thread count or \"auto\"")]
    InvalidPoolSize(String),
}

/// Number of dedicated decode workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PoolSizeRepr", into = "PoolSizeRepr")]
pub enum PoolSize {
    /// Exactly this many workers; zero disables the pool.
    Fixed(usize),
    /// Sized from the number of available cores.
    #[default]
    Auto,
}

impl PoolSize {
    /// Resolves the worker count for this machine.
    pub fn resolve(self) -> usize {
        match self {
            PoolSize::Fixed(count) => count,
            PoolSize::Auto => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(0);
                auto_pool_size(cores)
            }
        }
    }
}

impl fmt::Display for PoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolSize::Fixed(count) => write!(f, "{count}"),
            PoolSize::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for PoolSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(PoolSize::Auto);
        }
        s.parse()
            .map(PoolSize::Fixed)
            .map_err(|_| ConfigError::InvalidPoolSize(s.to_owned()))
    }
}

/// Wire form of [`PoolSize`]: a bare integer or the string `"auto"`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PoolSizeRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<PoolSizeRepr> for PoolSize {
    type Error = ConfigError;

    fn try_from(repr: PoolSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            PoolSizeRepr::Count(count) => Ok(PoolSize::Fixed(count)),
            PoolSizeRepr::Keyword(keyword) => keyword.parse(),
        }
    }
}

impl From<PoolSize> for PoolSizeRepr {
    fn from(size: PoolSize) -> Self {
        match size {
            PoolSize::Fixed(count) => PoolSizeRepr::Count(count),
            PoolSize::Auto => PoolSizeRepr::Keyword("auto".to_owned()),
        }
    }
}

/// Worker count for `cores` logical cores (0 when unknown).
///
/// One core is left to the owner thread, two on large machines so the host
/// application keeps one as well, capped at 32.
fn auto_pool_size(cores: usize) -> usize {
    let cores = if cores == 0 { 4 } else { cores };
    if cores > 8 {
        (cores - 2).min(32)
    } else if cores > 2 {
        cores - 1
    } else {
        cores
    }
}

/// Configuration for the decode scheduler.
///
/// Loaded from TOML; every field is optional:
///
/// ```toml
/// threaded = true
/// pool_size = "auto"   # or a thread count, 0 disables the pool
/// short_slice_ms = 100
/// long_slice_ms = 10000
/// pump_budget_ms = 20
/// idle_wait_ms = 50
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    /// Pump the queue on a dedicated owner thread instead of the caller's.
    pub threaded: bool,
    /// Number of dedicated workers.
    pub pool_size: PoolSize,
    /// Slice given to queued requests, in milliseconds.
    pub short_slice_ms: u64,
    /// Slice given to pooled (long budget) requests, in milliseconds.
    pub long_slice_ms: u64,
    /// Budget of each pump of the owner thread, in milliseconds.
    pub pump_budget_ms: u64,
    /// How long an idle owner thread sleeps before pumping again, in
    /// milliseconds.
    pub idle_wait_ms: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            threaded: false,
            pool_size: PoolSize::Auto,
            short_slice_ms: 100,
            long_slice_ms: 10_000,
            pump_budget_ms: 20,
            idle_wait_ms: 50,
        }
    }
}

impl DecodeConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        log::debug!("Loaded decode config from '{}'", path.display());
        Ok(config)
    }

    /// Checks that every slice and budget is positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("short_slice_ms", self.short_slice_ms),
            ("long_slice_ms", self.long_slice_ms),
            ("pump_budget_ms", self.pump_budget_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(())
    }

    /// Slices for the priority queue engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            short_slice: Duration::from_millis(self.short_slice_ms),
            long_slice: self.long_slice(),
        }
    }

    /// Slice given to pooled requests.
    pub fn long_slice(&self) -> Duration {
        Duration::from_millis(self.long_slice_ms)
    }

    /// Budget of one pump.
    pub fn pump_budget(&self) -> Duration {
        Duration::from_millis(self.pump_budget_ms)
    }

    /// Sleep of an idle owner thread.
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}
