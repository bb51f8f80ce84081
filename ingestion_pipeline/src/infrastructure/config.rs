// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application Configuration
//!
//! Configuration is loaded at startup from the environment. Recognized keys:
//!
//! | Key | Default | Meaning |
//! |---|---|---|
//! | `DB_PATH` | `./ingestion.db` | File path of the embedded store |
//! | `PROVIDER_TOKEN` | - | Bearer credential for the provider API |
//! | `LOG_LEVEL` | `info` | Tracing filter directive |
//! | `SCHEDULE_TIMEZONE` | `UTC` | IANA zone the scheduler evaluates cron expressions in |
//! | `RATE_LIMIT_LOW_WATER` | `100` | Remaining-quota threshold below which calls wait or fail |
//! | `ENRICH_MAX_ATTEMPTS` | `3` | Attempt cap before an entity stops being selected |
//! | `PROCESS_BATCH_SIZE` | `100` | Raw rows drained per Process batch (upper bound 1000) |
//! | `RANK_WEIGHTS` | built-in | JSON object of ranking dimension → weight |
//! | `LISTEN_ADDR` | `0.0.0.0:8080` | Control-plane bind address |
//!
//! Every value is validated once by [`AppConfig::validate`]; an invalid
//! configuration terminates the process with exit code 2 before anything
//! touches the store or the provider.

use std::str::FromStr;

use serde::Deserialize;

use ingestion_pipeline_domain::entities::RankWeights;
use ingestion_pipeline_domain::error::PipelineError;

const PROCESS_BATCH_UPPER_BOUND: u32 = 1000;

fn default_db_path() -> String {
    "./ingestion.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_rate_limit_low_water() -> i64 {
    100
}

fn default_enrich_max_attempts() -> i64 {
    3
}

fn default_process_batch_size() -> u32 {
    100
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Typed application configuration, deserialized from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Absent means unauthenticated provider access (drastically lower
    /// quota, still functional)
    #[serde(default)]
    pub provider_token: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_timezone")]
    pub schedule_timezone: String,

    #[serde(default = "default_rate_limit_low_water")]
    pub rate_limit_low_water: i64,

    #[serde(default = "default_enrich_max_attempts")]
    pub enrich_max_attempts: i64,

    #[serde(default = "default_process_batch_size")]
    pub process_batch_size: u32,

    /// Raw JSON text; parsed and validated into [`RankWeights`]
    #[serde(default)]
    pub rank_weights: Option<String>,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: default_db_path(),
            provider_token: None,
            log_level: default_log_level(),
            schedule_timezone: default_timezone(),
            rate_limit_low_water: default_rate_limit_low_water(),
            enrich_max_attempts: default_enrich_max_attempts(),
            process_batch_size: default_process_batch_size(),
            rank_weights: None,
            listen_addr: default_listen_addr(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment and validates it.
    pub fn from_env() -> Result<Self, PipelineError> {
        let settings = config::Config::builder()
            // try_parsing so numeric and boolean keys deserialize as such
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .map_err(|e| PipelineError::invalid_config(format!("failed to read environment: {}", e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::invalid_config(format!("failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges and parseability of the compound settings.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.db_path.trim().is_empty() {
            return Err(PipelineError::invalid_config("DB_PATH cannot be empty"));
        }

        chrono_tz::Tz::from_str(&self.schedule_timezone).map_err(|_| {
            PipelineError::invalid_config(format!(
                "SCHEDULE_TIMEZONE '{}' is not a known IANA timezone",
                self.schedule_timezone
            ))
        })?;

        if self.rate_limit_low_water < 0 {
            return Err(PipelineError::invalid_config(format!(
                "RATE_LIMIT_LOW_WATER must be non-negative, got {}",
                self.rate_limit_low_water
            )));
        }

        if self.enrich_max_attempts < 1 {
            return Err(PipelineError::invalid_config(format!(
                "ENRICH_MAX_ATTEMPTS must be at least 1, got {}",
                self.enrich_max_attempts
            )));
        }

        if self.process_batch_size == 0 || self.process_batch_size > PROCESS_BATCH_UPPER_BOUND {
            return Err(PipelineError::invalid_config(format!(
                "PROCESS_BATCH_SIZE must be in 1..={}, got {}",
                PROCESS_BATCH_UPPER_BOUND, self.process_batch_size
            )));
        }

        // Parse early so a bad weight map fails startup, not the first
        // ranking run.
        self.rank_weights_parsed()?;

        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                PipelineError::invalid_config(format!(
                    "LISTEN_ADDR '{}' is not a valid socket address: {}",
                    self.listen_addr, e
                ))
            })?;

        Ok(())
    }

    /// The configured ranking weights, or the built-in defaults.
    pub fn rank_weights_parsed(&self) -> Result<RankWeights, PipelineError> {
        match self.rank_weights.as_deref() {
            Some(json) => RankWeights::from_json(json),
            None => Ok(RankWeights::default()),
        }
    }

    /// The scheduler timezone, already validated.
    pub fn timezone(&self) -> chrono_tz::Tz {
        chrono_tz::Tz::from_str(&self.schedule_timezone).unwrap_or(chrono_tz::Tz::UTC)
    }

    /// SQLite connection URL for the configured database path.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path)
    }
}
