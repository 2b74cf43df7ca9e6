// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

pub mod logger;

use crate::{
    error::{Error, UniqueResult},
    stream::time::{Clock, EventClock, SystemClock, TimeMode},
};
use hocon::HoconLoader;
use logger::{file_logger, term_logger, LoggerType, UniqueLogger, UNIQUE_LOG_NAME};
use serde::Deserialize;
use slog::warn;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Configuration for an application running unique windows
#[derive(Deserialize, Clone, Debug)]
pub struct UniqueConf {
    #[serde(default = "app_name_default")]
    pub app_name: String,
    /// Base directory for log files
    #[serde(default = "base_dir_default")]
    pub base_dir: PathBuf,
    /// [LoggerType] for window related logging
    #[serde(default)]
    pub logger_type: LoggerType,
    /// Whether windows run on wall-clock or event time
    #[serde(default)]
    pub time_mode: TimeMode,
    /// Interval in milliseconds at which scheduler drivers advance their schedulers
    #[serde(default = "scheduler_tick_interval_default")]
    pub scheduler_tick_interval: u64,
}

impl Default for UniqueConf {
    fn default() -> Self {
        UniqueConf {
            app_name: app_name_default(),
            base_dir: base_dir_default(),
            logger_type: Default::default(),
            time_mode: Default::default(),
            scheduler_tick_interval: scheduler_tick_interval_default(),
        }
    }
}

impl UniqueConf {
    /// Builds the configured logger
    ///
    /// Falls back to the terminal if the log file cannot be created.
    pub fn logger(&self) -> UniqueLogger {
        match self.logger_type {
            LoggerType::File => {
                let mut path = self.base_dir.clone();
                path.push(UNIQUE_LOG_NAME);
                match std::fs::create_dir_all(&self.base_dir).and_then(|_| file_logger(&path)) {
                    Ok(logger) => logger,
                    Err(err) => {
                        let logger = term_logger();
                        warn!(logger, "Failed to create log file {:?}: {}", path, err);
                        logger
                    }
                }
            }
            LoggerType::Terminal => term_logger(),
        }
    }

    /// Builds a clock for the configured [TimeMode]
    pub fn clock(&self) -> Arc<dyn Clock> {
        match self.time_mode {
            TimeMode::Event => Arc::new(EventClock::new()),
            TimeMode::Process => Arc::new(SystemClock),
        }
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_interval)
    }

    /// Loads UniqueConf from a file
    pub fn from_file(path: impl AsRef<Path>) -> UniqueResult<UniqueConf> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::Config {
            msg: format!("Failed to read config file with err {}", e),
        })?;
        Self::from_hocon_str(&data)
    }

    /// Loads UniqueConf from a HOCON document
    pub fn from_hocon_str(data: &str) -> UniqueResult<UniqueConf> {
        let loader: HoconLoader = HoconLoader::new().load_str(data).map_err(|e| Error::Config {
            msg: format!("Failed to load Hocon Loader with err {}", e),
        })?;

        let conf = loader.resolve().map_err(|e| Error::Config {
            msg: format!("Failed to resolve UniqueConf with err {}", e),
        })?;
        Ok(conf)
    }
}

// Default values

fn app_name_default() -> String {
    String::from("arcon_unique")
}

fn base_dir_default() -> PathBuf {
    let mut res = std::env::temp_dir();
    res.push("arcon_unique");
    res
}

fn scheduler_tick_interval_default() -> u64 {
    // in milliseconds
    10
}
