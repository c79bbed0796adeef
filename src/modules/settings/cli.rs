// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use clap::{builder::ValueParser, Parser};
use std::{path::PathBuf, sync::LazyLock};

use crate::modules::{
    error::{code::ErrorCode, RollupResult},
    kpi::catalog::BUILTIN_KPIS,
};
use crate::raise_error;

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "kpi-rollup",
    about = "Maintains rolling daily, weekly, monthly and yearly KPI aggregates computed from reverse-proxy visit events.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// kpi-rollup log level (default: "info")
    #[clap(long, default_value = "info", env, help = "Set the log level for kpi-rollup")]
    pub rollup_log_level: String,

    /// Enable ANSI logs (default: true)
    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub rollup_ansi_logs: bool,

    /// Enable log file output (default: false)
    /// If false, logs will be printed to stdout
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub rollup_log_to_file: bool,

    /// Enable JSON logs (default: false)
    #[clap(long, default_value = "false", env, help = "Enable JSON formatted logs")]
    pub rollup_json_logs: bool,

    /// Maximum number of log files (default: 5)
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Set the maximum number of server log files"
    )]
    pub rollup_max_server_log_files: usize,

    #[clap(
        long,
        env,
        help = "Set the data directory holding the kpi database and logs",
        value_parser = ValueParser::new(|s: &str| {
            let path = PathBuf::from(s);
            if !path.is_absolute() {
                return Err("Path must be an absolute directory path".to_string());
            }
            if !path.exists() {
                return Err(format!("Path {:?} does not exist", path));
            }
            if !path.is_dir() {
                return Err(format!("Path {:?} is not a directory", path));
            }
            Ok(s.to_string())
        })
    )]
    pub rollup_root_dir: String,

    #[clap(
        long,
        env,
        help = "Set the cache size for the kpi database in bytes"
    )]
    pub rollup_db_cache_size: Option<usize>,

    #[clap(
        long,
        env,
        default_value = "total_visits,home_visits,item_visits,distinct_contents",
        value_delimiter = ',',
        help = "Comma-separated list of KPI identifiers to aggregate"
    )]
    pub rollup_kpis: Vec<String>,

    #[clap(
        long,
        default_value = "60",
        env,
        help = "Seconds between clock ticks, each preceded by an access log ingestion pass; aggregates only change when the hour changes",
        value_parser = clap::value_parser!(u64).range(1..=3600)
    )]
    pub rollup_tick_interval_secs: u64,

    #[clap(
        long,
        env,
        help = "Path of the reverse-proxy JSON access log to ingest visit events from"
    )]
    pub rollup_access_log: Option<String>,

    #[clap(
        long,
        env,
        help = "Path of the reverse-proxy site map (JSON) used to classify access log lines"
    )]
    pub rollup_reverse_proxy_config: Option<String>,
}

impl Settings {
    #[cfg(test)]
    fn new_for_test() -> Self {
        Self {
            rollup_log_level: "info".to_string(),
            rollup_ansi_logs: false,
            rollup_log_to_file: false,
            rollup_json_logs: false,
            rollup_max_server_log_files: 5,
            rollup_root_dir: std::env::temp_dir()
                .join("kpi_rollup_test_data")
                .to_string_lossy()
                .into_owned(),
            rollup_db_cache_size: None,
            rollup_kpis: BUILTIN_KPIS.iter().map(|kpi| kpi.to_string()).collect(),
            rollup_tick_interval_secs: 60,
            rollup_access_log: None,
            rollup_reverse_proxy_config: None,
        }
    }

    /// Configured KPI identifiers, trimmed, empty entries dropped.
    pub fn kpi_ids(&self) -> Vec<&str> {
        self.rollup_kpis
            .iter()
            .map(|kpi| kpi.trim())
            .filter(|kpi| !kpi.is_empty())
            .collect()
    }

    /// Cross-field checks clap cannot express.
    pub fn validate(&self) -> RollupResult<()> {
        if self.kpi_ids().is_empty() {
            return Err(raise_error!(
                "At least one KPI must be configured".into(),
                ErrorCode::MissingConfiguration
            ));
        }
        for kpi in self.kpi_ids() {
            if !BUILTIN_KPIS.contains(&kpi) {
                return Err(raise_error!(
                    format!(
                        "Unknown KPI '{}'. Available KPIs: {}",
                        kpi,
                        BUILTIN_KPIS.join(", ")
                    ),
                    ErrorCode::InvalidParameter
                ));
            }
        }
        if self.rollup_access_log.is_some() && self.rollup_reverse_proxy_config.is_none() {
            return Err(raise_error!(
                "'rollup_reverse_proxy_config' is required when 'rollup_access_log' is set".into(),
                ErrorCode::MissingConfiguration
            ));
        }
        Ok(())
    }
}
