use crate::{NovaError, Result, log_warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DOWNTIME_MIN_MS: u64 = 100;
pub const DOWNTIME_STEPS_MIN: u32 = 3;
pub const DOWNTIME_DELAY_MIN_SECS: u64 = 10;

/// Smallest guest size, in GiB, used when scaling timeouts and delays.
pub const MIN_DATA_GB: f64 = 2.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrateConfig {
    #[serde(default)]
    pub migration: LiveMigrationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMigrationSettings {
    /// Seconds without any data transferred before aborting. 0 disables.
    #[serde(default = "default_progress_timeout")]
    pub progress_timeout: u64,
    /// Seconds per GiB of guest data the whole migration may take. 0 disables.
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout: u64,
    /// Final max downtime in milliseconds.
    #[serde(default = "default_downtime")]
    pub downtime: u64,
    #[serde(default = "default_downtime_steps")]
    pub downtime_steps: u32,
    /// Seconds per GiB between downtime increases.
    #[serde(default = "default_downtime_delay")]
    pub downtime_delay: u64,
    /// Monitor ticks between stats saves.
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    /// Monitor ticks between info-level progress logs; debug otherwise.
    #[serde(default = "default_info_log_interval")]
    pub info_log_interval: u64,
}

fn default_progress_timeout() -> u64 {
    150
}

fn default_completion_timeout() -> u64 {
    800
}

fn default_downtime() -> u64 {
    500
}

fn default_downtime_steps() -> u32 {
    10
}

fn default_downtime_delay() -> u64 {
    75
}

fn default_stats_interval() -> u64 {
    10
}

fn default_info_log_interval() -> u64 {
    60
}

impl Default for LiveMigrationSettings {
    fn default() -> Self {
        Self {
            progress_timeout: default_progress_timeout(),
            completion_timeout: default_completion_timeout(),
            downtime: default_downtime(),
            downtime_steps: default_downtime_steps(),
            downtime_delay: default_downtime_delay(),
            stats_interval: default_stats_interval(),
            info_log_interval: default_info_log_interval(),
        }
    }
}

impl LiveMigrationSettings {
    /// Raise out-of-range values to their minimums. Returns the corrected
    /// settings and a message for every value that was changed.
    pub fn normalized(&self) -> (Self, Vec<String>) {
        let mut settings = self.clone();
        let mut warnings = Vec::new();

        if settings.downtime < DOWNTIME_MIN_MS {
            warnings.push(format!(
                "downtime {}ms is below the minimum, using {}ms",
                settings.downtime, DOWNTIME_MIN_MS
            ));
            settings.downtime = DOWNTIME_MIN_MS;
        }
        if settings.downtime_steps < DOWNTIME_STEPS_MIN {
            warnings.push(format!(
                "downtime_steps {} is below the minimum, using {}",
                settings.downtime_steps, DOWNTIME_STEPS_MIN
            ));
            settings.downtime_steps = DOWNTIME_STEPS_MIN;
        }
        if settings.downtime_delay < DOWNTIME_DELAY_MIN_SECS {
            warnings.push(format!(
                "downtime_delay {}s is below the minimum, using {}s",
                settings.downtime_delay, DOWNTIME_DELAY_MIN_SECS
            ));
            settings.downtime_delay = DOWNTIME_DELAY_MIN_SECS;
        }
        if settings.stats_interval == 0 {
            warnings.push("stats_interval 0 is invalid, using 1".to_string());
            settings.stats_interval = 1;
        }
        if settings.info_log_interval == 0 {
            warnings.push("info_log_interval 0 is invalid, using 1".to_string());
            settings.info_log_interval = 1;
        }

        (settings, warnings)
    }

    /// Overall time limit for a guest of `data_gb` GiB.
    pub fn completion_timeout_for(&self, data_gb: f64) -> u64 {
        (self.completion_timeout as f64 * data_gb) as u64
    }
}

/// GiB of RAM plus disk to copy, never less than [`MIN_DATA_GB`].
pub fn data_gb(memory_mb: u64, disk_bytes: u64) -> f64 {
    let ram_gb = memory_mb as f64 / 1024.0;
    let disk_gb = disk_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (ram_gb + disk_gb).max(MIN_DATA_GB)
}

impl MigrateConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self> {
        let mut config: MigrateConfig = toml::from_str(contents)?;
        let (settings, warnings) = config.migration.normalized();
        for warning in warnings {
            log_warn!("{}", warning);
        }
        config.migration = settings;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|_e| NovaError::InvalidConfig)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/nova/migrate.toml`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("nova"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("migrate.toml")
    }
}
