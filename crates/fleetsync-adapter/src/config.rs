// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for fleetsync-adapter.
//!
//! Everything is read from `FLEETSYNC_*` environment variables. The binary
//! loads a `.env` file first when one is present.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use fleetsync_core::{
    DependencyWait, FeedCursorConfig, MaintenanceConfig, ProcessorConfig, ProviderType,
    StoreConfig,
};
use fleetsync_feed::ClientConfig;
use tokio_util::sync::CancellationToken;

use crate::entities::{AllowList, EntityFilters};
use crate::processors::EntityKind;

/// Largest page still considered "caught up" when it comes back full.
const MAX_CAUGHT_UP_THRESHOLD: u32 = 1000;

/// Adapter configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Adapter database.
    pub database: DatabaseConfig,
    /// Upstream API connection.
    pub api: ClientConfig,
    /// Processor settings.
    pub sync: SyncConfig,
    /// Maintenance coordinator settings.
    pub maintenance: MaintenanceConfig,
}

/// Adapter database settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
    /// Target engine.
    pub provider: ProviderType,
    /// Upper bound for one transaction.
    pub command_timeout: Duration,
    /// Pool size.
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Store settings derived from these database settings. Retry backoff
    /// stops when `shutdown` is cancelled.
    pub fn store_config(&self, shutdown: CancellationToken) -> StoreConfig {
        StoreConfig {
            command_timeout: self.command_timeout,
            shutdown,
            ..StoreConfig::default()
        }
    }
}

/// Overrides for a single processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Whether the processor runs.
    pub enabled: bool,
    /// Feed interval; the global one when unset.
    pub feed_interval: Option<Duration>,
    /// Batch ceiling; the global one when unset.
    pub batch_size: Option<u32>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_interval: None,
            batch_size: None,
        }
    }
}

/// Settings shared by every processor.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of this machine, recorded in tracking rows.
    pub host_name: String,
    /// Refuse tracking rows owned by another machine.
    pub validate_host: bool,
    /// Default feed interval.
    pub feed_interval: Duration,
    /// Default batch ceiling.
    pub batch_size: u32,
    /// Per-processor overrides. Missing kinds use the defaults.
    pub processors: HashMap<EntityKind, ProcessorSettings>,
    /// Device and diagnostic allow-lists.
    pub filters: EntityFilters,
    /// Delay between probes while connectivity is lost.
    pub connectivity_retry_interval: Duration,
    /// Delay between checks while paused.
    pub pause_poll_interval: Duration,
    /// Delay between prerequisite checks.
    pub prerequisite_poll_interval: Duration,
    /// Bounds for waiting on a foreign-key owner.
    pub dependency_wait: DependencyWait,
}

impl SyncConfig {
    /// Defaults for the given machine name.
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            validate_host: true,
            feed_interval: Duration::from_secs(30),
            batch_size: 5000,
            processors: HashMap::new(),
            filters: EntityFilters::default(),
            connectivity_retry_interval: Duration::from_secs(10),
            pause_poll_interval: Duration::from_secs(1),
            prerequisite_poll_interval: Duration::from_secs(5),
            dependency_wait: DependencyWait::default(),
        }
    }

    /// Settings of one processor.
    pub fn settings(&self, kind: EntityKind) -> ProcessorSettings {
        self.processors.get(&kind).cloned().unwrap_or_default()
    }

    /// Full processor configuration for `kind`.
    pub fn processor_config(&self, kind: EntityKind) -> ProcessorConfig {
        let settings = self.settings(kind);
        let batch_size = settings.batch_size.unwrap_or(self.batch_size).max(1);
        ProcessorConfig {
            enabled: settings.enabled,
            prerequisites: kind
                .prerequisites()
                .iter()
                .map(|k| k.processor_name().to_string())
                .collect(),
            cursor: FeedCursorConfig {
                batch_size,
                caught_up_threshold: batch_size.min(MAX_CAUGHT_UP_THRESHOLD),
                feed_interval: settings.feed_interval.unwrap_or(self.feed_interval),
            },
            connectivity_retry_interval: self.connectivity_retry_interval,
            pause_poll_interval: self.pause_poll_interval,
            prerequisite_poll_interval: self.prerequisite_poll_interval,
            dependency_wait: self.dependency_wait,
            validate_host: self.validate_host,
            host_name: self.host_name.clone(),
            ..ProcessorConfig::new(kind.processor_name())
        }
    }

    /// Check that every enabled processor among `kinds` has its prerequisites
    /// among `kinds` and enabled. A dependent without its prerequisite would
    /// wait forever.
    pub fn validate_prerequisites(&self, kinds: &[EntityKind]) -> Result<(), ConfigError> {
        for kind in kinds.iter().filter(|k| self.settings(**k).enabled) {
            for prerequisite in kind.prerequisites() {
                if !kinds.contains(prerequisite) || !self.settings(*prerequisite).enabled {
                    return Err(ConfigError::DisabledPrerequisite {
                        processor: kind.processor_name(),
                        prerequisite: prerequisite.processor_name(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Processors that will run.
    pub fn enabled_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| self.settings(*kind).enabled)
            .collect()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: database_from_env()?,
            api: api_from_env()?,
            sync: sync_from_env()?,
            maintenance: maintenance_from_env()?,
        })
    }
}

fn database_from_env() -> Result<DatabaseConfig, ConfigError> {
    let url = required("FLEETSYNC_DATABASE_URL")?;

    let provider_name =
        env::var("FLEETSYNC_DATABASE_PROVIDER").unwrap_or_else(|_| "postgresql".to_string());
    let provider = ProviderType::from_str(&provider_name)
        .map_err(|_| ConfigError::invalid("FLEETSYNC_DATABASE_PROVIDER", &provider_name))?;
    if provider == ProviderType::SqlServer {
        return Err(ConfigError::UnsupportedProvider(provider_name));
    }

    Ok(DatabaseConfig {
        url,
        provider,
        command_timeout: Duration::from_secs(parsed("FLEETSYNC_DB_COMMAND_TIMEOUT_SECS", 30)?),
        max_connections: parsed("FLEETSYNC_DB_MAX_CONNECTIONS", 10)?,
    })
}

fn api_from_env() -> Result<ClientConfig, ConfigError> {
    let server = env::var("FLEETSYNC_API_SERVER").unwrap_or_else(|_| "my.geotab.com".to_string());
    Ok(ClientConfig::new(
        server,
        required("FLEETSYNC_API_DATABASE")?,
        required("FLEETSYNC_API_USER")?,
        required("FLEETSYNC_API_PASSWORD")?,
    ))
}

fn sync_from_env() -> Result<SyncConfig, ConfigError> {
    let host_name = match env::var("FLEETSYNC_HOST_NAME") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => system_host_name()?,
    };

    let mut sync = SyncConfig::new(host_name);
    sync.validate_host = flag("FLEETSYNC_VALIDATE_MACHINE_NAME", true)?;
    sync.feed_interval = Duration::from_secs(parsed("FLEETSYNC_FEED_INTERVAL_SECS", 30)?);
    sync.batch_size = parsed("FLEETSYNC_BATCH_SIZE", 5000)?;

    for kind in EntityKind::ALL {
        let key = kind.env_key();
        let settings = ProcessorSettings {
            enabled: flag(&format!("FLEETSYNC_{}_ENABLED", key), true)?,
            feed_interval: optional::<u64>(&format!("FLEETSYNC_{}_FEED_INTERVAL_SECS", key))?
                .map(Duration::from_secs),
            batch_size: optional(&format!("FLEETSYNC_{}_BATCH_SIZE", key))?,
        };
        sync.processors.insert(kind, settings);
    }

    sync.filters = EntityFilters {
        devices: AllowList::parse(&env::var("FLEETSYNC_DEVICE_ALLOW_LIST").unwrap_or_default()),
        diagnostics: AllowList::parse(
            &env::var("FLEETSYNC_DIAGNOSTIC_ALLOW_LIST").unwrap_or_default(),
        ),
    };

    sync.validate_prerequisites(&EntityKind::ALL)?;
    Ok(sync)
}

fn maintenance_from_env() -> Result<MaintenanceConfig, ConfigError> {
    let mut maintenance = MaintenanceConfig {
        enabled: flag("FLEETSYNC_MAINTENANCE_ENABLED", true)?,
        ..MaintenanceConfig::default()
    };

    if let Ok(start) = env::var("FLEETSYNC_MAINTENANCE_WINDOW_START") {
        maintenance.window_start = NaiveTime::parse_from_str(start.trim(), "%H:%M")
            .map_err(|_| ConfigError::invalid("FLEETSYNC_MAINTENANCE_WINDOW_START", &start))?;
    }
    let window_minutes: u64 = parsed("FLEETSYNC_MAINTENANCE_WINDOW_MINUTES", 120)?;
    let window_secs = window_minutes.checked_mul(60).ok_or_else(|| {
        ConfigError::invalid("FLEETSYNC_MAINTENANCE_WINDOW_MINUTES", &window_minutes.to_string())
    })?;
    maintenance.window_duration = Duration::from_secs(window_secs);
    maintenance.interval =
        Duration::from_secs(parsed("FLEETSYNC_MAINTENANCE_INTERVAL_SECS", 24 * 60 * 60)?);
    maintenance.pause_timeout =
        Duration::from_secs(parsed("FLEETSYNC_MAINTENANCE_PAUSE_TIMEOUT_SECS", 300)?);

    Ok(maintenance)
}

fn system_host_name() -> Result<String, ConfigError> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .ok_or(ConfigError::MissingEnvVar("FLEETSYNC_HOST_NAME"))
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnvVar(key))
}

fn flag(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(value) = env::var(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, &value)),
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(optional(key)?.unwrap_or(default))
}

fn optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, &value)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// The database provider is recognized but has no backend.
    #[error("Database provider '{0}' is not supported; use 'postgresql' or 'sqlite'")]
    UnsupportedProvider(String),
    /// An enabled processor depends on one that will not run.
    #[error("{processor} requires {prerequisite}, which will not run")]
    DisabledPrerequisite {
        /// Dependent processor.
        processor: &'static str,
        /// Missing prerequisite.
        prerequisite: &'static str,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const OPTIONAL: &[&str] = &[
        "FLEETSYNC_DATABASE_PROVIDER",
        "FLEETSYNC_DB_COMMAND_TIMEOUT_SECS",
        "FLEETSYNC_DB_MAX_CONNECTIONS",
        "FLEETSYNC_VALIDATE_MACHINE_NAME",
        "FLEETSYNC_API_SERVER",
        "FLEETSYNC_FEED_INTERVAL_SECS",
        "FLEETSYNC_BATCH_SIZE",
        "FLEETSYNC_MAINTENANCE_ENABLED",
        "FLEETSYNC_MAINTENANCE_WINDOW_START",
        "FLEETSYNC_MAINTENANCE_WINDOW_MINUTES",
        "FLEETSYNC_MAINTENANCE_INTERVAL_SECS",
        "FLEETSYNC_MAINTENANCE_PAUSE_TIMEOUT_SECS",
        "FLEETSYNC_DEVICE_ALLOW_LIST",
        "FLEETSYNC_DIAGNOSTIC_ALLOW_LIST",
    ];

    /// Set the required variables and clear every optional one.
    fn minimal_env(guard: &mut EnvGuard) {
        guard.set("FLEETSYNC_DATABASE_URL", "postgres://localhost/fleetsync");
        guard.set("FLEETSYNC_API_DATABASE", "fleet");
        guard.set("FLEETSYNC_API_USER", "sync@example.com");
        guard.set("FLEETSYNC_API_PASSWORD", "secret");
        guard.set("FLEETSYNC_HOST_NAME", "sync-01");
        for key in OPTIONAL {
            guard.remove(key);
        }
        for kind in EntityKind::ALL {
            for suffix in ["ENABLED", "FEED_INTERVAL_SECS", "BATCH_SIZE"] {
                guard.remove(&format!("FLEETSYNC_{}_{}", kind.env_key(), suffix));
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);

        let config = Config::from_env().unwrap();

        assert_eq!(config.database.url, "postgres://localhost/fleetsync");
        assert_eq!(config.database.provider, ProviderType::PostgreSql);
        assert_eq!(config.database.command_timeout, Duration::from_secs(30));
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.api.server, "my.geotab.com");
        assert_eq!(config.api.user_name, "sync@example.com");
        assert_eq!(config.sync.host_name, "sync-01");
        assert!(config.sync.validate_host);
        assert_eq!(config.sync.feed_interval, Duration::from_secs(30));
        assert_eq!(config.sync.batch_size, 5000);
        assert_eq!(config.sync.enabled_kinds().len(), EntityKind::ALL.len());
        assert!(!config.sync.filters.devices.is_active());
        assert!(config.maintenance.enabled);
        assert_eq!(
            config.maintenance.window_start,
            NaiveTime::from_hms_opt(2, 0, 0).unwrap()
        );
        assert_eq!(config.maintenance.window_duration, Duration::from_secs(7200));
        assert_eq!(config.maintenance.pause_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.remove("FLEETSYNC_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar("FLEETSYNC_DATABASE_URL")
        ));
    }

    #[test]
    fn test_config_rejects_sqlserver() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_DATABASE_PROVIDER", "SqlServer");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProvider(_)));
    }

    #[test]
    fn test_config_rejects_unknown_provider() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_DATABASE_PROVIDER", "oracle");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_config_per_processor_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_DATABASE_PROVIDER", "sqlite");
        guard.set("FLEETSYNC_BATCH_SIZE", "20000");
        guard.set("FLEETSYNC_LOG_RECORDS_BATCH_SIZE", "50000");
        guard.set("FLEETSYNC_LOG_RECORDS_FEED_INTERVAL_SECS", "5");
        guard.set("FLEETSYNC_DVIR_LOGS_ENABLED", "false");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database.provider, ProviderType::Sqlite);

        let logs = config.sync.processor_config(EntityKind::LogRecords);
        assert_eq!(logs.name, "LogRecordProcessor");
        assert_eq!(logs.cursor.batch_size, 50000);
        assert_eq!(logs.cursor.caught_up_threshold, 1000);
        assert_eq!(logs.cursor.feed_interval, Duration::from_secs(5));
        assert_eq!(logs.prerequisites, vec!["DeviceProcessor".to_string()]);
        assert_eq!(logs.host_name, "sync-01");

        let devices = config.sync.processor_config(EntityKind::Devices);
        assert_eq!(devices.cursor.batch_size, 20000);
        assert_eq!(devices.cursor.feed_interval, Duration::from_secs(30));
        assert!(devices.prerequisites.is_empty());

        assert!(!config.sync.processor_config(EntityKind::DvirLogs).enabled);
        assert!(!config.sync.enabled_kinds().contains(&EntityKind::DvirLogs));
    }

    #[test]
    fn test_config_invalid_number() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_STATUS_DATA_BATCH_SIZE", "lots");

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "FLEETSYNC_STATUS_DATA_BATCH_SIZE");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_config_maintenance_and_filters() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_MAINTENANCE_WINDOW_START", "23:30");
        guard.set("FLEETSYNC_MAINTENANCE_WINDOW_MINUTES", "60");
        guard.set("FLEETSYNC_MAINTENANCE_ENABLED", "0");
        guard.set("FLEETSYNC_VALIDATE_MACHINE_NAME", "false");
        guard.set("FLEETSYNC_DEVICE_ALLOW_LIST", "b1,b2");

        let config = Config::from_env().unwrap();
        assert!(!config.maintenance.enabled);
        assert_eq!(
            config.maintenance.window_start,
            NaiveTime::from_hms_opt(23, 30, 0).unwrap()
        );
        assert_eq!(config.maintenance.window_duration, Duration::from_secs(3600));
        assert!(!config.sync.validate_host);
        assert!(config.sync.filters.devices.allows(Some("b2")));
        assert!(!config.sync.filters.devices.allows(Some("b3")));
    }

    #[test]
    fn test_config_invalid_window_start() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_MAINTENANCE_WINDOW_START", "2am");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_config_flags_are_case_insensitive() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_VALIDATE_MACHINE_NAME", "True");
        guard.set("FLEETSYNC_MAINTENANCE_ENABLED", "NO");
        guard.set("FLEETSYNC_DVIR_LOGS_ENABLED", "TRUE");

        let config = Config::from_env().unwrap();
        assert!(config.sync.validate_host);
        assert!(!config.maintenance.enabled);
        assert!(config.sync.processor_config(EntityKind::DvirLogs).enabled);
    }

    #[test]
    fn test_config_rejects_unrecognized_flag() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_USERS_ENABLED", "enabled");

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue { key, value } => {
                assert_eq!(key, "FLEETSYNC_USERS_ENABLED");
                assert_eq!(value, "enabled");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_config_rejects_disabled_prerequisite() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_DEVICES_ENABLED", "false");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::DisabledPrerequisite {
                prerequisite: "DeviceProcessor",
                ..
            }
        ));

        // Disabling the dependents as well is fine.
        for kind in EntityKind::ALL {
            if kind.prerequisites().contains(&EntityKind::Devices) {
                guard.set(&format!("FLEETSYNC_{}_ENABLED", kind.env_key()), "false");
            }
        }
        let config = Config::from_env().unwrap();
        assert!(!config.sync.enabled_kinds().contains(&EntityKind::Devices));
    }

    #[test]
    fn test_validate_prerequisites_against_kind_subset() {
        let sync = SyncConfig::new("sync-01");
        assert!(sync.validate_prerequisites(&[EntityKind::Devices]).is_ok());
        assert!(matches!(
            sync.validate_prerequisites(&[EntityKind::StatusData]),
            Err(ConfigError::DisabledPrerequisite {
                processor: "StatusDataProcessor",
                ..
            })
        ));
    }

    #[test]
    fn test_config_window_minutes_overflow() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        minimal_env(&mut guard);
        guard.set("FLEETSYNC_MAINTENANCE_WINDOW_MINUTES", &u64::MAX.to_string());

        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "FLEETSYNC_MAINTENANCE_WINDOW_MINUTES");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
