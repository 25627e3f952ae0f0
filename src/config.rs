//! Runtime configuration read from the environment.
//!
//! Every key is optional. A value that is present but cannot be parsed is
//! logged and the default is used instead, so a typo never stops the
//! connector from starting. The one exception is
//! `REQUIRE_PERSISTENT_STORE`, which is enforced when the store is opened.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::health::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_HEALTH_SCHEDULE};
use crate::ingest::FetchConfig;
use crate::ledger::LedgerConfig;
use crate::scheduler::TaskSchedule;
use crate::store::StoreConfig;

/// Default port for the posted-time webhook server.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8080;

/// Default staleness for the periodic sync jobs (60 minutes).
pub const DEFAULT_JOB_MAX_STALENESS_MINS: u64 = 60;

/// Default staleness for the acknowledgement sweep (10 minutes).
pub const DEFAULT_ACK_SWEEP_MAX_STALENESS_SECS: u64 = 10 * 60;

/// How posted time reaches the connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Poll the remote API for batches.
    #[default]
    LongPoll,
    /// Serve `POST /receiveTimePostedEvent`.
    Webhook,
    /// Do not receive posted time at all.
    Disabled,
}

impl FromStr for ReceiveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG_POLL" => Ok(ReceiveMode::LongPoll),
            "WEBHOOK" => Ok(ReceiveMode::Webhook),
            "DISABLED" => Ok(ReceiveMode::Disabled),
            other => Err(format!("unknown receive mode: {other}")),
        }
    }
}

/// Schedules for the periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedules {
    pub tags: TaskSchedule,
    pub tags_slow_loop: TaskSchedule,
    pub activity_types: TaskSchedule,
    pub activity_types_slow_loop: TaskSchedule,
    pub managed_config: TaskSchedule,
    pub ack_sweep: TaskSchedule,
    pub health: TaskSchedule,
}

impl Default for JobSchedules {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSchedules {
    pub fn new() -> Self {
        JobSchedules {
            tags: TaskSchedule::from_secs(15, 60),
            tags_slow_loop: TaskSchedule::from_secs(15, 5 * 60),
            activity_types: TaskSchedule::from_secs(15, 5 * 60),
            activity_types_slow_loop: TaskSchedule::from_secs(60, 15 * 60),
            managed_config: TaskSchedule::from_secs(15, 5 * 60),
            ack_sweep: TaskSchedule::from_secs(30, 30),
            health: DEFAULT_HEALTH_SCHEDULE,
        }
    }
}

/// Everything the runtime needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub store: StoreConfig,
    pub receive_mode: ReceiveMode,
    pub fetch: FetchConfig,
    pub ledger: LedgerConfig,

    /// Expected `caller_key` on incoming time groups. `None` disables the
    /// check.
    pub caller_key: Option<String>,

    /// Run the tag sync jobs.
    pub tag_scan: bool,

    /// Run the activity type sync jobs.
    pub activity_type_scan: bool,

    /// A sync job that has not succeeded for this long is unhealthy.
    pub job_max_staleness: Duration,

    /// The acknowledgement sweep is unhealthy after this long without a
    /// successful run.
    pub ack_sweep_max_staleness: Duration,

    pub schedules: JobSchedules,

    /// Consecutive unhealthy ticks before shutdown.
    pub health_threshold: u32,

    pub webhook_port: u16,

    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        ConnectorConfig {
            store: StoreConfig::default(),
            receive_mode: ReceiveMode::default(),
            fetch: FetchConfig::new(),
            ledger: LedgerConfig::new(),
            caller_key: None,
            tag_scan: true,
            activity_type_scan: true,
            job_max_staleness: Duration::from_secs(DEFAULT_JOB_MAX_STALENESS_MINS * 60),
            ack_sweep_max_staleness: Duration::from_secs(DEFAULT_ACK_SWEEP_MAX_STALENESS_SECS),
            schedules: JobSchedules::new(),
            health_threshold: DEFAULT_FAILURE_THRESHOLD,
            webhook_port: DEFAULT_WEBHOOK_PORT,
            log_level: None,
        }
    }

    /// Creates a `ConnectorConfig` from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a `ConnectorConfig` from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup: &lookup };
        let defaults = Self::new();

        let data_dir = env.string("DATA_DIR").map(PathBuf::from);
        let require_persistent = env.flag("REQUIRE_PERSISTENT_STORE");

        let mut fetch = defaults.fetch.clone();
        if let Some(batch_size) = env.parse::<usize>("LONG_POLL_BATCH_SIZE") {
            if batch_size == 0 {
                warn!(key = "LONG_POLL_BATCH_SIZE", "Batch size must be positive, using default");
            } else {
                fetch.batch_size = batch_size;
            }
        }

        let mut schedules = defaults.schedules;
        schedules.tags = env.minutes("TAG_SYNC_INTERVAL_MIN", schedules.tags);
        schedules.tags_slow_loop =
            env.minutes("TAG_SYNC_SLOW_LOOP_INTERVAL_MIN", schedules.tags_slow_loop);
        schedules.activity_types =
            env.minutes("ACTIVITY_TYPE_SYNC_INTERVAL_MIN", schedules.activity_types);
        schedules.activity_types_slow_loop = env.minutes(
            "ACTIVITY_TYPE_SYNC_SLOW_LOOP_INTERVAL_MIN",
            schedules.activity_types_slow_loop,
        );

        let job_max_staleness = env
            .minutes_duration("HEALTH_MAX_MINS_SINCE_SUCCESS")
            .unwrap_or(defaults.job_max_staleness);

        ConnectorConfig {
            store: StoreConfig {
                data_dir,
                require_persistent,
            },
            receive_mode: env.parse("RECEIVE_POSTED_TIME").unwrap_or_default(),
            fetch,
            caller_key: env.string("CALLER_KEY"),
            tag_scan: env.scan_mode("TAG_SCAN"),
            activity_type_scan: env.scan_mode("ACTIVITY_TYPE_SCAN"),
            job_max_staleness,
            schedules,
            webhook_port: env.parse("WEBHOOK_PORT").unwrap_or(DEFAULT_WEBHOOK_PORT),
            log_level: env.string("LOG_LEVEL"),
            ..defaults
        }
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// A non-blank value, trimmed.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.string(key)?;
        self.parse_with(key, &raw)
    }

    fn parse_with<T>(&self, key: &str, raw: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "Ignoring unparseable config value");
                None
            }
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.string(key)
            .and_then(|v| self.parse_with(key, &v.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// A count of minutes, `None` if it does not fit in a `Duration`.
    fn minutes_duration(&self, key: &str) -> Option<Duration> {
        let mins = self.parse::<u64>(key)?;
        match mins.checked_mul(60) {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => {
                warn!(key, mins, "Minutes value too large, using default");
                None
            }
        }
    }

    fn minutes(&self, key: &str, default: TaskSchedule) -> TaskSchedule {
        match self.minutes_duration(key) {
            Some(Duration::ZERO) => {
                warn!(key, "Interval must be positive, using default");
                default
            }
            Some(period) => default.with_period(period),
            None => default,
        }
    }

    /// `ENABLED` unless explicitly `DISABLED`.
    fn scan_mode(&self, key: &str) -> bool {
        match self.string(key) {
            None => true,
            Some(v) if v.eq_ignore_ascii_case("DISABLED") => false,
            Some(v) if v.eq_ignore_ascii_case("ENABLED") => true,
            Some(v) => {
                warn!(key, value = %v, "Unknown scan mode, falling back to ENABLED");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ConnectorConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConnectorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, ConnectorConfig::new());
        assert_eq!(config.fetch.batch_size, 25);
        assert_eq!(config.receive_mode, ReceiveMode::LongPoll);
        assert_eq!(config.webhook_port, 8080);
        assert_eq!(config.ledger.ack_grace, Duration::ZERO);
        assert!(config.tag_scan);
        assert!(config.activity_type_scan);
        assert_eq!(config.store.data_dir, None);
    }

    #[test]
    fn reads_store_settings() {
        let config = config_from(&[
            ("DATA_DIR", "/var/lib/connector"),
            ("REQUIRE_PERSISTENT_STORE", "TRUE"),
        ]);

        assert_eq!(
            config.store.data_dir,
            Some(PathBuf::from("/var/lib/connector"))
        );
        assert!(config.store.require_persistent);
    }

    #[test]
    fn reads_receive_mode_case_insensitively() {
        assert_eq!(
            config_from(&[("RECEIVE_POSTED_TIME", "webhook")]).receive_mode,
            ReceiveMode::Webhook
        );
        assert_eq!(
            config_from(&[("RECEIVE_POSTED_TIME", "DISABLED")]).receive_mode,
            ReceiveMode::Disabled
        );
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("RECEIVE_POSTED_TIME", "CARRIER_PIGEON"),
            ("LONG_POLL_BATCH_SIZE", "lots"),
            ("WEBHOOK_PORT", "99999"),
            ("TAG_SYNC_INTERVAL_MIN", "-1"),
        ]);

        assert_eq!(config, ConnectorConfig::new());
    }

    #[test]
    fn zero_batch_size_is_ignored() {
        let config = config_from(&[("LONG_POLL_BATCH_SIZE", "0")]);
        assert_eq!(config.fetch.batch_size, 25);
    }

    #[test]
    fn batch_size_override() {
        let config = config_from(&[("LONG_POLL_BATCH_SIZE", " 5 ")]);
        assert_eq!(config.fetch.batch_size, 5);
    }

    #[test]
    fn scan_modes() {
        let config = config_from(&[("TAG_SCAN", "DISABLED"), ("ACTIVITY_TYPE_SCAN", "maybe")]);
        assert!(!config.tag_scan);
        assert!(config.activity_type_scan);
    }

    #[test]
    fn interval_overrides_keep_initial_delay() {
        let config = config_from(&[
            ("TAG_SYNC_INTERVAL_MIN", "2"),
            ("ACTIVITY_TYPE_SYNC_SLOW_LOOP_INTERVAL_MIN", "30"),
        ]);

        assert_eq!(config.schedules.tags.period, Duration::from_secs(120));
        assert_eq!(config.schedules.tags.initial_delay, Duration::from_secs(15));
        assert_eq!(
            config.schedules.activity_types_slow_loop.period,
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            config.schedules.activity_types_slow_loop.initial_delay,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn zero_interval_is_ignored() {
        let config = config_from(&[("TAG_SYNC_SLOW_LOOP_INTERVAL_MIN", "0")]);
        assert_eq!(config.schedules.tags_slow_loop, JobSchedules::new().tags_slow_loop);
    }

    #[test]
    fn job_staleness_in_minutes() {
        let config = config_from(&[("HEALTH_MAX_MINS_SINCE_SUCCESS", "15")]);
        assert_eq!(config.job_max_staleness, Duration::from_secs(15 * 60));
    }

    #[test]
    fn oversized_minutes_fall_back_to_defaults() {
        let huge = (u64::MAX / 10).to_string();
        let config = config_from(&[
            ("HEALTH_MAX_MINS_SINCE_SUCCESS", huge.as_str()),
            ("TAG_SYNC_INTERVAL_MIN", huge.as_str()),
            ("ACTIVITY_TYPE_SYNC_SLOW_LOOP_INTERVAL_MIN", huge.as_str()),
        ]);

        assert_eq!(config, ConnectorConfig::new());
    }

    #[test]
    fn blank_caller_key_is_none() {
        assert_eq!(config_from(&[("CALLER_KEY", "  ")]).caller_key, None);
        assert_eq!(
            config_from(&[("CALLER_KEY", "secret")]).caller_key.as_deref(),
            Some("secret")
        );
    }

    #[test]
    fn log_level_is_passed_through() {
        let config = config_from(&[("LOG_LEVEL", "debug")]);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }
}
