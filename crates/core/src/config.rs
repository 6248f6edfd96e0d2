use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::PowerMgmtError;
use crate::message::Scope;
use crate::resource::ResourceKind;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Profiled key lookup: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
struct EnvSource<'a> {
    profile: String,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvSource<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.opt(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "unparseable config value, using default");
                default
            }),
            None => default,
        }
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.opt(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub queues: QueueConfig,
    pub aws: AwsConfig,
    pub scopes: ScopeConfig,
    pub schedule: ScheduleConfig,
    pub worker: WorkerConfig,
    pub convergence: ConvergenceConfig,
    pub dispatch: DispatchConfig,
    pub alerts: AlertConfig,
    pub maintenance: MaintenanceConfig,
    pub identity: IdentityConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `POWERMGMT_PROFILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build config from any key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let profile = lookup("POWERMGMT_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        let src = EnvSource {
            profile: profile.clone(),
            lookup: &lookup,
        };
        Self {
            profile,
            queues: QueueConfig::from_source(&src),
            aws: AwsConfig::from_source(&src),
            scopes: ScopeConfig::from_source(&src),
            schedule: ScheduleConfig::from_source(&src),
            worker: WorkerConfig::from_source(&src),
            convergence: ConvergenceConfig::from_source(&src),
            dispatch: DispatchConfig::from_source(&src),
            alerts: AlertConfig::from_source(&src),
            maintenance: MaintenanceConfig::from_source(&src),
            identity: IdentityConfig::from_source(&src),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), PowerMgmtError> {
        if self.worker.concurrency == 0 {
            return Err(PowerMgmtError::Config("WORKER_CONCURRENCY must be at least 1".into()));
        }
        if self.schedule.tick_minutes == 0 {
            return Err(PowerMgmtError::Config("TRIGGER_INTERVAL must be at least 1 minute".into()));
        }
        if self.schedule.offset().is_none() {
            return Err(PowerMgmtError::Config(format!(
                "SCHEDULE_UTC_OFFSET_MINUTES out of range: {}",
                self.schedule.utc_offset_minutes
            )));
        }
        if self.convergence.max_retries == 0 {
            return Err(PowerMgmtError::Config(
                "DEFERRED_CHECK_MAX_RETRIES must be at least 1".into(),
            ));
        }
        if self.convergence.max_delay_secs < self.convergence.base_delay_secs {
            return Err(PowerMgmtError::Config(
                "DEFERRED_CHECK_MAX_DELAY_SECS must not be below DEFERRED_CHECK_DELAY_SECS".into(),
            ));
        }
        if self.queues.backend == QueueBackend::Sqs && self.queues.sqs_url_prefix.is_none() {
            return Err(PowerMgmtError::Config(
                "QUEUE_BACKEND=sqs requires SQS_QUEUE_URL_PREFIX".into(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  queues:      backend={:?}, scans={}, events={}, updates={}, checks={}",
            self.queues.backend,
            self.queues.scans,
            self.queues.power_events,
            self.queues.update_events,
            self.queues.deferred_checks
        );
        tracing::info!(
            "  scopes:      subs={}, mgs={}, kinds={:?}",
            self.scopes.subscriptions.len(),
            self.scopes.management_groups.len(),
            self.scopes.enabled_kinds
        );
        tracing::info!(
            "  schedule:    tick={}m, offset={}m, order={:?}, catch_up={:?}",
            self.schedule.tick_minutes,
            self.schedule.utc_offset_minutes,
            self.schedule.day_order,
            self.schedule.catch_up
        );
        tracing::info!(
            "  worker:      concurrency={}, max_retries={}",
            self.worker.concurrency,
            self.convergence.max_retries
        );
        tracing::info!(
            "  identity:    endpoint={}, token={}, client_id={}",
            self.identity.arm_endpoint,
            if self.identity.access_token.is_some() { "static" } else { "(none)" },
            self.identity.client_id.as_deref().unwrap_or("(none)")
        );
    }
}

// ── Queues ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Sqs,
}

impl FromStr for QueueBackend {
    type Err = PowerMgmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(QueueBackend::Memory),
            "sqs" => Ok(QueueBackend::Sqs),
            other => Err(PowerMgmtError::Config(format!("unknown queue backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub storage_account: Option<String>,
    /// Subscription/discovery processing queue.
    pub scans: String,
    /// Normal power-management events queue.
    pub power_events: String,
    /// Update-management subscription queue.
    pub update_events: String,
    /// Deferred convergence-check queue.
    pub deferred_checks: String,
    pub visibility_timeout_secs: u32,
    pub receive_batch: u32,
    pub sqs_url_prefix: Option<String>,
}

impl QueueConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            backend: src.parsed("QUEUE_BACKEND", QueueBackend::Memory),
            storage_account: src.opt("STORAGE_ACCOUNT"),
            scans: src.or("QUEUE_PROCESS_SUBS", "process-subs"),
            power_events: src.or("QUEUE_POWERMGMT_EVENTS", "powermgmt-events"),
            update_events: src.or("QUEUE_PROCESS_UPDATEMGMT_EVENT", "updatemgmt-events"),
            deferred_checks: src.or("QUEUE_POWERMGMT_DEFERRED_CHECKS", "powermgmt-deferred-checks"),
            visibility_timeout_secs: src.parsed("QUEUE_VISIBILITY_TIMEOUT_SECS", 30),
            receive_batch: src.parsed("QUEUE_RECEIVE_BATCH", 10),
            sqs_url_prefix: src.opt("SQS_QUEUE_URL_PREFIX"),
        }
    }

    /// Full SQS URL for a queue name.
    pub fn queue_url(&self, name: &str) -> Option<String> {
        self.sqs_url_prefix
            .as_deref()
            .map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), name))
    }
}

// ── AWS (SQS backend) ─────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            region: src.or("AWS_REGION", "ap-southeast-2"),
            access_key_id: src.opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: src.opt("AWS_SECRET_ACCESS_KEY"),
            session_token: src.opt("AWS_SESSION_TOKEN"),
            endpoint_url: src.opt("QUEUE_AWS_ENDPOINT_URL"),
        }
    }
}

impl std::fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "********");
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("access_key_id", &mask(&self.access_key_id))
            .field("secret_access_key", &mask(&self.secret_access_key))
            .field("session_token", &mask(&self.session_token))
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

// ── Scopes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub subscriptions: Vec<String>,
    pub management_groups: Vec<String>,
    /// Management group queried for maintenance-run targets.
    pub inventory_scope: Option<String>,
    pub enabled_kinds: Vec<ResourceKind>,
}

impl ScopeConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        let requested = src.list("TYPES_ENABLED");
        let enabled_kinds = if requested.is_empty() {
            ResourceKind::ALL.to_vec()
        } else {
            requested
                .iter()
                .filter_map(|code| {
                    let kind = ResourceKind::from_feature_code(code);
                    if kind.is_none() {
                        tracing::warn!(code = %code, "ignoring unknown TYPES_ENABLED entry");
                    }
                    kind
                })
                .collect()
        };
        Self {
            subscriptions: src.list("SUB_SCOPES"),
            management_groups: src.list("MG_SCOPES"),
            inventory_scope: src.opt("RESOURCEGRAPH_MG_SCOPE"),
            enabled_kinds,
        }
    }

    /// Scopes scanned each tick. Subscription scopes win over management groups.
    pub fn scan_scopes(&self) -> Vec<Scope> {
        if !self.subscriptions.is_empty() {
            self.subscriptions.iter().cloned().map(Scope::Subscription).collect()
        } else {
            self.management_groups
                .iter()
                .cloned()
                .map(Scope::ManagementGroup)
                .collect()
        }
    }

    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }
}

// ── Schedule evaluation ───────────────────────────────────────

/// Which weekday the first entry of a day-time list refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOrder {
    MondayFirst,
    SundayFirst,
}

impl FromStr for DayOrder {
    type Err = PowerMgmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monday" | "mon" | "monday_first" => Ok(DayOrder::MondayFirst),
            "sunday" | "sun" | "sunday_first" => Ok(DayOrder::SundayFirst),
            other => Err(PowerMgmtError::Config(format!("unknown day order '{other}'"))),
        }
    }
}

/// Whether scheduled times that fell into missed ticks are applied late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpPolicy {
    Skip,
    CatchUp,
}

impl FromStr for CatchUpPolicy {
    type Err = PowerMgmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(CatchUpPolicy::Skip),
            "catch_up" | "catchup" => Ok(CatchUpPolicy::CatchUp),
            other => Err(PowerMgmtError::Config(format!("unknown catch-up policy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub tick_minutes: u32,
    /// Offset of the local time that tag times are written in.
    pub utc_offset_minutes: i32,
    pub day_order: DayOrder,
    pub catch_up: CatchUpPolicy,
    pub catch_up_max_minutes: u32,
    pub public_holidays: Vec<NaiveDate>,
}

impl ScheduleConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        let public_holidays = src
            .list("PUBLIC_HOLIDAYS")
            .iter()
            .filter_map(|d| match NaiveDate::parse_from_str(d, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(e) => {
                    tracing::warn!(date = %d, error = %e, "ignoring unparseable public holiday");
                    None
                }
            })
            .collect();
        Self {
            tick_minutes: src.parsed("TRIGGER_INTERVAL", 5),
            utc_offset_minutes: src.parsed("SCHEDULE_UTC_OFFSET_MINUTES", 0),
            day_order: src.parsed("DAY_LIST_ORDER", DayOrder::MondayFirst),
            catch_up: src.parsed("CATCH_UP_POLICY", CatchUpPolicy::Skip),
            catch_up_max_minutes: src.parsed("CATCH_UP_MAX_MINUTES", 60),
            public_holidays,
        }
    }

    pub fn tick(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.tick_minutes))
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_minutes: 5,
            utc_offset_minutes: 0,
            day_order: DayOrder::MondayFirst,
            catch_up: CatchUpPolicy::Skip,
            catch_up_max_minutes: 60,
            public_holidays: Vec::new(),
        }
    }
}

// ── Worker pool ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Consumers per queue.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            concurrency: src.parsed("WORKER_CONCURRENCY", 4),
            poll_interval_ms: src.parsed("QUEUE_POLL_INTERVAL_MS", 1000),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Convergence ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub backoff: u32,
}

impl ConvergenceConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            max_retries: src.parsed("DEFERRED_CHECK_MAX_RETRIES", 10),
            base_delay_secs: src.parsed("DEFERRED_CHECK_DELAY_SECS", 60),
            max_delay_secs: src.parsed("DEFERRED_CHECK_MAX_DELAY_SECS", 300),
            backoff: src.parsed("DEFERRED_CHECK_BACKOFF", 2),
        }
    }

    /// Visibility delay for the `n`th backoff step, counting from zero.
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = u64::from(self.backoff.max(1)).saturating_pow(n);
        Duration::from_secs(
            self.base_delay_secs
                .saturating_mul(factor)
                .min(self.max_delay_secs),
        )
    }

    /// Upper bound on how long one action may stay in flight.
    pub fn action_lease(&self) -> Duration {
        let total: u64 = (0..=self.max_retries)
            .map(|n| self.delay_for(n).as_secs())
            .sum();
        // Queue redelivery and control-plane latency on top of the visibility delays.
        Duration::from_secs(total + self.max_delay_secs)
    }
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_secs: 60,
            max_delay_secs: 300,
            backoff: 2,
        }
    }
}

// ── Dispatch retry ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl DispatchConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            retry_attempts: src.parsed("CONTROL_RETRY_ATTEMPTS", 4),
            retry_base_ms: src.parsed("CONTROL_RETRY_BASE_MS", 2000),
            retry_max_ms: src.parsed("CONTROL_RETRY_MAX_MS", 6000),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .retry_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.retry_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 4,
            retry_base_ms: 2000,
            retry_max_ms: 6000,
        }
    }
}

// ── Alert suppression ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub suppression_minutes: u32,
}

impl AlertConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            suppression_minutes: src.parsed("ALERT_SUPPRESSION_MINUTES", 30),
        }
    }

    /// `None` when suppression is disabled.
    pub fn suppression(&self) -> Option<Duration> {
        (self.suppression_minutes > 0)
            .then(|| Duration::from_secs(u64::from(self.suppression_minutes) * 60))
    }
}

// ── Maintenance ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub override_grace_minutes: u32,
}

impl MaintenanceConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            override_grace_minutes: src.parsed("MAINTENANCE_OVERRIDE_GRACE_MINUTES", 60),
        }
    }

    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.override_grace_minutes))
    }
}

// ── Identity ──────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub arm_endpoint: String,
    pub access_token: Option<String>,
    pub client_id: Option<String>,
}

impl IdentityConfig {
    fn from_source(src: &EnvSource<'_>) -> Self {
        Self {
            arm_endpoint: src.or("ARM_ENDPOINT", "https://management.azure.com"),
            access_token: src.opt("ARM_ACCESS_TOKEN"),
            client_id: src.opt("CLIENT_ID"),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("arm_endpoint", &self.arm_endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish()
    }
}
