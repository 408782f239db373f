use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Deployment mode. Anything but `prod` reads fixtures and truncates sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Test,
    #[default]
    Prod,
}

impl Mode {
    pub fn is_prod(&self) -> bool {
        matches!(self, Mode::Prod)
    }
}

/// Scheduler (monitor) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Minutes between monitor ticks
    #[serde(default = "default_system_periodicity")]
    pub system_periodicity: u64,
    /// Seconds each tick's window overlaps the next one
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: u64,
    /// Default hours between probes of monitored aimpoints
    #[serde(default = "default_monitor_frequency")]
    pub monitor_frequency: u64,
    /// Poll frequencies below this are raised to it
    #[serde(default = "default_min_poll_secs")]
    pub min_poll_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            system_periodicity: default_system_periodicity(),
            overlap_secs: default_overlap_secs(),
            monitor_frequency: default_monitor_frequency(),
            min_poll_secs: default_min_poll_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.system_periodicity * 60)
    }
}

fn default_system_periodicity() -> u64 {
    10
}

fn default_overlap_secs() -> u64 {
    30
}

fn default_monitor_frequency() -> u64 {
    1
}

fn default_min_poll_secs() -> u64 {
    10
}

/// Disabler/enabler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// Seconds of history the disabler inspects
    #[serde(default = "default_look_back")]
    pub disabler_look_back: u64,
    /// Seconds of history the enabler inspects
    #[serde(default = "default_look_back")]
    pub enabler_look_back: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub disabler_interval_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub enabler_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            disabler_look_back: default_look_back(),
            enabler_look_back: default_look_back(),
            disabler_interval_secs: default_sweep_interval_secs(),
            enabler_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_look_back() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    #[default]
    Local,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Working bucket holding aimpoints, overlays and history
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Delivery bucket handed to workers
    #[serde(default = "default_dst_bucket")]
    pub dst_bucket: String,
    /// Root directory for the `local` provider
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Root directory read in dev/test modes
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: PathBuf,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            bucket: default_bucket(),
            dst_bucket: default_dst_bucket(),
            root: default_root(),
            fixture_dir: default_fixture_dir(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_bucket() -> String {
    "highwaypatrol-wrk".to_string()
}

fn default_dst_bucket() -> String {
    "highwaypatrol-dst".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("data/bucket")
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_call_timeout_secs() -> u64 {
    10
}

/// Worker dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Worker invocation URL; `{region}` and `{worker}` are substituted
    #[serde(default = "default_invoke_endpoint")]
    pub invoke_endpoint: String,
    /// Prepended to the worker family name
    #[serde(default)]
    pub worker_prefix: String,
    /// Proxy values matching this pattern route to the VPC worker flavour
    #[serde(default = "default_vpc_proxy_pattern")]
    pub vpc_proxy_pattern: String,
    /// Egress proxy for invocation calls; `false` disables it
    #[serde(default, deserialize_with = "string_or_false")]
    pub proxy: Option<String>,
    /// Public-IP self-check endpoint probed at cold start
    pub chk_ip_url: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            invoke_endpoint: default_invoke_endpoint(),
            worker_prefix: String::new(),
            vpc_proxy_pattern: default_vpc_proxy_pattern(),
            proxy: None,
            chk_ip_url: None,
        }
    }
}

fn default_invoke_endpoint() -> String {
    "http://127.0.0.1:9000/{region}/workers/{worker}/invocations".to_string()
}

fn default_vpc_proxy_pattern() -> String {
    "whirl".to_string()
}

/// Accepts a proxy URL string, `false`, or nothing
fn string_or_false<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrBool {
        Str(String),
        Bool(bool),
    }

    match Option::<StringOrBool>::deserialize(deserializer)? {
        Some(StringOrBool::Str(s)) if s.is_empty() || s.eq_ignore_ascii_case("false") => Ok(None),
        Some(StringOrBool::Str(s)) => Ok(Some(s)),
        Some(StringOrBool::Bool(false)) | None => Ok(None),
        Some(StringOrBool::Bool(true)) => Err(serde::de::Error::custom(
            "proxy must be a URL string or false",
        )),
    }
}

/// Local delayed dispatch queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// Dispatcher tasks fed by the broker
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            workers: default_workers(),
            channel_size: default_channel_size(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Event surface configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// In-flight requests accepted before callers queue
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_payload_bytes() -> usize {
    256 * 1024
}

fn default_concurrency_limit() -> usize {
    64
}

/// Per-invocation deadlines (seconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeadlineConfig {
    #[serde(default = "default_sweep_deadline")]
    pub monitor_secs: u64,
    #[serde(default = "default_sweep_deadline")]
    pub lifecycle_secs: u64,
    #[serde(default = "default_dispatch_deadline")]
    pub dispatch_secs: u64,
    #[serde(default = "default_record_deadline")]
    pub record_secs: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            monitor_secs: default_sweep_deadline(),
            lifecycle_secs: default_sweep_deadline(),
            dispatch_secs: default_dispatch_deadline(),
            record_secs: default_record_deadline(),
        }
    }
}

impl DeadlineConfig {
    pub fn monitor(&self) -> Duration {
        Duration::from_secs(self.monitor_secs)
    }

    pub fn lifecycle(&self) -> Duration {
        Duration::from_secs(self.lifecycle_secs)
    }

    pub fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs)
    }

    pub fn record(&self) -> Duration {
        Duration::from_secs(self.record_secs)
    }
}

fn default_sweep_deadline() -> u64 {
    60
}

fn default_dispatch_deadline() -> u64 {
    30
}

fn default_record_deadline() -> u64 {
    10
}

/// Non-prod debugging knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebugConfig {
    /// Maximum items a sweep enumerates outside prod
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            iteration_limit: default_iteration_limit(),
        }
    }
}

fn default_iteration_limit() -> usize {
    5
}

impl Config {
    /// Cap applied to enumerated aimpoint lists, if any
    pub fn iteration_cap(&self) -> Option<usize> {
        (!self.mode.is_prod()).then_some(self.debug.iteration_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.mode, Mode::Prod);
        assert_eq!(config.scheduler.system_periodicity, 10);
        assert_eq!(config.scheduler.period(), Duration::from_secs(600));
        assert_eq!(config.scheduler.overlap_secs, 30);
        assert_eq!(config.lifecycle.disabler_look_back, 1800);
        assert_eq!(config.deadlines.dispatch(), Duration::from_secs(30));
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.iteration_cap(), None);
    }

    #[test]
    fn test_non_prod_iteration_cap() {
        let config: Config = toml::from_str("mode = \"dev\"\n[debug]\niteration_limit = 3").unwrap();
        assert_eq!(config.iteration_cap(), Some(3));
    }

    #[test]
    fn test_proxy_string_or_false() {
        let off: DispatchConfig = toml::from_str("proxy = false").unwrap();
        assert_eq!(off.proxy, None);

        let on: DispatchConfig = toml::from_str("proxy = \"http://squid:3128\"").unwrap();
        assert_eq!(on.proxy.as_deref(), Some("http://squid:3128"));

        let missing: DispatchConfig = toml::from_str("").unwrap();
        assert_eq!(missing.proxy, None);

        assert!(toml::from_str::<DispatchConfig>("proxy = true").is_err());
    }
}
