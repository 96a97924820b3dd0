use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct PortrigConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
}

fn default_project_name() -> String {
    "portrig".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub path: Option<String>,
    pub command: String,
    pub port: u16,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub build: Option<BuildConfig>,
}

// ---------------------------------------------------------------------------
// Build gate
// ---------------------------------------------------------------------------

pub const DEFAULT_DEV_MARKERS: &[&str] = &[
    "@vite/client",
    "@react-refresh",
    "/src/",
    "vite-plugin-pwa",
    "@vite-plugin-pwa",
];

fn default_output_dir() -> String {
    "dist".to_string()
}

fn default_entry() -> String {
    "index.html".to_string()
}

fn default_dev_markers() -> Vec<String> {
    DEFAULT_DEV_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_build_env() -> BTreeMap<String, String> {
    BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())])
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BuildConfig {
    pub command: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default = "default_dev_markers")]
    pub dev_markers: Vec<String>,
    #[serde(
        default = "default_build_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default = "default_build_env")]
    pub env: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

fn default_kill_wait() -> Duration {
    Duration::from_millis(1500)
}

fn default_start_wait() -> Duration {
    Duration::from_millis(1200)
}

fn default_graceful_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_term_grace() -> Duration {
    Duration::from_secs(1)
}

fn default_max_kill_attempts() -> u32 {
    5
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(3)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Delay between reclaim attempts, and settle time after a kill.
    #[serde(default = "default_kill_wait", deserialize_with = "deserialize_duration")]
    pub kill_wait: Duration,
    /// Settle time after spawning, before verifying port ownership.
    #[serde(default = "default_start_wait", deserialize_with = "deserialize_duration")]
    pub start_wait: Duration,
    /// How long an owned process gets to exit after SIGTERM before its tree is killed.
    #[serde(
        default = "default_graceful_wait",
        deserialize_with = "deserialize_duration"
    )]
    pub graceful_wait: Duration,
    /// Terminator grace window between SIGTERM and SIGKILL.
    #[serde(default = "default_term_grace", deserialize_with = "deserialize_duration")]
    pub term_grace: Duration,
    #[serde(default = "default_max_kill_attempts")]
    pub max_kill_attempts: u32,
    /// Upper bound for every OS query (lsof, ss, netstat, taskkill).
    #[serde(
        default = "default_query_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub query_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            kill_wait: default_kill_wait(),
            start_wait: default_start_wait(),
            graceful_wait: default_graceful_wait(),
            term_grace: default_term_grace(),
            max_kill_attempts: default_max_kill_attempts(),
            query_timeout: default_query_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Name sweep
// ---------------------------------------------------------------------------

pub const DEFAULT_SWEEP_NAMES: &[&str] = &["node.exe", "node", "server.js", "vite", "npm.exe", "npm"];

fn default_true() -> bool {
    true
}

fn default_sweep_names() -> Vec<String> {
    DEFAULT_SWEEP_NAMES.iter().map(|n| n.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sweep_names")]
    pub names: Vec<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            names: default_sweep_names(),
        }
    }
}

// ---------------------------------------------------------------------------
// Durations: humantime strings ("1500ms", "2s") or bare integers (milliseconds)
// ---------------------------------------------------------------------------

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> de::Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration like \"1500ms\" or \"2s\", or milliseconds as an integer")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            humantime::parse_duration(value)
                .map_err(|e| E::custom(format!("invalid duration {:?}: {}", value, e)))
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_millis)
                .map_err(|_| E::custom(format!("duration must not be negative, got {}", value)))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
