use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Sitepulse — streams website performance assessments over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "sitepulse")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// HTTP port for the assessment API
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Page metrics provider used by the probes and the load generator
    #[arg(long = "provider", value_enum, default_value_t = ProviderChoice::Http)]
    pub provider: ProviderChoice,

    /// Base URL of the browser-automation bridge (required for --provider bridge)
    #[arg(long = "bridge-url")]
    pub bridge_url: Option<String>,

    /// Whether link and mobile probes inspect the page or simulate results
    #[arg(long = "probe-mode", value_enum, default_value_t = ProbeMode::Measured)]
    pub probe_mode: ProbeMode,

    /// JSON file holding default request settings
    #[arg(short = 's', long = "settings-file")]
    pub settings_file: Option<PathBuf>,

    /// Directory for daily rolling log files
    #[arg(short = 'l', long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Upper bound accepted for the `concurrent` request field
    #[arg(long = "max-concurrency", default_value_t = MAX_CONCURRENCY)]
    pub max_concurrency: u32,

    /// Upper bound accepted for the `duration` request field, in seconds
    #[arg(long = "max-duration", default_value_t = MAX_DURATION_SECS)]
    pub max_duration: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the assessment API (default)
    Serve,
    /// Assess a single URL and print the NDJSON stream to stdout
    Run {
        url: String,
        #[arg(short = 'c', long = "concurrent")]
        concurrent: Option<u32>,
        #[arg(short = 'd', long = "duration")]
        duration: Option<u64>,
        /// Comma-separated stage names, e.g. load_time,mobile
        #[arg(long = "stages", value_delimiter = ',')]
        stages: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderChoice {
    Http,
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    Simulated,
    Measured,
}

/// Delays and timeouts used by a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub head_timeout: Duration,
    pub navigation_timeout: Duration,
    pub connect_timeout: Duration,
    pub batch_pause: Duration,
    pub update_delay: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            head_timeout: Duration::from_secs(HEAD_TIMEOUT_SECS),
            navigation_timeout: Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            batch_pause: Duration::from_millis(BATCH_PAUSE_MS),
            update_delay: Duration::from_millis(PROBE_UPDATE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssessorConfig {
    pub port: u16,
    pub provider: ProviderChoice,
    pub bridge_url: Option<String>,
    pub probe_mode: ProbeMode,
    pub settings_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub max_concurrency: u32,
    pub max_duration: u64,
    pub tuning: PipelineTuning,
}

// Port constants
pub const DEFAULT_PORT: u16 = 9880;

// Request limits
pub const MAX_CONCURRENCY: u32 = 100;
pub const MAX_DURATION_SECS: u64 = 300;
pub const DEFAULT_CONCURRENCY: u32 = 10;
pub const DEFAULT_DURATION_SECS: u64 = 30;

// Timeouts
pub const HEAD_TIMEOUT_SECS: u64 = 10;
pub const NAVIGATION_TIMEOUT_SECS: u64 = 30;
pub const CONNECT_TIMEOUT_MS: u64 = 2_000;
pub const BRIDGE_COLLECTION_WINDOW_MS: u64 = 3_000;

// Pacing
pub const BATCH_PAUSE_MS: u64 = 1_000;
pub const PROBE_UPDATE_DELAY_MS: u64 = 300;

// Probe bounds
pub const MAX_LINKS: usize = 50;
pub const LINK_CHECK_BATCH: usize = 10;
pub const SIMULATED_LINK_CANDIDATES: usize = 20;
pub const SIMULATED_LINK_BATCHES: usize = 5;
pub const MAX_FORMS: usize = 3;

// Load-time fallback range (seconds), used when the HEAD probe fails
pub const FALLBACK_LOAD_TIME_MIN: f64 = 2.0;
pub const FALLBACK_LOAD_TIME_MAX: f64 = 4.0;
pub const LOCAL_LOAD_TIME_SECS: f64 = 0.3;

// Event channel depth per run
pub const EVENT_CHANNEL_SIZE: usize = 64;
/// How long a stopped run waits for buffer space to deliver its notice.
pub const STOP_NOTICE_TIMEOUT_MS: u64 = 2_000;

// Log constants
pub const LOG_BUFFER_SIZE: usize = 500;

// Mobile breakpoints probed by the simulated mobile stage: (label, width)
pub const MOBILE_BREAKPOINTS: &[(&str, u32)] = &[
    ("phone", 375),
    ("phablet", 480),
    ("tablet", 768),
    ("desktop", 1366),
];

impl AssessorConfig {
    pub fn from_args(args: &CliArgs) -> Self {
        AssessorConfig {
            port: args.port,
            provider: args.provider,
            bridge_url: args.bridge_url.clone(),
            probe_mode: args.probe_mode,
            settings_file: args.settings_file.clone(),
            log_dir: args.log_dir.clone(),
            max_concurrency: args.max_concurrency.max(1),
            max_duration: args.max_duration.max(1),
            tuning: PipelineTuning::default(),
        }
    }
}

impl Default for AssessorConfig {
    fn default() -> Self {
        AssessorConfig {
            port: DEFAULT_PORT,
            provider: ProviderChoice::Http,
            bridge_url: None,
            probe_mode: ProbeMode::Measured,
            settings_file: None,
            log_dir: None,
            max_concurrency: MAX_CONCURRENCY,
            max_duration: MAX_DURATION_SECS,
            tuning: PipelineTuning::default(),
        }
    }
}
