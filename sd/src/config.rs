//! signald configuration types and loading

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::domain::{CYCLE_OVERHEAD, GREEN_TO_RED};

/// Main signald configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Cycle and coordination timing
    pub timing: TimingConfig,

    /// Transport and loopback bus settings
    pub transport: TransportConfig,

    /// Detection pipeline settings
    pub pipeline: PipelineConfig,

    /// Count sink retry policy
    pub sink: SinkConfig,

    /// Video stream address per lane, in lane order
    pub streams: StreamsConfig,

    /// Authority simulator used by `sd run`
    pub authority: AuthorityConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        let t = &self.timing;
        if t.startup_publish_lead_secs >= t.startup_delay_secs {
            return Err(eyre!(
                "timing.startup-publish-lead-secs ({}) must be below timing.startup-delay-secs ({})",
                t.startup_publish_lead_secs,
                t.startup_delay_secs
            ));
        }
        if !(t.default_green_secs.is_finite() && t.default_green_secs > 0.0) {
            return Err(eyre!("timing.default-green-secs must be positive"));
        }
        if t.status_interval_ms == 0 || t.tick_interval_ms == 0 || t.countdown_interval_secs == 0 {
            return Err(eyre!("timing intervals must be non-zero"));
        }
        let window = GREEN_TO_RED.as_secs();
        let cycle = t.default_green() + CYCLE_OVERHEAD;
        if t.handoff_lead_secs < window || t.handoff_lead() >= cycle {
            return Err(eyre!(
                "timing.handoff-lead-secs ({}) must cover the {}s green-to-red window and stay below the {}s cycle",
                t.handoff_lead_secs,
                window,
                cycle.as_secs()
            ));
        }
        if self.authority.report_interval_secs == 0 {
            return Err(eyre!("authority.report-interval-secs must be non-zero"));
        }

        for (name, rate) in [
            ("transport.drop-rate", self.transport.drop_rate),
            ("transport.duplicate-rate", self.transport.duplicate_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(eyre!("{} must be within [0, 1], got {}", name, rate));
            }
        }

        if self.pipeline.frame_queue == 0 || self.pipeline.result_queue == 0 {
            return Err(eyre!("pipeline queue capacities must be non-zero"));
        }
        if self.pipeline.inference_timeout_ms == 0 {
            return Err(eyre!("pipeline.inference-timeout-ms must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.pipeline.min_confidence) {
            return Err(eyre!("pipeline.min-confidence must be within [0, 1]"));
        }

        if self.streams.urls.len() != crate::domain::LaneId::COUNT {
            return Err(eyre!(
                "streams.urls must list exactly {} streams, got {}",
                crate::domain::LaneId::COUNT,
                self.streams.urls.len()
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .signald.yml
        let local_config = PathBuf::from(".signald.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/signald/signald.yml
        if let Some(user_config) = Self::user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(".signald.yml"))
                .chain(Self::user_config_path())
                .collect(),
        };

        candidates
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("signald").join("signald.yml"))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Cycle and coordination timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Time from process start until the first lane goes active
    #[serde(rename = "startup-delay-secs", default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// How long before the startup delay lane 1 publishes its own data
    #[serde(rename = "startup-publish-lead-secs", default = "default_startup_publish_lead_secs")]
    pub startup_publish_lead_secs: u64,

    /// Green duration used until the authority reports one
    #[serde(rename = "default-green-secs", default = "default_green_secs")]
    pub default_green_secs: f64,

    /// Remaining time at which the handoff payload is published
    #[serde(rename = "handoff-lead-secs", default = "default_handoff_lead_secs")]
    pub handoff_lead_secs: u64,

    /// Slack past the total cycle before a handoff is forced
    #[serde(rename = "timeout-grace-secs", default = "default_timeout_grace_secs")]
    pub timeout_grace_secs: u64,

    /// Cadence of local countdown publications
    #[serde(rename = "countdown-interval-secs", default = "default_countdown_interval_secs")]
    pub countdown_interval_secs: u64,

    /// Quiet period another lane must respect after a countdown publication
    #[serde(rename = "countdown-cooldown-secs", default = "default_countdown_cooldown_secs")]
    pub countdown_cooldown_secs: u64,

    /// Status-sync tick (lane status publication and timeout guard)
    #[serde(rename = "status-interval-ms", default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Cycle evaluation tick for the processing worker
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_startup_delay_secs() -> u64 {
    debug!("default_startup_delay_secs: called");
    20
}

fn default_startup_publish_lead_secs() -> u64 {
    debug!("default_startup_publish_lead_secs: called");
    2
}

fn default_green_secs() -> f64 {
    debug!("default_green_secs: called");
    20.0
}

fn default_handoff_lead_secs() -> u64 {
    debug!("default_handoff_lead_secs: called");
    4
}

fn default_timeout_grace_secs() -> u64 {
    debug!("default_timeout_grace_secs: called");
    5
}

fn default_countdown_interval_secs() -> u64 {
    debug!("default_countdown_interval_secs: called");
    2
}

fn default_countdown_cooldown_secs() -> u64 {
    debug!("default_countdown_cooldown_secs: called");
    3
}

fn default_status_interval_ms() -> u64 {
    debug!("default_status_interval_ms: called");
    1000
}

fn default_tick_interval_ms() -> u64 {
    debug!("default_tick_interval_ms: called");
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        debug!("TimingConfig::default: called");
        Self {
            startup_delay_secs: 20,
            startup_publish_lead_secs: 2,
            default_green_secs: 20.0,
            handoff_lead_secs: 4,
            timeout_grace_secs: 5,
            countdown_interval_secs: 2,
            countdown_cooldown_secs: 3,
            status_interval_ms: 1000,
            tick_interval_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Point after start at which lane 1 publishes its own data
    pub fn startup_publish_at(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs.saturating_sub(self.startup_publish_lead_secs))
    }

    pub fn default_green(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_green_secs).unwrap_or(Duration::from_secs(20))
    }

    pub fn handoff_lead(&self) -> Duration {
        Duration::from_secs(self.handoff_lead_secs)
    }

    pub fn timeout_grace(&self) -> Duration {
        Duration::from_secs(self.timeout_grace_secs)
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_secs(self.countdown_interval_secs)
    }

    pub fn countdown_cooldown(&self) -> Duration {
        Duration::from_secs(self.countdown_cooldown_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Transport and loopback bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Client id prefix; lane clients are named `<prefix>-<id>`
    #[serde(rename = "client-prefix", default = "default_client_prefix")]
    pub client_prefix: String,

    /// Pause before the single reconnect+resend attempt
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Channel buffer size for bus requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Channel buffer size for each client's inbox
    #[serde(rename = "client-buffer", default = "default_client_buffer")]
    pub client_buffer: usize,

    /// Probability that a delivery is silently lost
    #[serde(rename = "drop-rate", default)]
    pub drop_rate: f64,

    /// Probability that a delivery arrives twice
    #[serde(rename = "duplicate-rate", default)]
    pub duplicate_rate: f64,

    /// Upper bound of random per-delivery delay, which reorders messages
    #[serde(rename = "reorder-jitter-ms", default)]
    pub reorder_jitter_ms: u64,
}

fn default_client_prefix() -> String {
    debug!("default_client_prefix: called");
    "lane".to_string()
}

fn default_retry_delay_ms() -> u64 {
    debug!("default_retry_delay_ms: called");
    200
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

fn default_client_buffer() -> usize {
    debug!("default_client_buffer: called");
    256
}

impl Default for TransportConfig {
    fn default() -> Self {
        debug!("TransportConfig::default: called");
        Self {
            client_prefix: default_client_prefix(),
            retry_delay_ms: 200,
            channel_buffer: 1000,
            client_buffer: 256,
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_jitter_ms: 0,
        }
    }
}

impl TransportConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reorder_jitter(&self) -> Duration {
        Duration::from_millis(self.reorder_jitter_ms)
    }

    /// True when any fault injection is switched on
    pub fn is_lossy(&self) -> bool {
        self.drop_rate > 0.0 || self.duplicate_rate > 0.0 || self.reorder_jitter_ms > 0
    }
}

/// Detection pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frames buffered between acquisition and processing
    #[serde(rename = "frame-queue", default = "default_frame_queue")]
    pub frame_queue: usize,

    /// Results buffered between processing and rendering
    #[serde(rename = "result-queue", default = "default_result_queue")]
    pub result_queue: usize,

    /// Detections below this confidence are discarded
    #[serde(rename = "min-confidence", default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Connection attempts per reconnect round
    #[serde(rename = "connect-attempts", default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Pause between connection attempts
    #[serde(rename = "reconnect-backoff-ms", default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Frame pacing for the synthetic source
    #[serde(rename = "frame-interval-ms", default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// How long a worker waits on a queue before re-checking its running flag
    #[serde(rename = "poll-timeout-ms", default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Longest a single detection may take before the frame is skipped
    #[serde(rename = "inference-timeout-ms", default = "default_inference_timeout_ms")]
    pub inference_timeout_ms: u64,
}

fn default_frame_queue() -> usize {
    debug!("default_frame_queue: called");
    32
}

fn default_result_queue() -> usize {
    debug!("default_result_queue: called");
    16
}

fn default_min_confidence() -> f32 {
    debug!("default_min_confidence: called");
    0.60
}

fn default_connect_attempts() -> u32 {
    debug!("default_connect_attempts: called");
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    debug!("default_reconnect_backoff_ms: called");
    3000
}

fn default_frame_interval_ms() -> u64 {
    debug!("default_frame_interval_ms: called");
    40
}

fn default_poll_timeout_ms() -> u64 {
    debug!("default_poll_timeout_ms: called");
    100
}

fn default_inference_timeout_ms() -> u64 {
    debug!("default_inference_timeout_ms: called");
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        debug!("PipelineConfig::default: called");
        Self {
            frame_queue: 32,
            result_queue: 16,
            min_confidence: 0.60,
            connect_attempts: 3,
            reconnect_backoff_ms: 3000,
            frame_interval_ms: 40,
            poll_timeout_ms: 100,
            inference_timeout_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

/// Count sink retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(rename = "max-attempts", default = "default_sink_max_attempts")]
    pub max_attempts: u32,

    /// Backoff grows linearly: attempt n waits n * backoff
    #[serde(rename = "backoff-ms", default = "default_sink_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_sink_max_attempts() -> u32 {
    debug!("default_sink_max_attempts: called");
    3
}

fn default_sink_backoff_ms() -> u64 {
    debug!("default_sink_backoff_ms: called");
    200
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 200,
        }
    }
}

impl SinkConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Video stream address per lane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub urls: Vec<String>,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            urls: (1..=4).map(|i| format!("rtsp://localhost:8554/cctv{}", i)).collect(),
        }
    }
}

impl StreamsConfig {
    pub fn url_for(&self, lane: crate::domain::LaneId) -> Option<&str> {
        self.urls.get(lane.index()).map(String::as_str)
    }
}

/// Authority simulator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Run the simulator alongside the lanes
    #[serde(default = "default_authority_enabled")]
    pub enabled: bool,

    /// Cadence of authority countdown reports
    #[serde(rename = "report-interval-secs", default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// Force rush-hour durations regardless of the local hour
    #[serde(rename = "rush-hour", default)]
    pub rush_hour: Option<bool>,
}

fn default_authority_enabled() -> bool {
    debug!("default_authority_enabled: called");
    true
}

fn default_report_interval_secs() -> u64 {
    debug!("default_report_interval_secs: called");
    2
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: 2,
            rush_hour: None,
        }
    }
}

impl AuthorityConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}
