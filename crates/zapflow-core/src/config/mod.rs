mod defaults;
mod providers;


pub use providers::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ZapError;
use defaults::*;

/// Top-level zapflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub zapflow: ZapflowConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// General instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZapflowConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Identifies this instance (one WhatsApp number) in shared storage.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Conversation that receives admin alerts. Empty = alerts are only recorded.
    #[serde(default)]
    pub admin_target: String,
    /// System prompt sent with every model invocation.
    #[serde(default)]
    pub system_prompt: String,
}

impl Default for ZapflowConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            instance_id: default_instance_id(),
            log_level: default_log_level(),
            admin_target: String::new(),
            system_prompt: String::new(),
        }
    }
}

/// Memory config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Scheduled-message dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max due jobs fetched per scope per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

/// Multi-input aggregation (debounce) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Quiet period before a burst is flushed. `<= 0` disables buffering.
    #[serde(default = "default_aggregator_delay")]
    pub delay_secs: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_aggregator_delay(),
        }
    }
}

/// Response assembly and delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Single character separating delivery segments.
    #[serde(default = "default_segment_delimiter")]
    pub segment_delimiter: char,
    /// Everything from this token on is never shown to the contact.
    #[serde(default = "default_instructions_separator")]
    pub instructions_separator: String,
    /// Used when neither text nor command notes survive. Empty = none.
    #[serde(default)]
    pub fallback_text: String,
    /// Random pick sent when a response has no visible content.
    #[serde(default = "default_apologies")]
    pub apologies: Vec<String>,
    /// Local media directives must resolve inside this directory.
    #[serde(default = "default_asset_root")]
    pub asset_root: String,
    #[serde(default = "default_boomerang_prompt")]
    pub boomerang_prompt: String,
    #[serde(default = "default_boomerang_note")]
    pub boomerang_note: String,
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
    /// Recent outgoing texts remembered for echo suppression.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            segment_delimiter: default_segment_delimiter(),
            instructions_separator: default_instructions_separator(),
            fallback_text: String::new(),
            apologies: default_apologies(),
            asset_root: default_asset_root(),
            boomerang_prompt: default_boomerang_prompt(),
            boomerang_note: default_boomerang_note(),
            fetch_max_chars: default_fetch_max_chars(),
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl(),
        }
    }
}

/// Availability rules for the connected calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Calendar identifier at the backend (empty = no calendar connected).
    #[serde(default)]
    pub calendar_id: String,
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_hours: i64,
    #[serde(default = "default_work_start")]
    pub work_start: String,
    #[serde(default = "default_work_end")]
    pub work_end: String,
    /// ISO weekdays (1 = Monday .. 7 = Sunday).
    #[serde(default = "default_work_days")]
    pub work_days: Vec<u32>,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            calendar_id: String::new(),
            timezone_offset_hours: default_timezone_offset(),
            work_start: default_work_start(),
            work_end: default_work_end(),
            work_days: default_work_days(),
            slot_minutes: default_slot_minutes(),
        }
    }
}

/// Outbound mail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
        }
    }
}

/// Outbound messaging transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint receiving outbound payloads as JSON. Empty = disconnected.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub api_token: String,
}

/// HTTP API configuration: inbound messages and manual scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, ZapError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ZapError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    parse(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, ZapError> {
    let config: Config = toml::from_str(content)
        .map_err(|e| ZapError::Config(format!("failed to parse config: {}", e)))?;

    if config.response.instructions_separator.trim().is_empty() {
        return Err(ZapError::Config(
            "response.instructions_separator must not be empty".to_string(),
        ));
    }
    if config.scheduler.poll_interval_secs == 0 {
        return Err(ZapError::Config(
            "scheduler.poll_interval_secs must be greater than zero".to_string(),
        ));
    }
    Ok(config)
}
