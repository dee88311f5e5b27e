//! Configuration for multispace.
//!
//! Settings are read from `multispace.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [provider]
//! hostname = "app.terraform.io"
//! token = "..."
//! ssl_skip_verify = false
//!
//! [run]
//! organization = "acme"
//! workspace = "networking"
//! manual_confirm = false
//! retry = true
//! retry_attempts = 3
//! retry_backoff_min = 1
//! retry_backoff_max = 30
//! strict_update = false
//!
//! [poll]
//! backoff_min_ms = 1000
//! backoff_max_ms = 3000
//! progress_interval_secs = 30
//!
//! [timeouts]
//! create_minutes = 15
//! delete_minutes = 15
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::lifecycle::RetryPolicy;
use crate::poller::PollConfig;
use crate::resource::RunSettings;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE: &str = "multispace.toml";

pub const DEFAULT_HOSTNAME: &str = "app.terraform.io";

/// Connection to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// API token; falls back to `TFE_TOKEN` and the Terraform CLI credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub ssl_skip_verify: bool,
}

fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            token: None,
            ssl_skip_verify: false,
        }
    }
}

/// Target workspace and attempt policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub workspace: String,
    /// Wait for a human to confirm the plan in the web UI
    #[serde(default)]
    pub manual_confirm: bool,
    /// Retry attempts whose run errors
    #[serde(default = "default_retry")]
    pub retry: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Seconds
    #[serde(default = "default_retry_backoff_min")]
    pub retry_backoff_min: u64,
    /// Seconds
    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max: u64,
    /// Reject `update` instead of ignoring it
    #[serde(default)]
    pub strict_update: bool,
}

fn default_retry() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_min() -> u64 {
    1
}

fn default_retry_backoff_max() -> u64 {
    30
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            organization: String::new(),
            workspace: String::new(),
            manual_confirm: false,
            retry: default_retry(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_min: default_retry_backoff_min(),
            retry_backoff_max: default_retry_backoff_max(),
            strict_update: false,
        }
    }
}

/// Poll loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

fn default_backoff_min_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    3000
}

fn default_progress_interval_secs() -> u64 {
    30
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_timeout_minutes")]
    pub create_minutes: u64,
    #[serde(default = "default_timeout_minutes")]
    pub delete_minutes: u64,
}

fn default_timeout_minutes() -> u64 {
    15
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            create_minutes: default_timeout_minutes(),
            delete_minutes: default_timeout_minutes(),
        }
    }
}

/// Root of `multispace.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultispaceConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub organization: Option<String>,
    pub workspace: Option<String>,
    pub manual_confirm: Option<bool>,
    pub retry: Option<bool>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff_min: Option<u64>,
    pub retry_backoff_max: Option<u64>,
    pub timeout_minutes: Option<u64>,
}

impl MultispaceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse multispace.toml")
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize multispace.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `TFE_HOSTNAME`, `TFE_TOKEN` and `TFE_SSL_SKIP_VERIFY`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(hostname) = lookup("TFE_HOSTNAME").filter(|v| !v.is_empty()) {
            self.provider.hostname = hostname;
        }
        if let Some(token) = lookup("TFE_TOKEN").filter(|v| !v.is_empty()) {
            self.provider.token = Some(token);
        }
        // The variable can enable verification skipping but never re-enable
        // verification the file turned off.
        if let Some(skip) = lookup("TFE_SSL_SKIP_VERIFY") {
            self.provider.ssl_skip_verify |=
                matches!(skip.as_str(), "1" | "t" | "T" | "true" | "TRUE" | "True");
        }
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(org) = &overrides.organization {
            self.run.organization = org.clone();
        }
        if let Some(ws) = &overrides.workspace {
            self.run.workspace = ws.clone();
        }
        if let Some(v) = overrides.manual_confirm {
            self.run.manual_confirm = v;
        }
        if let Some(v) = overrides.retry {
            self.run.retry = v;
        }
        if let Some(v) = overrides.retry_attempts {
            self.run.retry_attempts = v;
        }
        if let Some(v) = overrides.retry_backoff_min {
            self.run.retry_backoff_min = v;
        }
        if let Some(v) = overrides.retry_backoff_max {
            self.run.retry_backoff_max = v;
        }
        if let Some(minutes) = overrides.timeout_minutes {
            self.timeouts.create_minutes = minutes;
            self.timeouts.delete_minutes = minutes;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            enabled: self.run.retry,
            max_attempts: self.run.retry_attempts,
            backoff: Backoff::retry_secs(self.run.retry_backoff_min, self.run.retry_backoff_max),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            backoff: Backoff::new(
                Duration::from_millis(self.poll.backoff_min_ms),
                Duration::from_millis(self.poll.backoff_max_ms),
            ),
            progress_interval: Duration::from_secs(self.poll.progress_interval_secs),
        }
    }

    /// Settings for a run resource. Fails when the target is incomplete.
    pub fn run_settings(&self) -> Result<RunSettings> {
        if self.run.organization.is_empty() {
            anyhow::bail!("No organization configured. Set [run].organization or pass --organization");
        }
        if self.run.workspace.is_empty() {
            anyhow::bail!("No workspace configured. Set [run].workspace or pass --workspace");
        }
        Ok(self.settings())
    }

    /// Settings without checking the target, for operations that only need
    /// a run identifier.
    pub fn settings(&self) -> RunSettings {
        let mut settings = RunSettings::new(&self.run.organization, &self.run.workspace);
        settings.manual_confirm = self.run.manual_confirm;
        settings.retry = self.retry_policy();
        settings.poll = self.poll_config();
        settings.create_timeout = Duration::from_secs(self.timeouts.create_minutes * 60);
        settings.delete_timeout = Duration::from_secs(self.timeouts.delete_minutes * 60);
        settings.strict_update = self.run.strict_update;
        settings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.run.organization.is_empty() {
            warnings.push("[run].organization is not set".to_string());
        }
        if self.run.workspace.is_empty() {
            warnings.push("[run].workspace is not set".to_string());
        }
        if self.run.retry && self.run.retry_attempts == 0 {
            warnings.push(
                "retry_attempts is 0: every create or destroy fails before queueing a run"
                    .to_string(),
            );
        }
        if self.run.retry_backoff_min > self.run.retry_backoff_max {
            warnings.push(format!(
                "retry_backoff_min ({}) is greater than retry_backoff_max ({}); the max is used",
                self.run.retry_backoff_min, self.run.retry_backoff_max
            ));
        }
        if self.poll.backoff_min_ms > self.poll.backoff_max_ms {
            warnings.push(format!(
                "poll backoff_min_ms ({}) is greater than backoff_max_ms ({}); the max is used",
                self.poll.backoff_min_ms, self.poll.backoff_max_ms
            ));
        }
        if self.poll.backoff_min_ms == 0 {
            warnings.push("poll backoff_min_ms is 0: the remote service is polled without pause".to_string());
        }
        if self.timeouts.create_minutes == 0 || self.timeouts.delete_minutes == 0 {
            warnings.push("a timeout of 0 minutes expires before the first poll".to_string());
        }
        if self.provider.ssl_skip_verify {
            warnings.push("ssl_skip_verify is enabled: TLS certificates are not checked".to_string());
        }

        warnings
    }
}
