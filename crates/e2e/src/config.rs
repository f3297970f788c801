//! Harness configuration
//!
//! Loaded from an optional TOML file and then overridden by CLI flags and
//! environment variables in `main.rs`. Every section has defaults, so an
//! empty or missing file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::poller::PollSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Origin of the settlement dashboard
    pub base_url: String,

    /// Directory for per-step screenshots of the end-to-end flow
    pub screenshot_dir: PathBuf,

    /// Directory for role-validation screenshots and report files
    pub report_dir: PathBuf,

    /// Body text that marks a framework error page rendered instead of a redirect
    pub error_page_marker: String,

    pub browser: PlaywrightConfig,
    pub preflight: PreflightConfig,
    pub credentials: CredentialsConfig,
    pub end_to_end: EndToEndConfig,
    pub roles: RolesConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            screenshot_dir: PathBuf::from("."),
            report_dir: PathBuf::from("docs/screenshots/role-validation"),
            error_page_marker: "whitelabel".to_string(),
            browser: PlaywrightConfig::default(),
            preflight: PreflightConfig::default(),
            credentials: CredentialsConfig::default(),
            end_to_end: EndToEndConfig::default(),
            roles: RolesConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        for (name, timing) in [("end_to_end", self.end_to_end.timing()), ("roles", self.roles.timing())] {
            timing
                .validate()
                .map_err(|e| E2eError::Config(format!("{}.timing: {}", name, e)))?;
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn origin(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Reachability check run before any browser is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 30_000,
            interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub admin: Credentials,
    pub user: Credentials,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            admin: Credentials {
                username: "admin".to_string(),
                password: "admin123".to_string(),
            },
            user: Credentials {
                username: "user".to_string(),
                password: "user123".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndToEndConfig {
    /// Log in as the admin before the first step
    pub authenticate: bool,
    /// Substring the page title must contain after load
    pub expected_title: String,
    /// Overrides applied on top of [`FlowTiming::end_to_end`]
    pub timing: TimingOverrides,
}

impl EndToEndConfig {
    pub fn timing(&self) -> FlowTiming {
        self.timing.apply(FlowTiming::end_to_end())
    }
}

impl Default for EndToEndConfig {
    fn default() -> Self {
        Self {
            authenticate: false,
            expected_title: "Settlement Engine".to_string(),
            timing: TimingOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Run the admin and user sessions concurrently
    pub parallel: bool,
    /// Overrides applied on top of [`FlowTiming::roles`]
    pub timing: TimingOverrides,
}

impl RolesConfig {
    pub fn timing(&self) -> FlowTiming {
        self.timing.apply(FlowTiming::roles())
    }
}

/// Interval and deadline of one class of bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl PollSettings {
    pub const fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
        }
    }

    pub fn spec(&self, label: impl Into<String>) -> PollSpec {
        PollSpec::new(
            label,
            Duration::from_millis(self.interval_ms),
            Duration::from_millis(self.timeout_ms),
        )
    }
}

/// Waits and poll budgets of one flow.
///
/// Each operation class has its own budget: rows appear within seconds, a
/// settlement with retries can take minutes, the lock window spans several
/// forced triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTiming {
    pub section_settle_ms: u64,
    pub loader_settle_ms: u64,
    pub page_load_ms: u64,
    pub dashboard_settle_ms: u64,
    pub row: PollSettings,
    pub transaction: PollSettings,
    pub settlement: PollSettings,
    pub lock: PollSettings,
    pub logs: PollSettings,
    /// Triggers fired back to back to force concurrent settlement attempts
    pub trigger_burst: u32,
    pub trigger_gap_ms: u64,
    /// Wait after the idempotency re-trigger before re-reading state
    pub idempotency_wait_ms: u64,
}

impl FlowTiming {
    pub fn end_to_end() -> Self {
        Self {
            section_settle_ms: 300,
            loader_settle_ms: 250,
            page_load_ms: 30_000,
            dashboard_settle_ms: 1_200,
            row: PollSettings::new(500, 15_000),
            transaction: PollSettings::new(500, 20_000),
            settlement: PollSettings::new(1_000, 120_000),
            lock: PollSettings::new(1_000, 70_000),
            logs: PollSettings::new(500, 15_000),
            trigger_burst: 3,
            trigger_gap_ms: 300,
            idempotency_wait_ms: 1_500,
        }
    }

    pub fn roles() -> Self {
        Self {
            section_settle_ms: 250,
            loader_settle_ms: 150,
            page_load_ms: 30_000,
            dashboard_settle_ms: 0,
            row: PollSettings::new(250, 15_000),
            transaction: PollSettings::new(300, 20_000),
            settlement: PollSettings::new(300, 120_000),
            lock: PollSettings::new(250, 60_000),
            logs: PollSettings::new(250, 30_000),
            trigger_burst: 3,
            trigger_gap_ms: 200,
            idempotency_wait_ms: 1_500,
        }
    }

    pub fn section_settle(&self) -> Duration {
        Duration::from_millis(self.section_settle_ms)
    }

    pub fn loader_settle(&self) -> Duration {
        Duration::from_millis(self.loader_settle_ms)
    }

    fn validate(&self) -> Result<(), String> {
        for (name, poll) in [
            ("row", self.row),
            ("transaction", self.transaction),
            ("settlement", self.settlement),
            ("lock", self.lock),
            ("logs", self.logs),
        ] {
            if poll.interval_ms == 0 || poll.timeout_ms == 0 {
                return Err(format!("{} interval and timeout must be non-zero", name));
            }
            if poll.interval_ms > poll.timeout_ms {
                return Err(format!("{} interval exceeds its timeout", name));
            }
        }
        Ok(())
    }
}

impl Default for FlowTiming {
    fn default() -> Self {
        Self::end_to_end()
    }
}

/// Partial [`FlowTiming`] read from the config file; unset fields keep the
/// flow's preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOverrides {
    pub section_settle_ms: Option<u64>,
    pub loader_settle_ms: Option<u64>,
    pub page_load_ms: Option<u64>,
    pub dashboard_settle_ms: Option<u64>,
    pub row: Option<PollSettings>,
    pub transaction: Option<PollSettings>,
    pub settlement: Option<PollSettings>,
    pub lock: Option<PollSettings>,
    pub logs: Option<PollSettings>,
    pub trigger_burst: Option<u32>,
    pub trigger_gap_ms: Option<u64>,
    pub idempotency_wait_ms: Option<u64>,
}

impl TimingOverrides {
    pub fn apply(&self, preset: FlowTiming) -> FlowTiming {
        FlowTiming {
            section_settle_ms: self.section_settle_ms.unwrap_or(preset.section_settle_ms),
            loader_settle_ms: self.loader_settle_ms.unwrap_or(preset.loader_settle_ms),
            page_load_ms: self.page_load_ms.unwrap_or(preset.page_load_ms),
            dashboard_settle_ms: self.dashboard_settle_ms.unwrap_or(preset.dashboard_settle_ms),
            row: self.row.unwrap_or(preset.row),
            transaction: self.transaction.unwrap_or(preset.transaction),
            settlement: self.settlement.unwrap_or(preset.settlement),
            lock: self.lock.unwrap_or(preset.lock),
            logs: self.logs.unwrap_or(preset.logs),
            trigger_burst: self.trigger_burst.unwrap_or(preset.trigger_burst),
            trigger_gap_ms: self.trigger_gap_ms.unwrap_or(preset.trigger_gap_ms),
            idempotency_wait_ms: self.idempotency_wait_ms.unwrap_or(preset.idempotency_wait_ms),
        }
    }
}
