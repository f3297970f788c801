//! Report aggregation
//!
//! Folds step results and session signals into the JSON documents printed
//! at the end of a run, and maps verdicts to process exit codes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use settlement_common::{StatsSnapshot, TransactionStatus};

use crate::error::E2eResult;
use crate::session::{DialogRecord, SignalLog};
use crate::step::StepResult;

pub const VALIDATION_START: &str = "VALIDATION_RESULT_START";
pub const VALIDATION_END: &str = "VALIDATION_RESULT_END";
pub const ROLE_VALIDATION_START: &str = "ROLE_VALIDATION_REPORT_START";
pub const ROLE_VALIDATION_END: &str = "ROLE_VALIDATION_REPORT_END";

/// Every check passed
pub const EXIT_PASS: i32 = 0;
/// The run completed with at least one failed check
pub const EXIT_FAIL: i32 = 1;
/// The run could not be carried out
pub const EXIT_FATAL: i32 = 2;

/// Identifiers and observations a flow records while it runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_terminal_status: Option<TransactionStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub transaction_seen_states: Vec<TransactionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_count_for_transaction: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_stats: Option<StatsSnapshot>,
}

/// Outcome of one browser session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub pass: bool,
    #[serde(flatten)]
    pub details: FlowDetails,
    pub results: Vec<StepResult>,
    pub ui_inconsistencies: Vec<String>,
    pub state_inconsistencies: Vec<String>,
    pub screenshots: Vec<PathBuf>,
    pub dialogs: Vec<DialogRecord>,
    pub page_errors: Vec<String>,
    pub http_errors: Vec<String>,
}

impl SessionReport {
    pub fn assemble(results: Vec<StepResult>, signals: SignalLog, details: FlowDetails) -> Self {
        let mut ui_inconsistencies = Vec::new();
        if !signals.page_errors.is_empty() {
            ui_inconsistencies.push(format!(
                "JavaScript errors captured: {}",
                signals.page_errors.join(" | ")
            ));
        }
        if !signals.http_errors.is_empty() {
            ui_inconsistencies.push(format!(
                "HTTP errors captured: {}",
                signals.http_errors.join(" | ")
            ));
        }

        let state_inconsistencies = results
            .iter()
            .filter(|r| !r.pass)
            .map(|r| format!("Step {} ({}): {}", r.step, r.title, r.details))
            .collect();

        // only artifacts that were actually written
        let screenshots = results
            .iter()
            .filter_map(|r| r.screenshot_path.clone())
            .collect();

        Self {
            role: None,
            username: None,
            pass: results.iter().all(|r| r.pass),
            details,
            results,
            ui_inconsistencies,
            state_inconsistencies,
            screenshots,
            dialogs: signals.dialogs,
            page_errors: signals.page_errors,
            http_errors: signals.http_errors,
        }
    }

    pub fn for_role(mut self, role: impl Into<String>, username: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self.username = Some(username.into());
        self
    }

    /// Report for a session whose setup failed before any step ran
    pub fn setup_failed(role: impl Into<String>, username: impl Into<String>, reason: String) -> Self {
        let mut report = Self::assemble(Vec::new(), SignalLog::default(), FlowDetails::default());
        report.pass = false;
        report.state_inconsistencies.push(format!("Setup: {}", reason));
        report.for_role(role, username)
    }
}

/// Report of the single-session end-to-end flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndToEndReport {
    pub base_url: String,
    #[serde(flatten)]
    pub session: SessionReport,
}

impl EndToEndReport {
    pub fn exit_code(&self) -> i32 {
        if self.session.pass {
            EXIT_PASS
        } else {
            EXIT_FAIL
        }
    }
}

/// Merged report of the admin and user sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleValidationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_file: Option<PathBuf>,
    pub base_url: String,
    pub generated_at: DateTime<Utc>,
    pub overall_pass: bool,
    pub admin: SessionReport,
    pub user: SessionReport,
}

impl RoleValidationReport {
    pub fn merge(base_url: impl Into<String>, admin: SessionReport, user: SessionReport) -> Self {
        Self {
            report_file: None,
            base_url: base_url.into(),
            generated_at: Utc::now(),
            overall_pass: admin.pass && user.pass,
            admin,
            user,
        }
    }

    /// Write the report as `role-validation-<tag>.json` and remember where
    pub fn write_to(&mut self, dir: &Path, tag: &str) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("role-validation-{}.json", tag));
        self.report_file = None;
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Role validation report written to {}", path.display());
        self.report_file = Some(path.clone());
        Ok(path)
    }

    pub fn exit_code(&self) -> i32 {
        if self.overall_pass {
            EXIT_PASS
        } else {
            EXIT_FAIL
        }
    }
}

/// Minimal report for a flow that could not run
///
/// Fatal errors are raised before the first step, so `results` and
/// `screenshots` are always empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FatalReport {
    pub fatal_error: String,
    pub results: Vec<StepResult>,
    pub screenshots: Vec<PathBuf>,
}

impl FatalReport {
    pub fn new(error: impl ToString) -> Self {
        Self {
            fatal_error: error.to_string(),
            results: Vec::new(),
            screenshots: Vec::new(),
        }
    }
}

/// Pretty JSON of `report` between start and end marker lines
pub fn envelope<T: Serialize>(start: &str, end: &str, report: &T) -> E2eResult<String> {
    Ok(format!("{}\n{}\n{}", start, serde_json::to_string_pretty(report)?, end))
}
