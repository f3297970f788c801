//! Dual-role flow
//!
//! An ADMIN scenario exercises every write path and the settlement engine
//! itself; a USER scenario proves the same dashboard is read-only for an
//! unprivileged account, both in the UI and at the API. Each scenario gets
//! its own page and cookie jar and the two reports are merged at the end.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, error, info, warn};

use settlement_common::extract;
use settlement_common::{ExceptionQueueItem, TransactionStatus};

use super::{
    create_customer, create_merchant, create_transaction, current_status, observe_lock, open_session, require_id,
    track_settlement, CustomerDraft, MerchantDraft,
};
use crate::checks::{self, WriteAttempt};
use crate::config::{Credentials, FlowTiming, HarnessConfig};
use crate::driver::{FetchRequest, PageDriver, PageLauncher};
use crate::error::{E2eError, E2eResult};
use crate::poller::PollSpec;
use crate::report::{FlowDetails, RoleValidationReport, SessionReport};
use crate::session::{Loader, Section, Session, SignalLog};
use crate::step::{Capture, StepRunner};

const DASHBOARD_TIMEOUT: Duration = Duration::from_secs(10);
const AMOUNT: &str = "1000";
const PRELOAD_AMOUNT: &str = "2500";

/// Controls only an administrator may see
pub const ADMIN_CONTROLS: [&str; 5] = [
    "#customerForm",
    "#merchantForm",
    "#transactionForm",
    "#reconciliationControls",
    "#triggerSettlementBtn",
];

/// One request per privileged write endpoint, each expected to be refused
pub fn restricted_writes() -> Vec<FetchRequest> {
    vec![
        FetchRequest::post("/customers").with_json(json!({
            "name": "blocked",
            "email": "blocked@example.com"
        })),
        FetchRequest::post("/merchants").with_json(json!({
            "name": "blocked",
            "bankAccount": "000000000",
            "settlementCycle": "DAILY"
        })),
        FetchRequest::post("/transactions?customerId=1&merchantId=1&amount=1"),
        FetchRequest::post("/settlement/trigger"),
        FetchRequest::post("/api/reconciliation/run"),
        FetchRequest::post("/api/reconciliation/exceptions/0/retry"),
        FetchRequest::post("/api/reconciliation/exceptions/0/resolve"),
    ]
}

/// Wait for the dashboard and its signed-in banner, then cross-check the
/// banner against the roles the backend reports for the session.
async fn verify_dashboard<D: PageDriver>(
    session: &mut Session<D>,
    poll: &PollSpec,
    banner_word: &str,
    required_role: &str,
    forbidden_roles: &[&str],
) -> E2eResult<()> {
    session.wait_for("#dashboard", DASHBOARD_TIMEOUT).await?;

    let banner = poll
        .until(
            session,
            |s| s.auth_banner().boxed(),
            |text| Ok((!text.trim().is_empty()).then(|| text.to_lowercase())),
        )
        .await?;
    if !banner.contains(banner_word) {
        return Err(E2eError::invariant(format!("Unexpected auth info: {}", banner)));
    }

    let me = session.identity().await?;
    checks::check_identity(&me, required_role, forbidden_roles)
}

struct AdminScenario<D: PageDriver> {
    session: Session<D>,
    timing: FlowTiming,
    credentials: Credentials,
    tag: String,
    details: FlowDetails,
}

#[async_trait]
impl<D: PageDriver> Capture for AdminScenario<D> {
    async fn capture(&mut self, path: &Path) -> E2eResult<()> {
        self.session.capture(path).await
    }
}

impl<D: PageDriver> AdminScenario<D> {
    async fn login_and_dashboard(&mut self) -> E2eResult<()> {
        self.session.authenticate(&self.credentials).await?;
        let poll = self.timing.row.spec("auth banner");
        verify_dashboard(&mut self.session, &poll, "admin", "ROLE_ADMIN", &[]).await
    }

    async fn add_customer(&mut self) -> E2eResult<()> {
        let draft = CustomerDraft {
            name: format!("Role Test Customer {}", self.tag),
            email: format!("role.admin.{}@example.com", self.tag),
        };
        let poll = self.timing.row.spec("customer row");
        let id = create_customer(&mut self.session, "#customerForm", &draft, &poll, "Created customer not found").await?;
        self.details.customer_id = Some(id);
        Ok(())
    }

    async fn add_merchant(&mut self) -> E2eResult<()> {
        let suffix_start = self.tag.len().saturating_sub(8);
        let draft = MerchantDraft {
            name: format!("Role Test Merchant {}", self.tag),
            bank_account: format!("ACC{}", &self.tag[suffix_start..]),
            cycle: "DAILY".to_string(),
        };
        let poll = self.timing.row.spec("merchant row");
        let id = create_merchant(&mut self.session, "#merchantForm", &draft, &poll, "Created merchant not found").await?;
        self.details.merchant_id = Some(id);
        Ok(())
    }

    async fn add_transaction(&mut self) -> E2eResult<()> {
        let customer_id = require_id(self.details.customer_id, "Customer id")?;
        let merchant_id = require_id(self.details.merchant_id, "Merchant id")?;
        let poll = self.timing.transaction.spec("new transaction row");

        let created = create_transaction(
            &mut self.session,
            "#transactionForm",
            customer_id,
            merchant_id,
            AMOUNT,
            &poll,
            "Created transaction not found",
        )
        .await?;
        self.details.transaction_id = Some(created.id);
        checks::require_status(&created.status, &TransactionStatus::Captured)
    }

    async fn settle_transaction(&mut self) -> E2eResult<()> {
        let id = require_id(self.details.transaction_id, "Transaction id")?;
        let start = current_status(&mut self.session, id)
            .await?
            .ok_or_else(|| E2eError::invariant(format!("Transaction {} missing before trigger", id)))?;

        let poll = self.timing.settlement.spec(format!("transaction {} to reach a terminal state", id));
        let trajectory = track_settlement(&mut self.session, id, start, &poll, TransactionStatus::is_terminal).await?;
        self.details.transaction_seen_states = trajectory.seen.clone();

        let last = trajectory
            .last
            .clone()
            .ok_or_else(|| E2eError::invariant(format!("Transaction {} was never observed", id)))?;
        checks::require_terminal(&last)?;
        self.details.transaction_terminal_status = Some(last);
        checks::check_forward_progress(&trajectory.seen)
    }

    async fn verify_lock_indicator(&mut self) -> E2eResult<()> {
        let customer_id = require_id(self.details.customer_id, "Customer id")?;
        let merchant_id = require_id(self.details.merchant_id, "Merchant id")?;

        // Keep one CAPTURED transaction queued so the lock is held long enough to be seen
        let preload = FetchRequest::post(format!(
            "/transactions?customerId={}&merchantId={}&amount={}",
            customer_id, merchant_id, PRELOAD_AMOUNT
        ));
        let response = self.session.fetch(&preload).await?;
        if response.status != 200 {
            return Err(E2eError::invariant(format!(
                "Failed to preload transaction for lock test. HTTP {}",
                response.status
            )));
        }

        let poll = self.timing.lock.spec("lock indicator to show acquire and release");
        observe_lock(
            &mut self.session,
            &poll,
            self.timing.trigger_burst,
            Duration::from_millis(self.timing.trigger_gap_ms),
        )
        .await?;
        Ok(())
    }

    async fn verify_logs(&mut self) -> E2eResult<()> {
        let id = require_id(self.details.transaction_id, "Transaction id")?;
        self.session.navigate_to(Section::SettlementLogs).await?;

        let poll = self.timing.logs.spec(format!("settlement logs of transaction {}", id));
        let count = poll
            .until(
                &mut self.session,
                |s| s.refresh_logs().boxed(),
                |logs| {
                    let count = extract::logs_for(logs, id).len();
                    Ok((count > 0).then_some(count))
                },
            )
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    E2eError::invariant(format!("No logs found for transaction {}", id))
                } else {
                    e
                }
            })?;
        self.details.log_count_for_transaction = Some(count);
        Ok(())
    }

    async fn record_final_stats(&mut self) {
        match self.session.stats().await {
            Ok(stats) => self.details.final_stats = Some(stats),
            Err(e) => warn!("Could not read final settlement stats: {}", e),
        }
    }

    async fn logout(&mut self) -> E2eResult<()> {
        self.session.logout().await
    }
}

struct UserScenario<D: PageDriver> {
    session: Session<D>,
    timing: FlowTiming,
    credentials: Credentials,
}

#[async_trait]
impl<D: PageDriver> Capture for UserScenario<D> {
    async fn capture(&mut self, path: &Path) -> E2eResult<()> {
        self.session.capture(path).await
    }
}

impl<D: PageDriver> UserScenario<D> {
    async fn login_and_dashboard(&mut self) -> E2eResult<()> {
        self.session.authenticate(&self.credentials).await?;
        let poll = self.timing.row.spec("auth banner");
        verify_dashboard(&mut self.session, &poll, "user", "ROLE_USER", &["ROLE_ADMIN"]).await
    }

    async fn admin_controls_hidden(&mut self) -> E2eResult<()> {
        let mut controls = Vec::with_capacity(ADMIN_CONTROLS.len());
        for selector in ADMIN_CONTROLS {
            controls.push((selector, self.session.control_visible(selector).await?));
        }
        checks::check_controls_hidden(&controls)
    }

    async fn read_only_sections(&mut self) -> E2eResult<()> {
        let sections = [
            (Section::Customers, Loader::Customers),
            (Section::Merchants, Loader::Merchants),
            (Section::Transactions, Loader::Transactions),
            (Section::Reconciliation, Loader::ExceptionQueue),
            (Section::SettlementLogs, Loader::Logs),
        ];
        for (section, loader) in sections {
            self.session.navigate_to(section).await?;
            self.session.load(&[loader]).await?;
        }

        let queue: Vec<ExceptionQueueItem> = self.session.fetch_json("/api/reconciliation/exceptions").await?;
        debug!("Exception queue readable by USER ({} entries)", queue.len());
        Ok(())
    }

    async fn writes_forbidden(&mut self) -> E2eResult<()> {
        let mut outcomes = Vec::new();
        for request in restricted_writes() {
            let response = self.session.fetch(&request).await?;
            outcomes.push(WriteAttempt {
                request: format!("{} {}", request.method, request.path),
                status: response.status,
            });
        }
        checks::check_authorization(&outcomes)
    }

    async fn logout(&mut self) -> E2eResult<()> {
        self.session.logout().await
    }
}

fn artifact(role: &str, tag: &str, step: &str) -> String {
    format!("{}_{}_{}.png", role, tag, step)
}

async fn run_admin<L: PageLauncher>(
    config: &HarnessConfig,
    launcher: &L,
    timing: &FlowTiming,
    tag: &str,
) -> SessionReport {
    let credentials = config.credentials.admin.clone();
    let session = match open_session(launcher, config, timing).await {
        Ok(session) => session,
        Err(e) => {
            error!("Admin session could not start: {}", e);
            return SessionReport::setup_failed("ADMIN", &credentials.username, e.to_string());
        }
    };

    let mut admin = AdminScenario {
        session,
        timing: timing.clone(),
        credentials,
        tag: tag.to_string(),
        details: FlowDetails::default(),
    };
    let mut runner = StepRunner::new(&config.report_dir).with_success_details("Passed");

    runner
        .run_step(&mut admin, 1, "Admin login + dashboard visible", &artifact("admin", tag, "step1_dashboard"), |a| {
            a.login_and_dashboard().boxed()
        })
        .await;
    runner
        .run_step(&mut admin, 2, "Admin creates customer", &artifact("admin", tag, "step2_customer"), |a| {
            a.add_customer().boxed()
        })
        .await;
    runner
        .run_step(&mut admin, 3, "Admin creates merchant", &artifact("admin", tag, "step3_merchant"), |a| {
            a.add_merchant().boxed()
        })
        .await;
    runner
        .run_step(
            &mut admin,
            4,
            "Admin creates transaction",
            &artifact("admin", tag, "step4_transaction_created"),
            |a| a.add_transaction().boxed(),
        )
        .await;
    runner
        .run_step(
            &mut admin,
            5,
            "Admin triggers settlement + state transition",
            &artifact("admin", tag, "step5_after_settlement"),
            |a| a.settle_transaction().boxed(),
        )
        .await;
    runner
        .run_step(
            &mut admin,
            6,
            "Admin lock indicator behavior",
            &artifact("admin", tag, "step6_lock_indicator"),
            |a| a.verify_lock_indicator().boxed(),
        )
        .await;
    runner
        .run_step(
            &mut admin,
            7,
            "Admin sees settlement logs for transaction",
            &artifact("admin", tag, "step7_logs"),
            |a| a.verify_logs().boxed(),
        )
        .await;
    admin.record_final_stats().await;
    runner
        .run_step(&mut admin, 8, "Admin logout", &artifact("admin", tag, "step8_logout"), |a| {
            a.logout().boxed()
        })
        .await;

    let AdminScenario {
        session,
        credentials,
        details,
        ..
    } = admin;
    let signals = session.close().await;
    SessionReport::assemble(runner.into_results(), signals, details).for_role("ADMIN", credentials.username)
}

/// Forget the 403s the restricted writes provoke on purpose
fn drop_expected_denials(signals: &mut SignalLog, origin: &str) {
    let expected: Vec<String> = restricted_writes()
        .iter()
        .map(|r| format!("403 {}{}", origin, r.path))
        .collect();
    signals.http_errors.retain(|e| !expected.contains(e));
}

async fn run_user<L: PageLauncher>(
    config: &HarnessConfig,
    launcher: &L,
    timing: &FlowTiming,
    tag: &str,
) -> SessionReport {
    let credentials = config.credentials.user.clone();
    let session = match open_session(launcher, config, timing).await {
        Ok(session) => session,
        Err(e) => {
            error!("User session could not start: {}", e);
            return SessionReport::setup_failed("USER", &credentials.username, e.to_string());
        }
    };

    let mut user = UserScenario {
        session,
        timing: timing.clone(),
        credentials,
    };
    let mut runner = StepRunner::new(&config.report_dir).with_success_details("Passed");

    runner
        .run_step(&mut user, 1, "User login + dashboard visible", &artifact("user", tag, "step1_dashboard"), |u| {
            u.login_and_dashboard().boxed()
        })
        .await;
    runner
        .run_step(
            &mut user,
            2,
            "User cannot access admin controls in UI",
            &artifact("user", tag, "step2_admin_controls_hidden"),
            |u| u.admin_controls_hidden().boxed(),
        )
        .await;
    runner
        .run_step(
            &mut user,
            3,
            "User can view read-only sections",
            &artifact("user", tag, "step3_read_only_sections"),
            |u| u.read_only_sections().boxed(),
        )
        .await;
    runner
        .run_step(
            &mut user,
            4,
            "User write APIs blocked by backend",
            &artifact("user", tag, "step4_backend_forbidden"),
            |u| u.writes_forbidden().boxed(),
        )
        .await;
    runner
        .run_step(&mut user, 5, "User logout", &artifact("user", tag, "step5_logout"), |u| {
            u.logout().boxed()
        })
        .await;

    let UserScenario { session, credentials, .. } = user;
    let mut signals = session.close().await;
    drop_expected_denials(&mut signals, config.origin());
    SessionReport::assemble(runner.into_results(), signals, FlowDetails::default()).for_role("USER", credentials.username)
}

/// Run the ADMIN and USER scenarios and write the merged report.
///
/// A scenario whose page cannot be launched is reported as failed rather
/// than aborting the other one. Only failures to prepare the output
/// directory or write the report are returned as errors.
pub async fn run_role_validation<L: PageLauncher>(
    config: &HarnessConfig,
    launcher: &L,
) -> E2eResult<RoleValidationReport> {
    let tag = Utc::now().timestamp_millis().to_string();
    let timing = config.roles.timing();
    tokio::fs::create_dir_all(&config.report_dir).await?;

    let (admin, user) = if config.roles.parallel {
        info!("Running ADMIN and USER scenarios concurrently");
        tokio::join!(
            run_admin(config, launcher, &timing, &tag),
            run_user(config, launcher, &timing, &tag)
        )
    } else {
        let admin = run_admin(config, launcher, &timing, &tag).await;
        let user = run_user(config, launcher, &timing, &tag).await;
        (admin, user)
    };

    let mut report = RoleValidationReport::merge(config.origin(), admin, user);
    report.write_to(&config.report_dir, &tag)?;
    info!(
        "Role validation finished: admin={}, user={}",
        if report.admin.pass { "PASS" } else { "FAIL" },
        if report.user.pass { "PASS" } else { "FAIL" }
    );
    Ok(report)
}
