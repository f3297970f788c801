//! Single-session end-to-end flow
//!
//! Eight steps against one page: load the dashboard, create a customer, a
//! merchant and a transaction, settle it, watch the lock indicator, check
//! the settlement log and finally re-trigger to prove idempotency.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::sleep;
use tracing::info;

use settlement_common::TransactionStatus;

use super::{
    create_customer, create_merchant, create_transaction, current_status, observe_lock, open_session, require_id,
    status_label, track_settlement, transaction_logs, trigger_settlement, CustomerDraft, MerchantDraft,
};
use crate::checks::{self, IdempotencySample};
use crate::config::{FlowTiming, HarnessConfig};
use crate::driver::{PageDriver, PageLauncher};
use crate::error::{E2eError, E2eResult};
use crate::report::{EndToEndReport, FlowDetails, SessionReport};
use crate::session::{Loader, Session};
use crate::step::{Capture, StepRunner};

const CUSTOMER_NAME: &str = "Test User";
const CUSTOMER_EMAIL: &str = "testuser1@example.com";
const MERCHANT_NAME: &str = "Test Merchant";
const MERCHANT_BANK: &str = "123456789";
const MERCHANT_CYCLE: &str = "DAILY";
const AMOUNT: &str = "1000";

struct EndToEnd<D: PageDriver> {
    session: Session<D>,
    timing: FlowTiming,
    expected_title: String,
    details: FlowDetails,
}

#[async_trait]
impl<D: PageDriver> Capture for EndToEnd<D> {
    async fn capture(&mut self, path: &Path) -> E2eResult<()> {
        self.session.capture(path).await
    }
}

impl<D: PageDriver> EndToEnd<D> {
    async fn load_application(&mut self) -> E2eResult<()> {
        let page_load = Duration::from_millis(self.timing.page_load_ms);
        self.session.goto("/", page_load).await?;
        self.session.wait_for("#dashboard", page_load).await?;
        sleep(Duration::from_millis(self.timing.dashboard_settle_ms)).await;

        if self.session.has_class("#dashboard", "hidden").await? {
            return Err(E2eError::invariant("Dashboard section is hidden after page load."));
        }

        let title = self.session.title().await?;
        if !title.contains(&self.expected_title) {
            return Err(E2eError::invariant(format!("Unexpected page title: '{}'", title)));
        }

        let signals = self.session.signals();
        if !signals.page_errors.is_empty() {
            return Err(E2eError::invariant(format!(
                "JavaScript errors detected: {}",
                signals.page_errors.join(" | ")
            )));
        }
        if !signals.http_errors.is_empty() {
            return Err(E2eError::invariant(format!(
                "HTTP errors detected: {}",
                signals.http_errors.join(" | ")
            )));
        }
        Ok(())
    }

    async fn add_customer(&mut self) -> E2eResult<()> {
        let draft = CustomerDraft {
            name: CUSTOMER_NAME.to_string(),
            email: CUSTOMER_EMAIL.to_string(),
        };
        let poll = self.timing.row.spec("customer row");
        let id = create_customer(
            &mut self.session,
            "#customers",
            &draft,
            &poll,
            "Customer row not found in customers table.",
        )
        .await?;
        self.details.customer_id = Some(id);
        Ok(())
    }

    async fn add_merchant(&mut self) -> E2eResult<()> {
        let draft = MerchantDraft {
            name: MERCHANT_NAME.to_string(),
            bank_account: MERCHANT_BANK.to_string(),
            cycle: MERCHANT_CYCLE.to_string(),
        };
        let poll = self.timing.row.spec("merchant row");
        let id = create_merchant(
            &mut self.session,
            "#merchants",
            &draft,
            &poll,
            "Merchant row not found in merchants table.",
        )
        .await?;
        self.details.merchant_id = Some(id);
        Ok(())
    }

    async fn capture_transaction(&mut self) -> E2eResult<()> {
        let customer_id = require_id(self.details.customer_id, "Customer id")?;
        let merchant_id = require_id(self.details.merchant_id, "Merchant id")?;
        let poll = self.timing.transaction.spec("new transaction row");

        let created = create_transaction(
            &mut self.session,
            "#transactions",
            customer_id,
            merchant_id,
            AMOUNT,
            &poll,
            "New transaction was not found after submission.",
        )
        .await?;
        self.details.transaction_id = Some(created.id);

        if created.status != TransactionStatus::Captured {
            return Err(E2eError::invariant(format!(
                "Expected new transaction status CAPTURED, found '{}'.",
                created.status
            )));
        }
        Ok(())
    }

    async fn settle_transaction(&mut self) -> E2eResult<()> {
        let id = require_id(self.details.transaction_id, "Transaction id")?;

        let start = current_status(&mut self.session, id).await?;
        if start != Some(TransactionStatus::Captured) {
            return Err(E2eError::invariant(format!(
                "Expected starting status CAPTURED, found '{}'.",
                status_label(start.as_ref())
            )));
        }

        let poll = self.timing.settlement.spec(format!("transaction {} to settle", id));
        let trajectory = track_settlement(&mut self.session, id, TransactionStatus::Captured, &poll, |status| {
            *status == TransactionStatus::Settled
        })
        .await?;
        self.details.transaction_seen_states = trajectory.seen.clone();
        if trajectory.last == Some(TransactionStatus::Settled) {
            self.details.transaction_terminal_status = Some(TransactionStatus::Settled);
        }

        checks::check_forward_progress(&trajectory.seen)?;
        if trajectory.last != Some(TransactionStatus::Settled) {
            return Err(E2eError::invariant(format!(
                "Expected final status SETTLED, found '{}'.",
                status_label(trajectory.last.as_ref())
            )));
        }
        checks::require_seen(&trajectory.seen, &TransactionStatus::Processing)
    }

    async fn verify_lock_indicator(&mut self) -> E2eResult<()> {
        let poll = self.timing.lock.spec("lock indicator to show acquire and release");
        let readings = observe_lock(
            &mut self.session,
            &poll,
            self.timing.trigger_burst,
            Duration::from_millis(self.timing.trigger_gap_ms),
        )
        .await?;
        info!("Lock panel went through {} distinct readings", readings.seen.len());
        Ok(())
    }

    async fn verify_logs(&mut self) -> E2eResult<()> {
        let id = require_id(self.details.transaction_id, "Transaction id")?;
        let logs = transaction_logs(&mut self.session, id).await?;
        self.details.log_count_for_transaction = Some(logs.len());

        if logs.is_empty() {
            return Err(E2eError::invariant(format!(
                "No settlement logs found for transaction {}.",
                id
            )));
        }
        let first_attempt = logs
            .iter()
            .find(|l| l.attempt_number == "1")
            .ok_or_else(|| E2eError::invariant(format!("No attemptNumber=1 log found for transaction {}.", id)))?;
        if first_attempt.result != "SETTLED" {
            return Err(E2eError::invariant(format!(
                "Expected attemptNumber=1 result SETTLED, found '{}'.",
                first_attempt.result
            )));
        }
        Ok(())
    }

    async fn verify_idempotency(&mut self) -> E2eResult<()> {
        let id = require_id(self.details.transaction_id, "Transaction id")?;
        let before = IdempotencySample {
            status: TransactionStatus::Settled,
            log_count: transaction_logs(&mut self.session, id).await?.len(),
        };

        trigger_settlement(&mut self.session).await?;
        sleep(Duration::from_millis(self.timing.idempotency_wait_ms)).await;
        self.session
            .load(&[Loader::Transactions, Loader::Logs, Loader::Stats])
            .await?;

        let status = current_status(&mut self.session, id).await?;
        if status != Some(TransactionStatus::Settled) {
            return Err(E2eError::invariant(format!(
                "Transaction moved from SETTLED to '{}'.",
                status_label(status.as_ref())
            )));
        }

        let after = IdempotencySample {
            status: TransactionStatus::Settled,
            log_count: transaction_logs(&mut self.session, id).await?.len(),
        };
        checks::check_idempotency(&before, &after)
    }
}

/// Run the eight-step flow in one fresh page.
///
/// Only failures to obtain a usable page are returned as errors; everything
/// that goes wrong inside a step ends up in the report.
pub async fn run_end_to_end<L: PageLauncher>(config: &HarnessConfig, launcher: &L) -> E2eResult<EndToEndReport> {
    let timing = config.end_to_end.timing();
    tokio::fs::create_dir_all(&config.screenshot_dir).await?;

    let mut session = open_session(launcher, config, &timing).await?;
    if config.end_to_end.authenticate {
        if let Err(e) = session.authenticate(&config.credentials.admin).await {
            session.close().await;
            return Err(E2eError::FatalSetup(e.to_string()));
        }
    }

    let mut flow = EndToEnd {
        session,
        timing,
        expected_title: config.end_to_end.expected_title.clone(),
        details: FlowDetails::default(),
    };
    let mut runner = StepRunner::new(&config.screenshot_dir);

    runner
        .run_step(&mut flow, 1, "Load Application", "step1_homepage.png", |f| {
            f.load_application().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 2, "Create Customer", "step2_customer_created.png", |f| {
            f.add_customer().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 3, "Create Merchant", "step3_merchant_created.png", |f| {
            f.add_merchant().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 4, "Create Transaction", "step4_transaction_captured.png", |f| {
            f.capture_transaction().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 5, "Trigger Settlement", "step5_transaction_settled.png", |f| {
            f.settle_transaction().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 6, "Verify Lock Indicator", "step6_lock_status.png", |f| {
            f.verify_lock_indicator().boxed()
        })
        .await;
    runner
        .run_step(&mut flow, 7, "Verify Logs", "step7_logs.png", |f| f.verify_logs().boxed())
        .await;
    runner
        .run_step(&mut flow, 8, "Idempotency Test", "step8_idempotency.png", |f| {
            f.verify_idempotency().boxed()
        })
        .await;

    let EndToEnd { session, details, .. } = flow;
    let signals = session.close().await;
    let report = EndToEndReport {
        base_url: config.origin().to_string(),
        session: SessionReport::assemble(runner.into_results(), signals, details),
    };

    let passed = report.session.results.iter().filter(|r| r.pass).count();
    info!(
        "End-to-end validation finished: {}/{} steps passed",
        passed,
        report.session.results.len()
    );
    Ok(report)
}
