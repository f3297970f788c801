//! Flow orchestrators
//!
//! Each flow is a fixed sequence of steps run through a [`StepRunner`]. The
//! helpers here are the dashboard interactions both flows share.
//!
//! [`StepRunner`]: crate::step::StepRunner

pub mod end_to_end;
pub mod roles;

use std::time::Duration;

use futures::FutureExt;
use tokio::time::sleep;
use tracing::info;

use settlement_common::extract;
use settlement_common::{LockPanelReading, LockState, SettlementLogEntry, Transaction, TransactionStatus};

use crate::checks;
use crate::config::{FlowTiming, HarnessConfig};
use crate::driver::{PageDriver, PageLauncher, Target};
use crate::error::{E2eError, E2eResult};
use crate::poller::{PollSpec, Trajectory};
use crate::session::{Loader, Section, Session, SessionSettings};

pub use end_to_end::run_end_to_end;
pub use roles::run_role_validation;

const TRIGGER_BUTTON: &str = "Trigger Settlement";

fn session_settings(config: &HarnessConfig, timing: &FlowTiming) -> SessionSettings {
    SessionSettings {
        error_page_marker: config.error_page_marker.clone(),
        section_settle: timing.section_settle(),
        loader_settle: timing.loader_settle(),
        full_page_screenshots: config.browser.full_page_screenshots,
        ..SessionSettings::new(config.origin())
    }
}

/// Launch a fresh page and wrap it in a session tuned for one flow
async fn open_session<L: PageLauncher>(
    launcher: &L,
    config: &HarnessConfig,
    timing: &FlowTiming,
) -> E2eResult<Session<L::Driver>> {
    let driver = launcher
        .launch()
        .await
        .map_err(|e| E2eError::FatalSetup(e.to_string()))?;
    Ok(Session::open(driver, session_settings(config, timing)))
}

/// Form values of a customer to create
#[derive(Debug, Clone)]
pub struct CustomerDraft {
    pub name: String,
    pub email: String,
}

/// Form values of a merchant to create
#[derive(Debug, Clone)]
pub struct MerchantDraft {
    pub name: String,
    pub bank_account: String,
    pub cycle: String,
}

/// Replace a timed-out row wait with the backend's own rejection, if it showed one
fn explain_missing_row<D: PageDriver>(session: &mut Session<D>, err: E2eError, entity: &str, missing: &str) -> E2eError {
    if !err.is_timeout() {
        return err;
    }
    let needle = format!("{} creation failed", entity.to_lowercase());
    match session.signals().dialog_containing(&needle) {
        Some(dialog) => E2eError::BackendRejected {
            entity: entity.to_string(),
            message: rejection_reason(&dialog.message, &needle),
        },
        None => E2eError::RowNotFound(missing.to_string()),
    }
}

/// Text after "<entity> creation failed", or the whole dialog when nothing follows
fn rejection_reason(message: &str, needle: &str) -> String {
    message
        .to_lowercase()
        .find(needle)
        .and_then(|at| message.get(at + needle.len()..))
        .map(|rest| rest.trim_start_matches(':').trim())
        .filter(|rest| !rest.is_empty())
        .unwrap_or(message)
        .to_string()
}

fn positive_id(id: i64, entity: &str) -> E2eResult<i64> {
    if id > 0 {
        Ok(id)
    } else {
        Err(E2eError::RowNotFound(format!(
            "{} ID could not be parsed from table row.",
            entity
        )))
    }
}

/// Submit the customer form and wait for its row; returns the new id
pub async fn create_customer<D: PageDriver>(
    session: &mut Session<D>,
    scope: &str,
    draft: &CustomerDraft,
    poll: &PollSpec,
    missing: &str,
) -> E2eResult<i64> {
    session.navigate_to(Section::Customers).await?;
    session.load(&[Loader::Customers]).await?;
    session.fill("#customerName", &draft.name).await?;
    session.fill("#customerEmail", &draft.email).await?;
    session
        .click(&Target::has_text(format!("{} button", scope), "Create"))
        .await?;

    let found = poll
        .until(
            session,
            |s| s.refresh_customers().boxed(),
            |customers| Ok(extract::find_customer(customers, &draft.name, &draft.email).map(|c| c.id)),
        )
        .await;

    match found {
        Ok(id) => {
            info!("Customer '{}' created with id {}", draft.name, id);
            positive_id(id, "Customer")
        }
        Err(e) => Err(explain_missing_row(session, e, "Customer", missing)),
    }
}

/// Submit the merchant form and wait for its row; returns the new id
pub async fn create_merchant<D: PageDriver>(
    session: &mut Session<D>,
    scope: &str,
    draft: &MerchantDraft,
    poll: &PollSpec,
    missing: &str,
) -> E2eResult<i64> {
    session.navigate_to(Section::Merchants).await?;
    session.load(&[Loader::Merchants]).await?;
    session.fill("#merchantName", &draft.name).await?;
    session.fill("#merchantBank", &draft.bank_account).await?;
    session.fill("#merchantCycle", &draft.cycle).await?;
    session
        .click(&Target::has_text(format!("{} button", scope), "Create"))
        .await?;

    let found = poll
        .until(
            session,
            |s| s.refresh_merchants().boxed(),
            |merchants| {
                Ok(extract::find_merchant(merchants, &draft.name, &draft.bank_account, &draft.cycle).map(|m| m.id))
            },
        )
        .await;

    match found {
        Ok(id) => {
            info!("Merchant '{}' created with id {}", draft.name, id);
            positive_id(id, "Merchant")
        }
        Err(e) => Err(explain_missing_row(session, e, "Merchant", missing)),
    }
}

/// Submit the transaction form and wait for the newest matching row
pub async fn create_transaction<D: PageDriver>(
    session: &mut Session<D>,
    scope: &str,
    customer_id: i64,
    merchant_id: i64,
    amount: &str,
    poll: &PollSpec,
    missing: &str,
) -> E2eResult<Transaction> {
    session.navigate_to(Section::Transactions).await?;
    session.load(&[Loader::Transactions]).await?;
    let previous_max = extract::max_id(&session.transactions().await?);

    session.fill("#customerId", &customer_id.to_string()).await?;
    session.fill("#merchantId", &merchant_id.to_string()).await?;
    session.fill("#amount", amount).await?;
    session
        .click(&Target::has_text(format!("{} button", scope), "Create"))
        .await?;

    let found = poll
        .until(
            session,
            |s| s.refresh_transactions().boxed(),
            |transactions| Ok(extract::newest_after(transactions, previous_max, amount).cloned()),
        )
        .await;

    match found {
        Ok(tx) => {
            info!("Transaction {} created ({})", tx.id, tx.status);
            Ok(tx)
        }
        Err(e) => Err(explain_missing_row(session, e, "Transaction", missing)),
    }
}

/// Current status of a transaction as rendered in the transactions section
pub async fn current_status<D: PageDriver>(
    session: &mut Session<D>,
    transaction_id: i64,
) -> E2eResult<Option<TransactionStatus>> {
    session.navigate_to(Section::Transactions).await?;
    let transactions = session.refresh_transactions().await?;
    Ok(extract::status_of(&transactions, transaction_id))
}

pub async fn trigger_settlement<D: PageDriver>(session: &mut Session<D>) -> E2eResult<()> {
    session.click(&Target::button(TRIGGER_BUTTON)).await
}

/// Trigger settlement and follow the transaction until `stop` accepts its status.
///
/// `start` seeds the trajectory with the status read before the trigger.
pub async fn track_settlement<D, F>(
    session: &mut Session<D>,
    transaction_id: i64,
    start: TransactionStatus,
    poll: &PollSpec,
    mut stop: F,
) -> E2eResult<Trajectory<TransactionStatus>>
where
    D: PageDriver,
    F: FnMut(&TransactionStatus) -> bool,
{
    trigger_settlement(session).await?;

    let trajectory = poll
        .track(
            session,
            Trajectory::seeded(start),
            |s| {
                async move {
                    s.load(&[Loader::Transactions, Loader::Stats]).await?;
                    s.transactions().await
                }
                .boxed()
            },
            |transactions| {
                extract::status_of(transactions, transaction_id).ok_or_else(|| {
                    E2eError::invariant(format!("Transaction {} disappeared from table.", transaction_id))
                })
            },
            |trajectory| trajectory.last.as_ref().map(&mut stop).unwrap_or(false),
        )
        .await?;

    info!(
        "Transaction {} trajectory: {:?}",
        transaction_id, trajectory.seen
    );
    Ok(trajectory)
}

/// Fire a burst of triggers from the dashboard, then watch the lock panel
/// until both an active and a released reading were seen.
///
/// Mutual exclusion is judged before liveness, so a double holder is
/// reported even when the window also timed out.
pub async fn observe_lock<D: PageDriver>(
    session: &mut Session<D>,
    poll: &PollSpec,
    burst: u32,
    gap: Duration,
) -> E2eResult<Trajectory<LockPanelReading>> {
    session.navigate_to(Section::Dashboard).await?;
    session.load(&[Loader::Stats]).await?;

    for _ in 0..burst {
        trigger_settlement(session).await?;
        sleep(gap).await;
    }

    let trajectory = poll
        .track(
            session,
            Trajectory::default(),
            |s| s.refresh_lock_panel().boxed(),
            |reading| Ok(reading.clone()),
            |trajectory| {
                trajectory.seen.iter().any(|r| r.state.is_active())
                    && trajectory.seen.iter().any(|r| r.state == LockState::Released)
            },
        )
        .await?;

    checks::check_mutual_exclusion(&trajectory.seen)?;
    checks::check_liveness(&trajectory.seen)?;
    Ok(trajectory)
}

/// Log rows of one transaction, freshly loaded from the logs section
pub async fn transaction_logs<D: PageDriver>(
    session: &mut Session<D>,
    transaction_id: i64,
) -> E2eResult<Vec<SettlementLogEntry>> {
    session.navigate_to(Section::SettlementLogs).await?;
    let logs = session.refresh_logs().await?;
    Ok(extract::logs_for(&logs, transaction_id).into_iter().cloned().collect())
}

/// Status text for messages, `missing` when the row is gone
fn status_label(status: Option<&TransactionStatus>) -> &str {
    status.map(TransactionStatus::as_str).unwrap_or("missing")
}

/// Identifier carried between steps that an earlier step failed to record
fn require_id(id: Option<i64>, what: &str) -> E2eResult<i64> {
    id.ok_or_else(|| E2eError::invariant(format!("{} is unavailable because an earlier step failed.", what)))
}
