//! Invariant checkers
//!
//! Pure assertions over observations already collected by the flows. Each
//! returns `Err(E2eError::InvariantViolation)` describing the first breach.

use settlement_common::{AuthIdentity, LockPanelReading, TransactionStatus};

use crate::error::{E2eError, E2eResult};

/// Statuses must appear in forward order with at most one terminal state
pub fn check_forward_progress(trajectory: &[TransactionStatus]) -> E2eResult<()> {
    let mut previous: Option<(&TransactionStatus, u8)> = None;
    let mut terminal: Option<&TransactionStatus> = None;

    for status in trajectory {
        let rank = status
            .rank()
            .ok_or_else(|| E2eError::invariant(format!("Unexpected transaction status {}", status)))?;

        if let Some(done) = terminal {
            return Err(E2eError::invariant(format!(
                "Transaction moved from terminal {} to {}",
                done, status
            )));
        }
        if let Some((prev, prev_rank)) = previous {
            if rank <= prev_rank {
                return Err(E2eError::invariant(format!(
                    "Transaction status went backwards: {} after {}",
                    status, prev
                )));
            }
        }
        if status.is_terminal() {
            terminal = Some(status);
        }
        previous = Some((status, rank));
    }
    Ok(())
}

/// The current status must be SETTLED or FAILED
pub fn require_terminal(status: &TransactionStatus) -> E2eResult<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(E2eError::invariant(format!(
            "Expected terminal status SETTLED/FAILED, got {}",
            status
        )))
    }
}

pub fn require_status(actual: &TransactionStatus, expected: &TransactionStatus) -> E2eResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(E2eError::invariant(format!(
            "Expected status {}, got {}",
            expected, actual
        )))
    }
}

/// A transient state must have been observed at least once
pub fn require_seen(trajectory: &[TransactionStatus], expected: &TransactionStatus) -> E2eResult<()> {
    if trajectory.contains(expected) {
        return Ok(());
    }
    let seen: Vec<&str> = trajectory.iter().map(TransactionStatus::as_str).collect();
    Err(E2eError::invariant(format!(
        "{} state was not observed. Seen: {}",
        expected,
        seen.join(", ")
    )))
}

/// No single reading of the lock panel may show more than one holder.
///
/// Holders are counted by their rendered annotation, so this is only as
/// reliable as the panel's wording.
pub fn check_mutual_exclusion(readings: &[LockPanelReading]) -> E2eResult<()> {
    match readings.iter().find(|r| r.shows_multiple_holders()) {
        Some(reading) => Err(E2eError::invariant(format!(
            "UI displayed multiple lock holders simultaneously ({} holder annotations).",
            reading.holder_markers
        ))),
        None => Ok(()),
    }
}

/// The window must contain both an active and a released reading
pub fn check_liveness(readings: &[LockPanelReading]) -> E2eResult<()> {
    let saw_active = readings.iter().any(|r| r.state.is_active());
    let saw_released = readings
        .iter()
        .any(|r| r.state == settlement_common::LockState::Released);

    if saw_active && saw_released {
        return Ok(());
    }
    Err(E2eError::invariant(format!(
        "Lock indicator did not show both active and released states. sawActive={}, sawReleased={}",
        saw_active, saw_released
    )))
}

/// State of one transaction around a repeated trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencySample {
    pub status: TransactionStatus,
    pub log_count: usize,
}

/// A settled transaction must be untouched by another trigger
pub fn check_idempotency(before: &IdempotencySample, after: &IdempotencySample) -> E2eResult<()> {
    if after.status != before.status {
        return Err(E2eError::invariant(format!(
            "Status changed after re-trigger: {} -> {}",
            before.status, after.status
        )));
    }
    if after.log_count != before.log_count {
        return Err(E2eError::invariant(format!(
            "Duplicate settlement detected for settled transaction. Log count before={}, after={}.",
            before.log_count, after.log_count
        )));
    }
    Ok(())
}

/// Answer to one privileged request made by a restricted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAttempt {
    pub request: String,
    pub status: u16,
}

/// Every privileged write must have been refused with 403
pub fn check_authorization(outcomes: &[WriteAttempt]) -> E2eResult<()> {
    let leaks: Vec<String> = outcomes
        .iter()
        .filter(|o| o.status != 403)
        .map(|o| format!("{} returned {}", o.request, o.status))
        .collect();

    if leaks.is_empty() {
        Ok(())
    } else {
        Err(E2eError::invariant(format!(
            "Expected 403 for USER on every write endpoint: {}",
            leaks.join("; ")
        )))
    }
}

/// No privileged control may be rendered; `controls` pairs a selector with its visibility
pub fn check_controls_hidden(controls: &[(&str, bool)]) -> E2eResult<()> {
    let visible: Vec<&str> = controls
        .iter()
        .filter(|(_, shown)| *shown)
        .map(|(selector, _)| *selector)
        .collect();

    if visible.is_empty() {
        Ok(())
    } else {
        Err(E2eError::invariant(format!(
            "USER can see admin controls: {}",
            visible.join(", ")
        )))
    }
}

/// The backend must grant `required` and none of `forbidden` to the session
pub fn check_identity(identity: &AuthIdentity, required: &str, forbidden: &[&str]) -> E2eResult<()> {
    if !identity.has_role(required) {
        return Err(E2eError::invariant(format!(
            "Expected {} to hold role {}, got [{}]",
            identity.username,
            required,
            identity.roles.join(", ")
        )));
    }
    if let Some(role) = forbidden.iter().find(|r| identity.has_role(r)) {
        return Err(E2eError::invariant(format!(
            "{} unexpectedly holds role {}",
            identity.username, role
        )));
    }
    Ok(())
}
