//! Core records observed on the settlement dashboard and its JSON API

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Customer row as rendered in `#customersTable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// Merchant row as rendered in `#merchantsTable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub bank_account: String,
    pub settlement_cycle: String,
}

/// Settlement status of a transaction.
///
/// The backend owns every transition; the harness only ever observes one.
/// Anything the dashboard renders that is not one of the four known states
/// is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TransactionStatus {
    Captured,
    Processing,
    Settled,
    Failed,
    Other(String),
}

impl TransactionStatus {
    /// Position in the forward order CAPTURED < PROCESSING < {SETTLED, FAILED}.
    pub fn rank(&self) -> Option<u8> {
        match self {
            TransactionStatus::Captured => Some(0),
            TransactionStatus::Processing => Some(1),
            TransactionStatus::Settled | TransactionStatus::Failed => Some(2),
            TransactionStatus::Other(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Settled | TransactionStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Captured => "CAPTURED",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Settled => "SETTLED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Other(raw) => raw,
        }
    }

    /// Compare two statuses under the forward order. Unknown statuses and the
    /// two terminal states are incomparable.
    pub fn progress_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match (self.rank()?, other.rank()?) {
            (2, 2) => None,
            (a, b) => Some(a.cmp(&b)),
        }
    }
}

impl From<&str> for TransactionStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "CAPTURED" => TransactionStatus::Captured,
            "PROCESSING" => TransactionStatus::Processing,
            "SETTLED" => TransactionStatus::Settled,
            "FAILED" => TransactionStatus::Failed,
            other => TransactionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TransactionStatus {
    fn from(raw: String) -> Self {
        TransactionStatus::from(raw.as_str())
    }
}

impl From<TransactionStatus> for String {
    fn from(status: TransactionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `retryCount / maxRetries` cell of the transactions table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetryCounter {
    Parsed { count: u32, max: u32 },
    Raw(String),
}

impl fmt::Display for RetryCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCounter::Parsed { count, max } => write!(f, "{} / {}", count, max),
            RetryCounter::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Transaction row as rendered in `#transactionsTable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    /// Decimal amount exactly as the dashboard renders it (e.g. `1000.00`)
    pub amount: String,
    pub status: TransactionStatus,
    pub retry: RetryCounter,
    pub created_at: String,
}

/// Settlement log row as rendered in `#logsTable`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementLogEntry {
    pub id: i64,
    /// `None` when the dashboard renders the placeholder `-`
    pub transaction_id: Option<i64>,
    pub attempt_number: String,
    pub result: String,
    pub message: String,
}

/// Point-in-time projection of `GET /api/settlements/stats`.
///
/// Every field is optional so that a backend adding or dropping counters
/// never breaks deserialization. Timestamps are kept as raw JSON because the
/// backend may render them either as ISO strings or as date arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSnapshot {
    pub total_transactions: Option<u64>,
    pub captured: Option<u64>,
    pub processing: Option<u64>,
    pub settled: Option<u64>,
    pub failed: Option<u64>,
    pub exception_queued: Option<u64>,
    pub average_retry_count: Option<f64>,
    pub lock_held: Option<bool>,
    pub lock_holder: Option<String>,
    pub last_run_time: Option<serde_json::Value>,
    pub last_processed_count: Option<u64>,
    pub last_run_source: Option<String>,
    pub last_lock_acquired_at: Option<serde_json::Value>,
    pub last_lock_released_at: Option<serde_json::Value>,
    pub last_lock_skipped_at: Option<serde_json::Value>,
    pub last_lock_holder: Option<String>,
    pub run_count_total: Option<u64>,
    pub run_success_total: Option<u64>,
    pub run_failure_total: Option<u64>,
    pub lock_skipped_total: Option<u64>,
    pub processed_transactions_total: Option<u64>,
    pub settled_transactions_total: Option<u64>,
    pub average_run_duration_millis: Option<f64>,
}

/// Response of `GET /api/auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AuthIdentity {
    /// True when `role` is granted, with or without the `ROLE_` prefix
    pub fn has_role(&self, role: &str) -> bool {
        let bare = role.trim_start_matches("ROLE_");
        self.roles
            .iter()
            .any(|r| r.trim_start_matches("ROLE_").eq_ignore_ascii_case(bare))
    }
}

/// Entry of `GET /api/reconciliation/exceptions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionQueueItem {
    pub transaction_id: i64,
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub reconciliation_status: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub exception_reason: Option<String>,
}
