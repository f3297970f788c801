//! Observable-state extraction
//!
//! Turns the cell text of dashboard tables into typed records. Tables may be
//! captured mid-render, so partial or malformed rows are dropped instead of
//! failing the read.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{Customer, Merchant, RetryCounter, SettlementLogEntry, Transaction, TransactionStatus};

/// Cell text of one rendered `<tr>`, trimmed
pub type Row = Vec<String>;

/// Tables rendered by the dashboard, each with a fixed element id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    Customers,
    Merchants,
    Transactions,
    Logs,
}

impl TableId {
    pub fn dom_id(&self) -> &'static str {
        match self {
            TableId::Customers => "customersTable",
            TableId::Merchants => "merchantsTable",
            TableId::Transactions => "transactionsTable",
            TableId::Logs => "logsTable",
        }
    }

    /// Fewest cells a data row must carry to be parsed
    pub fn min_cells(&self) -> usize {
        match self {
            TableId::Customers => 3,
            TableId::Merchants => 4,
            TableId::Transactions | TableId::Logs => 5,
        }
    }
}

/// Drop the header row of a raw table capture
pub fn data_rows(mut raw: Vec<Row>) -> Vec<Row> {
    if !raw.is_empty() {
        raw.remove(0);
    }
    raw
}

/// Parse a leading integer the way the dashboard's own scripts do:
/// optional sign, then digits, trailing text ignored.
pub fn parse_leading_int(cell: &str) -> Option<i64> {
    let trimmed = cell.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

fn retry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d+)\s*/\s*(\d+)\s*$").expect("static retry pattern"))
}

/// Parse a `count / max` retry cell, keeping the raw text when it does not match
pub fn parse_retry(cell: &str) -> RetryCounter {
    retry_pattern()
        .captures(cell)
        .and_then(|caps| {
            let count = caps[1].parse().ok()?;
            let max = caps[2].parse().ok()?;
            Some(RetryCounter::Parsed { count, max })
        })
        .unwrap_or_else(|| RetryCounter::Raw(cell.to_string()))
}

pub fn parse_customers(rows: &[Row]) -> Vec<Customer> {
    rows.iter()
        .filter(|r| r.len() >= TableId::Customers.min_cells())
        .filter_map(|r| {
            Some(Customer {
                id: parse_leading_int(&r[0])?,
                name: r[1].clone(),
                email: r[2].clone(),
            })
        })
        .collect()
}

pub fn parse_merchants(rows: &[Row]) -> Vec<Merchant> {
    rows.iter()
        .filter(|r| r.len() >= TableId::Merchants.min_cells())
        .filter_map(|r| {
            Some(Merchant {
                id: parse_leading_int(&r[0])?,
                name: r[1].clone(),
                bank_account: r[2].clone(),
                settlement_cycle: r[3].clone(),
            })
        })
        .collect()
}

pub fn parse_transactions(rows: &[Row]) -> Vec<Transaction> {
    rows.iter()
        .filter(|r| r.len() >= TableId::Transactions.min_cells())
        .filter_map(|r| {
            Some(Transaction {
                id: parse_leading_int(&r[0])?,
                amount: r[1].clone(),
                status: TransactionStatus::from(r[2].as_str()),
                retry: parse_retry(&r[3]),
                created_at: r[4].clone(),
            })
        })
        .collect()
}

pub fn parse_logs(rows: &[Row]) -> Vec<SettlementLogEntry> {
    rows.iter()
        .filter(|r| r.len() >= TableId::Logs.min_cells())
        .filter_map(|r| {
            Some(SettlementLogEntry {
                id: parse_leading_int(&r[0])?,
                transaction_id: parse_leading_int(&r[1]),
                attempt_number: r[2].clone(),
                result: r[3].clone(),
                message: r[4].clone(),
            })
        })
        .collect()
}

/// Exact (name, email) match, the only way to identify a customer before its id is known
pub fn find_customer<'a>(customers: &'a [Customer], name: &str, email: &str) -> Option<&'a Customer> {
    customers.iter().find(|c| c.name == name && c.email == email)
}

/// Exact (name, bank account, cycle) match
pub fn find_merchant<'a>(
    merchants: &'a [Merchant],
    name: &str,
    bank_account: &str,
    cycle: &str,
) -> Option<&'a Merchant> {
    merchants
        .iter()
        .find(|m| m.name == name && m.bank_account == bank_account && m.settlement_cycle == cycle)
}

pub fn status_of(transactions: &[Transaction], id: i64) -> Option<TransactionStatus> {
    transactions.iter().find(|t| t.id == id).map(|t| t.status.clone())
}

pub fn max_id(transactions: &[Transaction]) -> i64 {
    transactions.iter().map(|t| t.id).max().unwrap_or(0)
}

/// Newest transaction created after `previous_max` whose amount starts with `amount_prefix`
pub fn newest_after<'a>(
    transactions: &'a [Transaction],
    previous_max: i64,
    amount_prefix: &str,
) -> Option<&'a Transaction> {
    transactions
        .iter()
        .filter(|t| t.id > previous_max && t.amount.starts_with(amount_prefix))
        .max_by_key(|t| t.id)
}

pub fn logs_for(logs: &[SettlementLogEntry], transaction_id: i64) -> Vec<&SettlementLogEntry> {
    logs.iter()
        .filter(|l| l.transaction_id == Some(transaction_id))
        .collect()
}
