//! In-memory settlement dashboard
//!
//! `SimDashboard` plays both the browser page and the backend behind it.
//! Tables only change when their loader runs, settlement advances one
//! status per `loadTransactions` call after a trigger, and the lock panel
//! shows the lock held for a couple of `loadStats` calls per trigger.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use settlement_e2e::config::HarnessConfig;
use settlement_e2e::driver::{FetchRequest, FetchResponse, PageDriver, PageEvent, PageLauncher, Target, UrlWait};
use settlement_e2e::{E2eError, E2eResult};

pub const BASE_URL: &str = "http://dashboard.test";

/// Misbehaviours the backend can be told to show
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Settle straight from CAPTURED without a PROCESSING phase
    pub skip_processing: bool,
    /// Write another log row for settled transactions on every trigger
    pub duplicate_on_retrigger: bool,
    /// Accept settlement triggers from USER sessions
    pub leak_trigger: bool,
    /// Render two holder annotations while the lock is held
    pub double_holder: bool,
    /// Reject customer creation with this message
    pub reject_customer: Option<String>,
    /// Fail every page launch
    pub launch_fails: bool,
    /// Show admin-only controls to USER sessions
    pub show_admin_controls: bool,
    /// Settlement ends in FAILED without a retry
    pub fail_settlement: bool,
    /// First settlement attempt fails, the next one settles
    pub retry_after_failure: bool,
    /// Accept customer submissions without ever storing them
    pub drop_customer: bool,
    /// Another trigger moves settled transactions back to PROCESSING
    pub reopen_settled: bool,
    /// Render the framework error page after logout
    pub error_page_on_logout: bool,
    /// Treat anonymous pages as administrators
    pub open_access: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone)]
struct SimTransaction {
    id: i64,
    amount: String,
    status: &'static str,
    pending: bool,
    retried: bool,
}

#[derive(Debug, Default)]
struct Backend {
    faults: Faults,
    customers: Vec<(i64, String, String)>,
    merchants: Vec<(i64, String, String, String)>,
    transactions: Vec<SimTransaction>,
    logs: Vec<(i64, i64, u32, String)>,
    next_id: i64,
    lock_reads_left: u32,
    triggers: u32,
}

impl Backend {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_transaction(&mut self, amount: &str) -> i64 {
        let id = self.next_id();
        self.transactions.push(SimTransaction {
            id,
            amount: format!("{}.00", amount),
            status: "CAPTURED",
            pending: false,
            retried: false,
        });
        id
    }

    fn log_attempt(&mut self, tx_id: i64, result: &str) {
        let attempt = self.logs.iter().filter(|l| l.1 == tx_id).count() as u32 + 1;
        let id = self.next_id();
        self.logs.push((id, tx_id, attempt, result.to_string()));
    }

    fn trigger(&mut self) {
        self.triggers += 1;
        self.lock_reads_left = 2;
        let reopen = self.faults.reopen_settled;
        for tx in self.transactions.iter_mut() {
            match tx.status {
                "CAPTURED" => tx.pending = true,
                "SETTLED" if reopen => tx.status = "PROCESSING",
                _ => {}
            }
        }
        if self.faults.duplicate_on_retrigger {
            let settled: Vec<i64> = self
                .transactions
                .iter()
                .filter(|t| t.status == "SETTLED")
                .map(|t| t.id)
                .collect();
            for tx_id in settled {
                self.log_attempt(tx_id, "SETTLED");
            }
        }
    }

    fn advance_settlement(&mut self) {
        let faults = &self.faults;
        let mut attempts = Vec::new();
        for tx in self.transactions.iter_mut().filter(|t| t.pending) {
            tx.status = match tx.status {
                "CAPTURED" if faults.skip_processing => "SETTLED",
                "CAPTURED" => "PROCESSING",
                "PROCESSING" if faults.fail_settlement => "FAILED",
                "PROCESSING" if faults.retry_after_failure && !tx.retried => "FAILED",
                _ => "SETTLED",
            };
            match tx.status {
                "FAILED" => {
                    tx.retried = true;
                    tx.pending = faults.retry_after_failure;
                    attempts.push((tx.id, "FAILED"));
                }
                "SETTLED" => {
                    tx.pending = false;
                    attempts.push((tx.id, "SETTLED"));
                }
                _ => {}
            }
        }
        for (tx_id, result) in attempts {
            self.log_attempt(tx_id, result);
        }
    }

    fn lock_text(&mut self) -> String {
        if self.lock_reads_left == 0 {
            return "Settlement Activity\nNo Lock Held".to_string();
        }
        self.lock_reads_left -= 1;
        if self.faults.double_holder {
            "Settlement Activity\nRedis Lock Active\nHolder: node-a\nHolder: node-b".to_string()
        } else {
            "Settlement Activity\nRedis Lock Active\nHolder: node-a".to_string()
        }
    }

    fn stats(&self) -> serde_json::Value {
        let count = |s: &str| self.transactions.iter().filter(|t| t.status == s).count();
        json!({
            "totalTransactions": self.transactions.len(),
            "captured": count("CAPTURED"),
            "processing": count("PROCESSING"),
            "settled": count("SETTLED"),
            "failed": count("FAILED"),
            "lockHeld": self.lock_reads_left > 0,
            "runCountTotal": self.triggers
        })
    }
}

fn header(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// Shared backend; every launched page talks to the same one
#[derive(Clone, Default)]
pub struct SimDashboard {
    backend: Arc<Mutex<Backend>>,
    logins: Arc<AtomicU32>,
}

impl SimDashboard {
    pub fn new(faults: Faults) -> Self {
        let backend = Backend {
            faults,
            ..Default::default()
        };
        Self {
            backend: Arc::new(Mutex::new(backend)),
            logins: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Successful form logins across every page
    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn log_count(&self, transaction_id: i64) -> usize {
        let backend = self.backend.lock().unwrap();
        backend.logs.iter().filter(|l| l.1 == transaction_id).count()
    }

    pub fn triggers(&self) -> u32 {
        self.backend.lock().unwrap().triggers
    }
}

#[async_trait]
impl PageLauncher for SimDashboard {
    type Driver = SimPage;

    async fn launch(&self) -> E2eResult<SimPage> {
        if self.backend.lock().unwrap().faults.launch_fails {
            return Err(E2eError::DriverNotFound);
        }
        Ok(SimPage::new(self.backend.clone(), self.logins.clone()))
    }
}

#[derive(Default)]
struct PageState {
    role: Option<Role>,
    username: String,
    path: String,
    section: String,
    fields: HashMap<String, String>,
    tables: HashMap<&'static str, Vec<Vec<String>>>,
    lock_text: String,
}

/// One browser page against the simulated backend
pub struct SimPage {
    backend: Arc<Mutex<Backend>>,
    logins: Arc<AtomicU32>,
    state: Mutex<PageState>,
    events_tx: UnboundedSender<PageEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<PageEvent>>>,
}

impl SimPage {
    fn new(backend: Arc<Mutex<Backend>>, logins: Arc<AtomicU32>) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let state = PageState {
            path: "/".to_string(),
            section: "dashboard".to_string(),
            lock_text: "Settlement Activity\nNo Lock Held".to_string(),
            ..Default::default()
        };
        Self {
            backend,
            logins,
            state: Mutex::new(state),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn emit(&self, event: PageEvent) {
        let _ = self.events_tx.send(event);
    }

    fn http_error(&self, status: u16, path: &str) {
        self.emit(PageEvent::Response {
            status,
            url: format!("{}{}", BASE_URL, path),
        });
    }

    fn role(&self) -> Option<Role> {
        let role = self.state.lock().unwrap().role;
        role.or_else(|| self.backend.lock().unwrap().faults.open_access.then_some(Role::Admin))
    }

    fn field(&self, selector: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .fields
            .get(selector)
            .cloned()
            .unwrap_or_default()
    }

    fn submit_customer(&self) {
        if self.role() != Some(Role::Admin) {
            self.http_error(403, "/customers");
            return;
        }
        let mut backend = self.backend.lock().unwrap();
        if let Some(reason) = backend.faults.reject_customer.clone() {
            drop(backend);
            self.http_error(400, "/customers");
            self.emit(PageEvent::Dialog {
                kind: "alert".to_string(),
                message: format!("Customer creation failed: {}", reason),
            });
            return;
        }
        if backend.faults.drop_customer {
            return;
        }
        let id = backend.next_id();
        backend
            .customers
            .push((id, self.field("#customerName"), self.field("#customerEmail")));
    }

    fn submit_merchant(&self) {
        if self.role() != Some(Role::Admin) {
            self.http_error(403, "/merchants");
            return;
        }
        let mut backend = self.backend.lock().unwrap();
        let id = backend.next_id();
        backend.merchants.push((
            id,
            self.field("#merchantName"),
            self.field("#merchantBank"),
            self.field("#merchantCycle"),
        ));
    }

    fn submit_transaction(&self) {
        if self.role() != Some(Role::Admin) {
            self.http_error(403, "/transactions");
            return;
        }
        let amount = self.field("#amount");
        self.backend.lock().unwrap().add_transaction(&amount);
    }

    fn trigger(&self) {
        let allowed = match self.role() {
            Some(Role::Admin) => true,
            Some(Role::User) => self.backend.lock().unwrap().faults.leak_trigger,
            None => false,
        };
        if allowed {
            self.backend.lock().unwrap().trigger();
        } else {
            self.http_error(403, "/settlement/trigger");
        }
    }

    fn run_loader(&self, name: &str) {
        let mut backend = self.backend.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        match name {
            "loadCustomers" => {
                let mut rows = vec![header(&["ID", "Name", "Email"])];
                rows.extend(
                    backend
                        .customers
                        .iter()
                        .map(|(id, name, email)| vec![id.to_string(), name.clone(), email.clone()]),
                );
                state.tables.insert("customersTable", rows);
            }
            "loadMerchants" => {
                let mut rows = vec![header(&["ID", "Name", "Bank Account", "Cycle"])];
                rows.extend(backend.merchants.iter().map(|(id, name, bank, cycle)| {
                    vec![id.to_string(), name.clone(), bank.clone(), cycle.clone()]
                }));
                state.tables.insert("merchantsTable", rows);
            }
            "loadTransactions" => {
                backend.advance_settlement();
                let mut rows = vec![header(&["ID", "Amount", "Status", "Retries", "Created"])];
                rows.extend(backend.transactions.iter().map(|t| {
                    vec![
                        t.id.to_string(),
                        t.amount.clone(),
                        t.status.to_string(),
                        "0 / 3".to_string(),
                        "2026-10-17 09:00".to_string(),
                    ]
                }));
                state.tables.insert("transactionsTable", rows);
            }
            "loadLogs" => {
                let mut rows = vec![header(&["ID", "Transaction", "Attempt", "Result", "Message"])];
                rows.extend(backend.logs.iter().map(|(id, tx, attempt, result)| {
                    vec![
                        id.to_string(),
                        tx.to_string(),
                        attempt.to_string(),
                        result.clone(),
                        "Settlement attempt".to_string(),
                    ]
                }));
                state.tables.insert("logsTable", rows);
            }
            "loadStats" => {
                state.lock_text = backend.lock_text();
            }
            _ => {}
        }
    }

    fn is_write(request: &FetchRequest) -> bool {
        request.method == "POST"
    }
}

#[async_trait]
impl PageDriver for SimPage {
    async fn goto(&self, path: &str, _timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock().unwrap();
        state.path = if path.starts_with("/login") {
            "/login.html".to_string()
        } else {
            path.to_string()
        };
        state.section = "dashboard".to_string();
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        Ok(format!("{}{}", BASE_URL, self.state.lock().unwrap().path))
    }

    async fn title(&self) -> E2eResult<String> {
        Ok("Settlement Engine Dashboard".to_string())
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> E2eResult<()> {
        Ok(())
    }

    async fn click(&self, target: &Target) -> E2eResult<()> {
        match target {
            Target::Role { name, .. } if name == "Trigger Settlement" => self.trigger(),
            Target::Role { name, .. } => {
                let section = match name.as_str() {
                    "Dashboard" => "dashboard",
                    "Customers" => "customers",
                    "Merchants" => "merchants",
                    "Transactions" => "transactions",
                    "Reconciliation" => "reconciliation",
                    "Settlement Logs" => "logs",
                    other => return Err(E2eError::Driver(format!("no button named {}", other))),
                };
                self.state.lock().unwrap().section = section.to_string();
            }
            Target::HasText { selector, .. } if selector.starts_with("#customer") => self.submit_customer(),
            Target::HasText { selector, .. } if selector.starts_with("#merchant") => self.submit_merchant(),
            Target::HasText { selector, .. } if selector.starts_with("#transaction") => self.submit_transaction(),
            other => return Err(E2eError::Driver(format!("cannot click {:?}", other))),
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.state
            .lock()
            .unwrap()
            .fields
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn has_class(&self, selector: &str, class: &str) -> E2eResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(class == "hidden" && selector.trim_start_matches('#') != state.section)
    }

    async fn is_displayed(&self, _selector: &str) -> E2eResult<bool> {
        let show_anyway = self.backend.lock().unwrap().faults.show_admin_controls;
        Ok(self.role() == Some(Role::Admin) || show_anyway)
    }

    async fn inner_text(&self, selector: &str) -> E2eResult<String> {
        let state = self.state.lock().unwrap();
        Ok(match selector {
            "#settlementActivity" => state.lock_text.clone(),
            "#authInfo" => match state.role {
                Some(Role::Admin) => format!("Signed in as {} (ADMIN, USER)", state.username),
                Some(Role::User) => format!("Signed in as {} (USER)", state.username),
                None => String::new(),
            },
            "body" if state.path.starts_with("/login") => {
                if self.backend.lock().unwrap().faults.error_page_on_logout && state.path.ends_with("?logout") {
                    "Whitelabel Error Page\nThis application has no explicit mapping for /error".to_string()
                } else {
                    "Sign in\nUsername\nPassword".to_string()
                }
            }
            _ => "Settlement Engine".to_string(),
        })
    }

    async fn table_rows(&self, table_id: &str) -> E2eResult<Vec<Vec<String>>> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.get(table_id).cloned().unwrap_or_default())
    }

    async fn call_globals(&self, names: &[&str]) -> E2eResult<()> {
        for name in names {
            self.run_loader(name);
        }
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> E2eResult<FetchResponse> {
        let role = self.role();
        let respond = |status: u16, body: serde_json::Value| -> E2eResult<FetchResponse> {
            if status >= 400 {
                self.http_error(status, &request.path);
            }
            Ok(FetchResponse {
                status,
                body: body.to_string(),
            })
        };

        let Some(role) = role else {
            return respond(401, json!({}));
        };

        if Self::is_write(request) {
            let leaked = request.path == "/settlement/trigger" && self.backend.lock().unwrap().faults.leak_trigger;
            if role != Role::Admin && !leaked {
                return respond(403, json!({"error": "Forbidden"}));
            }
            let mut backend = self.backend.lock().unwrap();
            if request.path == "/settlement/trigger" {
                backend.trigger();
                return respond(200, json!("Settlement triggered"));
            }
            if let Some(query) = request.path.strip_prefix("/transactions?") {
                let amount = query
                    .split('&')
                    .find_map(|kv| kv.strip_prefix("amount="))
                    .unwrap_or("0");
                let id = backend.add_transaction(amount);
                return respond(200, json!({"id": id, "status": "CAPTURED"}));
            }
            return respond(200, json!({}));
        }

        let state_username = self.state.lock().unwrap().username.clone();
        match request.path.as_str() {
            "/api/auth/me" => {
                let roles = match role {
                    Role::Admin => json!(["ROLE_ADMIN", "ROLE_USER"]),
                    Role::User => json!(["ROLE_USER"]),
                };
                respond(200, json!({"username": state_username, "roles": roles}))
            }
            "/api/settlements/stats" => {
                let stats = self.backend.lock().unwrap().stats();
                respond(200, stats)
            }
            "/api/reconciliation/exceptions" => respond(200, json!([])),
            _ => respond(404, json!({})),
        }
    }

    async fn click_and_wait_for_url(&self, target: &Target, wait: &UrlWait, _timeout: Duration) -> E2eResult<()> {
        let mut state = self.state.lock().unwrap();
        match target {
            Target::Css { selector } if selector == "#logoutBtn" => {
                state.role = None;
                state.username.clear();
                state.path = "/login.html?logout".to_string();
            }
            Target::Css { .. } => {
                let username = state.fields.get("input[name=\"username\"]").cloned().unwrap_or_default();
                let password = state.fields.get("input[name=\"password\"]").cloned().unwrap_or_default();
                let role = match (username.as_str(), password.as_str()) {
                    ("admin", "admin123") => Some(Role::Admin),
                    ("user", "user123") => Some(Role::User),
                    _ => None,
                };
                match role {
                    Some(role) => {
                        self.logins.fetch_add(1, Ordering::SeqCst);
                        state.role = Some(role);
                        state.username = username;
                        state.path = "/".to_string();
                        state.section = "dashboard".to_string();
                    }
                    None => state.path = "/login.html?error".to_string(),
                }
            }
            other => return Err(E2eError::Driver(format!("cannot click {:?}", other))),
        }

        let path = state.path.split('?').next().unwrap_or_default().to_string();
        if wait.matches_path(&path) {
            Ok(())
        } else {
            Err(E2eError::Driver(format!("Timeout exceeded waiting for URL; at {}", state.path)))
        }
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> E2eResult<()> {
        let section = self.state.lock().unwrap().section.clone();
        std::fs::write(path, format!("png:{}", section))?;
        Ok(())
    }

    fn take_events(&self) -> Option<UnboundedReceiver<PageEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) -> E2eResult<()> {
        Ok(())
    }
}

/// Harness config pointed at the simulated dashboard, writing into `dir`
pub fn config_in(dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig {
        base_url: BASE_URL.to_string(),
        screenshot_dir: dir.join("e2e"),
        report_dir: dir.join("roles"),
        ..Default::default()
    };
    config.preflight.enabled = false;
    config.end_to_end.authenticate = true;
    config
}
