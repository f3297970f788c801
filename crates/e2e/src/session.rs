//! Session controller
//!
//! One authenticated browser page plus everything it has signalled so far.
//! All page interaction in the flows goes through a [`Session`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use settlement_common::extract::{self, Row, TableId};
use settlement_common::{
    AuthIdentity, Customer, LockPanelReading, Merchant, SettlementLogEntry, StatsSnapshot, Transaction,
};

use crate::config::Credentials;
use crate::driver::{FetchRequest, FetchResponse, PageDriver, PageEvent, Target, UrlWait};
use crate::error::{E2eError, E2eResult};
use crate::step::Capture;

const LOGIN_PATH: &str = "/login";
const LOCK_PANEL: &str = "#settlementActivity";
const AUTH_BANNER: &str = "#authInfo";

/// Top-level dashboard sections, each opened by a nav button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Dashboard,
    Customers,
    Merchants,
    Transactions,
    Reconciliation,
    SettlementLogs,
}

impl Section {
    pub fn button_name(&self) -> &'static str {
        match self {
            Section::Dashboard => "Dashboard",
            Section::Customers => "Customers",
            Section::Merchants => "Merchants",
            Section::Transactions => "Transactions",
            Section::Reconciliation => "Reconciliation",
            Section::SettlementLogs => "Settlement Logs",
        }
    }

    pub fn dom_id(&self) -> &'static str {
        match self {
            Section::Dashboard => "dashboard",
            Section::Customers => "customers",
            Section::Merchants => "merchants",
            Section::Transactions => "transactions",
            Section::Reconciliation => "reconciliation",
            Section::SettlementLogs => "logs",
        }
    }
}

/// Page-global functions that refresh one part of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Loader {
    Customers,
    Merchants,
    Transactions,
    Logs,
    Stats,
    ExceptionQueue,
}

impl Loader {
    pub fn global_name(&self) -> &'static str {
        match self {
            Loader::Customers => "loadCustomers",
            Loader::Merchants => "loadMerchants",
            Loader::Transactions => "loadTransactions",
            Loader::Logs => "loadLogs",
            Loader::Stats => "loadStats",
            Loader::ExceptionQueue => "loadExceptionQueue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Everything the page signalled during the session, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalLog {
    pub dialogs: Vec<DialogRecord>,
    pub page_errors: Vec<String>,
    /// `"<status> <url>"` for application responses with status >= 400
    pub http_errors: Vec<String>,
}

impl SignalLog {
    /// First dialog whose message contains `needle`, case-insensitively
    pub fn dialog_containing(&self, needle: &str) -> Option<&DialogRecord> {
        let needle = needle.to_lowercase();
        self.dialogs
            .iter()
            .find(|d| d.message.to_lowercase().contains(&needle))
    }
}

/// Knobs a session needs from the harness configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub base_url: String,
    pub error_page_marker: String,
    pub section_settle: Duration,
    pub loader_settle: Duration,
    pub auth_timeout: Duration,
    pub full_page_screenshots: bool,
}

impl SessionSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            error_page_marker: "whitelabel".to_string(),
            section_settle: Duration::from_millis(300),
            loader_settle: Duration::from_millis(250),
            auth_timeout: Duration::from_secs(15),
            full_page_screenshots: true,
        }
    }
}

pub struct Session<D: PageDriver> {
    driver: D,
    events: Option<UnboundedReceiver<PageEvent>>,
    signals: SignalLog,
    settings: SessionSettings,
}

impl<D: PageDriver> Session<D> {
    pub fn open(driver: D, settings: SessionSettings) -> Self {
        let events = driver.take_events();
        if events.is_none() {
            warn!("Page driver exposes no event stream; dialogs and page errors will not be recorded");
        }
        Self {
            driver,
            events,
            signals: SignalLog::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn drain_events(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        loop {
            match events.try_recv() {
                Ok(PageEvent::Dialog { kind, message }) => {
                    debug!("Dialog ({}): {}", kind, message);
                    self.signals.dialogs.push(DialogRecord { kind, message });
                }
                Ok(PageEvent::PageError { message }) => {
                    warn!("Page error: {}", message);
                    self.signals.page_errors.push(message);
                }
                Ok(PageEvent::Response { status, url }) => {
                    if url.starts_with(&self.settings.base_url) {
                        debug!("HTTP {} from {}", status, url);
                        self.signals.http_errors.push(format!("{} {}", status, url));
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.events = None;
                    break;
                }
            }
        }
    }

    /// Signals recorded so far
    pub fn signals(&mut self) -> &SignalLog {
        self.drain_events();
        &self.signals
    }

    /// Stop the page and hand back everything it signalled
    pub async fn close(mut self) -> SignalLog {
        if let Err(e) = self.driver.close().await {
            warn!("Closing browser failed: {}", e);
        }
        self.drain_events();
        self.signals
    }

    pub async fn goto(&mut self, path: &str, timeout: Duration) -> E2eResult<()> {
        debug!("Navigating to {}", path);
        self.driver.goto(path, timeout).await
    }

    /// Log in through the form and wait until the browser leaves the login route
    pub async fn authenticate(&mut self, credentials: &Credentials) -> E2eResult<()> {
        info!("Logging in as {}", credentials.username);
        let auth_error = |reason: String| E2eError::Auth {
            username: credentials.username.clone(),
            reason,
        };

        self.driver
            .goto(LOGIN_PATH, self.settings.auth_timeout)
            .await
            .map_err(|e| auth_error(e.to_string()))?;
        self.driver
            .fill("input[name=\"username\"]", &credentials.username)
            .await
            .map_err(|e| auth_error(e.to_string()))?;
        self.driver
            .fill("input[name=\"password\"]", &credentials.password)
            .await
            .map_err(|e| auth_error(e.to_string()))?;
        self.driver
            .click_and_wait_for_url(
                &Target::css("button[type=\"submit\"]"),
                &UrlWait::LeavesPrefix {
                    prefix: LOGIN_PATH.to_string(),
                },
                self.settings.auth_timeout,
            )
            .await
            .map_err(|e| auth_error(e.to_string()))
    }

    /// Log out and verify the login page, not an error page, is shown
    pub async fn logout(&mut self) -> E2eResult<()> {
        info!("Logging out");
        self.driver
            .click_and_wait_for_url(
                &Target::css("#logoutBtn"),
                &UrlWait::EntersPrefix {
                    prefix: LOGIN_PATH.to_string(),
                },
                self.settings.auth_timeout,
            )
            .await
            .map_err(|e| E2eError::Logout(e.to_string()))?;

        let url = self.driver.current_url().await?;
        if !url.contains(LOGIN_PATH) {
            return Err(E2eError::Logout(format!(
                "Expected to land on {} after logout, got {}",
                LOGIN_PATH, url
            )));
        }

        let body = self.driver.inner_text("body").await?;
        let marker = self.settings.error_page_marker.to_lowercase();
        if !marker.is_empty() && body.to_lowercase().contains(&marker) {
            return Err(E2eError::Logout(format!(
                "Error page ('{}') shown after logout",
                self.settings.error_page_marker
            )));
        }
        Ok(())
    }

    pub async fn navigate_to(&mut self, section: Section) -> E2eResult<()> {
        debug!("Opening section {}", section.button_name());
        self.driver.click(&Target::button(section.button_name())).await?;
        sleep(self.settings.section_settle).await;

        let selector = format!("#{}", section.dom_id());
        if self.driver.has_class(&selector, "hidden").await? {
            return Err(E2eError::SectionNotVisible(section.dom_id().to_string()));
        }
        Ok(())
    }

    /// Run dashboard loaders in order, then give the DOM a moment to render
    pub async fn load(&mut self, loaders: &[Loader]) -> E2eResult<()> {
        let names: Vec<&str> = loaders.iter().map(Loader::global_name).collect();
        self.driver.call_globals(&names).await?;
        sleep(self.settings.loader_settle).await;
        Ok(())
    }

    /// Data rows of a dashboard table, header dropped
    pub async fn read_table(&mut self, table: TableId) -> E2eResult<Vec<Row>> {
        let raw = self.driver.table_rows(table.dom_id()).await?;
        Ok(extract::data_rows(raw))
    }

    pub async fn customers(&mut self) -> E2eResult<Vec<Customer>> {
        Ok(extract::parse_customers(&self.read_table(TableId::Customers).await?))
    }

    pub async fn merchants(&mut self) -> E2eResult<Vec<Merchant>> {
        Ok(extract::parse_merchants(&self.read_table(TableId::Merchants).await?))
    }

    pub async fn transactions(&mut self) -> E2eResult<Vec<Transaction>> {
        Ok(extract::parse_transactions(&self.read_table(TableId::Transactions).await?))
    }

    pub async fn logs(&mut self) -> E2eResult<Vec<SettlementLogEntry>> {
        Ok(extract::parse_logs(&self.read_table(TableId::Logs).await?))
    }

    pub async fn refresh_customers(&mut self) -> E2eResult<Vec<Customer>> {
        self.load(&[Loader::Customers]).await?;
        self.customers().await
    }

    pub async fn refresh_merchants(&mut self) -> E2eResult<Vec<Merchant>> {
        self.load(&[Loader::Merchants]).await?;
        self.merchants().await
    }

    /// Reload transactions and return them
    pub async fn refresh_transactions(&mut self) -> E2eResult<Vec<Transaction>> {
        self.load(&[Loader::Transactions]).await?;
        self.transactions().await
    }

    /// Reload logs and return them
    pub async fn refresh_logs(&mut self) -> E2eResult<Vec<SettlementLogEntry>> {
        self.load(&[Loader::Logs]).await?;
        self.logs().await
    }

    pub async fn lock_panel(&mut self) -> E2eResult<LockPanelReading> {
        let text = self.driver.inner_text(LOCK_PANEL).await?;
        Ok(LockPanelReading::from_text(&text))
    }

    /// Reload stats and read the lock panel
    pub async fn refresh_lock_panel(&mut self) -> E2eResult<LockPanelReading> {
        self.load(&[Loader::Stats]).await?;
        self.lock_panel().await
    }

    pub async fn fetch(&mut self, request: &FetchRequest) -> E2eResult<FetchResponse> {
        debug!("{} {} from page", request.method, request.path);
        self.driver.fetch(request).await
    }

    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&mut self, path: &str) -> E2eResult<T> {
        let response = self.fetch(&FetchRequest::get(path)).await?;
        response.require_success(&format!("GET {}", path))?.json()
    }

    /// Identity the backend associates with the page's session cookie
    pub async fn identity(&mut self) -> E2eResult<AuthIdentity> {
        self.fetch_json("/api/auth/me").await
    }

    pub async fn stats(&mut self) -> E2eResult<StatsSnapshot> {
        self.fetch_json("/api/settlements/stats").await
    }

    /// Text of the signed-in banner
    pub async fn auth_banner(&mut self) -> E2eResult<String> {
        self.driver.inner_text(AUTH_BANNER).await
    }

    /// Whether a control is rendered (computed display is not `none`)
    pub async fn control_visible(&mut self, selector: &str) -> E2eResult<bool> {
        self.driver.is_displayed(selector).await
    }

    pub async fn wait_for(&mut self, selector: &str, timeout: Duration) -> E2eResult<()> {
        self.driver.wait_for_selector(selector, timeout).await
    }

    pub async fn has_class(&mut self, selector: &str, class: &str) -> E2eResult<bool> {
        self.driver.has_class(selector, class).await
    }

    pub async fn title(&mut self) -> E2eResult<String> {
        self.driver.title().await
    }

    pub async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.driver.fill(selector, value).await
    }

    pub async fn click(&mut self, target: &Target) -> E2eResult<()> {
        self.driver.click(target).await
    }
}

#[async_trait]
impl<D: PageDriver> Capture for Session<D> {
    async fn capture(&mut self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.driver
            .screenshot(path, self.settings.full_page_screenshots)
            .await
    }
}
