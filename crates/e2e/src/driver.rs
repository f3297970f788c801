//! Page-driver seam
//!
//! Everything the harness does to a browser page goes through [`PageDriver`].
//! The production implementation is the Playwright bridge; tests substitute
//! an in-memory dashboard.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::{E2eError, E2eResult};

/// An element to act on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Target {
    /// First element matching a CSS selector
    Css { selector: String },
    /// Element located by accessible role and name
    Role { role: String, name: String, exact: bool },
    /// First element matching `selector` whose text contains `text`
    HasText { selector: String, text: String },
}

impl Target {
    pub fn css(selector: impl Into<String>) -> Self {
        Target::Css {
            selector: selector.into(),
        }
    }

    /// Button with exactly this accessible name
    pub fn button(name: impl Into<String>) -> Self {
        Target::Role {
            role: "button".to_string(),
            name: name.into(),
            exact: true,
        }
    }

    pub fn has_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Target::HasText {
            selector: selector.into(),
            text: text.into(),
        }
    }
}

/// URL condition awaited after a navigation-causing click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UrlWait {
    /// Path no longer starts with `prefix`
    LeavesPrefix { prefix: String },
    /// Path starts with `prefix`
    EntersPrefix { prefix: String },
}

impl UrlWait {
    /// Whether a URL path satisfies the condition
    pub fn matches_path(&self, path: &str) -> bool {
        match self {
            UrlWait::LeavesPrefix { prefix } => !path.starts_with(prefix.as_str()),
            UrlWait::EntersPrefix { prefix } => path.starts_with(prefix.as_str()),
        }
    }
}

/// Same-origin request issued from inside the page, carrying its session cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub method: String,
    pub path: String,
    /// Sent as JSON with a matching content type when present
    pub body: Option<serde_json::Value>,
}

impl FetchRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            body: None,
        }
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> E2eResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Fail unless the status is 2xx
    pub fn require_success(self, what: &str) -> E2eResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(E2eError::Driver(format!("{} returned HTTP {}", what, self.status)))
        }
    }
}

/// Signal raised by the page outside of any request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PageEvent {
    /// alert/confirm/prompt, accepted automatically
    Dialog {
        #[serde(rename = "type")]
        kind: String,
        message: String,
    },
    /// Uncaught script error
    PageError { message: String },
    /// HTTP response with status >= 400
    Response { status: u16, url: String },
}

/// Operations the harness needs from a browser page.
///
/// Paths are relative to the page's base URL. Selectors are CSS.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for DOMContentLoaded
    async fn goto(&self, path: &str, timeout: Duration) -> E2eResult<()>;

    async fn current_url(&self) -> E2eResult<String>;

    async fn title(&self) -> E2eResult<String>;

    /// Wait until the selector matches a visible element
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> E2eResult<()>;

    async fn click(&self, target: &Target) -> E2eResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()>;

    async fn has_class(&self, selector: &str, class: &str) -> E2eResult<bool>;

    /// Computed `display` is not `none`
    async fn is_displayed(&self, selector: &str) -> E2eResult<bool>;

    async fn inner_text(&self, selector: &str) -> E2eResult<String>;

    /// Trimmed cell text of every `<tr>` in the table with this id, header included
    async fn table_rows(&self, table_id: &str) -> E2eResult<Vec<Vec<String>>>;

    /// Await each named page-global function in order, skipping names that are not functions
    async fn call_globals(&self, names: &[&str]) -> E2eResult<()>;

    async fn fetch(&self, request: &FetchRequest) -> E2eResult<FetchResponse>;

    /// Click and wait until the URL satisfies `wait`
    async fn click_and_wait_for_url(&self, target: &Target, wait: &UrlWait, timeout: Duration) -> E2eResult<()>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()>;

    /// Hand over the page's event stream. Yields `Some` at most once.
    fn take_events(&self) -> Option<UnboundedReceiver<PageEvent>>;

    async fn close(&self) -> E2eResult<()>;
}

/// Opens isolated pages: every call yields a page with its own cookie jar
#[async_trait]
pub trait PageLauncher: Send + Sync {
    type Driver: PageDriver + 'static;

    async fn launch(&self) -> E2eResult<Self::Driver>;
}
