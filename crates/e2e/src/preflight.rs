//! Reachability check run before a browser is launched

use std::time::Duration;

use futures::FutureExt;
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::config::PreflightConfig;
use crate::error::E2eResult;
use crate::poller::PollSpec;

/// Outcome of one request against the dashboard origin
#[derive(Debug)]
enum Reachability {
    Up(StatusCode),
    Down(String),
}

struct DashboardCheck {
    client: reqwest::Client,
    url: String,
    attempts: u32,
}

impl DashboardCheck {
    /// Connection failures and server errors are observations, not errors
    async fn check(&mut self) -> E2eResult<Reachability> {
        self.attempts += 1;
        match self.client.get(&self.url).send().await {
            Ok(resp) if !resp.status().is_server_error() => Ok(Reachability::Up(resp.status())),
            Ok(resp) => {
                warn!("Preflight returned {}", resp.status());
                Ok(Reachability::Down(format!("HTTP {}", resp.status())))
            }
            Err(e) => {
                if self.attempts == 1 {
                    info!("Waiting for dashboard at {}...", self.url);
                }
                if !e.is_connect() {
                    warn!("Preflight error: {}", e);
                }
                Ok(Reachability::Down(e.to_string()))
            }
        }
    }
}

/// Wait until the dashboard answers any HTTP response below 500.
///
/// Redirects to the login page and 401s count as reachable; only
/// connection failures and server errors keep the check waiting.
pub async fn wait_for_dashboard(base_url: &str, config: &PreflightConfig) -> E2eResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let mut check = DashboardCheck {
        client,
        url: base_url.to_string(),
        attempts: 0,
    };

    let poll = PollSpec::new(
        format!("dashboard at {} to answer", base_url),
        Duration::from_millis(config.interval_ms),
        Duration::from_millis(config.timeout_ms),
    );
    let status = poll
        .until(
            &mut check,
            |c| c.check().boxed(),
            |reachability| match reachability {
                Reachability::Up(status) => Ok(Some(*status)),
                Reachability::Down(_) => Ok(None),
            },
        )
        .await?;

    info!("Dashboard reachable at {} ({})", base_url, status);
    Ok(())
}
