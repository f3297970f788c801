//! Playwright browser automation
//!
//! A session keeps one browser page alive across many steps, so the page is
//! owned by a long-running `node` process executing [`BRIDGE_SCRIPT`]. The
//! harness talks to it over stdin/stdout with one JSON object per line:
//!
//! - request: `{"id": 1, "op": "click", "args": {...}}`
//! - response: `{"id": 1, "ok": true, "value": ...}` or `{"id": 1, "ok": false, "error": "..."}`
//! - event: `{"event": "dialog" | "pageError" | "response", ...}`, sent at any time

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::driver::{FetchRequest, FetchResponse, PageDriver, PageEvent, PageLauncher, Target, UrlWait};
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Node.js executable running the bridge
    pub node_binary: String,

    /// Directory holding the `playwright` package; defaults to `./node_modules`
    pub node_path: Option<PathBuf>,

    /// Default timeout of a single page action
    pub action_timeout_ms: u64,

    /// Capture the full scrollable page rather than the viewport
    pub full_page_screenshots: bool,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: "node".to_string(),
            node_path: None,
            action_timeout_ms: 10_000,
            full_page_screenshots: true,
        }
    }
}

impl PlaywrightConfig {
    fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    fn resolve_node_path(&self) -> Option<PathBuf> {
        self.node_path.clone().or_else(|| {
            let local = std::env::current_dir().ok()?.join("node_modules");
            local.is_dir().then_some(local)
        })
    }
}

/// Script run by `node`; owns the browser, context and page of one session
pub const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

let browser = null;
let page = null;

function emit(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

function locate(target) {
  switch (target.kind) {
    case 'css':
      return page.locator(target.selector).first();
    case 'role':
      return page.getByRole(target.role, { name: target.name, exact: target.exact }).first();
    case 'hasText':
      return page.locator(target.selector, { hasText: target.text }).first();
    default:
      throw new Error('unknown target kind: ' + target.kind);
  }
}

function urlPredicate(wait) {
  switch (wait.kind) {
    case 'leavesPrefix':
      return (url) => !url.pathname.startsWith(wait.prefix);
    case 'entersPrefix':
      return (url) => url.pathname.startsWith(wait.prefix);
    default:
      throw new Error('unknown url wait: ' + wait.kind);
  }
}

const handlers = {
  async launch(args) {
    browser = await playwright[args.browser].launch({ headless: args.headless });
    const context = await browser.newContext({
      baseURL: args.baseUrl,
      viewport: { width: args.viewportWidth, height: args.viewportHeight },
    });
    page = await context.newPage();
    page.setDefaultTimeout(args.actionTimeoutMs);
    page.on('dialog', async (dialog) => {
      emit({ event: 'dialog', type: dialog.type(), message: dialog.message() });
      await dialog.accept().catch(() => {});
    });
    page.on('pageerror', (error) => emit({ event: 'pageError', message: String(error.message || error) }));
    page.on('response', (response) => {
      if (response.status() >= 400) {
        emit({ event: 'response', status: response.status(), url: response.url() });
      }
    });
  },
  async goto(args) {
    await page.goto(args.path, { waitUntil: 'domcontentloaded', timeout: args.timeoutMs });
  },
  async currentUrl() {
    return page.url();
  },
  async title() {
    return page.title();
  },
  async waitForSelector(args) {
    await page.waitForSelector(args.selector, { timeout: args.timeoutMs });
  },
  async click(args) {
    await locate(args.target).click();
  },
  async fill(args) {
    await page.fill(args.selector, args.value);
  },
  async hasClass(args) {
    return page.$eval(args.selector, (el, cls) => el.classList.contains(cls), args.className);
  },
  async isDisplayed(args) {
    return page.$eval(args.selector, (el) => getComputedStyle(el).display !== 'none');
  },
  async innerText(args) {
    return page.locator(args.selector).first().innerText();
  },
  async tableRows(args) {
    return page.$$eval('#' + args.tableId + ' tr', (rows) =>
      rows.map((row) => Array.from(row.querySelectorAll('td')).map((cell) => (cell.textContent || '').trim()))
    );
  },
  async callGlobals(args) {
    await page.evaluate(async (names) => {
      for (const name of names) {
        const fn = window[name];
        if (typeof fn === 'function') {
          await fn();
        }
      }
    }, args.names);
  },
  async fetch(args) {
    return page.evaluate(async (req) => {
      const init = { method: req.method, headers: {} };
      if (req.body !== null && req.body !== undefined) {
        init.headers['Content-Type'] = 'application/json';
        init.body = JSON.stringify(req.body);
      }
      const res = await fetch(req.path, init);
      return { status: res.status, body: await res.text() };
    }, args.request);
  },
  async clickAndWaitForUrl(args) {
    await Promise.all([
      page.waitForURL(urlPredicate(args.wait), { timeout: args.timeoutMs }),
      locate(args.target).click(),
    ]);
  },
  async screenshot(args) {
    await page.screenshot({ path: args.path, fullPage: args.fullPage });
  },
  async close() {
    if (browser) {
      await browser.close();
      browser = null;
    }
  },
};

const input = readline.createInterface({ input: process.stdin });
input.on('line', async (line) => {
  let request;
  try {
    request = JSON.parse(line);
  } catch (error) {
    return;
  }
  try {
    const handler = handlers[request.op];
    if (!handler) {
      throw new Error('unknown op: ' + request.op);
    }
    const value = await handler(request.args || {});
    emit({ id: request.id, ok: true, value: value === undefined ? null : value });
  } catch (error) {
    emit({ id: request.id, ok: false, error: String((error && error.message) || error) });
  }
});
input.on('close', async () => {
  if (browser) {
    await browser.close().catch(() => {});
  }
  process.exit(0);
});
"#;

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Event(PageEvent),
    Response(BridgeResponse),
}

struct BridgeChannel {
    stdin: ChildStdin,
    responses: mpsc::UnboundedReceiver<BridgeResponse>,
    next_id: u64,
}

/// Browser page driven through a persistent Playwright bridge process
pub struct PlaywrightBridge {
    channel: Mutex<BridgeChannel>,
    events: StdMutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    child: StdMutex<Option<Child>>,
    action_timeout: Duration,
    _script_dir: TempDir,
}

/// Slack added to a request's own timeout before the harness gives up on the bridge
const RESPONSE_SLACK: Duration = Duration::from_secs(5);

/// Time the bridge gets to close the browser after SIGTERM
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

impl PlaywrightBridge {
    /// Spawn the bridge and open a page against `base_url`
    pub async fn launch(config: &PlaywrightConfig, base_url: &str) -> E2eResult<Self> {
        check_playwright_installed().await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let mut cmd = TokioCommand::new(&config.node_binary);
        cmd.arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = config.resolve_node_path() {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| E2eError::Driver(format!("Failed to spawn {}: {}", config.node_binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Driver("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Driver("bridge stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::Driver("bridge stderr unavailable".to_string()))?;

        let (response_tx, responses) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<BridgeMessage>(&line) {
                    Ok(BridgeMessage::Event(event)) => {
                        let _ = event_tx.send(event);
                    }
                    Ok(BridgeMessage::Response(response)) => {
                        if response_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!("[bridge] {}", line),
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[bridge stderr] {}", line);
            }
        });

        let bridge = Self {
            channel: Mutex::new(BridgeChannel {
                stdin,
                responses,
                next_id: 0,
            }),
            events: StdMutex::new(Some(events)),
            child: StdMutex::new(Some(child)),
            action_timeout: config.action_timeout(),
            _script_dir: script_dir,
        };

        info!("Launching {} (headless: {})", config.browser.as_str(), config.headless);
        bridge
            .request(
                "launch",
                json!({
                    "browser": config.browser.as_str(),
                    "headless": config.headless,
                    "baseUrl": base_url,
                    "viewportWidth": config.viewport_width,
                    "viewportHeight": config.viewport_height,
                    "actionTimeoutMs": config.action_timeout_ms,
                }),
                Duration::from_secs(60),
            )
            .await?;

        Ok(bridge)
    }

    async fn request(&self, op: &str, args: Value, budget: Duration) -> E2eResult<Value> {
        let mut channel = self.channel.lock().await;
        channel.next_id += 1;
        let id = channel.next_id;

        let mut line = serde_json::to_string(&json!({ "id": id, "op": op, "args": args }))?;
        line.push('\n');
        channel.stdin.write_all(line.as_bytes()).await?;
        channel.stdin.flush().await?;

        let wait = budget.max(self.action_timeout) + RESPONSE_SLACK;
        let response = tokio::time::timeout(wait, async {
            loop {
                match channel.responses.recv().await {
                    Some(response) if response.id == id => return Ok(response),
                    Some(stale) => warn!("Dropping stale bridge response {}", stale.id),
                    None => return Err(E2eError::Driver("bridge process exited".to_string())),
                }
            }
        })
        .await
        .map_err(|_| E2eError::Driver(format!("{} did not answer within {} ms", op, wait.as_millis())))??;

        if response.ok {
            Ok(response.value)
        } else {
            Err(E2eError::Driver(format!(
                "{}: {}",
                op,
                response.error.unwrap_or_else(|| "unknown error".to_string())
            )))
        }
    }

    async fn action(&self, op: &str, args: Value) -> E2eResult<Value> {
        self.request(op, args, self.action_timeout).await
    }

    fn take_child(&self) -> Option<Child> {
        self.child.lock().ok().and_then(|mut guard| guard.take())
    }

    /// Stop the bridge process without waiting for it
    fn terminate(&self) {
        if let Some(mut child) = self.take_child() {
            send_sigterm(&child);
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

/// SIGTERM, then kill once `grace` has passed.
///
/// Returns whether the process exited on its own.
async fn stop_child(mut child: Child, grace: Duration) -> bool {
    send_sigterm(&child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("Bridge exited with {}", status);
            true
        }
        _ => {
            warn!("Bridge still running {} ms after SIGTERM, killing it", grace.as_millis());
            let _ = child.kill().await;
            false
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(op: &str, value: Value) -> E2eResult<T> {
    serde_json::from_value(value).map_err(|e| E2eError::Driver(format!("{}: unexpected reply: {}", op, e)))
}

#[async_trait]
impl PageDriver for PlaywrightBridge {
    async fn goto(&self, path: &str, timeout: Duration) -> E2eResult<()> {
        self.request(
            "goto",
            json!({ "path": path, "timeoutMs": timeout.as_millis() as u64 }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn current_url(&self) -> E2eResult<String> {
        from_value("currentUrl", self.action("currentUrl", json!({})).await?)
    }

    async fn title(&self) -> E2eResult<String> {
        from_value("title", self.action("title", json!({})).await?)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> E2eResult<()> {
        self.request(
            "waitForSelector",
            json!({ "selector": selector, "timeoutMs": timeout.as_millis() as u64 }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn click(&self, target: &Target) -> E2eResult<()> {
        self.action("click", json!({ "target": target })).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> E2eResult<()> {
        self.action("fill", json!({ "selector": selector, "value": value })).await?;
        Ok(())
    }

    async fn has_class(&self, selector: &str, class: &str) -> E2eResult<bool> {
        from_value(
            "hasClass",
            self.action("hasClass", json!({ "selector": selector, "className": class }))
                .await?,
        )
    }

    async fn is_displayed(&self, selector: &str) -> E2eResult<bool> {
        from_value(
            "isDisplayed",
            self.action("isDisplayed", json!({ "selector": selector })).await?,
        )
    }

    async fn inner_text(&self, selector: &str) -> E2eResult<String> {
        from_value("innerText", self.action("innerText", json!({ "selector": selector })).await?)
    }

    async fn table_rows(&self, table_id: &str) -> E2eResult<Vec<Vec<String>>> {
        from_value("tableRows", self.action("tableRows", json!({ "tableId": table_id })).await?)
    }

    async fn call_globals(&self, names: &[&str]) -> E2eResult<()> {
        self.action("callGlobals", json!({ "names": names })).await?;
        Ok(())
    }

    async fn fetch(&self, request: &FetchRequest) -> E2eResult<FetchResponse> {
        from_value("fetch", self.action("fetch", json!({ "request": request })).await?)
    }

    async fn click_and_wait_for_url(&self, target: &Target, wait: &UrlWait, timeout: Duration) -> E2eResult<()> {
        self.request(
            "clickAndWaitForUrl",
            json!({ "target": target, "wait": wait, "timeoutMs": timeout.as_millis() as u64 }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        self.action(
            "screenshot",
            json!({ "path": path.to_string_lossy(), "fullPage": full_page }),
        )
        .await?;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PageEvent>> {
        self.events.lock().ok().and_then(|mut guard| guard.take())
    }

    async fn close(&self) -> E2eResult<()> {
        let result = self.action("close", json!({})).await;
        if let Some(child) = self.take_child() {
            stop_child(child, SHUTDOWN_GRACE).await;
        }
        result.map(|_| ())
    }
}

impl Drop for PlaywrightBridge {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Starts one bridge process per page, so sessions never share cookies
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
    base_url: String,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig, base_url: impl Into<String>) -> Self {
        Self {
            config,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PageLauncher for PlaywrightLauncher {
    type Driver = PlaywrightBridge;

    async fn launch(&self) -> E2eResult<PlaywrightBridge> {
        PlaywrightBridge::launch(&self.config, &self.base_url).await
    }
}

/// Run a command to completion with its output discarded
async fn command_succeeds(program: &str, args: &[&str]) -> bool {
    let status = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    matches!(status, Ok(status) if status.success())
}

/// Check if Playwright is installed
pub async fn check_playwright_installed() -> E2eResult<()> {
    if command_succeeds("npx", &["playwright", "--version"]).await {
        Ok(())
    } else {
        Err(E2eError::DriverNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: PlaywrightConfig = toml::from_str(
            r#"
browser = "firefox"
headless = false
node_path = "/opt/harness/node_modules"
"#,
        )
        .unwrap();
        assert_eq!(config.browser, Browser::Firefox);
        assert!(!config.headless);
        assert_eq!(config.viewport_width, 1280);
        assert_eq!(config.resolve_node_path(), Some(PathBuf::from("/opt/harness/node_modules")));
    }

    #[test]
    fn test_bridge_messages_route_by_shape() {
        let event: BridgeMessage = serde_json::from_str(r#"{"event":"pageError","message":"boom"}"#).unwrap();
        assert!(matches!(event, BridgeMessage::Event(PageEvent::PageError { .. })));

        let ok: BridgeMessage = serde_json::from_str(r#"{"id":3,"ok":true,"value":["a"]}"#).unwrap();
        match ok {
            BridgeMessage::Response(r) => {
                assert_eq!(r.id, 3);
                assert!(r.ok);
                assert_eq!(r.value, json!(["a"]));
            }
            other => panic!("unexpected {:?}", other),
        }

        let failed: BridgeMessage =
            serde_json::from_str(r#"{"id":4,"ok":false,"error":"Timeout 10000ms exceeded"}"#).unwrap();
        assert!(matches!(failed, BridgeMessage::Response(BridgeResponse { ok: false, .. })));
    }

    #[test]
    fn test_table_rows_read_data_cells_only() {
        assert!(BRIDGE_SCRIPT.contains("row.querySelectorAll('td')"));
        assert!(!BRIDGE_SCRIPT.contains("'th, td'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_check_does_not_block_the_runtime() {
        assert!(!command_succeeds("settle-e2e-no-such-binary", &[]).await);

        // two checks on a single-threaded runtime must overlap
        let started = std::time::Instant::now();
        let (a, b) = tokio::join!(command_succeeds("sleep", &["0.4"]), command_succeeds("sleep", &["0.4"]));
        assert!(a && b);
        assert!(started.elapsed() < Duration::from_millis(750), "{:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_child_waits_for_graceful_exit() {
        let child = TokioCommand::new("sleep").arg("30").spawn().unwrap();
        assert!(stop_child(child, Duration::from_secs(5)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_child_kills_after_grace() {
        let child = TokioCommand::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // let the shell install its trap before signalling
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        assert!(!stop_child(child, Duration::from_millis(300)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_bridge_script_handles_every_driver_op() {
        for op in [
            "launch",
            "goto",
            "currentUrl",
            "title",
            "waitForSelector",
            "click",
            "fill",
            "hasClass",
            "isDisplayed",
            "innerText",
            "tableRows",
            "callGlobals",
            "fetch",
            "clickAndWaitForUrl",
            "screenshot",
            "close",
        ] {
            assert!(BRIDGE_SCRIPT.contains(&format!("async {}(", op)), "missing handler {op}");
        }
    }
}
