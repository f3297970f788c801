//! Settlement E2E Validation Harness
//!
//! This crate drives the settlement engine's dashboard through a real browser
//! and judges the backend purely by what the UI shows:
//! - Controls Playwright through a persistent line-delimited JSON bridge
//! - Waits for eventually consistent state with bounded polling
//! - Checks forward progress, lock mutual exclusion, idempotency and authorization
//! - Emits one JSON report per run plus a screenshot per step
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Flow orchestrators (flows/)                 │
//! │    ├── run_end_to_end()       8 steps, one session          │
//! │    └── run_role_validation()  ADMIN + USER sessions         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StepRunner          one StepResult + screenshot per step   │
//! │  PollSpec            until() / track() with deadlines       │
//! │  checks              pure invariant assertions              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session<D: PageDriver>                                     │
//! │    ├── authenticate / logout / navigate_to / load           │
//! │    ├── typed table reads (settlement-common::extract)       │
//! │    └── SignalLog (dialogs, page errors, HTTP errors)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PlaywrightBridge    node child process, JSON over stdio    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod checks;
pub mod config;
pub mod driver;
pub mod error;
pub mod flows;
pub mod playwright;
pub mod poller;
pub mod preflight;
pub mod report;
pub mod session;
pub mod step;

pub use config::HarnessConfig;
pub use driver::{PageDriver, PageLauncher};
pub use error::{E2eError, E2eResult};
pub use flows::{run_end_to_end, run_role_validation};
pub use playwright::{PlaywrightBridge, PlaywrightLauncher};
pub use poller::{PollSpec, Trajectory};
pub use report::{EndToEndReport, FatalReport, RoleValidationReport, SessionReport};
pub use session::{Section, Session, SessionSettings};
pub use step::{StepResult, StepRunner};
