//! settle-e2e - Settlement Engine Validation Harness
//!
//! Runs the browser-driven validation flows against a running dashboard and
//! prints the JSON report between literal markers on stdout. Logs go to
//! stderr so the report can be scraped from stdout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use settlement_e2e::playwright::{check_playwright_installed, PlaywrightLauncher};
use settlement_e2e::preflight::wait_for_dashboard;
use settlement_e2e::report::{
    envelope, FatalReport, EXIT_FATAL, ROLE_VALIDATION_END, ROLE_VALIDATION_START, VALIDATION_END,
    VALIDATION_START,
};
use settlement_e2e::{run_end_to_end, run_role_validation, E2eResult, HarnessConfig};

/// Settlement Engine validation harness
#[derive(Parser)]
#[command(name = "settle-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file; built-in defaults apply when it does not exist
    #[arg(short, long, default_value = "settle-e2e.toml", global = true)]
    config: PathBuf,

    /// Dashboard base URL
    #[arg(long, env = "BASE_URL", global = true)]
    base_url: Option<String>,

    /// Screenshot directory of the end-to-end flow
    #[arg(long, env = "SCREENSHOT_DIR", global = true)]
    screenshot_dir: Option<PathBuf>,

    /// Output directory of the role validation report and screenshots
    #[arg(long, env = "REPORT_DIR", global = true)]
    report_dir: Option<PathBuf>,

    #[arg(long, env = "ADMIN_USERNAME", global = true)]
    admin_username: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true, global = true)]
    admin_password: Option<String>,

    #[arg(long, env = "USER_USERNAME", global = true)]
    user_username: Option<String>,

    #[arg(long, env = "USER_PASSWORD", hide_env_values = true, global = true)]
    user_password: Option<String>,

    /// Skip the reachability check before launching the browser
    #[arg(long, global = true)]
    no_preflight: bool,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Eight-step end-to-end validation in a single session
    E2e {
        /// Log in with the admin credentials before the first step
        #[arg(long)]
        login: bool,
    },

    /// ADMIN and USER scenarios in independent sessions, merged into one report
    Roles {
        /// Run both scenarios concurrently
        #[arg(long)]
        parallel: bool,
    },
}

impl Commands {
    fn markers(&self) -> (&'static str, &'static str) {
        match self {
            Commands::E2e { .. } => (VALIDATION_START, VALIDATION_END),
            Commands::Roles { .. } => (ROLE_VALIDATION_START, ROLE_VALIDATION_END),
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// File config first, then flags and environment on top
fn resolve_config(cli: &Cli) -> E2eResult<HarnessConfig> {
    let mut config = HarnessConfig::load(&cli.config)?;

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(dir) = &cli.screenshot_dir {
        config.screenshot_dir = dir.clone();
    }
    if let Some(dir) = &cli.report_dir {
        config.report_dir = dir.clone();
    }
    if let Some(username) = &cli.admin_username {
        config.credentials.admin.username = username.clone();
    }
    if let Some(password) = &cli.admin_password {
        config.credentials.admin.password = password.clone();
    }
    if let Some(username) = &cli.user_username {
        config.credentials.user.username = username.clone();
    }
    if let Some(password) = &cli.user_password {
        config.credentials.user.password = password.clone();
    }
    if cli.no_preflight {
        config.preflight.enabled = false;
    }
    if cli.headed {
        config.browser.headless = false;
    }
    match cli.command {
        Commands::E2e { login } => config.end_to_end.authenticate |= login,
        Commands::Roles { parallel } => config.roles.parallel |= parallel,
    }

    config.validate()?;
    Ok(config)
}

/// Run the selected flow; returns the report envelope and the exit code
async fn run(cli: &Cli) -> E2eResult<(String, i32)> {
    let config = resolve_config(cli)?;
    info!("Validating settlement dashboard at {}", config.origin());

    wait_for_dashboard(config.origin(), &config.preflight).await?;
    check_playwright_installed().await?;
    let launcher = PlaywrightLauncher::new(config.browser.clone(), config.origin());

    let (start, end) = cli.command.markers();
    match cli.command {
        Commands::E2e { .. } => {
            let report = run_end_to_end(&config, &launcher).await?;
            Ok((envelope(start, end, &report)?, report.exit_code()))
        }
        Commands::Roles { .. } => {
            let report = run_role_validation(&config, &launcher).await?;
            Ok((envelope(start, end, &report)?, report.exit_code()))
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);
    info!("settle-e2e v{}", env!("CARGO_PKG_VERSION"));

    let code = match run(&cli).await {
        Ok((report, code)) => {
            println!("{}", report);
            code
        }
        Err(e) => {
            error!("Validation could not run: {}", e);
            let (start, end) = cli.command.markers();
            match envelope(start, end, &FatalReport::new(&e)) {
                Ok(report) => println!("{}", report),
                Err(err) => error!("Could not serialize fatal report: {}", err),
            }
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}
