//! CLI argument parsing and command dispatch.

pub mod args;
pub mod history;
pub mod poll;
pub mod session;
pub mod status;
pub mod watch;

pub use args::{Cli, Commands, OutputFormat};

use crate::core::monitor::UsageMonitor;
use crate::core::webdriver::WebDriverClient;
use crate::error::{ExitCode, Result};
use crate::storage::config::ResolvedConfig;
use crate::storage::paths::AppPaths;

/// How command output is written.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub pretty: bool,
    pub no_color: bool,
}

impl OutputOptions {
    #[must_use]
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.effective_format(),
            pretty: cli.pretty,
            no_color: !crate::util::env::should_use_color(cli.no_color),
        }
    }
}

/// Build a monitor backed by the configured WebDriver endpoint.
///
/// # Errors
/// Directory creation or HTTP client construction failures.
pub fn build_monitor(config: &ResolvedConfig, paths: &AppPaths) -> Result<UsageMonitor> {
    let driver = WebDriverClient::new(&config.webdriver_url, &config.file.browser.browser_name)?;
    tracing::debug!(
        endpoint = %config.webdriver_url,
        browser = %config.file.browser.browser_name,
        headless = config.headless,
        "Using WebDriver backend"
    );
    UsageMonitor::new(config, paths, Box::new(driver))
}

/// Execute the parsed command line.
///
/// # Errors
/// Any crate error; surfaced scrape errors are rendered and mapped to an exit code instead.
pub async fn execute(cli: &Cli) -> Result<ExitCode> {
    let paths = AppPaths::new();
    let output = OutputOptions::from_cli(cli);

    match &cli.command {
        Commands::Login(args) => {
            let config = ResolvedConfig::resolve(cli, None, &paths)?;
            session::execute_login(args, config, &paths, output).await
        }
        Commands::CheckSession => {
            let config = ResolvedConfig::resolve(cli, None, &paths)?;
            session::execute_check(&config, &paths, output)
        }
        Commands::Logout => session::execute_logout(&paths, output),
        Commands::Poll => {
            let config = ResolvedConfig::resolve(cli, None, &paths)?;
            poll::execute(&config, &paths, output).await
        }
        Commands::Watch(_) => {
            let config = ResolvedConfig::resolve(cli, cli.interval(), &paths)?;
            watch::run_watch(&config, &paths, output).await
        }
        Commands::Status => status::execute(&paths, output),
        Commands::History(args) => {
            args.validate()?;
            let config = ResolvedConfig::resolve(cli, None, &paths)?;
            history::execute(args, &config, &paths, output)
        }
    }
}
