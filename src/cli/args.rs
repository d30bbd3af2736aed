//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Usage Watch - keep a logged-in browser session and poll a usage-quota page.
#[derive(Parser, Debug)]
#[command(name = "usagewatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// More log output; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// WebDriver server endpoint
    #[arg(long, value_name = "URL", global = true)]
    pub webdriver_url: Option<String>,

    /// Hard timeout for a single browser call, in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Run the browser without a window
    #[arg(long, global = true)]
    pub headless: bool,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }

    /// Interval flag of the selected command, if it has one.
    #[must_use]
    pub const fn interval(&self) -> Option<u64> {
        match &self.command {
            Commands::Watch(args) => args.interval,
            _ => None,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open the login page and save the session once you have signed in
    Login(LoginArgs),

    /// Report whether the saved session is usable (does not start a browser)
    CheckSession,

    /// Forget the saved session
    Logout,

    /// Run one scrape cycle and print the result
    Poll,

    /// Poll on a schedule and print every update
    Watch(WatchArgs),

    /// Show the last known good usage without scraping
    Status,

    /// Show recent cycles from the history database
    History(HistoryArgs),
}

/// Arguments for the `login` command.
#[derive(Parser, Debug, Default)]
pub struct LoginArgs {
    /// Seconds to wait for the login to be confirmed (overrides config)
    #[arg(long = "wait", value_name = "SECONDS")]
    pub login_timeout: Option<u64>,
}

/// Arguments for the `watch` command.
#[derive(Parser, Debug, Default)]
pub struct WatchArgs {
    /// Seconds between cycles (overrides config)
    #[arg(long, short = 'i', value_name = "SECONDS")]
    pub interval: Option<u64>,
}

/// Arguments for the `history` command.
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    /// Number of cycles to show
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Apply the retention policy before listing
    #[arg(long)]
    pub prune: bool,
}

impl HistoryArgs {
    /// Validate argument combinations.
    ///
    /// # Errors
    /// `ConfigInvalid` for a zero limit.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.limit == 0 {
            return Err(crate::error::WatchError::ConfigInvalid {
                key: "--limit".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    #[default]
    Human,
    /// JSON output
    Json,
}
