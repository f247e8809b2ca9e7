use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

use aro_monitor::config::{self, Config, FetchConfig, WatchConfig};
use aro_monitor::fetcher::Fetcher;
use aro_monitor::monitor::Monitor;
use aro_monitor::notify::DeliveryPolicy;
use aro_monitor::parser;
use aro_monitor::store::StateStore;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "aro-monitor")]
#[command(
    about = "Watches the Lincoln Commons floorplans page for ARO one-bedroom availability",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        help = "Append logs to this file instead of stderr"
    )]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one monitoring pass: fetch, detect new units, notify and save state
    Run {
        #[arg(long, help = "Listings page to check")]
        url: Option<String>,

        #[arg(long, value_name = "PATH", help = "State file location")]
        state_file: Option<PathBuf>,

        #[arg(
            long,
            value_name = "SECS",
            help = "Per-attempt fetch timeout in seconds",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        timeout: Option<u64>,

        #[arg(
            long,
            help = "Total fetch attempts",
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        attempts: Option<u32>,

        #[arg(long, help = "Do not re-alert when an available unit's listing changes")]
        no_content_realert: bool,

        #[arg(
            long,
            value_parser = parse_delivery,
            help = "Channel policy: 'all' or 'fallback'"
        )]
        delivery: Option<DeliveryPolicy>,

        #[arg(long, help = "Detect and log new units without notifying or saving state")]
        dry_run: bool,
    },
    /// Fetch the listings page and print the matching ARO one-bedroom units
    Check {
        #[arg(long, help = "Listings page to check")]
        url: Option<String>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Print the units remembered in the state file
    State {
        #[arg(long, value_name = "PATH", help = "State file location")]
        state_file: Option<PathBuf>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

/// `run` flags that override the environment.
struct RunOverrides {
    url: Option<String>,
    state_file: Option<PathBuf>,
    timeout: Option<u64>,
    attempts: Option<u32>,
    no_content_realert: bool,
}

impl RunOverrides {
    fn apply(self, watch: &mut WatchConfig) {
        if let Some(url) = self.url {
            watch.fetch.listings_url = url;
        }
        if let Some(path) = self.state_file {
            watch.state_path = path;
        }
        if let Some(secs) = self.timeout {
            watch.fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.attempts {
            watch.fetch.retry.max_attempts = attempts;
        }
        if self.no_content_realert {
            watch.realert_on_content_change = false;
        }
    }
}

fn exit_on_invalid_config<T>(result: Result<T, config::ConfigError>) -> T {
    result.unwrap_or_else(|e| {
        log::error!("Invalid configuration: {}", e);
        process::exit(1);
    })
}

fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(cli.log_level.clone().into());

    let mut file_error = None;
    if let Some(path) = &cli.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder
                    .target(env_logger::Target::Pipe(Box::new(file)))
                    .write_style(env_logger::WriteStyle::Never);
            }
            Err(e) => file_error = Some(format!("Cannot open log file {}: {}", path.display(), e)),
        }
    }

    builder.init();
    if let Some(e) = file_error {
        log::warn!("{}; logging to stderr", e);
    }
}

fn parse_delivery(s: &str) -> Result<DeliveryPolicy, String> {
    DeliveryPolicy::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env file loaded: {}", e);
    }

    match cli.command {
        Commands::Run {
            url,
            state_file,
            timeout,
            attempts,
            no_content_realert,
            delivery,
            dry_run,
        } => {
            let overrides = RunOverrides {
                url,
                state_file,
                timeout,
                attempts,
                no_content_realert,
            };

            let (monitor, watch) = if dry_run {
                let mut watch = exit_on_invalid_config(WatchConfig::from_env());
                overrides.apply(&mut watch);
                exit_on_invalid_config(watch.validate());
                if delivery.is_some() {
                    log::debug!("Ignoring --delivery for a dry run");
                }
                (Monitor::observer(&watch), watch)
            } else {
                let mut config = exit_on_invalid_config(Config::from_env());
                overrides.apply(&mut config.watch);
                if let Some(delivery) = delivery {
                    config.delivery = delivery;
                }
                exit_on_invalid_config(config.validate());
                (Monitor::from_config(&config), config.watch)
            };

            let mut monitor = monitor.unwrap_or_else(|e| {
                log::error!("Error setting up monitor: {}", e);
                process::exit(1);
            });

            log::info!(
                "Checking {} (state file {})",
                watch.fetch.listings_url,
                watch.state_path.display()
            );
            if let Err(e) = monitor.run().await {
                log::error!("Monitoring run failed: {}", e);
                process::exit(1);
            }
        }
        Commands::Check { url, format } => {
            let mut fetch_config = exit_on_invalid_config(FetchConfig::from_env());
            if let Some(url) = url {
                fetch_config.listings_url = url;
                exit_on_invalid_config(fetch_config.validate());
            }

            let fetcher = Fetcher::new(&fetch_config).unwrap_or_else(|e| {
                log::error!("Error creating HTTP client: {}", e);
                process::exit(1);
            });
            let html = fetcher
                .fetch(&fetch_config.listings_url)
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error fetching listings: {}", e);
                    process::exit(1);
                });
            let units = parser::parse_listings(&html).unwrap_or_else(|e| {
                log::error!("Error parsing listings: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&units),
                OutputFormat::Text => {
                    println!(
                        "Checked {} at {}",
                        fetch_config.listings_url,
                        Local::now().format("%Y-%m-%d %H:%M:%S")
                    );
                    if units.is_empty() {
                        println!("No ARO one-bedroom units listed.");
                    } else {
                        for (i, unit) in units.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, unit);
                        }
                    }
                }
            }
        }
        Commands::State { state_file, format } => {
            let path = state_file.unwrap_or_else(config::state_path_from_env);

            let state = StateStore::new(path).load().unwrap_or_else(|e| {
                log::error!("Error loading state: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&state),
                OutputFormat::Text => {
                    if state.is_empty() {
                        println!("No units recorded yet.");
                    } else {
                        for (unit_id, record) in &state {
                            println!("{:<20} {}", unit_id, record);
                        }
                    }
                }
            }
        }
    }
}
