//! Coverage agent command line.
//!
//! ## Subcommands
//!
//! - `instrument` - rewrite one class file offline
//! - `inspect` - list methods and probes of a class file
//! - `control set|get|status` - query or reconfigure a running agent
//! - `config` - print the effective configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use coverage_agent::cli::instrument_cmd::InstrumentArgs;
use coverage_agent::cli::{config_cmd, control_cmd, inspect_cmd, instrument_cmd, DEFAULT_CONTROL_ADDR};
use coverage_agent::telemetry::{init_logging, LogConfig, LogFormat};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter directive, e.g. `coverage_agent=debug`.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert coverage probes into a class file.
    Instrument {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Comma-separated target prefixes.
        #[arg(short, long)]
        prefixes: String,
        /// Class name; read from the file when omitted.
        #[arg(long)]
        name: Option<String>,
        /// Extra excluded prefixes.
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },
    /// Show methods and probe ids of a class file.
    Inspect {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Talk to a running agent's control channel.
    Control {
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: SocketAddr,
        #[command(subcommand)]
        action: ControlAction,
    },
    /// Print the effective configuration.
    Config {
        /// TOML config file; the environment is used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Agent options string (the prefix list).
        #[arg(long, default_value = "")]
        options: String,
    },
}

#[derive(Subcommand, Debug)]
enum ControlAction {
    /// Replace the target prefixes.
    Set { prefixes: String },
    /// Show the current prefixes.
    Get,
    /// Show agent state and transform statistics.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = LogConfig {
        format: LogFormat::Pretty,
        level: cli.log_level.clone(),
        output_path: None,
    };
    if let Err(e) = init_logging(&log) {
        eprintln!("Logging disabled: {}", e);
    }

    let code = match &cli.command {
        Command::Instrument {
            input,
            output,
            prefixes,
            name,
            exclude,
        } => instrument_cmd::run_instrument(&InstrumentArgs {
            input,
            output,
            prefixes,
            name: name.as_deref(),
            exclusions: exclude,
        }),
        Command::Inspect { input, json } => inspect_cmd::run_inspect(input, *json),
        Command::Control { addr, action } => match action {
            ControlAction::Set { prefixes } => control_cmd::run_set(*addr, prefixes).await,
            ControlAction::Get => control_cmd::run_get(*addr).await,
            ControlAction::Status { json } => control_cmd::run_status(*addr, *json).await,
        },
        Command::Config { config, options } => config_cmd::run_show(options, config.as_deref()),
    };
    ExitCode::from(code as u8)
}
