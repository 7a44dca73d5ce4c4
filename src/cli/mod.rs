//! CLI subcommands.
//!
//! Offline tooling around the engine plus a client for a running agent's
//! control channel. Each `run_*` function returns the process exit code.
//!
//! ## Usage
//!
//! ```bash
//! coverage-agent instrument Foo.class -o out/Foo.class -p com.acme
//! coverage-agent inspect out/Foo.class
//! coverage-agent control --addr 127.0.0.1:6300 set com.acme,org.shop
//! coverage-agent config --config agent.toml
//! ```

pub mod config_cmd;
pub mod control_cmd;
pub mod inspect_cmd;
pub mod instrument_cmd;

use thiserror::Error;

use crate::classfile::ParseError;
use crate::config::ConfigError;
use crate::control::ClientError;
use crate::instrument::EngineError;

/// Default control channel address for the `control` subcommand.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:6300";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Print the error and map it to exit code 1.
pub(crate) fn report<T>(result: Result<T, CliError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_exit_codes() {
        assert_eq!(report::<()>(Ok(())), 0);
        assert_eq!(report::<()>(Err(ConfigError::NoPrefixes.into())), 1);
    }

    #[test]
    fn test_default_addr_parses() {
        assert!(DEFAULT_CONTROL_ADDR.parse::<std::net::SocketAddr>().is_ok());
    }
}
