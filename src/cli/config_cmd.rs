//! `config`: print the effective configuration.
//!
//! Reads the environment (or a TOML file) without contacting an agent.

use std::path::Path;

use super::{report, CliError};
use crate::config::{self, AgentConfig, EffectiveConfig};

pub fn run_show(options: &str, file: Option<&Path>) -> i32 {
    report(effective(options, file).map(|cfg| print_config(&cfg)))
}

pub fn effective(options: &str, file: Option<&Path>) -> Result<EffectiveConfig, CliError> {
    let cfg = match file {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => config::load(options)?,
    };
    Ok(cfg.effective())
}

fn print_config(cfg: &EffectiveConfig) {
    println!("COVERAGE_AGENT_PREFIXES={}", cfg.prefixes);
    match &cfg.control_addr {
        Some(addr) => println!("COVERAGE_AGENT_CONTROL={}", addr),
        None => println!("COVERAGE_AGENT_CONTROL=disabled"),
    }
    println!("COVERAGE_AGENT_MAX_CONNECTIONS={}", cfg.max_connections);
    if let Some(limit) = cfg.frame_limit {
        println!("COVERAGE_AGENT_FRAME_LIMIT={}", limit);
    }
    println!("COVERAGE_AGENT_EXCLUDE={}", cfg.exclusions.join(","));
    println!("COVERAGE_AGENT_LOG_LEVEL={}", cfg.log_level);
    println!("COVERAGE_AGENT_LOG_FORMAT={}", cfg.log_format);
}
