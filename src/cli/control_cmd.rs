//! `control`: talk to a running agent.

use std::net::SocketAddr;

use super::{report, CliError};
use crate::control::ControlClient;

pub async fn run_set(addr: SocketAddr, prefixes: &str) -> i32 {
    let result = ControlClient::new(addr).set_prefixes(prefixes).await;
    report(result.map_err(CliError::from).map(|(prefixes, generation)| {
        println!("prefixes (generation {}): {}", generation, prefixes.join(","));
    }))
}

pub async fn run_get(addr: SocketAddr) -> i32 {
    let result = ControlClient::new(addr).get_prefixes().await;
    report(result.map_err(CliError::from).map(|(prefixes, generation)| {
        println!("prefixes (generation {}): {}", generation, prefixes.join(","));
    }))
}

pub async fn run_status(addr: SocketAddr, json: bool) -> i32 {
    let result = async {
        let status = ControlClient::new(addr).status().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            println!("Agent v{}: {:?}", status.version, status.state);
            println!("  prefixes:     {} (generation {})", status.prefixes.join(","), status.generation);
            println!("  instrumented: {} ({} probes)", status.stats.instrumented, status.stats.probes);
            println!("  not targeted: {}", status.stats.not_targeted);
            println!("  excluded:     {}", status.stats.excluded);
            println!("  failed:       {}", status.stats.failed);
        }
        Ok::<_, CliError>(())
    };
    report(result.await)
}
