//! `sqlsage tools` spawns the tool-host and lists what it advertises.
//!
//! Doubles as a connectivity check: if this prints a tool listing, the
//! configured command, arguments and database URI all work.

use sqlsage_config::AppConfig;
use sqlsage_tools::McpClient;
use std::sync::Arc;
use std::time::Duration;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let mut args = config.toolhost.args.clone();
    if let Some(url) = &config.toolhost.database_url {
        args.push(url.clone());
    }

    // The database URI may carry credentials, so it is not echoed here.
    println!("🔌 Spawning tool-host: {}", config.toolhost.command);

    let client = Arc::new(
        McpClient::spawn(
            &config.toolhost.command,
            &args,
            Duration::from_secs(config.toolhost.request_timeout_secs),
        )
        .await?,
    );
    let registry = sqlsage_tools::discover_registry(&client).await?;

    if registry.is_empty() {
        println!("\n  The tool-host advertised no tools.");
        return Ok(());
    }

    let mut descriptors = registry.descriptors();
    descriptors.sort_by(|a, b| a.name.cmp(&b.name));

    println!("\n  {} tool(s) discovered:\n", descriptors.len());
    for descriptor in &descriptors {
        println!("  • {}", descriptor.name);
        if !descriptor.description.is_empty() {
            println!("    {}", descriptor.description);
        }
    }

    Ok(())
}
