//! `sqlsage serve` starts the HTTP API server.

use sqlsage_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("🐘 SqlSage");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Provider:  {}", config.default_provider);
    println!("   Store:     {}", config.store.backend);

    sqlsage_gateway::start(config).await?;

    Ok(())
}
