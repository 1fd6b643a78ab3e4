use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crabircd::config;
use crabircd::logging;
use crabircd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the only argument
    let cfg = match std::env::args_os().nth(1) {
        Some(path) => config::load_config_from(&PathBuf::from(path))?,
        None => config::load_config()?,
    };

    logging::init(&cfg.logging)?;

    let server = Arc::new(Server::new(cfg.server));
    tracing::info!(name = server.name(), "starting");

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "server stopped");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
