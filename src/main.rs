use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use deskserver::core::config::AppConfig;
use deskserver::core::shared::state::AppState;
use deskserver::core::shared::utils::{create_conn, create_lazy_conn};
use deskserver::core::shared::TenantDb;
use deskserver::core::tenant::{TenantContext, TenantSource};
use deskserver::main_module::run_server;

const USAGE: &str = "Usage:
  deskserver                     start the HTTP server
  deskserver provision <tenant>  create the tenant schema and its tables
  deskserver --help              show this message";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if let Some(command) = args.get(1) {
        match command.as_str() {
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            "provision" => {
                let tenant = args
                    .get(2)
                    .ok_or_else(|| anyhow!("provision requires a tenant name\n{USAGE}"))?;
                return provision(tenant).await;
            }
            _ => {
                eprintln!("Unknown command: {}", command);
                eprintln!("Run 'deskserver --help' for usage information");
                return Err(anyhow!("Unknown command: {}", command));
            }
        }
    }

    serve().await
}

async fn provision(tenant: &str) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.require_database_url()?;
    let tenant = TenantContext::new(tenant, TenantSource::Default)?;
    let pool = create_conn(&config.database).context("Failed to connect to database")?;

    TenantDb::new(pool)
        .provision(&tenant)
        .await
        .map_err(|e| anyhow!("Provisioning {} failed: {}", tenant, e))?;
    info!("Tenant {} is ready", tenant);
    Ok(())
}

async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.require_database_url()?;

    let pool = match create_conn(&config.database) {
        Ok(pool) => pool,
        Err(e) if config.mock_fallback => {
            warn!("Database unavailable at startup ({e}), connecting lazily");
            create_lazy_conn(
                &config.database,
                Duration::from_secs(config.database.timeout_secs.max(1)),
            )
        }
        Err(e) => return Err(anyhow!("Failed to connect to database: {}", e)),
    };

    info!(
        "Starting deskserver {} (default tenant: {}, mock fallback: {})",
        env!("CARGO_PKG_VERSION"),
        config.default_tenant,
        config.mock_fallback
    );

    let state = Arc::new(AppState::new(config, pool)?);
    if let Err(e) = run_server(state).await {
        error!("Server stopped with error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
