use loyalty_server::{Config, Server, utils};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    utils::init_logger(&config.log_level, config.log_dir.as_deref());

    tracing::info!(
        environment = %config.environment,
        version = env!("CARGO_PKG_VERSION"),
        "Starting loyalty-server"
    );

    if let Err(e) = Server::new(config).run().await {
        tracing::error!(error = %e, "Server failed");
        return Err(e.into());
    }
    Ok(())
}
