use shram_messaging::config::AppConfig;
use shram_messaging::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shram_messaging=info,tower_http=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let app = server::register_routes(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Messaging service listening on {}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
