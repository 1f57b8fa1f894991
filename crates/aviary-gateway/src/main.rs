mod app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aviary_gateway=info".into()),
        )
        .init();

    // load config: explicit path > AVIARY_CONFIG env > ~/.aviary/aviary.toml
    let config_path = std::env::var("AVIARY_CONFIG").ok();
    let config = aviary_core::config::AviaryConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("config load failed ({}), using defaults", e);
            aviary_core::config::AviaryConfig::default()
        });

    app::run(config).await
}
