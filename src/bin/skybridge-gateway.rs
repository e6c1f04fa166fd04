use skybridge::gateway::{router, GatewayConfig, GatewayState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let mut config_path = std::env::var("CONFIG_PATH").ok();
    let mut listen: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen = Some(args.next().ok_or("missing value for --listen/--addr")?);
            }
            other if !other.starts_with('-') => config_path = Some(other.to_string()),
            other => return Err(format!("unknown arg: {other}").into()),
        }
    }

    let config_path = config_path
        .ok_or("usage: skybridge-gateway <config.yaml> [--listen HOST:PORT] (or set CONFIG_PATH)")?;
    let config = GatewayConfig::load(&config_path)?;
    tracing::info!(
        providers = config.providers.len(),
        storage_instances = config.storage_instances.len(),
        model_mappings = config.model_mappings.len(),
        "configuration loaded"
    );

    let state = GatewayState::new(config)?;

    let listen = listen.unwrap_or_else(|| {
        let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        format!("0.0.0.0:{port}")
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "skybridge-gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
