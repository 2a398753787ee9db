use polygate::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::from_env()?;
    let (gateway, report) = Polygate::from_config(&config).await;

    for (provider, error) in &report.registration.failed {
        eprintln!("provider {} failed: {}", provider, error);
    }
    for collision in &report.registration.collisions {
        eprintln!(
            "model {} is served by {}, ignored for {}",
            collision.model, collision.kept, collision.rejected
        );
    }

    let models = gateway.list_models().await;
    if models.is_empty() {
        println!("No models available. Set a provider API key such as OPENAI_API_KEY.");
    }
    for model in models {
        let provider = gateway
            .registry()
            .resolve(&model.id)
            .map(|r| r.provider)
            .unwrap_or_default();
        println!("{:<50} {}", model.id, provider);
    }

    gateway.shutdown().await;
    Ok(())
}
