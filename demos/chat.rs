//! Stream one answer from the gateway.
//!
//! Usage: `cargo run --example chat -- <model> <prompt>`, for example
//! `cargo run --example chat -- "deepseek/deepseek-chat?mcp=all" "What is on example.com?"`.
//! MCP servers are read from the file named by `POLYGATE_CONFIG`.

use futures::stream::StreamExt;
use polygate::prelude::*;
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let model = args.next().unwrap_or_else(|| "gpt-4o-mini".to_string());
    let prompt = args
        .next()
        .unwrap_or_else(|| "Explain what an API gateway does in one sentence.".to_string());

    let config = GatewayConfig::from_env()?;
    let (gateway, _report) = Polygate::from_config(&config).await;

    let request = ChatCompletionRequest::new(model, vec![ChatCompletionMessage::user(prompt)]).with_stream(true);
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut events = gateway.chat_completion(request, cancel);
    let mut failure = None;
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Chunk(chunk) => {
                print!("{}", chunk.content());
                std::io::stdout().flush()?;
            }
            StreamEvent::Done(_) => println!(),
            StreamEvent::Error(e) => failure = Some(e),
        }
    }

    gateway.shutdown().await;
    if let Some(e) = failure {
        return Err(e.into());
    }
    Ok(())
}
