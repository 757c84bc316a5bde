//! Watch Argo CD applications and print every change
//!
//! Lists the current applications, then follows the application stream
//! until Ctrl-C.
//!
//! To run this demo:
//! ```bash
//! export ARGONAUT_AUTH_TOKEN="your-token-here"
//! export ARGONAUT_SERVER="https://argocd.example.com"  # Optional
//! export ARGONAUT_LOG="argonaut_api=debug"              # Optional
//! cargo run --example watch_applications
//! ```

use std::env;
use std::time::Duration;

use anyhow::Context;
use argonaut_api::{
    ApplicationService, ArgoClient, ClientConfig, FixedRetry, RequestContext, WatchMessage,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,argonaut_api=info";

/// `RUST_LOG`, then `ARGONAUT_LOG`, then the default filter.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            env::var("ARGONAUT_LOG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .and_then(|v| EnvFilter::try_new(v).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ClientConfig::from_env().context("loading configuration")?;
    let client = ArgoClient::from_config(&config)?.with_retry(FixedRetry::new(3, Duration::from_secs(1)));
    let apps = ApplicationService::new(client);

    println!("=== Current applications ===\n");
    let ctx = RequestContext::with_timeout(config.timeouts.request);
    let user = apps.get_user_info(&ctx).await.context("checking session")?;
    println!("Logged in as {}\n", user.username);
    for app in apps.list_applications(&ctx).await? {
        println!(
            "{:<40} health={:<12} sync={}",
            app.metadata.name,
            app.health().unwrap_or("-"),
            app.sync_status().unwrap_or("-"),
        );
    }

    println!("\n=== Watching for changes (Ctrl-C to stop) ===\n");
    let watch_ctx = RequestContext::new();
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = {
        let ctx = watch_ctx.clone();
        tokio::spawn(async move { apps.watch_applications(&ctx, tx).await })
    };

    let stopper = watch_ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.cancel();
        }
    });

    while let Some(message) = rx.recv().await {
        match message {
            WatchMessage::Event(event) => println!(
                "{:?} {} health={}",
                event.kind,
                event.application.metadata.name,
                event.application.health().unwrap_or("-"),
            ),
            WatchMessage::Failed(err) => {
                eprintln!("watch failed: {err}");
                if let Some(action) = err.user_action() {
                    eprintln!("  -> {action}");
                }
            }
        }
    }

    match watcher.await? {
        Ok(end) => println!("\nWatch ended: {end:?}"),
        Err(err) => eprintln!("\nWatch ended with error: {err}"),
    }
    Ok(())
}
