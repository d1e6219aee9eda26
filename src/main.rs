use std::sync::Arc;

use appointment_relay::config::RelayConfig;
use appointment_relay::service::RelayService;
use appointment_relay::transport::{DiscordGateway, DiscordRest, Transport};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env()?;

    eprintln!("📦 Appointment Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channels: {}", config.monitored_channels.join(", "));
    eprintln!(
        "   Reviewers: {}",
        if config.reviewers.is_empty() {
            "none (no reminders)".to_string()
        } else {
            let mut names: Vec<&str> = config.reviewers.keys().map(String::as_str).collect();
            names.sort();
            names.join(", ")
        }
    );
    eprintln!("   Trigger: '{}'", config.trigger);
    eprintln!("   Archive: #{}", config.archive_channel);
    eprintln!(
        "   Reminders: every {}s (scan every {}s)\n",
        config.notification_interval.as_secs(),
        config.scan_interval.as_secs()
    );

    if config.monitored_channels.is_empty() {
        tracing::warn!("No channels configured; set RELAY_REVIEWERS or RELAY_CHANNELS");
    }

    let rest: Arc<dyn Transport> = Arc::new(DiscordRest::new(
        config.bot_token.clone(),
        config.request_timeout,
    )?);
    let gateway = DiscordGateway::new(config.bot_token.clone());
    let service = Arc::new(RelayService::new(&config, rest));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {e}");
                return;
            }
            shutdown.cancel();
        });
    }

    let events = gateway.start(shutdown.clone());
    service.run(events, shutdown).await;

    Ok(())
}
