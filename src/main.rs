//! Labby Bot - Entry Point

use labbybot::{
    relay::http_client, server, Config, CredentialProvider, GraphClient, OAuthRefreshSource,
    RelayClient, TurnRouter,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Labby Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: labbybot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  BASE_URL                      Backend relay base URL (required)");
        println!("  AAD_APP_CLIENT_ID             Bot app registration client id (required)");
        println!("  AAD_APP_TENANT_ID             Identity provider tenant (required)");
        println!("  AAD_APP_CLIENT_SECRET         Client secret for token refresh");
        println!("  AAD_APP_OAUTH_AUTHORITY_HOST  Authority host (default: https://login.microsoftonline.com)");
        println!("  BACKEND_CLIENT_ID             Backend app id, adds the chat API scope");
        println!("  BOT_DOMAIN                    Public domain for the sign-in link");
        println!("  GRAPH_BASE_URL                Identity graph (default: https://graph.microsoft.com)");
        println!("  PORT                          Listen port (default: 3978)");
        println!("  RELAY_TIMEOUT_SECS            Outbound request timeout (default: 30)");
        println!("  RELAY_RETRY_BACKOFF_MS        Delay before a retry (default: 500)");
        println!("  TOKEN_REFRESH_SKEW_SECS       Refresh tokens this close to expiry (default: 300)");
        println!("  RUST_LOG                      Log filter (default: info)");
        println!("  LABBYBOT_LOG_JSON             Set to 1 for JSON logs");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LABBYBOT_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Labby Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let source = OAuthRefreshSource::new(
        http_client(config.request_timeout)?,
        config.identity.clone(),
    );
    let credentials = Arc::new(CredentialProvider::new(
        Arc::new(source),
        config.identity.refresh_skew,
    ));
    let relay = RelayClient::from_config(&config)?;
    let graph = GraphClient::from_config(&config)?;

    info!("Backend relay: {}", relay.base_url());

    let mut router = TurnRouter::new(credentials, Arc::new(relay), Arc::new(graph));
    if let Some(link) = &config.sign_in_link {
        router = router.with_sign_in_link(link.clone());
    }

    server::run(router, config.bind_addr).await
}
