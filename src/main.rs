use std::sync::Arc;

use log::{info, warn};

use sms_relay::config::Config;
use sms_relay::handlers::AppState;
use sms_relay::provider::{DryRunProvider, MessageBirdClient, SmsProvider};
use sms_relay::queue::MessageQueue;
use sms_relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();

    let config = Config::from_env();

    let provider: Arc<dyn SmsProvider> = match &config.messagebird_key {
        Some(key) => {
            info!("Submitting to MessageBird at {}", config.messagebird_endpoint);
            Arc::new(MessageBirdClient::new(&config.messagebird_endpoint, key))
        }
        None => {
            warn!("MESSAGEBIRD_ACCESS_KEY not set, messages will only be logged");
            Arc::new(DryRunProvider)
        }
    };

    let (queue, _worker) = MessageQueue::start(provider, config.tick);
    info!("Queue submits at most one request every {:?}", config.tick);

    if config.api_key.is_some() {
        info!("Bearer auth enabled");
    }

    let state = Arc::new(AppState::new(queue, config.api_key.clone()));
    let app = server::router(state);

    info!("Starting server on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
