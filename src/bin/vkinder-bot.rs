//! VKinder bot binary

use anyhow::Context;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use vkinder::config::{BotConfig, InboundMode, DEFAULT_CONFIG_PATH};
use vkinder::server::{self, CallbackState};
use vkinder::{
    ConversationEngine, Dispatcher, LongPoll, SessionStore, SqliteGateway, VkCandidateSource,
    VkClient, VkMessenger,
};

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path();
    let config = BotConfig::load(&config_path)?;

    init_logging(&config)?;

    println!("💘 VKinder");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    info!("Loaded configuration from {}: {:?}", config_path.display(), config);

    let gateway = SqliteGateway::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open shown-candidates store at {}", config.database_url))?;
    println!("✓ Shown-candidates store: {}", config.database_url);

    let sessions = Arc::new(SessionStore::new(Arc::new(gateway)));
    let source = VkCandidateSource::new(VkClient::new(
        config.api_url.as_str(),
        config.user_token.as_str(),
        config.api_version.as_str(),
    ));
    let group_client = VkClient::new(
        config.api_url.as_str(),
        config.group_token.as_str(),
        config.api_version.as_str(),
    );
    let messenger = VkMessenger::new(group_client.clone());

    let engine = ConversationEngine::new(
        sessions.clone(),
        Arc::new(source),
        Arc::new(messenger),
        &config.search,
    );
    let dispatcher = Dispatcher::new(engine, config.sessions.idle_ttl());
    println!("✓ Conversation engine initialized");

    if let Some(ttl) = config.sessions.idle_ttl() {
        println!("✓ Evicting sessions idle for {}s", ttl.as_secs());
        spawn_sweeper(sessions.clone(), ttl);
    }

    let inbound = async {
        match config.inbound {
            InboundMode::LongPoll => {
                let Some(group_id) = config.group_id else {
                    anyhow::bail!("group_id is required for long poll mode");
                };
                println!("✓ Inbound: Bots Long Poll (group {})", group_id);
                println!();
                LongPoll::new(group_client, group_id)
                    .run(dispatcher.clone())
                    .await
            }
            InboundMode::Callback => {
                println!("✓ Inbound: Callback API on port {}", config.callback.port);
                println!();
                let state = CallbackState {
                    dispatcher: dispatcher.clone(),
                    confirmation: config.callback.confirmation.clone(),
                    secret: config.callback.secret.clone(),
                };
                server::run_server(state, config.callback.port).await
            }
        }
    };

    let result = tokio::select! {
        result = inbound => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("Inbound loop stopped: {:#}", e);
    }

    dispatcher.shutdown().await;
    info!("Bye");

    result
}

/// `--config <path>`, then `VKINDER_CONFIG`, then the default
fn config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .or_else(|| std::env::var("VKINDER_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn init_logging(config: &BotConfig) -> anyhow::Result<()> {
    let level = LevelFilter::from_str(&config.log_level)
        .with_context(|| format!("Invalid log_level '{}'", config.log_level))?;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    let file = match &config.log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(level)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

fn spawn_sweeper(sessions: Arc<SessionStore>, ttl: Duration) {
    let period = ttl.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(ttl);
            if evicted > 0 {
                info!("Evicted {} idle sessions, {} remain", evicted, sessions.len());
            }
        }
    });
}
