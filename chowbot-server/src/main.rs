use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chowbot_core::seed::seed_catalog;
use chowbot_core::store::{Catalog, MemoryStore, OrderStore, PgStore, SessionStore};
use chowbot_core::{
    ChowbotConfig, Messenger, OpenAiChatClient, QueuedMessenger, TextGenerator, WhatsAppMessenger,
};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, EnvFilter};

use chowbot_server::context::{BotContext, BotSettings};
use chowbot_server::http::{self, HttpState};
use chowbot_server::subsystems::sweeper;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "chowbot.toml")]
    config: String,

    /// Check the store connection and exit
    #[arg(long)]
    health: bool,

    /// Insert the default menu when the catalog is empty
    #[arg(long)]
    seed: bool,
}

/// Store handles the process needs beyond the bot context.
struct Backend {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn Catalog>,
    build: Box<dyn FnOnce(Arc<dyn TextGenerator>, Arc<dyn Messenger>, BotSettings) -> BotContext>,
}

impl Backend {
    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SessionStore + Catalog + OrderStore + 'static,
    {
        Self {
            sessions: store.clone(),
            catalog: store.clone(),
            build: Box::new(move |generator, messenger, settings| {
                BotContext::new(store, generator, messenger, settings)
            }),
        }
    }
}

async fn open_backend(config: &ChowbotConfig) -> anyhow::Result<Backend> {
    let ttl = Duration::from_secs(config.session.ttl_seconds);

    match config.database.backend.as_str() {
        "memory" => {
            tracing::info!("Using in-memory store (state is lost on restart)");
            Ok(Backend::from_store(Arc::new(MemoryStore::new(ttl))))
        }
        "postgres" => {
            let pool = chowbot_core::db::create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            chowbot_core::db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            Ok(Backend::from_store(Arc::new(PgStore::new(pool, ttl))))
        }
        other => anyhow::bail!("Unknown database backend '{}'", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match ChowbotConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    let backend = match open_backend(&config).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match backend.sessions.ping().await {
            Ok(v) => println!("✅ Store connected: {}", v),
            Err(e) => {
                println!("❌ Store connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Chowbot health check passed");
        return Ok(());
    }

    if args.seed || config.database.backend == "memory" {
        seed_catalog(backend.catalog.as_ref()).await?;
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Outbound clients are built once here and shared by every turn
    let generator: Arc<dyn TextGenerator> = Arc::new(
        OpenAiChatClient::new(&config.generation).context("Failed to build generation client")?,
    );
    let whatsapp: Arc<dyn Messenger> = Arc::new(
        WhatsAppMessenger::new(&config.messaging).context("Failed to build messaging client")?,
    );
    let mut queue_worker: Option<JoinHandle<()>> = None;
    let messenger: Arc<dyn Messenger> = if config.messaging.use_queue {
        let (queued, handle) =
            QueuedMessenger::spawn(whatsapp, config.messaging.queue_capacity, tx.subscribe());
        queue_worker = Some(handle);
        Arc::new(queued)
    } else {
        whatsapp
    };

    tokio::spawn(sweeper::run_session_sweeper(
        backend.sessions.clone(),
        Duration::from_secs(config.session.sweep_interval_seconds.max(1)),
        tx.subscribe(),
    ));

    let ctx = (backend.build)(generator, messenger, BotSettings::from(&config));
    let state = HttpState {
        ctx,
        verify_token: config.messaging.verify_token.clone(),
    };

    http::start_http_server(state, &config.http, tx.subscribe()).await?;

    if let Some(handle) = queue_worker {
        if let Err(e) = handle.await {
            tracing::error!("Send queue worker panicked: {}", e);
        }
    }

    tracing::info!("Chowbot stopped");
    Ok(())
}
