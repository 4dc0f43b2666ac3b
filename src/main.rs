//! Lectern - educational portal gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lectern::{
    auth::JwtValidator,
    config::Args,
    db::{MongoClient, MongoCollection, UserStore},
    db::schemas::USER_COLLECTION,
    notify::{LogNotifier, Notifier, WebhookNotifier},
    server::{self, AppState},
    workflow::{MemoryTableStore, MongoTableStore, TableStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lectern={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Lectern - Educational Portal Gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!(
        "Broadcast relay: {}",
        args.notify_webhook_url.as_deref().unwrap_or("(log only)")
    );
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!(
                    "MongoDB connection failed (dev mode, continuing in memory): {}",
                    e
                );
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let jwt = match &args.jwt_secret {
        Some(secret) => JwtValidator::new(secret.clone(), args.jwt_expiry_seconds)?,
        None => {
            warn!("JWT_SECRET not set - using dev-mode signing key");
            JwtValidator::new_dev()
        }
    };

    let (users, store): (Arc<UserStore>, Arc<dyn TableStore>) = match &mongo {
        Some(client) => {
            let users: MongoCollection<lectern::db::schemas::UserDoc> =
                client.collection(USER_COLLECTION).await?;
            let store = MongoTableStore::new(client).await?;
            (Arc::new(UserStore::Mongo(users)), Arc::new(store))
        }
        None => (
            Arc::new(UserStore::memory()),
            Arc::new(MemoryTableStore::new()),
        ),
    };

    let notifier: Arc<dyn Notifier> = match &args.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };

    let state = Arc::new(AppState {
        args,
        started_at: std::time::Instant::now(),
        mongo,
        users,
        store,
        notifier,
        jwt,
    });

    server::run(state).await?;

    Ok(())
}
