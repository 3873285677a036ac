//! Laurel - badge award governance service

use clap::Parser;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use laurel::{
    audit::{AuditSink, MongoAuditSink, TracingAuditSink, AUDIT_COLLECTION},
    auth::TokenVerifier,
    awards::{AwardEngine, AwardStore, BulkOrchestrator, FeedNotificationHook, MemoryAwardStore},
    breaker::BreakerManager,
    config::Args,
    db::{MongoAwardStore, MongoClient},
    governor::{store::RATE_WINDOW_COLLECTION, MongoWindowStore, ThroughputGovernor, WindowStore},
    identity::IdentityClient,
    server,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("laurel={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Laurel - Badge Award Governance");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Identity: {}", args.identity_url);
    info!("Bulk ceiling: {} items", args.bulk_max_items);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, continuing in-memory): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Circuit breakers, keyed by dependency name
    let breakers = Arc::new(BreakerManager::new(args.breaker_config()));

    // Identity client through the "identity" breaker
    let identity = Arc::new(IdentityClient::new(
        args.identity_config(),
        breakers.breaker("identity"),
    ));

    // Throughput governor: shared windows when MongoDB is up, local otherwise
    let shared_windows: Option<Arc<dyn WindowStore>> = match &mongo {
        Some(mongo) => {
            match MongoWindowStore::new(mongo.raw_collection(RATE_WINDOW_COLLECTION)).await {
                Ok(store) => {
                    info!("Shared rate windows enabled (global limits across instances)");
                    Some(Arc::new(store))
                }
                Err(e) => {
                    warn!("Shared rate window init failed, per-instance limits only: {}", e);
                    None
                }
            }
        }
        None => None,
    };
    let governor = Arc::new(ThroughputGovernor::new(
        args.governor_limits(),
        shared_windows,
    ));

    // Audit sink for non-transactional records (denied/failed attempts)
    let audit: Arc<dyn AuditSink> = match &mongo {
        Some(mongo) => Arc::new(MongoAuditSink::new(mongo.raw_collection(AUDIT_COLLECTION))),
        None => {
            warn!("Audit records will only be logged (no MongoDB)");
            Arc::new(TracingAuditSink)
        }
    };

    // Award store: MongoDB transactions in production, in-memory in dev mode
    let store: Arc<dyn AwardStore> = match &mongo {
        Some(mongo) => match MongoAwardStore::new(mongo).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Award store initialization failed: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(MemoryAwardStore::new()),
    };

    // Award engine, with the feed notification hook when configured
    let mut engine = AwardEngine::new(
        Arc::clone(&store),
        identity,
        Arc::clone(&governor),
        Arc::clone(&audit),
    );
    if let Some(ref feed_url) = args.feed_url {
        engine = engine.with_hook(Arc::new(FeedNotificationHook::new(
            feed_url.trim_end_matches('/'),
            Duration::from_secs(5),
        )));
        info!("Feed notification hook enabled ({})", feed_url);
    }
    let engine = Arc::new(engine);

    let bulk = Arc::new(BulkOrchestrator::new(
        Arc::clone(&engine),
        Arc::clone(&governor),
        Arc::clone(&audit),
        args.bulk_max_items,
    ));

    let verifier = TokenVerifier::new(&args.jwt_secret());

    let state = Arc::new(server::AppState {
        args,
        mongo,
        engine,
        bulk,
        governor,
        breakers,
        verifier,
        started_at: Instant::now(),
    });

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
