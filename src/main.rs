use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use chat_relay::{
    auth::auth_middleware,
    cli::{Cli, Commands},
    config::{ConfigError, ServerConfig, StorageBackend},
    handlers::{
        health_check, list_messages, list_private_messages, list_users, login, logout, me,
        register, root, validate_session,
    },
    relay::handle_websocket,
    state::ServerState,
    storage::{
        MemoryStore, MessageFilter, MessageStore, PostgresMessageStore, PostgresUserStore,
        UserStore,
    },
};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Request body limit for the JSON API
const MAX_API_BODY_SIZE: usize = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize storage layers
    let (user_store, message_store): (Arc<dyn UserStore>, Arc<dyn MessageStore>) =
        match config.storage_backend {
            StorageBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(database_url)
                    .await?;

                let users = PostgresUserStore::new(pool.clone());
                users.initialize().await?;

                let messages = PostgresMessageStore::new(pool);
                messages.initialize().await?;

                (Arc::new(users), Arc::new(messages))
            }
            StorageBackend::Memory => {
                warn!("Using in-memory storage; users and messages are lost on restart");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    // Handle CLI commands
    match cli.command {
        Some(Commands::User(cmd)) => {
            if config.storage_backend == StorageBackend::Memory {
                warn!("User commands against in-memory storage do not outlive this process");
            }
            return cmd.execute(user_store.as_ref()).await;
        }
        Some(Commands::History { limit, user }) => {
            let filter = match user {
                Some(user_id) => MessageFilter::PrivateFor(user_id),
                None => MessageFilter::Public,
            };
            let messages = message_store.find_messages(filter, limit).await?;

            println!(
                "{:<20} {:<20} {:<20} {}",
                "Timestamp", "From", "To", "Message"
            );
            println!("{}", "-".repeat(95));

            for message in messages {
                println!(
                    "{:<20} {:<20} {:<20} {}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.sender_name,
                    message.recipient_id.as_deref().unwrap_or("everyone"),
                    message.content
                );
            }

            return Ok(());
        }
        Some(Commands::Serve) | None => {
            // Continue to run server
        }
    }

    // Server mode
    info!("🚀 Starting chat-relay v{}", VERSION);
    info!("📋 Configuration loaded:");
    info!("   Port: {}", config.port);
    info!("   Bind address: {}", config.bind_addr);
    info!("   Storage backend: {:?}", config.storage_backend);
    info!("   Session timeout: {}s", config.session_timeout_seconds);
    match config.auth_timeout() {
        Some(limit) => info!("   Authentication deadline: {}s", limit.as_secs()),
        None => info!("   Authentication deadline: disabled"),
    }
    info!("   Ping interval: {}s", config.ping_interval_seconds);
    info!("   History limit: {}", config.history_limit);

    // Create server state
    let state = Arc::new(ServerState::new(config.clone(), user_store, message_store));

    // Spawn background task to cleanup expired sessions
    {
        let session_manager = state.auth_state.session_manager.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(300)); // Every 5 minutes
            loop {
                interval.tick().await;
                let cleaned = session_manager.cleanup_expired();
                if cleaned > 0 {
                    info!("Cleaned up {} expired sessions", cleaned);
                }
            }
        });
    }

    // Spawn background task to cleanup rate limiter entries
    {
        let rate_limiter = state.auth_state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(120)); // Every 2 minutes
            loop {
                interval.tick().await;
                let cleaned = rate_limiter.cleanup();
                if cleaned > 0 {
                    info!("Cleaned up {} rate limiter entries", cleaned);
                }
            }
        });
    }

    // Build router
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/session", get(validate_session))
        .route("/api/messages", get(list_messages))
        .route("/api/users", get(list_users));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .route("/api/messages/private/{user_id}", get(list_private_messages))
        .layer(middleware::from_fn_with_state(
            state.auth_state.clone(),
            auth_middleware,
        ));

    let ws_routes = Router::new()
        .route("/ws", get(handle_websocket))
        .with_state(state.relay_state());

    // CORS configuration - configurable via CORS_ORIGINS env var
    let cors_origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    info!("   CORS origins: {:?}", config.cors_origins);
    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .merge(ws_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .map_response(|res: axum::response::Response<_>| res.map(axum::body::Body::new))
                .layer(RequestBodyLimitLayer::new(MAX_API_BODY_SIZE)),
        );

    // Start server
    let addr: SocketAddr = config.bind_address().parse()?;
    info!("🎧 Listening on http://{}", addr);
    info!("📡 WebSocket endpoint: ws://{}/ws", addr);
    info!("🔑 Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
