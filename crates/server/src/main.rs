use std::io::BufRead;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use summa_server::{
    build_router,
    config::Config,
    db::Database,
    services::{
        auth::{hash_password, Authenticator, PasswordAuthenticator},
        clock::SystemClock,
        storage::StorageService,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `summa-server hash-password` reads a password on stdin and prints the
    // PHC string to paste into the credentials file.
    if std::env::args().nth(1).as_deref() == Some("hash-password") {
        let mut password = String::new();
        std::io::stdin().lock().read_line(&mut password)?;
        println!("{}", hash_password(password.trim_end_matches(['\r', '\n']))?);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "summa_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Ensure the repository root exists
    let storage = StorageService::new(&config.git_root);
    storage.init()?;

    // Initialize database
    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let authenticator: Arc<dyn Authenticator> = match &config.credentials_file {
        Some(path) => {
            let authenticator = PasswordAuthenticator::from_file(path)?;
            tracing::info!("Loaded {} credentials from {}", authenticator.len(), path);
            Arc::new(authenticator)
        }
        None => {
            tracing::warn!("CREDENTIALS_FILE is not set, every sign-in will be rejected");
            Arc::new(PasswordAuthenticator::empty())
        }
    };

    let state = AppState::new(
        db,
        config.clone(),
        storage,
        Arc::new(SystemClock),
        authenticator,
    );
    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
