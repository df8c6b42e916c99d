use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use authgate::auth::TokenIssuer;
use authgate::configuration::get_configuration;
use authgate::email_client::{EmailAddress, EmailClient};
use authgate::startup::{run, AppState};
use authgate::store::{PgRefreshTokenStore, PgUserStore};
use authgate::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, msg: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(kind, msg.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, e)
    })?;
    tracing::info!("Configuration loaded successfully");

    let issuer = TokenIssuer::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, e)
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, e)
        })?;
    tracing::info!("Database connection pool created");

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, e)
    })?;

    let sender = EmailAddress::parse(&configuration.email_client.sender_email).map_err(|e| {
        tracing::error!("Invalid sender email: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, e)
    })?;
    let email_client = EmailClient::new(
        configuration.email_client.base_url.clone(),
        sender,
        reqwest::Client::new(),
    );

    let state = AppState {
        issuer: Arc::new(issuer),
        users: Arc::new(PgUserStore::new(pool.clone())),
        refresh_tokens: Arc::new(PgRefreshTokenStore::new(pool)),
        mailer: Arc::new(email_client),
        api_host_url: configuration.application.api_host_url.clone(),
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, state)?.await
}
