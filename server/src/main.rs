mod config;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    // A missing .env file is normal; everything has a default.
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env().expect("invalid server configuration");
    let state = state::AppState::new(&config);

    tracing::info!(
        public_dir = %config.public_dir.display(),
        availability_csv = %config.availability_csv.display(),
        "serving kiosk assets"
    );

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .expect("failed to bind");

    tracing::info!(port = config.port, "towerdeck listening");
    axum::serve(listener, app).await.expect("server failed");
}
