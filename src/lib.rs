pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{DonationRepository, GatewayVerifier, ReceiptSequencer};

#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub repository: DonationRepository,
    pub sequencer: ReceiptSequencer,
    pub gateway: GatewayVerifier,
}

pub struct Application {
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("donation-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let repository = DonationRepository::new(&db);

        // The unique receipt index is load-bearing; refuse to start without it.
        repository.init_indexes().await?;

        services::metrics::init_metrics();

        let gateway = GatewayVerifier::new(config.gateway.clone());
        if gateway.is_configured() {
            tracing::info!("Payment gateway verifier initialized");
        } else {
            tracing::warn!(
                "Gateway credentials not configured - online donations cannot be verified"
            );
        }

        let sequencer = ReceiptSequencer::new(repository.clone());

        let state = AppState {
            db,
            config: config.clone(),
            repository,
            sequencer,
            gateway,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics))
            .route(
                "/donations/:ledger",
                post(handlers::donations::create_donation),
            )
            .route(
                "/donations/:ledger/report",
                get(handlers::donations::prasad_report),
            )
            .route(
                "/donations/:ledger/:id",
                get(handlers::donations::get_donation),
            )
            .route(
                "/donations/:ledger/:id/verify",
                post(handlers::donations::verify_donation),
            )
            .route(
                "/donations/:ledger/:id/finalize",
                post(handlers::donations::finalize_cash_donation),
            )
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            port: config.server.port,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}
