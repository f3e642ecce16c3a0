use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::sweep::SweepService;
use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CareSync API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create shared state
    let state = Arc::new(config);

    // Periodic appointment sweep: completes elapsed consultations, expires
    // unconfirmed slots, sends due reminders.
    spawn_sweep_scheduler(Arc::clone(&state));

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn spawn_sweep_scheduler(config: Arc<AppConfig>) {
    let interval_seconds = config.sweep_interval_seconds;

    tokio::spawn(async move {
        let sweep = SweepService::new(&config);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        info!("Appointment sweep scheduled every {}s", interval_seconds);

        loop {
            interval.tick().await;
            match sweep.run(Utc::now()).await {
                Ok(report) => {
                    if report.completed > 0 || report.expired > 0 || report.reminders_sent > 0 {
                        info!(
                            "Sweep: {} completed, {} expired, {} reminders",
                            report.completed, report.expired, report.reminders_sent
                        );
                    }
                }
                Err(e) => warn!("Sweep pass failed: {}", e),
            }
        }
    });
}
