use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handlers::{
    build_payout, cancel_campaign, create_campaign, donate, donation_history, get_campaign,
    health_check, list_campaigns, refund_operations, settle_campaigns, submit_transaction,
    update_campaign, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Campaign CRUD
                .route("/campaigns", post(create_campaign).get(list_campaigns))
                .route("/campaigns/:id", get(get_campaign).put(update_campaign))
                .route("/campaigns/:id/cancel", post(cancel_campaign))
                // Donation flow
                .route("/campaigns/:id/donate", post(donate))
                .route("/donations/:public_key", get(donation_history))
                // Admin payout flow
                .route("/campaigns/:id/refund-operations", get(refund_operations))
                .route("/payouts/build", post(build_payout))
                .route("/admin/settle", post(settle_campaigns))
                // Signed transaction submission + reconciliation
                .route("/transactions/submit", post(submit_transaction)),
        )
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
