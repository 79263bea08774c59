use axum::routing::{get, post, put};
use axum::Router;

use super::handlers::{core, fees};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(core::health))
        .route("/api/fee", post(fees::create_fee))
        .route(
            "/api/fee/{id}",
            get(fees::get_fee)
                .put(fees::update_fee)
                .delete(fees::delete_fee),
        )
        .route("/api/fee/{id}/pay-multiple", put(fees::pay_multiple))
        .route(
            "/api/fee/{id}/installments/{installment}/pay",
            put(fees::pay_installment),
        )
        .route(
            "/api/fee/{id}/installments/{installment}/receipt",
            get(fees::receipt),
        )
        .fallback(core::route_not_found)
        .method_not_allowed_fallback(core::method_not_allowed)
        .with_state(state)
}
