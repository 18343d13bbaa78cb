use axum::{Router, routing::get};

pub mod common;
pub mod expenses;
pub mod inventory;
pub mod notifications;
pub mod organization;
pub mod products;
pub mod purchases;
pub mod sales;
pub mod system;
pub mod workflows;

/// Router for all authenticated (organization-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/organization", organization::router())
        .nest("/products", products::router())
        .nest("/inventory", inventory::router())
        .nest("/sales", sales::router())
        .nest("/purchases", purchases::router())
        .nest("/expenses", expenses::router())
        .nest("/workflows", workflows::router())
        .nest("/notifications", notifications::router())
}
