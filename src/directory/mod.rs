//! Directory: users, properties, rooms, and the join rows binding them.

pub mod properties;
pub mod rooms;
pub mod users;

use std::sync::Arc;

use axum::Router;

use crate::shared::state::AppState;

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(users::routes())
        .merge(properties::routes())
        .merge(rooms::routes())
}
