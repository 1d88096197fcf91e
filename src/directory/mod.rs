//! Agents and the groups they are organised into.

pub mod groups;
pub mod users;

use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;

pub fn configure_directory_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::GROUPS, get(groups::list_groups).post(groups::create_group))
        .route(
            ApiUrls::GROUP_BY_ID,
            put(groups::update_group).delete(groups::delete_group),
        )
        .route(ApiUrls::USERS, get(users::list_users).post(users::create_user))
        .route(
            ApiUrls::USER_BY_ID,
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
}
