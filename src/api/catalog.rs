use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::api::handler_utils::{into_json, ApiObject};
use crate::api::server::AppState;
use crate::edit::catalog::{CategoryFamily, CategorySpec};

#[derive(Debug, Serialize)]
struct CatalogResponse {
    ok: bool,
    family: CategoryFamily,
    category_field: &'static str,
    categories: &'static [CategorySpec],
}

pub async fn get_catalog_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let family = state.session.controller().family();
    (
        StatusCode::OK,
        into_json(CatalogResponse {
            ok: true,
            family,
            category_field: family.category_field(),
            categories: family.categories(),
        }),
    )
}
