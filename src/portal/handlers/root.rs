use crate::portal::VIEW_PATH;
use axum::response::{IntoResponse, Redirect};

pub async fn root() -> impl IntoResponse {
    Redirect::to(VIEW_PATH)
}
