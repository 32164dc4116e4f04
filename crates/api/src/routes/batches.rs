//! Batch registration endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{BatchReference, Sku};
use serde::Deserialize;
use store::UnitOfWorkFactory;

use super::AppState;
use super::allocations::parse_quantity;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AddBatchRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub sku: String,
    pub qty: i64,
    /// ISO date (`YYYY-MM-DD`); absent or null for warehouse stock.
    #[serde(default)]
    pub eta: Option<String>,
}

/// POST /batches registers a new batch of stock.
#[tracing::instrument(skip(state))]
pub async fn add<F: UnitOfWorkFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Json(req): Json<AddBatchRequest>,
) -> Result<StatusCode, ApiError> {
    let quantity = parse_quantity(req.qty)?;
    let eta = req.eta.as_deref().map(parse_eta).transpose()?;

    state
        .allocation_service
        .register_batch(
            BatchReference::new(req.reference),
            Sku::new(req.sku),
            quantity,
            eta,
        )
        .await?;

    Ok(StatusCode::CREATED)
}

fn parse_eta(eta: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(eta, "%Y-%m-%d")
        .map_err(|e| ApiError::BadRequest(format!("Invalid eta {eta}: {e}")))
}
