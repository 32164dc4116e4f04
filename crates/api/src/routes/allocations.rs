//! Order line allocation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{OrderId, Sku};
use serde::{Deserialize, Serialize};
use store::UnitOfWorkFactory;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub orderid: String,
    pub sku: String,
    pub qty: i64,
}

#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    pub batchref: String,
}

/// POST /allocate allocates an order line to the preferred batch.
#[tracing::instrument(skip(state))]
pub async fn allocate<F: UnitOfWorkFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Json(req): Json<AllocateRequest>,
) -> Result<(StatusCode, Json<AllocateResponse>), ApiError> {
    let quantity = parse_quantity(req.qty)?;
    let reference = state
        .allocation_service
        .allocate_order_line(OrderId::new(req.orderid), Sku::new(req.sku), quantity)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AllocateResponse {
            batchref: reference.into_inner(),
        }),
    ))
}

/// POST /reallocate releases an order line and allocates it again.
#[tracing::instrument(skip(state))]
pub async fn reallocate<F: UnitOfWorkFactory + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Json(req): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, ApiError> {
    let quantity = parse_quantity(req.qty)?;
    let reference = state
        .allocation_service
        .reallocate_order_line(OrderId::new(req.orderid), Sku::new(req.sku), quantity)
        .await?;

    Ok(Json(AllocateResponse {
        batchref: reference.into_inner(),
    }))
}

pub(crate) fn parse_quantity(qty: i64) -> Result<u32, ApiError> {
    u32::try_from(qty).map_err(|_| ApiError::BadRequest(format!("Invalid quantity: {qty}")))
}
