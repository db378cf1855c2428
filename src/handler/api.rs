use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::gateway::{EventPoint, HistoryPoint, DEFAULT_HOURS};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    pub location: String,
    pub measurement: String,
    #[serde(default)]
    pub hours: Option<u32>,
}

impl SeriesParams {
    fn hours(&self) -> Result<u32, ApiError> {
        match self.hours.unwrap_or(DEFAULT_HOURS) {
            0 => Err(ApiError::BadRequest("hours must be at least 1".to_string())),
            hours => Ok(hours),
        }
    }
}

fn series_params(
    params: Result<Query<SeriesParams>, QueryRejection>,
) -> Result<(SeriesParams, u32), ApiError> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let hours = params.hours()?;
    Ok((params, hours))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let topics = state
        .bridge
        .topics()
        .await
        .map_err(|_| ApiError::Unavailable)?;
    Ok(Json(HealthResponse {
        status: "ok",
        topics,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    params: Result<Query<SeriesParams>, QueryRejection>,
) -> Result<Json<Vec<HistoryPoint>>, ApiError> {
    let (params, hours) = series_params(params)?;
    let points = state
        .gateway
        .history(&params.location, &params.measurement, hours)
        .await?;
    Ok(Json(points))
}

pub async fn events(
    State(state): State<AppState>,
    params: Result<Query<SeriesParams>, QueryRejection>,
) -> Result<Json<Vec<EventPoint>>, ApiError> {
    let (params, hours) = series_params(params)?;
    let points = state
        .gateway
        .events(&params.location, &params.measurement, hours)
        .await?;
    Ok(Json(points))
}
