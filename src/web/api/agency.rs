//! Agency metadata endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::agency::{Agency, AgencyInfo};

pub async fn get_agency(State(agency): State<Arc<Agency>>) -> Json<AgencyInfo> {
    Json(agency.info())
}
