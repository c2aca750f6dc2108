//! Model description endpoint, used by clients to build crop pickers

use std::collections::BTreeMap;

use axum::{extract::State, Json};
use cropcare::backend::backend_name;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub num_classes: usize,
    pub image_size: usize,
    pub backend: String,
    pub model: String,
    pub labels: BTreeMap<usize, String>,
    pub crop_groups: BTreeMap<String, Vec<usize>>,
}

/// GET /api/model - Classes, labels and crop groups of the loaded model
pub async fn model_info(State(state): State<SharedState>) -> Json<ModelInfo> {
    let service = &state.service;

    Json(ModelInfo {
        num_classes: service.runtime().num_classes(),
        image_size: service.preprocessor().output_shape()[1],
        backend: backend_name().to_string(),
        model: service.runtime().describe(),
        labels: service
            .class_map()
            .iter()
            .map(|(id, label)| (id, label.to_string()))
            .collect(),
        crop_groups: service
            .crop_groups()
            .iter()
            .map(|(crop, ids)| (crop.to_string(), ids.iter().copied().collect()))
            .collect(),
    })
}
