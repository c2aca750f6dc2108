//! Prediction endpoint - multipart upload in, PredictionResult JSON out

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cropcare::{CropCareError, PredictionRequest, PredictionResult};
use serde::Serialize;
use tracing::{debug, error, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::state::SharedState;

/// Multipart fields that may carry the image
const IMAGE_FIELDS: [&str; 2] = ["image", "file"];

/// Failure returned to the client as `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<CropCareError> for ApiError {
    fn from(err: CropCareError) -> Self {
        let status = match &err {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            CropCareError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
        }

        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        } else {
            warn!(status = %self.status, "{}", self.message);
        }

        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// POST /api/predict and /api/infer - Classify one uploaded leaf photo
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!("predict", %request_id);

    async move {
        let multipart =
            multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
        let request = read_request(multipart).await?;
        let result = run_prediction(&state, request).await?;
        Ok::<_, ApiError>(Json(result))
    }
    .instrument(span)
    .await
}

/// Collect the image and the optional text fields from the form
///
/// The first image field wins; unknown fields are ignored.
async fn read_request(mut multipart: Multipart) -> Result<PredictionRequest, ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut request = PredictionRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if IMAGE_FIELDS.contains(&name.as_str()) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
            if image.is_none() {
                debug!("Received image field '{}' ({} bytes)", name, bytes.len());
                image = Some(bytes.to_vec());
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        if !request.set_field(&name, value) {
            debug!("Ignoring unknown form field '{}'", name);
        }
    }

    request.image_bytes =
        image.ok_or_else(|| ApiError::bad_request("image file required (field: 'image' or 'file')"))?;
    Ok(request)
}

/// Run the prediction on the blocking pool under a permit and a deadline
async fn run_prediction(
    state: &SharedState,
    request: PredictionRequest,
) -> Result<PredictionResult, ApiError> {
    let timeout = state.settings.request_timeout();
    let permits = state.permits.clone();
    let task_state = state.clone();
    let span = Span::current();

    let job = async move {
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|_| ApiError::internal("prediction pool is closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            span.in_scope(|| task_state.service.handle(&request))
        })
        .await
        .map_err(|e| ApiError::internal(format!("prediction task failed: {e}")))?
        .map_err(ApiError::from)
    };

    match tokio::time::timeout(timeout, job).await {
        Ok(result) => result,
        Err(_) => Err(CropCareError::Timeout(timeout).into()),
    }
}
