use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::{
    error_response, internal_error, into_json, map_pipeline_error, validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::edit::{EditOperation, EditableImage, ImageSummary};
use crate::pipeline::{PipelineController, PipelineError, RunSnapshot};

/// The uploaded base image plus the controller that edits it.
pub struct TryOnSession {
    base: Mutex<Option<EditableImage>>,
    controller: PipelineController,
}

impl TryOnSession {
    pub fn new(controller: PipelineController) -> Self {
        Self {
            base: Mutex::new(None),
            controller,
        }
    }

    pub fn controller(&self) -> &PipelineController {
        &self.controller
    }

    pub fn base(&self) -> Option<EditableImage> {
        self.lock_base().clone()
    }

    /// Replaces the base and abandons whatever the controller was doing.
    pub fn set_base(&self, image: EditableImage) {
        *self.lock_base() = Some(image);
        self.controller.reset();
    }

    pub fn reset(&self) {
        self.controller.reset();
    }

    pub fn current_or_base(&self) -> Option<EditableImage> {
        self.controller.current_image().or_else(|| self.base())
    }

    pub async fn apply_one(
        &self,
        operation: EditOperation,
    ) -> Result<EditableImage, PipelineError> {
        let input = self
            .current_or_base()
            .ok_or(PipelineError::MissingBaseImage)?;
        self.controller.apply_one(input, operation).await
    }

    pub async fn apply_all(
        &self,
        operations: Vec<EditOperation>,
    ) -> Result<EditableImage, PipelineError> {
        if operations.is_empty() {
            return Err(PipelineError::NothingSelected);
        }
        let base = self.base().ok_or(PipelineError::MissingBaseImage)?;
        self.controller.apply_all(base, operations).await
    }

    fn lock_base(&self) -> MutexGuard<'_, Option<EditableImage>> {
        self.base.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Deserialize)]
pub struct ApplyOneInput {
    pub category: String,
    #[serde(default)]
    pub parameters: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyAllInput {
    #[serde(default)]
    pub operations: Vec<EditOperation>,
}

#[derive(Debug, Serialize)]
struct ApplyResponse {
    ok: bool,
    image: ImageSummary,
    snapshot: RunSnapshot,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    ok: bool,
    has_base: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    base: Option<ImageSummary>,
    snapshot: RunSnapshot,
}

pub async fn put_base_handler(State(state): State<AppState>, body: Bytes) -> ApiObject<Value> {
    let image = match EditableImage::from_bytes(body.to_vec()) {
        Ok(image) => image,
        Err(error) => return validation_error("invalid_image", error.to_string()),
    };
    info!(
        digest = %image.digest(),
        media_type = image.media_type(),
        bytes = image.len(),
        "base image replaced"
    );
    state.session.set_base(image);
    session_payload(&state)
}

pub async fn apply_one_handler(
    State(state): State<AppState>,
    payload: Result<Json<ApplyOneInput>, JsonRejection>,
) -> ApiObject<Value> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return validation_error("invalid_request", rejection.body_text()),
    };
    let operation = EditOperation {
        category: payload.category,
        parameters: payload.parameters,
    };
    if let Some(response) = reject_blank_categories(std::slice::from_ref(&operation)) {
        return response;
    }
    let result = state.session.apply_one(operation).await;
    apply_payload(&state, result)
}

pub async fn apply_all_handler(
    State(state): State<AppState>,
    payload: Result<Json<ApplyAllInput>, JsonRejection>,
) -> ApiObject<Value> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return validation_error("invalid_request", rejection.body_text()),
    };
    if let Some(response) = reject_blank_categories(payload.operations.as_slice()) {
        return response;
    }
    let result = state.session.apply_all(payload.operations).await;
    apply_payload(&state, result)
}

pub async fn reset_handler(State(state): State<AppState>) -> ApiObject<Value> {
    state.session.reset();
    session_payload(&state)
}

pub async fn get_session_handler(State(state): State<AppState>) -> ApiObject<Value> {
    session_payload(&state)
}

pub async fn get_image_handler(State(state): State<AppState>) -> Response {
    let Some(image) = state.session.current_or_base() else {
        return error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::Validation,
            "no_image",
            "no image yet: upload a base image first",
        )
        .into_response();
    };
    let body = Body::from(Bytes::copy_from_slice(image.bytes()));
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, image.media_type())
        .header(header::CACHE_CONTROL, "no-store")
        .header("x-image-digest", image.digest())
        .body(body)
    {
        Ok(response) => response,
        Err(error) => {
            internal_error(format!("image response build failed: {error}")).into_response()
        }
    }
}

fn apply_payload(
    state: &AppState,
    result: Result<EditableImage, PipelineError>,
) -> ApiObject<Value> {
    match result {
        Ok(image) => (
            StatusCode::OK,
            into_json(ApplyResponse {
                ok: true,
                image: image.summary(),
                snapshot: state.session.controller().snapshot(),
            }),
        ),
        Err(error) => map_pipeline_error(&error),
    }
}

fn session_payload(state: &AppState) -> ApiObject<Value> {
    let base = state.session.base();
    (
        StatusCode::OK,
        into_json(SessionResponse {
            ok: true,
            has_base: base.is_some(),
            base: base.map(|image| image.summary()),
            snapshot: state.session.controller().snapshot(),
        }),
    )
}

fn reject_blank_categories(operations: &[EditOperation]) -> Option<ApiObject<Value>> {
    operations
        .iter()
        .position(|op| op.category.trim().is_empty())
        .map(|index| {
            validation_error(
                "invalid_operation",
                format!("operation {} is missing a category", index + 1),
            )
        })
}
