use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::api::error::{pipeline_error_code, ErrorKind};
use crate::pipeline::PipelineError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: Some(kind),
            error_code: Some(code.into()),
        }),
    )
}

pub fn validation_error(code: &str, message: impl Into<String>) -> ApiObject<Value> {
    error_response(StatusCode::BAD_REQUEST, ErrorKind::Validation, code, message)
}

pub fn map_pipeline_error(error: &PipelineError) -> ApiObject<Value> {
    let kind = ErrorKind::for_pipeline_error(error);
    let code = pipeline_error_code(error);
    let status = match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Provider => StatusCode::BAD_GATEWAY,
        ErrorKind::Infra => StatusCode::SERVICE_UNAVAILABLE,
    };
    if error.is_stale() {
        debug!(error = %error, "request ended on a superseded run");
    } else if matches!(kind, ErrorKind::Provider | ErrorKind::Infra) {
        warn!(error = %error, error_code = code, "edit pipeline failed");
    }

    let (status, Json(mut payload)) = error_response(status, kind, code, error.reason());
    if let (Some(failure), Some(body)) = (error.step_failure(), payload.as_object_mut()) {
        body.insert(
            String::from("failed_step"),
            json!({
                "step": failure.step,
                "total": failure.total,
                "category": failure.category,
                "label": failure.label,
                "status_code": failure.source.status(),
            }),
        );
        body.insert(
            String::from("last_good_image"),
            into_json(failure.last_good.summary()).0,
        );
    }
    (status, Json(payload))
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).unwrap_or_else(|error| {
        json!({"ok": false, "error": format!("response serialization failed: {error}")})
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::{internal_error, map_pipeline_error};
    use crate::edit::{png_bytes, EditableImage};
    use crate::pipeline::{PipelineError, StepFailure};
    use crate::remote::RemoteEditError;

    fn step_failure(source: RemoteEditError) -> PipelineError {
        PipelineError::Step(Box::new(StepFailure {
            step: 3,
            total: 3,
            category: String::from("lipstick"),
            label: String::from("Lipstick"),
            last_good: EditableImage::from_bytes(png_bytes("f2")).expect("image should load"),
            source,
        }))
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let (status, payload) = map_pipeline_error(&PipelineError::NothingSelected);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error_kind"], json!("validation"));
        assert_eq!(payload.0["error_code"], json!("nothing_selected"));

        let (status, payload) = map_pipeline_error(&PipelineError::MissingBaseImage);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.0["error_code"], json!("missing_base_image"));
    }

    #[test]
    fn busy_and_stale_are_conflicts() {
        let (status, payload) = map_pipeline_error(&PipelineError::Busy);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload.0["error_kind"], json!("conflict"));
        assert_eq!(payload.0["error_code"], json!("run_in_progress"));

        let (status, payload) = map_pipeline_error(&PipelineError::Stale { generation: 4 });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(payload.0["error_code"], json!("run_superseded"));
    }

    #[test]
    fn service_failures_carry_step_and_reason() {
        let (status, payload) = map_pipeline_error(&step_failure(RemoteEditError::Service {
            status: Some(500),
            message: String::from("invalid color"),
        }));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(payload.0["error"], json!("invalid color"));
        assert_eq!(payload.0["error_kind"], json!("provider"));
        assert_eq!(payload.0["error_code"], json!("edit_service_failed"));
        assert_eq!(payload.0["failed_step"]["step"], json!(3));
        assert_eq!(payload.0["failed_step"]["category"], json!("lipstick"));
        assert_eq!(payload.0["failed_step"]["status_code"], json!(500));
        assert_eq!(payload.0["last_good_image"]["media_type"], json!("image/png"));
    }

    #[test]
    fn transport_failures_are_infra() {
        let (status, payload) = map_pipeline_error(&step_failure(RemoteEditError::Transport(
            String::from("connection refused"),
        )));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.0["error_kind"], json!("infra"));
        assert_eq!(payload.0["error_code"], json!("edit_service_unreachable"));
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let (status, payload) = internal_error("sensitive detail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error"], json!("Internal server error"));
        assert_eq!(payload.0["error_kind"], json!("infra"));
        assert_eq!(payload.0["error_code"], json!("internal_error"));
    }
}
