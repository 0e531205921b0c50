use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{join_under_base, RemoteEditError, RemoteEditService, StepResult};
use crate::edit::catalog::CategoryFamily;
use crate::edit::{EditOperation, EditableImage};

const MAX_ERROR_BODY_CHARS: usize = 300;
/// Operation parameters used for labels only; the edit service never sees them.
const DISPLAY_ONLY_PARAMS: &[&str] = &["shade"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEditServiceConfig {
    pub api_base: Url,
    pub family: CategoryFamily,
    pub endpoint_path: String,
    pub category_field: String,
    pub request_timeout: Duration,
}

impl HttpEditServiceConfig {
    pub fn for_family(api_base: Url, family: CategoryFamily) -> Self {
        Self {
            api_base,
            family,
            endpoint_path: family.default_endpoint_path().to_string(),
            category_field: family.category_field().to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_endpoint_path(mut self, endpoint_path: impl Into<String>) -> Self {
        self.endpoint_path = endpoint_path.into();
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpEditService {
    client: Client,
    endpoint: Url,
    config: HttpEditServiceConfig,
}

#[derive(Debug, Default, Deserialize)]
struct EditResponsePayload {
    #[serde(default)]
    output_path: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
}

impl HttpEditService {
    pub fn new(config: HttpEditServiceConfig) -> Result<Self, RemoteEditError> {
        let endpoint = join_under_base(&config.api_base, config.endpoint_path.as_str())
            .map_err(|e| {
                RemoteEditError::service(format!(
                    "invalid edit endpoint '{}': {e}",
                    config.endpoint_path
                ))
            })?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteEditError::Transport(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn config(&self) -> &HttpEditServiceConfig {
        &self.config
    }

    fn build_form(
        &self,
        image: &EditableImage,
        operation: &EditOperation,
    ) -> Result<multipart::Form, RemoteEditError> {
        let media_type = image.media_type();
        let part = multipart::Part::bytes(image.bytes().to_vec())
            .file_name(format!("current.{}", image.extension()))
            .mime_str(media_type)
            .map_err(|e| RemoteEditError::service(format!("invalid mime '{media_type}': {e}")))?;
        let mut form = multipart::Form::new().part("file", part).text(
            self.config.category_field.clone(),
            self.config.family.api_name(operation.category.as_str()),
        );
        for (key, value) in &operation.parameters {
            if key == &self.config.category_field
                || key == "file"
                || DISPLAY_ONLY_PARAMS.contains(&key.as_str())
            {
                continue;
            }
            form = form.text(key.clone(), value.clone());
        }
        Ok(form)
    }

    async fn fetch_output(&self, output_path: &str) -> StepResult {
        let url = join_under_base(&self.config.api_base, output_path).map_err(|e| {
            RemoteEditError::service(format!("invalid output path '{output_path}': {e}"))
        })?;
        let resp = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteEditError::Service {
                status: Some(status.as_u16()),
                message: format!("could not fetch edited image {url} (HTTP {})", status.as_u16()),
            });
        }
        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(decode_image(bytes.to_vec())?.with_remote_locator(url))
    }
}

#[async_trait]
impl RemoteEditService for HttpEditService {
    async fn apply(&self, image: &EditableImage, operation: &EditOperation) -> StepResult {
        let form = self.build_form(image, operation)?;
        debug!(
            endpoint = %self.endpoint,
            category = %operation.category,
            input = %image.digest(),
            "submitting edit request"
        );
        let resp = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let body = resp.bytes().await.map_err(transport_error)?;

        if !status.is_success() {
            let message = error_message_from_body(status, body.as_ref());
            warn!(
                status = status.as_u16(),
                category = %operation.category,
                message = %message,
                "edit service rejected request"
            );
            return Err(RemoteEditError::Service {
                status: Some(status.as_u16()),
                message,
            });
        }

        if content_type.starts_with("image/") || image::guess_format(body.as_ref()).is_ok() {
            return decode_image(body.to_vec());
        }

        let value = serde_json::from_slice::<Value>(body.as_ref()).map_err(unexpected_response)?;
        let payload = EditResponsePayload::deserialize(&value).map_err(unexpected_response)?;
        if let Some(encoded) = payload
            .image_base64
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return decode_base64_image(encoded);
        }
        if let Some(output_path) = payload
            .output_path
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return self.fetch_output(output_path).await;
        }
        if let Some(message) = json_error_message(&value) {
            warn!(
                status = status.as_u16(),
                category = %operation.category,
                message = %message,
                "edit service reported an error with a success status"
            );
            return Err(RemoteEditError::Service {
                status: Some(status.as_u16()),
                message,
            });
        }
        Err(RemoteEditError::service(
            "edit service response did not include an image",
        ))
    }
}

fn unexpected_response(error: serde_json::Error) -> RemoteEditError {
    RemoteEditError::service(format!("edit service returned an unexpected response: {error}"))
}

fn transport_error(error: reqwest::Error) -> RemoteEditError {
    RemoteEditError::Transport(error.to_string())
}

fn decode_image(bytes: Vec<u8>) -> StepResult {
    EditableImage::from_bytes(bytes).map_err(|e| {
        RemoteEditError::service(format!("edit service returned an unreadable image: {e}"))
    })
}

fn decode_base64_image(encoded: &str) -> StepResult {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };
    let bytes = BASE64_STANDARD
        .decode(data.as_bytes())
        .map_err(|e| RemoteEditError::service(format!("image base64 decode failed: {e}")))?;
    decode_image(bytes)
}

pub(crate) fn error_message_from_body(status: StatusCode, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = json_error_message(&value) {
            return message;
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {}", status.as_u16());
    }
    if text.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated = text.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("HTTP {}: {truncated}…", status.as_u16());
    }
    format!("HTTP {}: {text}", status.as_u16())
}

fn json_error_message(value: &Value) -> Option<String> {
    for key in ["error", "detail", "message"] {
        match value.get(key) {
            Some(Value::String(message)) if !message.trim().is_empty() => {
                return Some(message.trim().to_string());
            }
            Some(Value::Array(items)) => {
                let joined = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                if !joined.is_empty() {
                    return Some(joined);
                }
            }
            _ => {}
        }
    }
    None
}
