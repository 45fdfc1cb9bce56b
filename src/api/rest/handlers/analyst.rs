use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    Json,
};
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::analyst::models::{Question, ResultPayload};
use crate::api::rest::error::{ApiError, ApiResult};
use crate::api::rest::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub question: String,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub csv: Option<String>,
}

/// Multipart form: `file` holds the question, `image` and `csv` are optional.
pub async fn analyze_multipart(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<ResultPayload>> {
    let mut question = None;
    let mut image = None;
    let mut csv = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read field '{}': {}", name, e)))?;

        match name.as_str() {
            "file" => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ApiError::BadRequest("Question file must be UTF-8 text".to_string())
                })?;
                question = Some(text);
            }
            "image" => image = Some(bytes.to_vec()),
            "csv" => csv = Some(String::from_utf8_lossy(&bytes).to_string()),
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    let question = question
        .ok_or_else(|| ApiError::BadRequest("Missing question file in 'file' field".to_string()))?;
    answer(&state, question, image, csv).await
}

pub async fn analyze_json(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<Json<ResultPayload>> {
    let image = req
        .image_base64
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(decode_image)
        .transpose()?;
    answer(&state, req.question, image, req.csv).await
}

/// Accepts bare base64 or a `data:` URI.
fn decode_image(encoded: &str) -> ApiResult<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))
}

async fn answer(
    state: &AppState,
    text: String,
    image: Option<Vec<u8>>,
    csv: Option<String>,
) -> ApiResult<Json<ResultPayload>> {
    if text.trim().is_empty() {
        return Err(ApiError::BadRequest("Question text is empty".to_string()));
    }

    let note = match image.as_deref() {
        Some(bytes) if !bytes.is_empty() => state.analyst.describe_image(bytes).await,
        _ => None,
    };
    let question = Question::new(text)
        .with_image_note(note)
        .with_provided_csv(csv);

    let report = state.analyst.answer(&question).await.map_err(|e| {
        error!("Analysis request failed: {}", e);
        ApiError::from(e)
    })?;
    info!(
        success = report.payload.is_success(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Returning analysis payload"
    );
    Ok(Json(report.payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyst::Analyst;
    use crate::api::rest::create_router;
    use crate::shared::config::AnalystConfig;
    use serde_json::{json, Value};

    #[test]
    fn image_accepts_data_uri_and_bare_base64() {
        assert_eq!(decode_image("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert_eq!(decode_image("aGk=").unwrap(), b"hi");
        assert!(matches!(decode_image("***"), Err(ApiError::BadRequest(_))));
    }

    async fn serve() -> String {
        let analyst = Analyst::from_config(&AnalystConfig::default()).unwrap();
        let app = create_router(Arc::new(AppState::new(analyst)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_and_version_respond() {
        let base = serve().await;
        let health: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], json!("ok"));

        let version: Value = reqwest::get(format!("{}/api/v0/version", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(version["api"], json!("v0"));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let base = serve().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/v0/aianalyst/json", base))
            .json(&json!({"question": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["message"], json!("Question text is empty"));
    }

    #[tokio::test]
    async fn malformed_image_is_rejected() {
        let base = serve().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/v0/aianalyst/json", base))
            .json(&json!({"question": "Q", "image_base64": "not base64!"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
    }
}
