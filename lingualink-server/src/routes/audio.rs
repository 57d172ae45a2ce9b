//! The audio data path.

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::Json;
use lingualink_core::Error;
use lingualink_service::{AudioUpload, DispatchRequest};

use super::Rejection;
use crate::envelope::{reject, Envelope};
use crate::extract::extract_credential;
use crate::state::ServerState;

/// `POST /api/v1/translate_audio` — multipart `audio_file` plus optional
/// `user_prompt` and repeated `target_languages` fields.
pub async fn translate_audio(
    State(state): State<ServerState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Envelope>, Rejection> {
    let debug = state.context.settings.debug;
    let credential = extract_credential(&headers);

    let mut upload: Option<AudioUpload> = None;
    let mut user_prompt: Option<String> = None;
    let mut target_languages: Vec<String> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(reject(Error::InvalidUpload(format!("malformed multipart: {e}")), debug));
            }
        };
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("audio_file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| {
                        reject(Error::InvalidUpload(format!("unreadable upload: {e}")), debug)
                    })?
                    .to_vec();
                upload = Some(AudioUpload { filename, data });
            }
            Some("user_prompt") => {
                let text = field.text().await.map_err(|e| {
                    reject(Error::InvalidUpload(format!("unreadable user_prompt: {e}")), debug)
                })?;
                user_prompt = Some(text);
            }
            Some("target_languages") => {
                let text = field.text().await.map_err(|e| {
                    reject(Error::InvalidUpload(format!("unreadable target_languages: {e}")), debug)
                })?;
                target_languages.push(text);
            }
            _ => {}
        }
    }

    let Some(upload) = upload else {
        return Err(reject(Error::InvalidUpload("audio_file part is required".to_string()), debug));
    };
    if upload.filename.is_empty() {
        return Err(reject(Error::InvalidUpload("no selected file".to_string()), debug));
    }

    tracing::info!(
        filename = %upload.filename,
        bytes = upload.data.len(),
        languages = ?target_languages,
        "translation request received"
    );

    let request = DispatchRequest {
        user_prompt,
        target_languages: (!target_languages.is_empty()).then_some(target_languages),
        request_key: None,
        deadline: None,
    };

    let outcome = state
        .context
        .dispatcher
        .handle(upload, request, credential.as_deref())
        .await
        .map_err(|e| reject(e, debug))?;

    Ok(Envelope::success(serde_json::json!({
        "backend": outcome.backend,
        "duration_seconds": outcome.duration_seconds,
        "result": outcome.sections,
    })))
}

/// `GET /api/v1/supported_formats`
pub async fn supported_formats(State(state): State<ServerState>) -> Json<Envelope> {
    let settings = &state.context.settings;
    Envelope::success(serde_json::json!({
        "supported_formats": settings.allowed_extensions,
        "max_file_size_mb": settings.max_upload_size / (1024 * 1024),
        "default_target_languages": settings.default_target_languages,
    }))
}
