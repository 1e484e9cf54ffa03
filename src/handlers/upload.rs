//! Image intake: a multipart upload is base64-encoded and appended as one
//! line to the image log file.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, State},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Maximum upload file size: 10 MiB.
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Multipart field carrying the image.
const FILE_FIELD: &str = "file";

/// Accept one image upload.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
        image = Some(data);
        break;
    }

    let Some(image) = image.filter(|data| !data.is_empty()) else {
        return Err(AppError::BadRequest("No file uploaded".to_string()));
    };
    if image.len() > MAX_UPLOAD_SIZE {
        return Err(AppError::BadRequest(format!(
            "File too large (max {MAX_UPLOAD_SIZE} bytes)"
        )));
    }

    append_base64_line(&state.config.image_log_path, &image).await?;
    tracing::info!("Image saved as Base64 ({} bytes)", image.len());

    Ok(Json(json!({ "message": "Image received and saved successfully" })))
}

/// Append `data` as one base64 line, creating the file and its parent
/// directory when missing.
pub async fn append_base64_line(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut line = STANDARD.encode(data);
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
