//! HTTP handlers for uploading and displaying stored files.
//! Upload bodies are streamed into the active backend; downloads are served
//! from the `FileMetadata` the backend returns.

use crate::{
    errors::AppError, routes::routes::AppState, services::storage_service::FilePart,
};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;
use tracing::{debug, info, warn};

/// Multipart part that carries the upload.
const FILE_PART: &str = "file";

/// POST `/file/static` — store the `file` part, answer with its location.
pub async fn upload_static(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        if field.name() != Some(FILE_PART) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(AppError::bad_request("[file] part is not a file"));
        };
        let content_type = field.content_type().map(str::to_string);

        if state.policy.denied(&file_name, content_type.as_deref()) {
            warn!("rejected upload `{}` ({:?})", file_name, content_type);
            return Err(AppError::forbidden(format!(
                "uploading `{}` is not allowed",
                file_name
            )));
        }

        let content = field.map_err(io::Error::other);
        let location = state
            .storage
            .save_part(FilePart::new(file_name, content_type, content))
            .await?;
        info!("stored upload at {}", location);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        return Ok((StatusCode::OK, headers, location));
    }

    Err(AppError::bad_request("missing [file] part"))
}

/// GET `/file/display/{bucket}/{file_id}` — serve a stored file inline.
pub async fn display(
    State(state): State<AppState>,
    Path((bucket, file_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.get_file(&bucket, &file_id).await?;
    debug!(
        "displaying {}/{} ({} bytes)",
        meta.bucket, meta.file_id, meta.file_size
    );

    let mut response = Response::new(Body::empty());
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.bytes.len()));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&meta.file_type)),
    );
    let disposition = format!("inline; filename*=UTF-8''{}", encode_rfc5987(&meta.file_name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.body_mut() = Body::from(meta.bytes);
    *response.status_mut() = StatusCode::OK;

    Ok(response)
}

/// Media type served for a file extension (with or without the dot).
pub fn content_type_for(file_type: &str) -> &'static str {
    match file_type.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Percent-encode everything outside RFC 5987 `attr-char`.
fn encode_rfc5987(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_for("pdf"), "application/pdf");
        assert_eq!(content_type_for(".PNG"), "image/png");
        assert_eq!(content_type_for("unknown"), "application/octet-stream");
    }

    #[test]
    fn test_rfc5987_encoding() {
        assert_eq!(encode_rfc5987("report.pdf"), "report.pdf");
        assert_eq!(encode_rfc5987("my file.txt"), "my%20file.txt");
        assert_eq!(encode_rfc5987("résumé.pdf"), "r%C3%A9sum%C3%A9.pdf");
        assert_eq!(encode_rfc5987("a\"b;c"), "a%22b%3Bc");
    }
}
