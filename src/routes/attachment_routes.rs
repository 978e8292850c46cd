// src/routes/attachment_routes.rs

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use futures_util::future::join_all;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentRow, APPOINTMENT_COLUMNS},
    routes::appointment_routes::AppointmentDto,
    scheduling::{
        intake::{is_allowed_attachment, AppointmentForm, MAX_ATTACHMENTS},
        status::TransitionError,
        Appointment, Attachment,
    },
    storage::AttachmentStore,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/appointments/{appointment_id}/attachments", post(add_attachments))
}

#[derive(Debug)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// The parts of an appointment multipart body.
#[derive(Debug, Default)]
pub struct AppointmentUpload {
    /// The `appointment` part, when sent.
    pub form: Option<AppointmentForm>,
    pub files: Vec<UploadedFile>,
}

fn too_many_attachments() -> ApiError {
    ApiError::Conflict(
        "TOO_MANY_ATTACHMENTS",
        format!("at most {MAX_ATTACHMENTS} attachments per appointment"),
    )
}

fn bad_multipart(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("request body too large".into())
    } else {
        ApiError::BadRequest("INVALID_MULTIPART", e.body_text())
    }
}

pub fn check_file(file: &UploadedFile, max_bytes: usize) -> Result<(), ApiError> {
    if file.bytes.is_empty() {
        return Err(ApiError::BadRequest(
            "EMPTY_ATTACHMENT",
            format!("{} is empty", file.name),
        ));
    }
    if file.bytes.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "{} is larger than {} MB",
            file.name,
            max_bytes / (1024 * 1024)
        )));
    }
    if !is_allowed_attachment(&file.name, file.content_type.as_deref()) {
        return Err(ApiError::BadRequest(
            "UNSUPPORTED_ATTACHMENT",
            format!("{}: only PDF or image files are accepted", file.name),
        ));
    }
    Ok(())
}

/// Reads an `appointment` JSON part and any number of `attachment` parts.
pub async fn read_appointment_upload(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<AppointmentUpload, ApiError> {
    let mut upload = AppointmentUpload::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let part = field.name().unwrap_or("").to_string();
        match part.as_str() {
            "appointment" => {
                let text = field.text().await.map_err(bad_multipart)?;
                let form = serde_json::from_str::<AppointmentForm>(&text).map_err(|e| {
                    ApiError::BadRequest("VALIDATION_ERROR", format!("invalid appointment JSON: {e}"))
                })?;
                upload.form = Some(form);
            }
            "attachment" => {
                if upload.files.len() == MAX_ATTACHMENTS {
                    return Err(too_many_attachments());
                }
                let name = field.file_name().unwrap_or("attachment").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                let file = UploadedFile {
                    name,
                    content_type,
                    bytes,
                };
                check_file(&file, max_bytes)?;
                upload.files.push(file);
            }
            other => {
                tracing::debug!(part = other, "ignoring unknown multipart part");
            }
        }
    }

    Ok(upload)
}

/// Uploads all files concurrently. If any upload fails, the ones that made it
/// are deleted again.
pub async fn store_all(
    store: &dyn AttachmentStore,
    files: Vec<UploadedFile>,
) -> Result<Vec<Attachment>, ApiError> {
    let results = join_all(files.iter().map(|f| store.put(&f.name, &f.bytes))).await;

    let mut stored = Vec::with_capacity(results.len());
    let mut failure = None;
    for r in results {
        match r {
            Ok(att) => stored.push(att),
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
    }

    if let Some(e) = failure {
        tracing::error!(error = %e, stored = stored.len(), "attachment upload failed");
        discard_stored(store, &stored).await;
        return Err(ApiError::Internal("attachment upload failed".into()));
    }
    Ok(stored)
}

pub async fn discard_stored(store: &dyn AttachmentStore, attachments: &[Attachment]) {
    for key in attachments.iter().filter_map(|a| a.key.as_deref()) {
        if let Err(e) = store.delete(key).await {
            tracing::warn!(%key, error = %e, "could not remove orphaned attachment");
        }
    }
}

/* ============================================================
   POST /appointments/{id}/attachments
   ============================================================ */

pub async fn add_attachments(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let upload = read_appointment_upload(multipart, state.max_attachment_bytes).await?;
    if upload.files.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "at least one `attachment` part is required".into(),
        ));
    }

    let stored = store_all(state.store.as_ref(), upload.files).await?;

    match append_attachments(&state, &auth, appointment_id, &stored).await {
        Ok(appointment) => {
            tracing::info!(%appointment_id, added = stored.len(), "attachments added");
            Ok(Json(ApiOk {
                data: appointment.into(),
            }))
        }
        Err(e) => {
            discard_stored(state.store.as_ref(), &stored).await;
            Err(e)
        }
    }
}

async fn append_attachments(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    new: &[Attachment],
) -> Result<Appointment, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1 FOR UPDATE"
    ))
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::appointment_not_found)?;
    let current = Appointment::try_from(row)?;

    if !current.status.can_edit() {
        return Err(TransitionError::Closed(current.status).into());
    }
    if current.attachments.len() + new.len() > MAX_ATTACHMENTS {
        return Err(too_many_attachments());
    }

    let mut attachments = current.attachments;
    attachments.extend_from_slice(new);

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET attachments = $2,
            updated_at = now(),
            updated_by_user_id = $3
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(sqlx::types::Json(&attachments))
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    Appointment::try_from(row)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::StorageError;

    fn file(name: &str, ct: Option<&str>, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            name: name.into(),
            content_type: ct.map(str::to_string),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn file_checks() {
        assert!(check_file(&file("a.pdf", None, b"%PDF"), 10).is_ok());
        assert!(matches!(
            check_file(&file("a.pdf", None, b""), 10),
            Err(ApiError::BadRequest("EMPTY_ATTACHMENT", _))
        ));
        assert!(matches!(
            check_file(&file("a.pdf", None, b"0123456789ab"), 10),
            Err(ApiError::PayloadTooLarge(_))
        ));
        assert!(matches!(
            check_file(&file("a.exe", Some("application/octet-stream"), b"MZ"), 10),
            Err(ApiError::BadRequest("UNSUPPORTED_ATTACHMENT", _))
        ));
    }

    /// Fails every put whose name starts with "bad", records deletes.
    #[derive(Default)]
    struct FlakyStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AttachmentStore for FlakyStore {
        async fn put(&self, original_name: &str, _bytes: &[u8]) -> Result<Attachment, StorageError> {
            if original_name.starts_with("bad") {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            Ok(Attachment {
                name: original_name.into(),
                url: format!("http://files/{original_name}"),
                key: Some(format!("key-{original_name}")),
            })
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.deleted.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_all_keeps_everything_on_success() {
        let store = FlakyStore::default();
        let out = store_all(
            &store,
            vec![file("a.pdf", None, b"1"), file("b.png", None, b"2")],
        )
        .await
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(store.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_failure_cleans_up_stored_objects() {
        let store = FlakyStore::default();
        let err = store_all(
            &store,
            vec![
                file("a.pdf", None, b"1"),
                file("bad.pdf", None, b"2"),
                file("c.jpg", None, b"3"),
            ],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));

        let mut deleted = store.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["key-a.pdf", "key-c.jpg"]);
    }
}
