use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

use crate::{
    error::ApiError,
    scheduling::{Appointment, Attachment, status::AppointmentStatus},
    storage::AttachmentStore,
};

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub login_email_domain: String,
    pub clinic_name: String,
    pub clinic_offset: FixedOffset,
    pub store: Arc<dyn AttachmentStore>,
    pub max_attachment_bytes: usize,
}

impl AppState {
    /// Wall-clock time at the clinic.
    pub fn clinic_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.clinic_offset).naive_local()
    }

    pub fn clinic_today(&self) -> NaiveDate {
        self.clinic_now().date()
    }
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email, or a bare username that gets the organisation domain.
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub is_active: bool,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Column list matching `AppointmentRow`.
pub const APPOINTMENT_COLUMNS: &str = r#"
    appointment_id,
    scheduled_date,
    scheduled_time,
    visit_number,
    patient_name,
    patient_phone,
    notes,
    procedures,
    status,
    attachments,
    practitioner_id
"#;

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub visit_number: Option<String>,
    pub patient_name: String,
    pub patient_phone: String,
    pub notes: String,
    pub procedures: Vec<String>,
    pub status: String,
    pub attachments: Json<Vec<Attachment>>,
    pub practitioner_id: Option<Uuid>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = ApiError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        let status: AppointmentStatus = r
            .status
            .parse()
            .map_err(|e| ApiError::Internal(format!("row decode error: {e}")))?;

        Ok(Appointment {
            appointment_id: r.appointment_id,
            scheduled_date: r.scheduled_date,
            scheduled_time: r.scheduled_time,
            visit_number: r.visit_number,
            patient_name: r.patient_name,
            patient_phone: r.patient_phone,
            notes: r.notes,
            procedures: r.procedures,
            status,
            attachments: r.attachments.0,
            practitioner_id: r.practitioner_id,
        })
    }
}
