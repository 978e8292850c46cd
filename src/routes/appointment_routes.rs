// src/routes/appointment_routes.rs

use std::collections::HashSet;

use axum::{
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{
    db::is_unique_violation,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentRow, APPOINTMENT_COLUMNS},
    routes::attachment_routes::{discard_stored, read_appointment_upload, store_all},
    scheduling::{
        agenda::{self, AgendaFilter},
        availability::{self, hhmm, SlotDto, SlotError},
        intake::{self, FieldErrors},
        status::{AppointmentStatus, StatusFilter, ALL_STATUSES},
        Appointment, Attachment,
    },
};

/// Name of the partial unique index guarding (date, time).
const SLOT_INDEX: &str = "appointment_slot_uniq";
const MAX_RANGE_DAYS: i64 = 366;
/// Country prefix for WhatsApp links built from local numbers.
const WHATSAPP_COUNTRY_CODE: &str = "55";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/availability", get(get_availability))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(patch_appointment),
        )
        .route("/appointments/{appointment_id}/status", post(update_status))
        .route("/appointments/{appointment_id}/complete", post(mark_completed))
        .route("/appointments/{appointment_id}/cancel", post(mark_cancelled))
        .route("/appointments/{appointment_id}/reschedule", post(reschedule_appointment))
}

/* ============================================================
   Response DTOs
   ============================================================ */

#[derive(Debug, Serialize)]
pub struct AppointmentActionsDto {
    pub can_edit: bool,
    pub can_reschedule: bool,
    pub can_cancel: bool,
    pub next_statuses: Vec<AppointmentStatus>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentDto {
    pub appointment_id: Uuid,
    pub scheduled_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub scheduled_time: NaiveTime,
    pub visit_number: Option<String>,
    pub patient_name: String,
    pub patient_phone: String,
    pub whatsapp_url: Option<String>,
    pub notes: String,
    pub procedures: Vec<String>,
    pub status: AppointmentStatus,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practitioner_id: Option<Uuid>,
    pub actions: AppointmentActionsDto,
}

impl From<Appointment> for AppointmentDto {
    fn from(a: Appointment) -> Self {
        let next_statuses = a.status.next_statuses();
        let digits = intake::digits_only(&a.patient_phone);
        AppointmentDto {
            appointment_id: a.appointment_id,
            scheduled_date: a.scheduled_date,
            scheduled_time: a.scheduled_time,
            visit_number: a.visit_number,
            whatsapp_url: (!digits.is_empty())
                .then(|| format!("https://wa.me/{WHATSAPP_COUNTRY_CODE}{digits}")),
            patient_name: a.patient_name,
            patient_phone: a.patient_phone,
            notes: a.notes,
            procedures: a.procedures,
            status: a.status,
            attachments: a.attachments,
            practitioner_id: a.practitioner_id,
            actions: AppointmentActionsDto {
                can_edit: a.status.can_edit(),
                can_reschedule: a.status.can_reschedule(),
                can_cancel: next_statuses.contains(&AppointmentStatus::Cancelled),
                next_statuses,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DayGroupDto {
    pub date: NaiveDate,
    pub label: String,
    pub appointments: Vec<AppointmentDto>,
}

#[derive(Debug, Serialize)]
pub struct AgendaDto {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total: usize,
    pub days: Vec<DayGroupDto>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityDto {
    pub date: NaiveDate,
    pub interval_minutes: u32,
    pub slots: Vec<SlotDto>,
}

/* ============================================================
   Query params / bodies
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct AgendaQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub q: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub interval_minutes: Option<u32>,
    /// Appointment being rescheduled; its own slot does not count as taken.
    pub exclude: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub reason: Option<String>,
}

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Only called when the field is present: null => Some(None), value => Some(Some(v)).
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchAppointmentRequest {
    pub patient_name: Option<String>,
    pub patient_phone: Option<String>,
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub visit_number: Option<Option<String>>,
    pub procedures: Option<Vec<String>>,
}

/* ============================================================
   Shared queries
   ============================================================ */

fn slot_holding_statuses() -> Vec<String> {
    ALL_STATUSES
        .into_iter()
        .filter(|s| s.holds_slot())
        .map(|s| s.as_str().to_string())
        .collect()
}

async fn fetch_appointment<'e, E>(
    executor: E,
    appointment_id: Uuid,
    for_update: bool,
) -> Result<Appointment, ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE appointment_id = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(executor)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(ApiError::appointment_not_found)?;
    Appointment::try_from(row)
}

/// Times already held on `date`, optionally ignoring one appointment.
async fn booked_times<'e, E>(
    executor: E,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> Result<HashSet<NaiveTime>, ApiError>
where
    E: sqlx::PgExecutor<'e>,
{
    let times: Vec<NaiveTime> = sqlx::query_scalar(
        r#"
        SELECT scheduled_time
        FROM appointment
        WHERE scheduled_date = $1
          AND status = ANY($2)
          AND ($3::uuid IS NULL OR appointment_id <> $3)
        "#,
    )
    .bind(date)
    .bind(slot_holding_statuses())
    .bind(exclude)
    .fetch_all(executor)
    .await
    .map_err(ApiError::db)?;

    Ok(times.into_iter().map(availability::truncate_to_minute).collect())
}

fn interval_error(e: SlotError) -> ApiError {
    ApiError::from_slot(e, "date", "interval_minutes")
}

fn map_write_error(e: sqlx::Error) -> ApiError {
    if is_unique_violation(&e, SLOT_INDEX) {
        tracing::info!("slot taken by a concurrent booking");
        ApiError::slot_taken()
    } else {
        ApiError::db(e)
    }
}

/* ============================================================
   GET /appointments  (agenda)
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AgendaQuery>,
) -> Result<Json<ApiOk<AgendaDto>>, ApiError> {
    let today = state.clinic_today();
    let (default_start, default_end) = agenda::default_range(today);
    let start = q.start.unwrap_or(default_start);
    let end = q.end.unwrap_or(default_end);

    if end < start {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "end must not be before start".into(),
        ));
    }
    if (end - start) > Duration::days(MAX_RANGE_DAYS) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            format!("date range must not exceed {MAX_RANGE_DAYS} days"),
        ));
    }

    let status = StatusFilter::from_query(q.status.as_deref())
        .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", format!("{e}")))?;

    let sql = format!(
        r#"
        SELECT {APPOINTMENT_COLUMNS}
        FROM appointment
        WHERE scheduled_date >= $1
          AND scheduled_date <= $2
          AND ($3 OR status <> 'cancelled')
        ORDER BY scheduled_date ASC, scheduled_time ASC
        "#
    );
    let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(start)
        .bind(end)
        .bind(status.includes_cancelled())
        .fetch_all(&state.db)
        .await
        .map_err(ApiError::db)?;

    let items = rows
        .into_iter()
        .map(Appointment::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let filter = AgendaFilter {
        text: q.q.unwrap_or_default(),
        status,
    };
    let matched = filter.apply(items);
    let total = matched.len();

    let days = agenda::group_by_date(matched, |a| a.scheduled_date)
        .into_iter()
        .map(|(date, items)| DayGroupDto {
            date,
            label: agenda::day_label(date, today),
            appointments: items.into_iter().map(AppointmentDto::from).collect(),
        })
        .collect();

    Ok(Json(ApiOk {
        data: AgendaDto {
            start,
            end,
            total,
            days,
        },
    }))
}

/* ============================================================
   GET /appointments/availability
   ============================================================ */

pub async fn get_availability(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AvailabilityQuery>,
) -> Result<Json<ApiOk<AvailabilityDto>>, ApiError> {
    let interval = q
        .interval_minutes
        .unwrap_or(availability::NEW_APPOINTMENT_INTERVAL_MIN);
    availability::validate_interval(interval).map_err(interval_error)?;

    let booked = booked_times(&state.db, q.date, q.exclude).await?;
    let slots = availability::day_slots(q.date, interval, &booked, state.clinic_now())
        .map_err(interval_error)?;

    Ok(Json(ApiOk {
        data: AvailabilityDto {
            date: q.date,
            interval_minutes: interval,
            slots,
        },
    }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let appointment = fetch_appointment(&state.db, appointment_id, false).await?;
    Ok(Json(ApiOk {
        data: appointment.into(),
    }))
}

/* ============================================================
   POST /appointments (create, multipart)
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    multipart: Multipart,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let upload = read_appointment_upload(multipart, state.max_attachment_bytes).await?;
    let form = upload.form.ok_or_else(|| {
        ApiError::BadRequest(
            "VALIDATION_ERROR",
            "multipart part `appointment` (JSON) is required".into(),
        )
    })?;
    let new = form.validate().map_err(ApiError::Validation)?;

    // Best-effort pre-check; the unique index decides on write.
    let booked = booked_times(&state.db, new.scheduled_date, None).await?;
    availability::check_slot(
        new.scheduled_date,
        new.scheduled_time,
        &booked,
        state.clinic_now(),
    )
    .map_err(|e| ApiError::from_slot(e, "scheduled_date", "scheduled_time"))?;

    let attachments = store_all(state.store.as_ref(), upload.files).await?;

    let procedures: Vec<String> = new.procedures.iter().map(|p| p.as_str().to_string()).collect();
    let inserted = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        INSERT INTO appointment (
          scheduled_date,
          scheduled_time,
          visit_number,
          patient_name,
          patient_phone,
          notes,
          procedures,
          status,
          attachments,
          created_by_user_id,
          updated_by_user_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(new.scheduled_date)
    .bind(new.scheduled_time)
    .bind(&new.visit_number)
    .bind(&new.patient_name)
    .bind(&new.patient_phone)
    .bind(&new.notes)
    .bind(&procedures)
    .bind(AppointmentStatus::Scheduled.as_str())
    .bind(sqlx::types::Json(&attachments))
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            discard_stored(state.store.as_ref(), &attachments).await;
            return Err(map_write_error(e));
        }
    };

    let appointment = Appointment::try_from(row)?;
    tracing::info!(
        appointment_id = %appointment.appointment_id,
        date = %appointment.scheduled_date,
        time = %appointment.scheduled_time.format("%H:%M"),
        attachments = appointment.attachments.len(),
        "appointment created"
    );

    Ok(Json(ApiOk {
        data: appointment.into(),
    }))
}

/* ============================================================
   PATCH /appointments/{id}  (edit patient / metadata)
   ============================================================ */

pub async fn patch_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<PatchAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let mut current = fetch_appointment(&mut *tx, appointment_id, true).await?;

    if !current.status.can_edit() {
        return Err(ApiError::Conflict(
            "APPOINTMENT_CLOSED",
            format!("appointment is {} and can no longer be edited", current.status),
        ));
    }

    apply_patch(&mut current, req).map_err(ApiError::Validation)?;

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET
          patient_name = $2,
          patient_phone = $3,
          notes = $4,
          visit_number = $5,
          procedures = $6,
          updated_at = now(),
          updated_by_user_id = $7
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(&current.patient_name)
    .bind(&current.patient_phone)
    .bind(&current.notes)
    .bind(&current.visit_number)
    .bind(&current.procedures)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    tracing::info!(%appointment_id, "appointment edited");

    Ok(Json(ApiOk {
        data: Appointment::try_from(row)?.into(),
    }))
}

/// Merges the present fields into `a`, validating each like the intake form.
fn apply_patch(a: &mut Appointment, req: PatchAppointmentRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();

    if let Some(name) = req.patient_name {
        a.patient_name = intake::validate_patient_name(&name, &mut errors);
    }
    if let Some(phone) = req.patient_phone {
        a.patient_phone = intake::validate_phone(&phone, &mut errors);
    }
    if let Some(notes) = req.notes {
        a.notes = notes.trim_end().to_string();
    }
    if let Some(visit) = req.visit_number {
        a.visit_number = intake::validate_visit_number(visit.as_deref(), &mut errors);
    }
    if let Some(procedures) = req.procedures {
        a.procedures = intake::validate_procedures(&procedures, &mut errors)
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect();
    }

    errors.into_result()
}

/* ============================================================
   Status transitions
   ============================================================ */

async fn transition(
    state: &AppState,
    auth: &AuthContext,
    appointment_id: Uuid,
    to: AppointmentStatus,
) -> Result<Appointment, ApiError> {
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let current = fetch_appointment(&mut *tx, appointment_id, true).await?;

    if let Err(e) = current.status.validate_transition(to) {
        tracing::warn!(%appointment_id, from = %current.status, %to, "status change rejected");
        return Err(e.into());
    }

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET status = $2,
            updated_at = now(),
            updated_by_user_id = $3
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(to.as_str())
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;
    tracing::info!(%appointment_id, from = %current.status, %to, "status changed");

    Appointment::try_from(row)
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let to: AppointmentStatus = req
        .status
        .parse()
        .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", format!("{e}")))?;
    let updated = transition(&state, &auth, appointment_id, to).await?;
    Ok(Json(ApiOk {
        data: updated.into(),
    }))
}

pub async fn mark_completed(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let updated = transition(&state, &auth, appointment_id, AppointmentStatus::Completed).await?;
    Ok(Json(ApiOk {
        data: updated.into(),
    }))
}

pub async fn mark_cancelled(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let updated = transition(&state, &auth, appointment_id, AppointmentStatus::Cancelled).await?;
    Ok(Json(ApiOk {
        data: updated.into(),
    }))
}

/* ============================================================
   POST /appointments/{id}/reschedule
   ============================================================ */

pub async fn reschedule_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<ApiOk<AppointmentDto>>, ApiError> {
    let now = state.clinic_now();

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let current = fetch_appointment(&mut *tx, appointment_id, true).await?;
    current.status.validate_reschedule()?;

    let booked = booked_times(&mut *tx, req.date, Some(appointment_id)).await?;
    availability::check_slot(req.date, req.time, &booked, now)
        .map_err(|e| ApiError::from_slot(e, "date", "time"))?;

    let note = intake::reschedule_note(now.date(), req.reason.as_deref());
    let notes = intake::append_note(&current.notes, &note);

    let row = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        UPDATE appointment
        SET scheduled_date = $2,
            scheduled_time = $3,
            status = $4,
            notes = $5,
            updated_at = now(),
            updated_by_user_id = $6
        WHERE appointment_id = $1
        RETURNING {APPOINTMENT_COLUMNS}
        "#
    ))
    .bind(appointment_id)
    .bind(req.date)
    .bind(req.time)
    .bind(AppointmentStatus::Rescheduled.as_str())
    .bind(&notes)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_write_error)?;

    tx.commit().await.map_err(map_write_error)?;
    tracing::info!(
        %appointment_id,
        from_date = %current.scheduled_date,
        to_date = %req.date,
        to_time = %req.time.format("%H:%M"),
        "appointment rescheduled"
    );

    Ok(Json(ApiOk {
        data: Appointment::try_from(row)?.into(),
    }))
}
