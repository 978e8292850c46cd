use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState};

#[derive(Debug, Serialize)]
pub struct HomeData {
    pub greeting: String,
    pub clinic_name: String,
    pub shortcuts: Vec<Shortcut>,
    pub today: TodayCounts,
}

#[derive(Debug, Serialize)]
pub struct Shortcut {
    pub key: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub method: &'static str,
    pub path: &'static str,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TodayCounts {
    /// Everything on today's date except cancellations.
    pub total: i64,
    pub pending: i64,
}

const SHORTCUTS: [Shortcut; 2] = [
    Shortcut {
        key: "new_appointment",
        title: "New appointment",
        description: "Book a return visit for a patient",
        method: "POST",
        path: "/api/v1/appointments",
    },
    Shortcut {
        key: "agenda",
        title: "Agenda",
        description: "Search and manage booked appointments",
        method: "GET",
        path: "/api/v1/appointments",
    },
];

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

pub async fn home(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<HomeData>>, ApiError> {
    let today = state.clinic_today();

    let counts: TodayCounts = sqlx::query_as::<_, TodayCounts>(
        r#"
        SELECT
          COUNT(*) FILTER (WHERE status <> 'cancelled') AS total,
          COUNT(*) FILTER (WHERE status IN ('scheduled', 'rescheduled')) AS pending
        FROM appointment
        WHERE scheduled_date = $1
        "#,
    )
    .bind(today)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(ApiOk {
        data: HomeData {
            greeting: format!("Hello, {}", auth.display_name),
            clinic_name: state.clinic_name.clone(),
            shortcuts: SHORTCUTS.into_iter().collect(),
            today: counts,
        },
    }))
}
