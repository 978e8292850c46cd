//! Appointment domain: status workflow, slot availability, agenda queries
//! and form intake. Nothing in here touches the database.

pub mod agenda;
pub mod availability;
pub mod intake;
pub mod status;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use self::status::AppointmentStatus;

/// A stored file linked to an appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name as uploaded.
    pub name: String,
    /// Public download URL.
    pub url: String,
    /// Storage key; absent on rows imported from the old system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub visit_number: Option<String>,
    pub patient_name: String,
    pub patient_phone: String,
    pub notes: String,
    pub procedures: Vec<String>,
    pub status: AppointmentStatus,
    pub attachments: Vec<Attachment>,
    pub practitioner_id: Option<Uuid>,
}
