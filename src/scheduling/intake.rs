//! Validation and normalisation of appointment form input.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Shortest accepted phone once masked: `(DD) NNNN-NNNN`.
pub const MIN_PHONE_LEN: usize = 14;
const MAX_PHONE_DIGITS: usize = 11;
pub const MAX_ATTACHMENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Procedure {
    ExamReview,
    LabResults,
    ImagingResults,
    PrescriptionRenewal,
    FollowUp,
}

impl Procedure {
    pub fn as_str(self) -> &'static str {
        match self {
            Procedure::ExamReview => "exam_review",
            Procedure::LabResults => "lab_results",
            Procedure::ImagingResults => "imaging_results",
            Procedure::PrescriptionRenewal => "prescription_renewal",
            Procedure::FollowUp => "follow_up",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exam_review" => Some(Procedure::ExamReview),
            "lab_results" => Some(Procedure::LabResults),
            "imaging_results" => Some(Procedure::ImagingResults),
            "prescription_renewal" => Some(Procedure::PrescriptionRenewal),
            "follow_up" => Some(Procedure::FollowUp),
            _ => None,
        }
    }
}

/// Field name -> message, in the order a form would show them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

pub fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Applies the local phone mask progressively, keeping at most 11 digits:
/// `(67`, `(67) 9912`, `(67) 3321-0000`, `(67) 99123-4567`.
pub fn format_phone(raw: &str) -> String {
    let digits: String = digits_only(raw).chars().take(MAX_PHONE_DIGITS).collect();
    let n = digits.len();
    if n > 10 {
        format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..])
    } else if n > 6 {
        format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..])
    } else if n > 2 {
        format!("({}) {}", &digits[..2], &digits[2..])
    } else if n > 0 {
        format!("({digits}")
    } else {
        String::new()
    }
}

pub fn is_valid_phone(formatted: &str) -> bool {
    formatted.chars().count() >= MIN_PHONE_LEN
}

/// Note appended to `notes` on every reschedule.
pub fn reschedule_note(on: NaiveDate, reason: Option<&str>) -> String {
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("No reason given.");
    format!("\n[Rescheduled on {}]: {}", on.format("%d/%m"), reason)
}

pub fn append_note(existing: &str, note: &str) -> String {
    let mut out = String::with_capacity(existing.len() + note.len());
    out.push_str(existing);
    out.push_str(note);
    out
}

/// The new-appointment form as posted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentForm {
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "super::availability::hhmm::option::deserialize")]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(default)]
    pub visit_number: Option<String>,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub patient_phone: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub procedures: Vec<String>,
}

/// A form that passed validation, with normalised values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub visit_number: Option<String>,
    pub patient_name: String,
    pub patient_phone: String,
    pub notes: String,
    pub procedures: Vec<Procedure>,
}

pub fn validate_patient_name(name: &str, errors: &mut FieldErrors) -> String {
    let name = name.trim();
    if name.is_empty() {
        errors.insert("patient_name", "Patient name is required");
    }
    name.to_string()
}

pub fn validate_phone(raw: &str, errors: &mut FieldErrors) -> String {
    let phone = format_phone(raw);
    if !is_valid_phone(&phone) {
        errors.insert("patient_phone", "Invalid phone number");
    }
    phone
}

pub fn validate_visit_number(raw: Option<&str>, errors: &mut FieldErrors) -> Option<String> {
    let v = raw.map(str::trim).filter(|v| !v.is_empty())?;
    if !v.chars().all(|c| c.is_ascii_digit()) {
        errors.insert("visit_number", "Visit number must contain digits only");
    }
    Some(v.to_string())
}

pub fn validate_procedures(raw: &[String], errors: &mut FieldErrors) -> Vec<Procedure> {
    let mut out = Vec::new();
    for p in raw {
        match Procedure::parse(p.trim()) {
            Some(procedure) if !out.contains(&procedure) => out.push(procedure),
            Some(_) => {}
            None => errors.insert("procedures", format!("Unknown procedure: {p}")),
        }
    }
    out
}

impl AppointmentForm {
    /// Field-level checks only; slot availability is checked against the database.
    pub fn validate(&self) -> Result<NewAppointment, FieldErrors> {
        let mut errors = FieldErrors::default();

        if self.scheduled_date.is_none() {
            errors.insert("scheduled_date", "Date is required");
        }
        if self.scheduled_time.is_none() {
            errors.insert("scheduled_time", "Time is required");
        }
        let patient_name = validate_patient_name(&self.patient_name, &mut errors);
        let patient_phone = validate_phone(&self.patient_phone, &mut errors);
        let visit_number = validate_visit_number(self.visit_number.as_deref(), &mut errors);
        let procedures = validate_procedures(&self.procedures, &mut errors);

        match (self.scheduled_date, self.scheduled_time) {
            (Some(scheduled_date), Some(scheduled_time)) if errors.is_empty() => Ok(NewAppointment {
                scheduled_date,
                scheduled_time,
                visit_number,
                patient_name,
                patient_phone,
                notes: self.notes.trim_end().to_string(),
                procedures,
            }),
            _ => Err(errors),
        }
    }
}

/// Attachment file types accepted at upload (PDF or images).
pub fn is_allowed_attachment(file_name: &str, content_type: Option<&str>) -> bool {
    const EXTENSIONS: [&str; 6] = ["pdf", "png", "jpg", "jpeg", "gif", "webp"];

    let ext_ok = file_name
        .rsplit_once('.')
        .map(|(_, ext)| EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false);
    let mime_ok = content_type.is_some_and(|ct| {
        let ct = ct.to_lowercase();
        ct == "application/pdf" || ct.starts_with("image/")
    });
    ext_ok || mime_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> AppointmentForm {
        AppointmentForm {
            scheduled_date: NaiveDate::from_ymd_opt(2025, 3, 11),
            scheduled_time: NaiveTime::from_hms_opt(10, 30, 0),
            visit_number: Some(" 120034 ".into()),
            patient_name: "  Maria Souza ".into(),
            patient_phone: "67991234567".into(),
            notes: "Post-exam return".into(),
            procedures: vec!["exam_review".into(), "exam_review".into(), "lab_results".into()],
        }
    }

    #[test]
    fn phone_mask_progression() {
        assert_eq!(format_phone(""), "");
        assert_eq!(format_phone("6"), "(6");
        assert_eq!(format_phone("67"), "(67");
        assert_eq!(format_phone("679"), "(67) 9");
        assert_eq!(format_phone("6733210"), "(67) 3321-0");
        assert_eq!(format_phone("6733210000"), "(67) 3321-0000");
        assert_eq!(format_phone("67991234567"), "(67) 99123-4567");
        assert_eq!(format_phone("(67) 99123-4567 ext 9"), "(67) 99123-4567");
    }

    #[test]
    fn phone_minimum_length() {
        assert!(is_valid_phone(&format_phone("6733210000")));
        assert!(!is_valid_phone(&format_phone("673321000")));
    }

    #[test]
    fn valid_form_is_normalised() {
        let ok = form().validate().unwrap();
        assert_eq!(ok.patient_name, "Maria Souza");
        assert_eq!(ok.patient_phone, "(67) 99123-4567");
        assert_eq!(ok.visit_number.as_deref(), Some("120034"));
        assert_eq!(ok.procedures, vec![Procedure::ExamReview, Procedure::LabResults]);
    }

    #[test]
    fn empty_name_blocks_submission() {
        let mut f = form();
        f.patient_name = "   ".into();
        let errs = f.validate().unwrap_err();
        assert_eq!(errs.get("patient_name"), Some("Patient name is required"));
    }

    #[test]
    fn short_phone_blocks_submission() {
        let mut f = form();
        f.patient_phone = "(67) 9912".into();
        let errs = f.validate().unwrap_err();
        assert_eq!(errs.get("patient_phone"), Some("Invalid phone number"));
    }

    #[test]
    fn missing_date_and_time_are_reported_together() {
        let mut f = form();
        f.scheduled_date = None;
        f.scheduled_time = None;
        let errs = f.validate().unwrap_err();
        assert!(errs.get("scheduled_date").is_some());
        assert!(errs.get("scheduled_time").is_some());
    }

    #[test]
    fn unknown_procedure_and_bad_visit_number() {
        let mut f = form();
        f.procedures = vec!["surgery".into()];
        f.visit_number = Some("12a".into());
        let errs = f.validate().unwrap_err();
        assert!(errs.get("procedures").unwrap().contains("surgery"));
        assert!(errs.get("visit_number").is_some());
    }

    #[test]
    fn reschedule_note_appends() {
        let on = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let note = reschedule_note(on, Some("Patient asked to move it"));
        assert_eq!(note, "\n[Rescheduled on 07/03]: Patient asked to move it");
        let notes = append_note("Knee MRI review", &note);
        assert!(notes.starts_with("Knee MRI review"));
        assert!(notes.ends_with("Patient asked to move it"));

        assert_eq!(
            reschedule_note(on, Some("  ")),
            "\n[Rescheduled on 07/03]: No reason given."
        );
    }

    #[test]
    fn attachment_types() {
        assert!(is_allowed_attachment("exam.PDF", None));
        assert!(is_allowed_attachment("scan.jpeg", None));
        assert!(is_allowed_attachment("photo", Some("image/heic")));
        assert!(!is_allowed_attachment("notes.docx", Some("application/msword")));
        assert!(!is_allowed_attachment("noext", None));
    }

    #[test]
    fn form_deserializes_from_json() {
        let f: AppointmentForm = serde_json::from_str(
            r#"{"scheduled_date":"2025-03-11","scheduled_time":"10:30","patient_name":"Ana","patient_phone":"6733210000"}"#,
        )
        .unwrap();
        assert_eq!(f.scheduled_time, NaiveTime::from_hms_opt(10, 30, 0));
        assert!(f.validate().is_ok());

        let empty: AppointmentForm = serde_json::from_str(r#"{"scheduled_time":""}"#).unwrap();
        assert_eq!(empty.scheduled_time, None);
    }
}
