//! Agenda search, filtering and grouping over one fetched date range.
//! Linear scans; the list is one clinic's appointments for a month or so.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};

use super::{intake::digits_only, status::StatusFilter, Appointment};

#[derive(Debug, Clone, Default)]
pub struct AgendaFilter {
    pub text: String,
    pub status: StatusFilter,
}

impl AgendaFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        self.status.matches(a.status) && matches_text(a, &self.text)
    }

    pub fn apply(&self, items: Vec<Appointment>) -> Vec<Appointment> {
        items.into_iter().filter(|a| self.matches(a)).collect()
    }
}

/// Case-insensitive match on patient name, phone (as typed or digits only)
/// and visit number. An empty query matches everything.
pub fn matches_text(a: &Appointment, query: &str) -> bool {
    let term = query.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }

    if a.patient_name.to_lowercase().contains(&term) {
        return true;
    }

    if a.patient_phone.contains(&term) {
        return true;
    }
    let term_digits = digits_only(&term);
    if !term_digits.is_empty() && digits_only(&a.patient_phone).contains(&term_digits) {
        return true;
    }

    a.visit_number
        .as_deref()
        .is_some_and(|v| v.to_lowercase().contains(&term))
}

/// Buckets items by calendar date, dates ascending, input order kept inside a day.
pub fn group_by_date<T>(
    items: impl IntoIterator<Item = T>,
    date_of: impl Fn(&T) -> NaiveDate,
) -> Vec<(NaiveDate, Vec<T>)> {
    let mut groups: BTreeMap<NaiveDate, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(date_of(&item)).or_default().push(item);
    }
    groups.into_iter().collect()
}

pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "today".to_string()
    } else if date == today + Duration::days(1) {
        "tomorrow".to_string()
    } else {
        date.format("%A, %-d %B").to_string()
    }
}

/// Default agenda window: today through the end of the current month.
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let (y, m) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    let end = NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(today);
    (today, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::status::AppointmentStatus;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn appt(name: &str, phone: &str, visit: Option<&str>, status: AppointmentStatus) -> Appointment {
        Appointment {
            appointment_id: Uuid::new_v4(),
            scheduled_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            scheduled_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            visit_number: visit.map(str::to_string),
            patient_name: name.into(),
            patient_phone: phone.into(),
            notes: String::new(),
            procedures: vec![],
            status,
            attachments: vec![],
            practitioner_id: None,
        }
    }

    #[test]
    fn name_match_ignores_case() {
        let a = appt("Maria da Silva", "(67) 99123-4567", None, AppointmentStatus::Scheduled);
        assert!(matches_text(&a, "maria"));
        assert!(matches_text(&a, "SILVA"));
        assert!(!matches_text(&a, "joao"));
    }

    #[test]
    fn phone_digits_match_across_formatting() {
        let a = appt("Ana", "(67) 99123-4567", None, AppointmentStatus::Scheduled);
        assert!(matches_text(&a, "991234567"));
        assert!(matches_text(&a, "99123-45"));
        assert!(matches_text(&a, "67 9912"));
        assert!(matches_text(&a, "(67)"));
        assert!(!matches_text(&a, "5555"));
    }

    #[test]
    fn visit_number_match() {
        let a = appt("Ana", "(67) 3321-0000", Some("204518"), AppointmentStatus::Scheduled);
        assert!(matches_text(&a, "4518"));
        let b = appt("Ana", "(67) 3321-0000", None, AppointmentStatus::Scheduled);
        assert!(!matches_text(&b, "4518"));
    }

    #[test]
    fn empty_query_matches_all() {
        let a = appt("Ana", "", None, AppointmentStatus::Completed);
        assert!(matches_text(&a, ""));
        assert!(matches_text(&a, "   "));
    }

    #[test]
    fn filter_intersects_text_and_status() {
        let items = vec![
            appt("Ana", "(67) 1111-1111", None, AppointmentStatus::Scheduled),
            appt("Ana Paula", "(67) 2222-2222", None, AppointmentStatus::Completed),
            appt("Bruno", "(67) 3333-3333", None, AppointmentStatus::Rescheduled),
        ];
        let f = AgendaFilter {
            text: "ana".into(),
            status: StatusFilter::Pending,
        };
        let out = f.apply(items.clone());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].patient_name, "Ana");

        let all = AgendaFilter {
            text: String::new(),
            status: StatusFilter::All,
        };
        assert_eq!(all.apply(items).len(), 3);
    }

    #[test]
    fn groups_by_date_in_order() {
        let mut a = appt("A", "", None, AppointmentStatus::Scheduled);
        let mut b = appt("B", "", None, AppointmentStatus::Scheduled);
        let c = appt("C", "", None, AppointmentStatus::Scheduled);
        a.scheduled_date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        b.scheduled_date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();

        let groups = group_by_date(vec![a, c, b], |x| x.scheduled_date);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(groups[0].1[0].patient_name, "C");
        let names: Vec<_> = groups[1].1.iter().map(|x| x.patient_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn labels() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(day_label(today, today), "today");
        assert_eq!(day_label(today.succ_opt().unwrap(), today), "tomorrow");
        assert_eq!(
            day_label(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(), today),
            "Friday, 14 March"
        );
    }

    #[test]
    fn default_range_ends_with_month() {
        let (s, e) = default_range(NaiveDate::from_ymd_opt(2025, 2, 10).unwrap());
        assert_eq!(s, NaiveDate::from_ymd_opt(2025, 2, 10).unwrap());
        assert_eq!(e, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        let (_, e) = default_range(NaiveDate::from_ymd_opt(2025, 12, 3).unwrap());
        assert_eq!(e, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }
}
