//! Appointment status vocabulary and the transitions allowed between statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Rescheduled,
    Completed,
    ForwardedToOutpatient,
    ReturnedToUrgentCare,
    DidNotRespond,
    Cancelled,
}

pub const ALL_STATUSES: [AppointmentStatus; 7] = [
    AppointmentStatus::Scheduled,
    AppointmentStatus::Rescheduled,
    AppointmentStatus::Completed,
    AppointmentStatus::ForwardedToOutpatient,
    AppointmentStatus::ReturnedToUrgentCare,
    AppointmentStatus::DidNotRespond,
    AppointmentStatus::Cancelled,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("appointment is {0} and can no longer change")]
    Closed(AppointmentStatus),
    #[error("cannot move an appointment from {from} to {to}")]
    NotAllowed {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("use the reschedule action to pick a new date and time")]
    UseReschedule,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown appointment status: {0}")]
pub struct UnknownStatus(pub String);

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::ForwardedToOutpatient => "forwarded_to_outpatient",
            AppointmentStatus::ReturnedToUrgentCare => "returned_to_urgent_care",
            AppointmentStatus::DidNotRespond => "did_not_respond",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, forwarded, returned and cancelled appointments are final:
    /// no edit, no reschedule, no further status change.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::ForwardedToOutpatient
                | AppointmentStatus::ReturnedToUrgentCare
                | AppointmentStatus::Cancelled
        )
    }

    /// Statuses that occupy their (date, time) slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled)
    }

    /// Statuses reachable through the plain status-update action.
    /// `Rescheduled` is left out: it is only entered through a reschedule.
    pub fn next_statuses(self) -> Vec<AppointmentStatus> {
        if self.is_closed() {
            return vec![];
        }
        [
            AppointmentStatus::Completed,
            AppointmentStatus::ForwardedToOutpatient,
            AppointmentStatus::ReturnedToUrgentCare,
            AppointmentStatus::DidNotRespond,
            AppointmentStatus::Cancelled,
        ]
        .into_iter()
        .filter(|s| *s != self)
        .collect()
    }

    pub fn can_reschedule(self) -> bool {
        !self.is_closed()
    }

    pub fn can_edit(self) -> bool {
        !self.is_closed()
    }

    pub fn validate_transition(self, to: AppointmentStatus) -> Result<(), TransitionError> {
        if self.is_closed() {
            return Err(TransitionError::Closed(self));
        }
        if to == AppointmentStatus::Rescheduled {
            return Err(TransitionError::UseReschedule);
        }
        if !self.next_statuses().contains(&to) {
            return Err(TransitionError::NotAllowed { from: self, to });
        }
        Ok(())
    }

    pub fn validate_reschedule(self) -> Result<(), TransitionError> {
        if self.can_reschedule() {
            Ok(())
        } else {
            Err(TransitionError::Closed(self))
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    /// Accepts the current names and the words written by older clients.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_lowercase().as_str() {
            "scheduled" | "agendado" => AppointmentStatus::Scheduled,
            "rescheduled" | "reagendado" => AppointmentStatus::Rescheduled,
            "completed" | "realizado" | "finalizado" => AppointmentStatus::Completed,
            "forwarded_to_outpatient" | "encaminhado" => AppointmentStatus::ForwardedToOutpatient,
            "returned_to_urgent_care" | "retornou" => AppointmentStatus::ReturnedToUrgentCare,
            "did_not_respond" | "nao_respondeu" => AppointmentStatus::DidNotRespond,
            "cancelled" | "canceled" | "cancelado" => AppointmentStatus::Cancelled,
            _ => return Err(UnknownStatus(s.to_string())),
        };
        Ok(status)
    }
}

/// Agenda status filter. `Pending` is the view when no filter is sent; an
/// empty `status=` is the "all statuses" choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Pending,
    All,
    Exact(AppointmentStatus),
}

impl StatusFilter {
    pub fn matches(self, status: AppointmentStatus) -> bool {
        match self {
            StatusFilter::Pending => status.holds_slot(),
            StatusFilter::All => true,
            StatusFilter::Exact(s) => s == status,
        }
    }

    /// `None` when the query has no `status` parameter at all.
    pub fn from_query(raw: Option<&str>) -> Result<Self, UnknownStatus> {
        raw.map(str::parse::<StatusFilter>).transpose().map(Option::unwrap_or_default)
    }

    /// Cancelled rows are only fetched when asked for by name.
    pub fn includes_cancelled(self) -> bool {
        self == StatusFilter::Exact(AppointmentStatus::Cancelled)
    }
}

impl FromStr for StatusFilter {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(StatusFilter::Pending),
            "" | "all" => Ok(StatusFilter::All),
            other => other.parse().map(StatusFilter::Exact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_statuses_have_no_way_out() {
        for from in ALL_STATUSES.into_iter().filter(|s| s.is_closed()) {
            for to in ALL_STATUSES {
                assert_eq!(
                    from.validate_transition(to),
                    Err(TransitionError::Closed(from))
                );
            }
            assert!(from.validate_reschedule().is_err());
            assert!(!from.can_edit());
        }
    }

    #[test]
    fn open_statuses_accept_outcomes() {
        for from in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Rescheduled,
            AppointmentStatus::DidNotRespond,
        ] {
            assert!(from.validate_transition(AppointmentStatus::Completed).is_ok());
            assert!(from.validate_transition(AppointmentStatus::Cancelled).is_ok());
            assert!(from.validate_transition(AppointmentStatus::ForwardedToOutpatient).is_ok());
            assert!(from.validate_reschedule().is_ok());
        }
    }

    #[test]
    fn rescheduled_only_through_reschedule_action() {
        assert_eq!(
            AppointmentStatus::Scheduled.validate_transition(AppointmentStatus::Rescheduled),
            Err(TransitionError::UseReschedule)
        );
    }

    #[test]
    fn self_transitions_are_rejected() {
        assert!(matches!(
            AppointmentStatus::Scheduled.validate_transition(AppointmentStatus::Scheduled),
            Err(TransitionError::NotAllowed { .. })
        ));
        assert!(matches!(
            AppointmentStatus::DidNotRespond.validate_transition(AppointmentStatus::DidNotRespond),
            Err(TransitionError::NotAllowed { .. })
        ));
    }

    #[test]
    fn parses_current_and_legacy_words() {
        assert_eq!("scheduled".parse(), Ok(AppointmentStatus::Scheduled));
        assert_eq!("Agendado".parse(), Ok(AppointmentStatus::Scheduled));
        assert_eq!("realizado".parse(), Ok(AppointmentStatus::Completed));
        assert_eq!("finalizado".parse(), Ok(AppointmentStatus::Completed));
        assert_eq!("cancelado".parse(), Ok(AppointmentStatus::Cancelled));
        assert!("archived".parse::<AppointmentStatus>().is_err());

        for s in ALL_STATUSES {
            assert_eq!(s.as_str().parse(), Ok(s));
        }
    }

    #[test]
    fn pending_filter_is_scheduled_and_rescheduled() {
        let f = StatusFilter::default();
        assert_eq!(f, StatusFilter::Pending);
        let matched: Vec<_> = ALL_STATUSES.into_iter().filter(|s| f.matches(*s)).collect();
        assert_eq!(
            matched,
            vec![AppointmentStatus::Scheduled, AppointmentStatus::Rescheduled]
        );
        assert!(!f.matches(AppointmentStatus::Completed));
        assert!(!f.matches(AppointmentStatus::Cancelled));
    }

    #[test]
    fn filter_parsing() {
        assert_eq!("pending".parse(), Ok(StatusFilter::Pending));
        assert_eq!("".parse(), Ok(StatusFilter::All));
        assert_eq!("ALL".parse(), Ok(StatusFilter::All));
        assert_eq!(
            "completed".parse(),
            Ok(StatusFilter::Exact(AppointmentStatus::Completed))
        );
        assert!(StatusFilter::Exact(AppointmentStatus::Cancelled).includes_cancelled());
        assert!(!StatusFilter::All.includes_cancelled());
    }

    #[test]
    fn missing_filter_is_pending_but_empty_filter_is_all() {
        assert_eq!(StatusFilter::from_query(None), Ok(StatusFilter::Pending));
        assert_eq!(StatusFilter::from_query(Some("")), Ok(StatusFilter::All));
        assert_eq!(StatusFilter::from_query(Some("  ")), Ok(StatusFilter::All));
        assert_eq!(
            StatusFilter::from_query(Some("agendado")),
            Ok(StatusFilter::Exact(AppointmentStatus::Scheduled))
        );
        assert!(StatusFilter::from_query(Some("bogus")).is_err());
    }
}
