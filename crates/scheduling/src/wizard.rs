//! Booking wizard controller.
//!
//! Three gated steps (date, then time and duration, then kind and notes)
//! collapse into a single creation request. Rendering is someone else's job;
//! this type only owns the selection state and the submit protocol.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bookwell_core::UserId;

use crate::{AppointmentId, AppointmentKind, Slot};

/// Durations offered by the wizard. Other positive values are still accepted
/// by the lifecycle manager directly.
pub const OFFERED_DURATIONS: [u32; 4] = [30, 45, 60, 90];

const FIRST_START_HOUR: u32 = 8;
const LAST_START_HOUR: u32 = 17;
const GRID_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Date,
    TimeAndDuration,
    Details,
    Submitted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub requester_id: UserId,
    pub provider_id: UserId,
    pub scheduled_at: chrono::DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub notes: Option<String>,
}

impl BookingRequest {
    pub fn slot(&self) -> Slot {
        Slot {
            start: self.scheduled_at,
            duration_minutes: self.duration_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("slot conflicts with appointment {conflicting}")]
    SlotConflict { conflicting: AppointmentId },

    #[error("booking rejected: {0}")]
    Rejected(String),
}

/// Collaborator the wizard submits through.
pub trait BookingBackend {
    /// Advisory conflict check.
    fn preflight(&self, provider_id: UserId, slot: &Slot) -> Result<(), BookingError>;

    /// Authoritative creation (re-checks the slot under the provider lock).
    fn create(&self, request: &BookingRequest) -> Result<AppointmentId, BookingError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WizardError {
    #[error("{0} cannot be booked")]
    DateUnavailable(NaiveDate),

    #[error("{0} is not an available start time")]
    TimeUnavailable(NaiveTime),

    #[error("duration of {0} minutes is not offered")]
    UnsupportedDuration(u32),

    #[error("step {0:?} is incomplete")]
    IncompleteStep(WizardStep),

    #[error("action belongs to step {expected:?}, wizard is at {actual:?}")]
    WrongStep { expected: WizardStep, actual: WizardStep },

    #[error(transparent)]
    Backend(BookingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Booked(AppointmentId),
    /// Sent back to step 2; the time was marked unavailable and cleared.
    SlotTaken { conflicting: AppointmentId },
}

#[derive(Debug, Clone)]
pub struct BookingWizard {
    requester_id: UserId,
    provider_id: UserId,
    today: NaiveDate,
    step: WizardStep,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    duration_minutes: Option<u32>,
    kind: Option<AppointmentKind>,
    notes: Option<String>,
    unavailable: BTreeSet<NaiveDateTime>,
    booked: Option<AppointmentId>,
}

impl BookingWizard {
    pub fn new(requester_id: UserId, provider_id: UserId, today: NaiveDate) -> Self {
        Self {
            requester_id,
            provider_id,
            today,
            step: WizardStep::Date,
            date: None,
            time: None,
            duration_minutes: None,
            kind: None,
            notes: None,
            unavailable: BTreeSet::new(),
            booked: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn booked(&self) -> Option<AppointmentId> {
        self.booked
    }

    pub fn selected_time(&self) -> Option<NaiveTime> {
        self.time
    }

    /// Calendar affordance: past dates and Sundays are not selectable.
    pub fn is_date_selectable(&self, date: NaiveDate) -> bool {
        date >= self.today && date.weekday() != Weekday::Sun
    }

    /// Start times offered for the selected date, minus those marked unavailable.
    pub fn available_times(&self) -> Vec<NaiveTime> {
        let Some(date) = self.date else {
            return Vec::new();
        };
        time_grid()
            .filter(|t| !self.unavailable.contains(&date.and_time(*t)))
            .collect()
    }

    fn expect_step(&self, expected: WizardStep) -> Result<(), WizardError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(WizardError::WrongStep {
                expected,
                actual: self.step,
            })
        }
    }

    pub fn select_date(&mut self, date: NaiveDate) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Date)?;
        if !self.is_date_selectable(date) {
            return Err(WizardError::DateUnavailable(date));
        }
        if self.date != Some(date) {
            self.time = None;
        }
        self.date = Some(date);
        Ok(())
    }

    pub fn select_time(&mut self, time: NaiveTime) -> Result<(), WizardError> {
        self.expect_step(WizardStep::TimeAndDuration)?;
        if !self.available_times().contains(&time) {
            return Err(WizardError::TimeUnavailable(time));
        }
        self.time = Some(time);
        Ok(())
    }

    pub fn select_duration(&mut self, minutes: u32) -> Result<(), WizardError> {
        self.expect_step(WizardStep::TimeAndDuration)?;
        if !OFFERED_DURATIONS.contains(&minutes) {
            return Err(WizardError::UnsupportedDuration(minutes));
        }
        self.duration_minutes = Some(minutes);
        Ok(())
    }

    pub fn select_kind(&mut self, kind: AppointmentKind) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Details)?;
        self.kind = Some(kind);
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Option<String>) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Details)?;
        self.notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        Ok(())
    }

    /// Whether the "next" (or, on the last step, "submit") control is enabled.
    pub fn can_advance(&self) -> bool {
        match self.step {
            WizardStep::Date => self.date.is_some(),
            WizardStep::TimeAndDuration => self.time.is_some() && self.duration_minutes.is_some(),
            WizardStep::Details => self.kind.is_some(),
            WizardStep::Submitted => false,
        }
    }

    pub fn advance(&mut self) -> Result<WizardStep, WizardError> {
        if !self.can_advance() {
            return Err(WizardError::IncompleteStep(self.step));
        }
        self.step = match self.step {
            WizardStep::Date => WizardStep::TimeAndDuration,
            WizardStep::TimeAndDuration => WizardStep::Details,
            // submit() is the only way forward from here
            WizardStep::Details | WizardStep::Submitted => return Err(WizardError::IncompleteStep(self.step)),
        };
        Ok(self.step)
    }

    pub fn back(&mut self) -> WizardStep {
        self.step = match self.step {
            WizardStep::Date | WizardStep::TimeAndDuration => WizardStep::Date,
            WizardStep::Details => WizardStep::TimeAndDuration,
            WizardStep::Submitted => WizardStep::Submitted,
        };
        self.step
    }

    /// Assemble the creation request. Only complete at step 3 with a kind.
    pub fn request(&self) -> Result<BookingRequest, WizardError> {
        self.expect_step(WizardStep::Details)?;
        let (Some(date), Some(time), Some(duration_minutes), Some(kind)) =
            (self.date, self.time, self.duration_minutes, self.kind)
        else {
            return Err(WizardError::IncompleteStep(self.step));
        };

        Ok(BookingRequest {
            requester_id: self.requester_id,
            provider_id: self.provider_id,
            scheduled_at: Utc.from_utc_datetime(&date.and_time(time)),
            duration_minutes,
            kind,
            notes: self.notes.clone(),
        })
    }

    /// One pre-flight, then (only if it passes) one creation call.
    pub fn submit<B: BookingBackend + ?Sized>(&mut self, backend: &B) -> Result<SubmitOutcome, WizardError> {
        let request = self.request()?;

        let created = backend
            .preflight(request.provider_id, &request.slot())
            .and_then(|()| backend.create(&request));

        match created {
            Ok(id) => {
                self.booked = Some(id);
                self.step = WizardStep::Submitted;
                Ok(SubmitOutcome::Booked(id))
            }
            Err(BookingError::SlotConflict { conflicting }) => {
                self.unavailable.insert(request.scheduled_at.naive_utc());
                self.time = None;
                self.step = WizardStep::TimeAndDuration;
                Ok(SubmitOutcome::SlotTaken { conflicting })
            }
            Err(e) => Err(WizardError::Backend(e)),
        }
    }
}

fn time_grid() -> impl Iterator<Item = NaiveTime> {
    (FIRST_START_HOUR * 60..=LAST_START_HOUR * 60 + GRID_MINUTES)
        .step_by(GRID_MINUTES as usize)
        .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        preflights: Cell<u32>,
        creates: Cell<u32>,
        preflight_conflict: Option<AppointmentId>,
        create_conflict: Option<AppointmentId>,
        last_request: RefCell<Option<BookingRequest>>,
    }

    impl BookingBackend for CountingBackend {
        fn preflight(&self, _provider_id: UserId, _slot: &Slot) -> Result<(), BookingError> {
            self.preflights.set(self.preflights.get() + 1);
            match self.preflight_conflict {
                Some(conflicting) => Err(BookingError::SlotConflict { conflicting }),
                None => Ok(()),
            }
        }

        fn create(&self, request: &BookingRequest) -> Result<AppointmentId, BookingError> {
            self.creates.set(self.creates.get() + 1);
            *self.last_request.borrow_mut() = Some(request.clone());
            match self.create_conflict {
                Some(conflicting) => Err(BookingError::SlotConflict { conflicting }),
                None => Ok(AppointmentId::generate()),
            }
        }
    }

    // 2030-06-03 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, 3).unwrap()
    }

    fn ten() -> NaiveTime {
        NaiveTime::from_hms_opt(10, 0, 0).unwrap()
    }

    fn wizard_at_details() -> BookingWizard {
        let mut w = BookingWizard::new(UserId::new(), UserId::new(), monday());
        w.select_date(monday()).unwrap();
        w.advance().unwrap();
        w.select_time(ten()).unwrap();
        w.select_duration(60).unwrap();
        w.advance().unwrap();
        w
    }

    #[test]
    fn rejects_past_dates_and_sundays() {
        let mut w = BookingWizard::new(UserId::new(), UserId::new(), monday());
        let yesterday = monday().pred_opt().unwrap();
        let sunday = NaiveDate::from_ymd_opt(2030, 6, 9).unwrap();

        assert_eq!(w.select_date(yesterday), Err(WizardError::DateUnavailable(yesterday)));
        assert_eq!(w.select_date(sunday), Err(WizardError::DateUnavailable(sunday)));
        assert!(w.select_date(monday()).is_ok());
    }

    #[test]
    fn cannot_skip_ahead_with_missing_fields() {
        let mut w = BookingWizard::new(UserId::new(), UserId::new(), monday());
        assert_eq!(w.advance(), Err(WizardError::IncompleteStep(WizardStep::Date)));

        w.select_date(monday()).unwrap();
        w.advance().unwrap();
        w.select_time(ten()).unwrap();
        assert!(!w.can_advance());
        assert_eq!(w.select_duration(50), Err(WizardError::UnsupportedDuration(50)));
        w.select_duration(45).unwrap();
        assert_eq!(w.advance(), Ok(WizardStep::Details));
    }

    #[test]
    fn submit_requires_kind() {
        let mut w = wizard_at_details();
        let backend = CountingBackend::default();
        assert_eq!(
            w.submit(&backend),
            Err(WizardError::IncompleteStep(WizardStep::Details))
        );
        assert_eq!(backend.preflights.get(), 0);
    }

    #[test]
    fn successful_submit_calls_each_collaborator_once() {
        let mut w = wizard_at_details();
        w.select_kind(AppointmentKind::InPerson).unwrap();
        w.set_notes(Some("  ".into())).unwrap();
        let backend = CountingBackend::default();

        let outcome = w.submit(&backend).unwrap();

        assert!(matches!(outcome, SubmitOutcome::Booked(_)));
        assert_eq!(w.step(), WizardStep::Submitted);
        assert_eq!((backend.preflights.get(), backend.creates.get()), (1, 1));
        let sent = backend.last_request.borrow().clone().unwrap();
        assert_eq!(sent.scheduled_at, Utc.with_ymd_and_hms(2030, 6, 3, 10, 0, 0).unwrap());
        assert_eq!(sent.notes, None);
    }

    #[test]
    fn preflight_conflict_returns_to_time_step_without_creating() {
        let mut w = wizard_at_details();
        w.select_kind(AppointmentKind::Remote).unwrap();
        let taken = AppointmentId::generate();
        let backend = CountingBackend {
            preflight_conflict: Some(taken),
            ..Default::default()
        };

        let outcome = w.submit(&backend).unwrap();

        assert_eq!(outcome, SubmitOutcome::SlotTaken { conflicting: taken });
        assert_eq!(backend.creates.get(), 0);
        assert_eq!(w.step(), WizardStep::TimeAndDuration);
        assert_eq!(w.selected_time(), None);
        assert!(!w.available_times().contains(&ten()));
        assert_eq!(w.select_time(ten()), Err(WizardError::TimeUnavailable(ten())));
    }

    #[test]
    fn lost_race_at_creation_is_handled_like_preflight_conflict() {
        let mut w = wizard_at_details();
        w.select_kind(AppointmentKind::Remote).unwrap();
        let backend = CountingBackend {
            create_conflict: Some(AppointmentId::generate()),
            ..Default::default()
        };

        assert!(matches!(w.submit(&backend), Ok(SubmitOutcome::SlotTaken { .. })));
        assert_eq!((backend.preflights.get(), backend.creates.get()), (1, 1));
        assert_eq!(w.step(), WizardStep::TimeAndDuration);
    }

    #[test]
    fn grid_covers_business_hours() {
        let times: Vec<_> = time_grid().collect();
        assert_eq!(times.first(), Some(&NaiveTime::from_hms_opt(8, 0, 0).unwrap()));
        assert_eq!(times.last(), Some(&NaiveTime::from_hms_opt(17, 30, 0).unwrap()));
        assert_eq!(times.len(), 20);
    }
}
