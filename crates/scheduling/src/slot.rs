//! Slot & conflict checking.
//!
//! Windows are half-open: `[start, start + duration)`. Back-to-back
//! appointments do not conflict.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use bookwell_core::{DomainError, UserId};

use crate::{AppointmentError, AppointmentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, duration_minutes: u32) -> Result<Self, DomainError> {
        if duration_minutes == 0 {
            return Err(DomainError::validation("duration_minutes must be positive"));
        }
        Ok(Self {
            start,
            duration_minutes,
        })
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A slot held by an active (pending or confirmed) appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedSlot {
    pub appointment_id: AppointmentId,
    pub slot: Slot,
}

/// Range of *start* times that can possibly overlap `candidate`, given the
/// longest active duration on the calendar.
pub fn lookup_window(candidate: &Slot, max_duration_minutes: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        candidate.start - Duration::minutes(i64::from(max_duration_minutes)),
        candidate.end(),
    )
}

/// First booked slot overlapping `candidate`, in iteration order.
pub fn find_conflict<'a, I>(candidate: &Slot, booked: I) -> Option<AppointmentId>
where
    I: IntoIterator<Item = &'a BookedSlot>,
{
    booked
        .into_iter()
        .find(|b| b.slot.overlaps(candidate))
        .map(|b| b.appointment_id)
}

/// Read access to a provider's active calendar.
pub trait CalendarSource {
    /// Active slots whose start lies within `[from, to]`.
    fn active_slots(&self, provider_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<BookedSlot>;

    /// Longest duration among the provider's active slots (0 when none).
    fn longest_active_duration(&self, provider_id: UserId) -> u32;
}

impl<C: CalendarSource + ?Sized> CalendarSource for &C {
    fn active_slots(&self, provider_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<BookedSlot> {
        (**self).active_slots(provider_id, from, to)
    }

    fn longest_active_duration(&self, provider_id: UserId) -> u32 {
        (**self).longest_active_duration(provider_id)
    }
}

impl<C: CalendarSource + ?Sized> CalendarSource for std::sync::Arc<C> {
    fn active_slots(&self, provider_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<BookedSlot> {
        (**self).active_slots(provider_id, from, to)
    }

    fn longest_active_duration(&self, provider_id: UserId) -> u32 {
        (**self).longest_active_duration(provider_id)
    }
}

#[derive(Debug, Clone)]
pub struct SlotChecker<C> {
    calendar: C,
}

impl<C: CalendarSource> SlotChecker<C> {
    pub fn new(calendar: C) -> Self {
        Self { calendar }
    }

    /// `Ok(())` when the provider is free for the whole candidate window.
    ///
    /// Direction-agnostic: past candidates are checked the same way.
    pub fn check(&self, provider_id: UserId, candidate: &Slot) -> Result<(), AppointmentError> {
        let max = self.calendar.longest_active_duration(provider_id);
        let (from, to) = lookup_window(candidate, max);
        let booked = self.calendar.active_slots(provider_id, from, to);

        match find_conflict(candidate, &booked) {
            None => Ok(()),
            Some(conflicting) => {
                tracing::debug!(%provider_id, %conflicting, start = %candidate.start, "slot conflict");
                Err(AppointmentError::SlotConflict { conflicting })
            }
        }
    }
}
