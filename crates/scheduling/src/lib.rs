//! `bookwell-scheduling` - appointment lifecycle, slot conflicts and the
//! booking wizard. Pure domain: no IO, no clocks (callers pass `occurred_at`
//! and `today`).

pub mod appointment;
pub mod error;
pub mod schedule;
pub mod slot;
pub mod transitions;
pub mod wizard;

pub use appointment::{
    Appointment, AppointmentCommand, AppointmentEvent, AppointmentId, AppointmentKind,
    AppointmentPurged, AppointmentRequested, AppointmentStatus, AppointmentTransitioned,
    PurgeAppointment, RequestAppointment, TransitionAppointment,
};
pub use error::AppointmentError;
pub use schedule::{
    ProviderSchedule, ProviderScheduleId, ReleaseSlot, ReserveSlot, ScheduleCommand, ScheduleEvent, SlotReleased,
    SlotReserved,
};
pub use slot::{BookedSlot, CalendarSource, Slot, SlotChecker, find_conflict, lookup_window};
pub use transitions::{
    AppointmentCapabilities, TRANSITIONS, TransitionActor, TransitionDecision, TransitionRule,
    check_transition, resolve_actor,
};
pub use wizard::{
    BookingBackend, BookingError, BookingRequest, BookingWizard, SubmitOutcome, WizardError,
    WizardStep,
};
