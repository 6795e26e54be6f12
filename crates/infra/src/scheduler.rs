//! Appointment service: the lifecycle manager wired to storage.
//!
//! A booking first reserves its slot on the provider's schedule stream and
//! only then writes the appointment stream. The reservation append expects
//! the schedule revision the overlap check ran against, so instances sharing
//! one event store cannot both reserve overlapping slots. Within a process a
//! per-provider lock keeps writers from tripping over each other.
//!
//! Slots are released on the schedule when an appointment is cancelled,
//! completed or purged. A reservation left behind by a finished appointment
//! (a failed release) is reclaimed the next time it blocks a booking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::instrument;

use bookwell_auth::Actor;
use bookwell_core::{Aggregate, UserId};
use bookwell_events::{EventBus, EventEnvelope};
use bookwell_scheduling::{
    Appointment, AppointmentCapabilities, AppointmentCommand, AppointmentError, AppointmentEvent, AppointmentId,
    AppointmentKind, AppointmentStatus, BookingBackend, BookingError, BookingRequest, ProviderSchedule,
    ProviderScheduleId, PurgeAppointment, ReleaseSlot, RequestAppointment, ReserveSlot, ScheduleCommand, Slot,
    TransitionActor, TransitionAppointment,
};

use crate::audit::{self, AuditLog, AuditRecord};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::CoreError;
use crate::event_store::{EventStore, StoredEvent};
use crate::locks::KeyedLocks;
use crate::projections::{APPOINTMENT_AGGREGATE, AppointmentReadModel, AppointmentsProjection};
use crate::read_model::InMemoryKeyedStore;

pub type AppointmentReadStore = InMemoryKeyedStore<AppointmentId, AppointmentReadModel>;

pub const PROVIDER_SCHEDULE_AGGREGATE: &str = "scheduling.provider_schedule";

/// Appends to one schedule stream before a lost race surfaces as
/// `ConcurrentModification`.
const SCHEDULE_ATTEMPTS: usize = 3;

/// Input for a new appointment; the requester is the acting identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppointment {
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub appointment: AppointmentReadModel,
    /// `false` when the target status was already applied.
    pub changed: bool,
}

pub struct AppointmentService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    appointments: AppointmentsProjection<AppointmentReadStore>,
    locks: KeyedLocks<UserId>,
    audit: Arc<dyn AuditLog>,
}

impl<S, B> AppointmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            dispatcher,
            appointments: AppointmentsProjection::new(InMemoryKeyedStore::new()),
            locks: KeyedLocks::new(),
            audit,
        }
    }

    /// The provider's schedule as currently stored.
    pub fn schedule(&self, provider_id: UserId) -> Result<ProviderSchedule, CoreError> {
        Ok(self
            .dispatcher
            .load(ProviderScheduleId::for_provider(provider_id).0, |_| {
                ProviderSchedule::empty(provider_id)
            })?)
    }

    /// Advisory pre-flight check; creation repeats it when reserving.
    pub fn check_slot(&self, provider_id: UserId, scheduled_at: DateTime<Utc>, duration_minutes: u32) -> Result<(), CoreError> {
        let slot = Slot::new(scheduled_at, duration_minutes)?;
        Ok(self.schedule(provider_id)?.check(&slot)?)
    }

    #[instrument(skip(self, new), fields(requester_id = %actor.user_id, provider_id = %new.provider_id))]
    pub fn request(&self, actor: &Actor, new: NewAppointment) -> Result<AppointmentReadModel, CoreError> {
        if actor.is_operator() {
            return Err(CoreError::NotAuthorized);
        }
        let slot = Slot::new(new.scheduled_at, new.duration_minutes)?;
        let appointment_id = AppointmentId::generate();

        let command = AppointmentCommand::Request(RequestAppointment {
            appointment_id,
            requester_id: actor.user_id,
            provider_id: new.provider_id,
            scheduled_at: new.scheduled_at,
            duration_minutes: new.duration_minutes,
            kind: new.kind,
            notes: new.notes,
            occurred_at: Utc::now(),
        });

        // Reject malformed requests before touching the schedule.
        Appointment::empty(appointment_id).handle(&command)?;

        self.locks.with_lock(&new.provider_id, || {
            self.reserve(new.provider_id, appointment_id, slot)?;
            let committed = match self.dispatch(appointment_id, command) {
                Ok(committed) => committed,
                Err(e) => {
                    self.release_quietly(new.provider_id, appointment_id);
                    return Err(e);
                }
            };
            self.apply_committed(&committed);
            Ok::<_, CoreError>(())
        })?;

        tracing::info!(%appointment_id, scheduled_at = %new.scheduled_at, "appointment requested");
        self.read_model(appointment_id)
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id), err)]
    pub fn transition(
        &self,
        actor: &Actor,
        appointment_id: AppointmentId,
        to: AppointmentStatus,
    ) -> Result<TransitionOutcome, CoreError> {
        let provider_id = self.provider_of(actor, appointment_id)?;

        let committed = self.locks.with_lock(&provider_id, || {
            let committed = self.dispatch(
                appointment_id,
                AppointmentCommand::Transition(TransitionAppointment {
                    appointment_id,
                    actor: *actor,
                    to,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.apply_committed(&committed);
            if !committed.is_empty() && !to.holds_slot() {
                self.release_quietly(provider_id, appointment_id);
            }
            Ok::<_, CoreError>(committed)
        })?;

        let changed = !committed.is_empty();
        if changed {
            tracing::info!(%appointment_id, %to, "appointment transitioned");
        }
        Ok(TransitionOutcome {
            appointment: self.read_model(appointment_id)?,
            changed,
        })
    }

    /// Operator hard delete, outside the transition table.
    #[instrument(skip(self, reason), fields(actor_id = %actor.user_id), err)]
    pub fn purge(&self, actor: &Actor, appointment_id: AppointmentId, reason: Option<String>) -> Result<(), CoreError> {
        if !actor.is_operator() {
            return Err(CoreError::NotAuthorized);
        }
        let provider_id = self.provider_of(actor, appointment_id)?;

        self.locks.with_lock(&provider_id, || {
            let committed = self.dispatch(
                appointment_id,
                AppointmentCommand::Purge(PurgeAppointment {
                    appointment_id,
                    actor: *actor,
                    reason,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.apply_committed(&committed);
            self.release_quietly(provider_id, appointment_id);
            Ok::<_, CoreError>(())
        })?;

        tracing::info!(%appointment_id, "appointment purged");
        Ok(())
    }

    /// What `actor` may do next with the appointment.
    pub fn capabilities(&self, actor: &Actor, appointment_id: AppointmentId) -> Result<AppointmentCapabilities, CoreError> {
        let appointment = self.load(appointment_id)?;
        if !appointment.exists() {
            return Err(missing_for(actor));
        }
        let capacity = appointment.actor_capacity(actor).ok_or(CoreError::NotAuthorized)?;
        Ok(AppointmentCapabilities::compute(Some(capacity), appointment.status()))
    }

    /// Participants and operators only. Non-operators never learn whether an
    /// id exists.
    pub fn get(&self, actor: &Actor, appointment_id: AppointmentId) -> Result<AppointmentReadModel, CoreError> {
        match self.appointments.get(&appointment_id) {
            Some(rm) if actor.is_operator() || rm.involves(actor.user_id) => Ok(rm),
            Some(_) => Err(CoreError::NotAuthorized),
            None => Err(missing_for(actor)),
        }
    }

    /// Own appointments ordered by `scheduled_at`; operators see all.
    pub fn list_for(&self, actor: &Actor) -> Vec<AppointmentReadModel> {
        if actor.is_operator() {
            self.appointments.list()
        } else {
            self.appointments.list_for_user(actor.user_id)
        }
    }

    /// `(requester_id, provider_id)` of a live appointment, for fan-out.
    pub fn participants(&self, appointment_id: AppointmentId) -> Option<(UserId, UserId)> {
        self.appointments
            .get(&appointment_id)
            .map(|rm| (rm.requester_id, rm.provider_id))
    }

    /// Rebuild the read model and the audit trail from the event store.
    ///
    /// Schedules need no rebuild: they are always read from their streams.
    pub fn rebuild(&self) -> Result<usize, CoreError> {
        let history = self.dispatcher.store().load_all(APPOINTMENT_AGGREGATE)?;

        self.appointments
            .rebuild_from_scratch(history.iter().map(StoredEvent::to_envelope))
            .map_err(|e| CoreError::Infrastructure(e.to_string()))?;
        for stored in &history {
            if let Some(ev) = decode(stored) {
                self.audit_event(stored, &ev);
            }
        }

        tracing::info!(events = history.len(), "appointment views rebuilt");
        Ok(history.len())
    }

    /// Booking backend that submits as `actor`.
    pub fn booking_for(&self, actor: Actor) -> ActorBooking<'_, S, B> {
        ActorBooking { service: self, actor }
    }

    fn dispatch(&self, appointment_id: AppointmentId, command: AppointmentCommand) -> Result<Vec<StoredEvent>, CoreError> {
        Ok(self
            .dispatcher
            .dispatch(appointment_id.0, APPOINTMENT_AGGREGATE, command, |id| {
                Appointment::empty(AppointmentId::new(id))
            })?)
    }

    /// Append to `provider_id`'s schedule, re-deciding against the fresh
    /// stream when another writer moved it first.
    fn dispatch_schedule(
        &self,
        provider_id: UserId,
        command: ScheduleCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError<AppointmentError>> {
        let stream = ProviderScheduleId::for_provider(provider_id).0;
        let mut attempt = 1;
        loop {
            let outcome = self.dispatcher.dispatch(stream, PROVIDER_SCHEDULE_AGGREGATE, command.clone(), |_| {
                ProviderSchedule::empty(provider_id)
            });
            match outcome {
                Err(DispatchError::Concurrency(msg)) if attempt < SCHEDULE_ATTEMPTS => {
                    tracing::debug!(%provider_id, attempt, %msg, "schedule moved, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn reserve(&self, provider_id: UserId, appointment_id: AppointmentId, slot: Slot) -> Result<(), CoreError> {
        let command = ScheduleCommand::Reserve(ReserveSlot {
            provider_id,
            appointment_id,
            slot,
            occurred_at: Utc::now(),
        });

        match self.dispatch_schedule(provider_id, command.clone()) {
            Err(DispatchError::Rejected(AppointmentError::SlotConflict { conflicting })) if self.is_finished(conflicting) => {
                tracing::warn!(%provider_id, %conflicting, "reclaiming reservation of a finished appointment");
                self.release(provider_id, conflicting)?;
                self.dispatch_schedule(provider_id, command)?;
                Ok(())
            }
            Err(DispatchError::Rejected(AppointmentError::SlotConflict { conflicting })) => {
                tracing::debug!(%provider_id, %conflicting, "slot taken");
                Err(CoreError::SlotConflict {
                    appointment_id: conflicting,
                })
            }
            other => {
                other?;
                Ok(())
            }
        }
    }

    fn release(&self, provider_id: UserId, appointment_id: AppointmentId) -> Result<(), CoreError> {
        self.dispatch_schedule(
            provider_id,
            ScheduleCommand::Release(ReleaseSlot {
                provider_id,
                appointment_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Release after the appointment change is committed; a failure leaves
    /// the reservation to be reclaimed later.
    fn release_quietly(&self, provider_id: UserId, appointment_id: AppointmentId) {
        if let Err(e) = self.release(provider_id, appointment_id) {
            tracing::warn!(%provider_id, %appointment_id, error = %e, "slot reservation not released");
        }
    }

    /// Created, and no longer holding its slot (terminal or purged).
    fn is_finished(&self, appointment_id: AppointmentId) -> bool {
        match self.load(appointment_id) {
            Ok(a) => a.provider_id().is_some() && !(a.exists() && a.status().holds_slot()),
            Err(_) => false,
        }
    }

    fn load(&self, appointment_id: AppointmentId) -> Result<Appointment, CoreError> {
        Ok(self
            .dispatcher
            .load(appointment_id.0, |id| Appointment::empty(AppointmentId::new(id)))?)
    }

    fn provider_of(&self, actor: &Actor, appointment_id: AppointmentId) -> Result<UserId, CoreError> {
        let appointment = self.load(appointment_id)?;
        match appointment.provider_id() {
            Some(provider_id) if appointment.exists() => Ok(provider_id),
            _ => Err(missing_for(actor)),
        }
    }

    fn read_model(&self, appointment_id: AppointmentId) -> Result<AppointmentReadModel, CoreError> {
        self.appointments
            .get(&appointment_id)
            .ok_or_else(|| CoreError::Infrastructure(format!("read model missing for {appointment_id}")))
    }

    /// Feed committed events to the read model and the audit log.
    fn apply_committed(&self, committed: &[StoredEvent]) {
        for stored in committed {
            let Some(ev) = decode(stored) else { continue };

            if let Err(e) = self.appointments.apply_envelope(&stored.to_envelope()) {
                tracing::warn!(event_id = %stored.event_id, error = %e, "appointment read model update failed");
            }
            self.audit_event(stored, &ev);
        }
    }

    /// Operator overrides and purges are audited; everything else is not.
    fn audit_event(&self, stored: &StoredEvent, event: &AppointmentEvent) {
        match event {
            AppointmentEvent::Transitioned(e) if e.actor_role == TransitionActor::Operator => {
                audit::record(&*self.audit, AuditRecord::appointment_transitioned(stored.event_id, e));
            }
            AppointmentEvent::Purged(e) => {
                audit::record(&*self.audit, AuditRecord::appointment_purged(stored.event_id, e));
            }
            _ => {}
        }
    }
}

fn decode(stored: &StoredEvent) -> Option<AppointmentEvent> {
    match serde_json::from_value(stored.payload.clone()) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!(event_id = %stored.event_id, error = %e, "undecodable appointment event");
            None
        }
    }
}

fn missing_for(actor: &Actor) -> CoreError {
    if actor.is_operator() {
        CoreError::NotFound
    } else {
        CoreError::NotAuthorized
    }
}

/// [`BookingBackend`] bound to the identity running the wizard.
pub struct ActorBooking<'a, S, B> {
    service: &'a AppointmentService<S, B>,
    actor: Actor,
}

impl<S, B> BookingBackend for ActorBooking<'_, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn preflight(&self, provider_id: UserId, slot: &Slot) -> Result<(), BookingError> {
        Ok(self
            .service
            .check_slot(provider_id, slot.start, slot.duration_minutes)?)
    }

    fn create(&self, request: &BookingRequest) -> Result<AppointmentId, BookingError> {
        if request.requester_id != self.actor.user_id {
            return Err(BookingError::Rejected("requester does not match the acting identity".to_string()));
        }
        let created = self.service.request(
            &self.actor,
            NewAppointment {
                provider_id: request.provider_id,
                scheduled_at: request.scheduled_at,
                duration_minutes: request.duration_minutes,
                kind: request.kind,
                notes: request.notes.clone(),
            },
        )?;
        Ok(created.appointment_id)
    }
}
