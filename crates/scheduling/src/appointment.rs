use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bookwell_auth::Actor;
use bookwell_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use bookwell_events::Event;

use crate::slot::Slot;
use crate::transitions::{TransitionActor, TransitionDecision, check_transition, resolve_actor};
use crate::AppointmentError;

const MAX_NOTES_LEN: usize = 2_000;

/// Appointment identifier (stream key).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(pub AggregateId);

impl AppointmentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for AppointmentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Whether the appointment still occupies the provider's calendar.
    pub fn holds_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentKind {
    Remote,
    InPerson,
}

/// Aggregate root: Appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    id: AppointmentId,
    requester_id: Option<UserId>,
    provider_id: Option<UserId>,
    scheduled_at: DateTime<Utc>,
    duration_minutes: u32,
    kind: AppointmentKind,
    status: AppointmentStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    created: bool,
    purged: bool,
}

impl Appointment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: AppointmentId) -> Self {
        Self {
            id,
            requester_id: None,
            provider_id: None,
            scheduled_at: DateTime::<Utc>::UNIX_EPOCH,
            duration_minutes: 0,
            kind: AppointmentKind::Remote,
            status: AppointmentStatus::Pending,
            notes: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
            purged: false,
        }
    }

    pub fn id_typed(&self) -> AppointmentId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created && !self.purged
    }

    pub fn requester_id(&self) -> Option<UserId> {
        self.requester_id
    }

    pub fn provider_id(&self) -> Option<UserId> {
        self.provider_id
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn kind(&self) -> AppointmentKind {
        self.kind
    }

    pub fn status(&self) -> AppointmentStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn slot(&self) -> Slot {
        Slot {
            start: self.scheduled_at,
            duration_minutes: self.duration_minutes,
        }
    }

    /// Capacity in which `actor` relates to this appointment, if any.
    pub fn actor_capacity(&self, actor: &Actor) -> Option<TransitionActor> {
        match (self.requester_id, self.provider_id) {
            (Some(requester), Some(provider)) if self.exists() => resolve_actor(actor, requester, provider),
            _ if actor.is_operator() => Some(TransitionActor::Operator),
            _ => None,
        }
    }
}

impl AggregateRoot for Appointment {
    type Id = AppointmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestAppointment (created in `pending`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAppointment {
    pub appointment_id: AppointmentId,
    pub requester_id: UserId,
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionAppointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAppointment {
    pub appointment_id: AppointmentId,
    pub actor: Actor,
    pub to: AppointmentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PurgeAppointment (operator hard delete, outside the table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeAppointment {
    pub appointment_id: AppointmentId,
    pub actor: Actor,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentCommand {
    Request(RequestAppointment),
    Transition(TransitionAppointment),
    Purge(PurgeAppointment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequested {
    pub appointment_id: AppointmentId,
    pub requester_id: UserId,
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentTransitioned {
    pub appointment_id: AppointmentId,
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub actor_role: TransitionActor,
    pub actor_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentPurged {
    pub appointment_id: AppointmentId,
    pub status_at_purge: AppointmentStatus,
    pub purged_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentEvent {
    Requested(AppointmentRequested),
    Transitioned(AppointmentTransitioned),
    Purged(AppointmentPurged),
}

impl Event for AppointmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AppointmentEvent::Requested(_) => "scheduling.appointment.requested",
            AppointmentEvent::Transitioned(_) => "scheduling.appointment.transitioned",
            AppointmentEvent::Purged(_) => "scheduling.appointment.purged",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AppointmentEvent::Requested(e) => e.occurred_at,
            AppointmentEvent::Transitioned(e) => e.occurred_at,
            AppointmentEvent::Purged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Appointment {
    type Command = AppointmentCommand;
    type Event = AppointmentEvent;
    type Error = AppointmentError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AppointmentEvent::Requested(e) => {
                self.id = e.appointment_id;
                self.requester_id = Some(e.requester_id);
                self.provider_id = Some(e.provider_id);
                self.scheduled_at = e.scheduled_at;
                self.duration_minutes = e.duration_minutes;
                self.kind = e.kind;
                self.status = AppointmentStatus::Pending;
                self.notes = e.notes.clone();
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.created = true;
            }
            AppointmentEvent::Transitioned(e) => {
                self.status = e.to;
                self.updated_at = e.occurred_at;
            }
            AppointmentEvent::Purged(e) => {
                self.purged = true;
                self.updated_at = e.occurred_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AppointmentCommand::Request(cmd) => self.handle_request(cmd),
            AppointmentCommand::Transition(cmd) => self.handle_transition(cmd),
            AppointmentCommand::Purge(cmd) => self.handle_purge(cmd),
        }
    }
}

impl Appointment {
    fn ensure_appointment_id(&self, id: AppointmentId) -> Result<(), DomainError> {
        if self.id != id {
            return Err(DomainError::invariant("appointment_id mismatch"));
        }
        Ok(())
    }

    /// Missing appointments are only reported as such to operators.
    fn missing_for(actor: &Actor) -> AppointmentError {
        if actor.is_operator() {
            DomainError::not_found().into()
        } else {
            AppointmentError::NotAuthorized
        }
    }

    fn handle_request(&self, cmd: &RequestAppointment) -> Result<Vec<AppointmentEvent>, AppointmentError> {
        if self.created {
            return Err(DomainError::conflict("appointment already exists").into());
        }
        self.ensure_appointment_id(cmd.appointment_id)?;

        if cmd.duration_minutes == 0 {
            return Err(DomainError::validation("duration_minutes must be positive").into());
        }
        if cmd.requester_id == cmd.provider_id {
            return Err(DomainError::validation("requester and provider must differ").into());
        }

        let notes = cmd
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
            return Err(DomainError::validation("notes are too long").into());
        }

        Ok(vec![AppointmentEvent::Requested(AppointmentRequested {
            appointment_id: cmd.appointment_id,
            requester_id: cmd.requester_id,
            provider_id: cmd.provider_id,
            scheduled_at: cmd.scheduled_at,
            duration_minutes: cmd.duration_minutes,
            kind: cmd.kind,
            notes,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionAppointment,
    ) -> Result<Vec<AppointmentEvent>, AppointmentError> {
        if !self.exists() {
            return Err(Self::missing_for(&cmd.actor));
        }
        self.ensure_appointment_id(cmd.appointment_id)?;

        let capacity = self
            .actor_capacity(&cmd.actor)
            .ok_or(AppointmentError::NotAuthorized)?;

        match check_transition(capacity, self.status, cmd.to)? {
            TransitionDecision::AlreadyApplied => Ok(vec![]),
            TransitionDecision::Apply => Ok(vec![AppointmentEvent::Transitioned(AppointmentTransitioned {
                appointment_id: self.id,
                from: self.status,
                to: cmd.to,
                actor_role: capacity,
                actor_id: cmd.actor.user_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_purge(&self, cmd: &PurgeAppointment) -> Result<Vec<AppointmentEvent>, AppointmentError> {
        if !cmd.actor.is_operator() {
            return Err(AppointmentError::NotAuthorized);
        }
        if !self.exists() {
            return Err(DomainError::not_found().into());
        }
        self.ensure_appointment_id(cmd.appointment_id)?;

        Ok(vec![AppointmentEvent::Purged(AppointmentPurged {
            appointment_id: self.id,
            status_at_purge: self.status,
            purged_by: cmd.actor.user_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
