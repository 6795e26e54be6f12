//! Provider schedule: the per-provider reservation stream.
//!
//! A booking reserves its slot on the provider's schedule before the
//! appointment stream is written. The overlap check runs against the
//! schedule as rehydrated from its own stream, and the append expects the
//! revision that was checked, so two writers racing for one provider cannot
//! both commit overlapping reservations, whichever process they run in.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use bookwell_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use bookwell_events::Event;

use crate::slot::{BookedSlot, CalendarSource, Slot, SlotChecker};
use crate::{AppointmentError, AppointmentId};

/// Namespace for schedule stream ids. Keeps them apart from streams keyed
/// directly by a user id (operator access).
const SCHEDULE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a0e_9b7d_4c1e_8f3a_5d2b_7c94_e013);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderScheduleId(pub AggregateId);

impl ProviderScheduleId {
    /// Stable stream id for `provider_id`'s schedule.
    pub fn for_provider(provider_id: UserId) -> Self {
        let derived = Uuid::new_v5(&SCHEDULE_NAMESPACE, provider_id.as_uuid().as_bytes());
        Self(AggregateId::from_uuid(derived))
    }
}

/// Slots held by a provider's active appointments.
///
/// Start times are kept ordered so a check only scans the lookup window;
/// durations are a multiset so the longest one shrinks again on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSchedule {
    id: ProviderScheduleId,
    provider_id: UserId,
    held: HashMap<AppointmentId, Slot>,
    by_start: BTreeMap<DateTime<Utc>, Vec<AppointmentId>>,
    durations: BTreeMap<u32, usize>,
    version: u64,
}

impl ProviderSchedule {
    pub fn empty(provider_id: UserId) -> Self {
        Self {
            id: ProviderScheduleId::for_provider(provider_id),
            provider_id,
            held: HashMap::new(),
            by_start: BTreeMap::new(),
            durations: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn provider_id(&self) -> UserId {
        self.provider_id
    }

    pub fn holds(&self, appointment_id: AppointmentId) -> bool {
        self.held.contains_key(&appointment_id)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// `Ok(())` when `candidate` overlaps nothing held.
    pub fn check(&self, candidate: &Slot) -> Result<(), AppointmentError> {
        SlotChecker::new(self).check(self.provider_id, candidate)
    }

    fn hold(&mut self, appointment_id: AppointmentId, slot: Slot) {
        if self.held.insert(appointment_id, slot).is_some() {
            return;
        }
        self.by_start.entry(slot.start).or_default().push(appointment_id);
        *self.durations.entry(slot.duration_minutes).or_default() += 1;
    }

    fn drop_hold(&mut self, appointment_id: AppointmentId) {
        let Some(slot) = self.held.remove(&appointment_id) else {
            return;
        };
        if let Some(bucket) = self.by_start.get_mut(&slot.start) {
            bucket.retain(|id| *id != appointment_id);
            if bucket.is_empty() {
                self.by_start.remove(&slot.start);
            }
        }
        if let Some(count) = self.durations.get_mut(&slot.duration_minutes) {
            *count -= 1;
            if *count == 0 {
                self.durations.remove(&slot.duration_minutes);
            }
        }
    }
}

impl CalendarSource for ProviderSchedule {
    fn active_slots(&self, provider_id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<BookedSlot> {
        if provider_id != self.provider_id || from > to {
            return vec![];
        }
        self.by_start
            .range(from..=to)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| {
                self.held.get(id).map(|slot| BookedSlot {
                    appointment_id: *id,
                    slot: *slot,
                })
            })
            .collect()
    }

    fn longest_active_duration(&self, provider_id: UserId) -> u32 {
        if provider_id != self.provider_id {
            return 0;
        }
        self.durations.keys().next_back().copied().unwrap_or(0)
    }
}

impl AggregateRoot for ProviderSchedule {
    type Id = ProviderScheduleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveSlot {
    pub provider_id: UserId,
    pub appointment_id: AppointmentId,
    pub slot: Slot,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSlot {
    pub provider_id: UserId,
    pub appointment_id: AppointmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleCommand {
    Reserve(ReserveSlot),
    Release(ReleaseSlot),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReserved {
    pub provider_id: UserId,
    pub appointment_id: AppointmentId,
    pub slot: Slot,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotReleased {
    pub provider_id: UserId,
    pub appointment_id: AppointmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    Reserved(SlotReserved),
    Released(SlotReleased),
}

impl Event for ScheduleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ScheduleEvent::Reserved(_) => "scheduling.schedule.slot_reserved",
            ScheduleEvent::Released(_) => "scheduling.schedule.slot_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleEvent::Reserved(e) => e.occurred_at,
            ScheduleEvent::Released(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ProviderSchedule {
    type Command = ScheduleCommand;
    type Event = ScheduleEvent;
    type Error = AppointmentError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ScheduleEvent::Reserved(e) => self.hold(e.appointment_id, e.slot),
            ScheduleEvent::Released(e) => self.drop_hold(e.appointment_id),
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ScheduleCommand::Reserve(cmd) => {
                self.ensure_provider(cmd.provider_id)?;
                if cmd.slot.duration_minutes == 0 {
                    return Err(DomainError::validation("duration_minutes must be positive").into());
                }
                match self.held.get(&cmd.appointment_id) {
                    Some(slot) if *slot == cmd.slot => return Ok(vec![]),
                    Some(_) => {
                        return Err(DomainError::invariant("appointment already holds a different slot").into());
                    }
                    None => {}
                }
                self.check(&cmd.slot)?;

                Ok(vec![ScheduleEvent::Reserved(SlotReserved {
                    provider_id: cmd.provider_id,
                    appointment_id: cmd.appointment_id,
                    slot: cmd.slot,
                    occurred_at: cmd.occurred_at,
                })])
            }
            ScheduleCommand::Release(cmd) => {
                self.ensure_provider(cmd.provider_id)?;
                if !self.holds(cmd.appointment_id) {
                    return Ok(vec![]);
                }
                Ok(vec![ScheduleEvent::Released(SlotReleased {
                    provider_id: cmd.provider_id,
                    appointment_id: cmd.appointment_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl ProviderSchedule {
    fn ensure_provider(&self, provider_id: UserId) -> Result<(), DomainError> {
        if provider_id != self.provider_id {
            return Err(DomainError::invariant("provider_id mismatch"));
        }
        Ok(())
    }
}
