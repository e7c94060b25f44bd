//! The group key-agreement engine.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use std::{collections::HashMap, fmt};

use rand::{CryptoRng, RngCore};
use tracing::{debug, error, info, instrument};

use crate::{
    crypto::CycleCrypto,
    cycle::CycleRecord,
    errors::{CallerError, InternalError, Result},
    messages::{CycleHeader, Message, Payload},
    protocol::{ParticipantId, SessionKey, Step},
    roster::Roster,
};

/// The injected broadcast sink.
///
/// The engine hands every outbound protocol message to this sink exactly
/// once; delivering it to all other session participants is the transport's
/// job. The call is fire-and-forget.
pub trait Broadcaster {
    /// Broadcast a protocol message to the rest of the session.
    fn broadcast(&mut self, message: Message);
}

/// Observer for changes of the engine's coarse [`Step`].
///
/// Notified only when the value actually changes, after the engine state is
/// already updated. Fire-and-forget: no queueing, and the callback must not
/// re-enter the engine.
pub trait StepListener {
    /// Called with the new step value.
    fn on_step_change(&mut self, step: Step);
}

impl<F: FnMut(Step)> StepListener for F {
    fn on_step_change(&mut self, step: Step) {
        (self)(step)
    }
}

/**
A participant in the cyclic group key-agreement protocol.

Each member of a peer-to-peer session runs one instance. Instances ingest
membership updates and inbound protocol messages, broadcast their own
contributions through the injected [`Broadcaster`], and converge on a shared
symmetric key without a trusted party.

# Inputs
- `set_my_id`, `add_member`, `delete_member` from the membership
  collaborator;
- `process_message` for every protocol message the transport delivers,
  together with the sender's id;
- `start` on the elected initiator (smallest id in the roster) to begin a
  rekey cycle.

# Outputs
- broadcast messages through the [`Broadcaster`];
- the installed [`SessionKey`] (with the superseded one kept reachable in
  `previous_key`);
- coarse [`Step`] transitions through the optional [`StepListener`].

All operations are non-reentrant with respect to one instance; the
surrounding runtime serializes calls.
**/
pub struct Participant<C: CycleCrypto> {
    /// This participant's id, fixed by the first `set_my_id` call.
    my_id: Option<ParticipantId>,
    /// The locally-observed session membership.
    roster: Roster,
    /// Cycles currently in flight, keyed by initiator.
    cycles: HashMap<ParticipantId, CycleRecord<C::Scalar>>,
    /// Coarse public phase of the whole instance.
    step: Step,
    key: Option<SessionKey<C::Key>>,
    previous_key: Option<SessionKey<C::Key>>,
    /// Rekey counter for cycles this participant initiates. Monotone over
    /// the lifetime of the instance.
    my_counter: u64,
    sink: Box<dyn Broadcaster + Send>,
    step_listener: Option<Box<dyn StepListener + Send>>,
}

impl<C: CycleCrypto> Participant<C> {
    /// Create an idle instance that broadcasts through `sink`.
    pub fn new(sink: Box<dyn Broadcaster + Send>) -> Self {
        Self {
            my_id: None,
            roster: Roster::default(),
            cycles: HashMap::new(),
            step: Step::Initialized,
            key: None,
            previous_key: None,
            my_counter: 0,
            sink,
            step_listener: None,
        }
    }

    /// Register the step observer.
    pub fn set_step_listener(&mut self, listener: Box<dyn StepListener + Send>) {
        self.step_listener = Some(listener);
    }

    /// Record this participant's own id and add it to the roster.
    ///
    /// The first call wins; later calls are no-ops.
    #[instrument(skip_all)]
    pub fn set_my_id(&mut self, id: ParticipantId) {
        if self.my_id.is_some() {
            debug!("Participant id is already set; ignoring");
            return;
        }
        info!("Assuming participant id {id}");
        self.my_id = Some(id);
        let _ = self.roster.insert(id);
    }

    /// This participant's id, if `set_my_id` has been called.
    pub fn my_id(&self) -> Option<ParticipantId> {
        self.my_id
    }

    /// The locally-observed membership, sorted ascending.
    pub fn roster(&self) -> &[ParticipantId] {
        self.roster.ids()
    }

    /// Whether this participant is the elected initiator, i.e. holds the
    /// smallest id in the local roster. Recomputed from the roster on every
    /// call.
    pub fn is_initiator(&self) -> bool {
        match (self.my_id, self.roster.min()) {
            (Some(me), Some(min)) => me <= min,
            _ => false,
        }
    }

    /// The coarse public phase of this instance.
    pub fn step(&self) -> Step {
        self.step
    }

    /// The currently-installed session key.
    pub fn key(&self) -> Option<&SessionKey<C::Key>> {
        self.key.as_ref()
    }

    /// The session key that was current before the last rekey.
    pub fn previous_key(&self) -> Option<&SessionKey<C::Key>> {
        self.previous_key.as_ref()
    }

    /// Number of cycles currently in flight.
    pub fn pending_cycles(&self) -> usize {
        self.cycles.len()
    }

    /// Record that `id` is now present in the session.
    #[instrument(skip_all)]
    pub fn add_member(&mut self, id: ParticipantId) -> Result<()> {
        if self.roster.insert(id) {
            info!("Member {id} joined; roster is now {:?}", self.roster.ids());
        }
        self.recheck_cycles()
    }

    /// Record that `id` has left the session.
    #[instrument(skip_all)]
    pub fn delete_member(&mut self, id: ParticipantId) -> Result<()> {
        if self.roster.remove(id) {
            info!("Member {id} left; roster is now {:?}", self.roster.ids());
        }
        self.recheck_cycles()
    }

    /// Begin a new rekey cycle over the current roster.
    ///
    /// Only the elected initiator may call this, and only while the roster
    /// holds at least two members; violating either is a caller error.
    #[instrument(skip_all)]
    pub fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        let my_id = self.my_id.ok_or(CallerError::ParticipantIdNotSet)?;
        if !self.is_initiator() {
            error!("start() called by participant {my_id}, which is not the elected initiator");
            Err(CallerError::NotTheInitiator)?;
        }
        if self.roster.len() < 2 {
            error!("Refusing to start a key-agreement cycle with fewer than two members");
            Err(CallerError::NotEnoughMembers)?;
        }

        let counter = self.my_counter + 1;
        if self
            .cycles
            .get(&my_id)
            .is_some_and(|cycle| cycle.counter() >= counter)
        {
            error!("A cycle with counter {counter} is already in flight for this initiator");
            return Err(InternalError::InternalInvariantFailed);
        }
        self.my_counter = counter;

        let r = C::generate_ri(rng)?;
        let z = C::compute_zi(&r)?;
        let members = self.roster.ids().to_vec();
        let mut cycle = CycleRecord::new(my_id, counter, members, r);
        // The initiator owns the smallest id, so it sits at the head of the
        // sorted membership snapshot.
        let position = cycle
            .position_of(my_id)
            .ok_or(InternalError::InternalInvariantFailed)?;
        cycle.store_z(my_id, position, z.clone())?;
        info!(
            "Starting cycle ({my_id}, {counter}) over {:?}",
            cycle.members()
        );
        debug!(cycle = ?cycle, "Cycle installed");

        let header = cycle.header();
        let _ = self.cycles.insert(my_id, cycle);
        self.sink.broadcast(Message::z(header, z));
        self.set_step(Step::WaitingZ);
        Ok(())
    }

    /// Ingest one inbound protocol message. The transport supplies the
    /// sender's id alongside.
    #[instrument(skip_all)]
    pub fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        from: ParticipantId,
        message: &Message,
    ) -> Result<()> {
        let my_id = self.my_id.ok_or(CallerError::ParticipantIdNotSet)?;
        let header = message.header();
        info!(
            "Participant {my_id}: received {} for cycle ({}, {}) from {from}",
            message.payload().kind(),
            header.id,
            header.counter,
        );

        // Lazy record creation: any message for a counter newer than what
        // the table holds declares a cycle we have not joined yet. The
        // envelope is authoritative.
        let joins_new_cycle = match self.cycles.get(&header.id) {
            Some(cycle) => cycle.counter() < header.counter,
            None => !self.already_rekeyed(header),
        };
        if joins_new_cycle {
            let Some(position) = header.members.iter().position(|&member| member == my_id) else {
                debug!(
                    "Declared members {:?} do not include this participant; ignoring",
                    header.members
                );
                return Ok(());
            };
            let r = C::generate_ri(rng)?;
            let z = C::compute_zi(&r)?;
            let mut cycle =
                CycleRecord::new(header.id, header.counter, header.members.clone(), r);
            cycle.store_z(my_id, position, z.clone())?;
            debug!(cycle = ?cycle, "Joined cycle from inbound envelope");
            // A record for an older counter from the same initiator, if
            // any, is dropped whole.
            let _ = self.cycles.insert(header.id, cycle);
            self.sink.broadcast(Message::z(header.clone(), z));
            self.set_step(Step::WaitingZ);
        }

        let Some(cycle) = self.cycles.get_mut(&header.id) else {
            debug!(
                "No cycle in flight for initiator {}; dropping payload",
                header.id
            );
            return Ok(());
        };
        if header.counter < cycle.counter() {
            debug!(
                "Stale counter {} (cycle is at {}); dropping payload",
                header.counter,
                cycle.counter()
            );
            return Ok(());
        }
        let Some(position) = cycle.position_of(from) else {
            error!(
                "Sender {from} is not among the declared members of cycle ({}, {})",
                header.id,
                cycle.counter()
            );
            return Err(InternalError::ProtocolError(Some(from)));
        };

        match message.payload() {
            Payload::Z(bytes) => {
                cycle.store_z(from, position, bytes.clone())?;
                debug!(cycle = ?cycle, "Stored Z value");
                self.try_advance_z(header.id)
            }
            Payload::X(bytes) => {
                cycle.store_x(from, position, bytes.clone())?;
                debug!(cycle = ?cycle, "Stored X value");
                self.try_advance_x(header.id)
            }
        }
    }

    /// Whether an installed key already covers the cycle a message refers
    /// to. Such stragglers have no record to land in and are dropped.
    fn already_rekeyed(&self, header: &CycleHeader) -> bool {
        [self.key.as_ref(), self.previous_key.as_ref()]
            .into_iter()
            .flatten()
            .any(|key| key.initiator() == header.id && key.counter() >= header.counter)
    }

    /// A cycle may only advance once every member its initiator declared is
    /// locally visible.
    fn roster_covers(&self, members: &[ParticipantId]) -> bool {
        self.roster.len() >= members.len() && self.roster.contains_all(members)
    }

    /// Re-run the ripeness checks for every in-flight cycle after a roster
    /// change. A cycle that was waiting for a declared member to become
    /// locally visible is unblocked here.
    fn recheck_cycles(&mut self) -> Result<()> {
        if self.is_initiator() {
            return Ok(());
        }
        if !matches!(self.step, Step::WaitingZ | Step::WaitingX) {
            return Ok(());
        }
        let my_id = self.my_id.ok_or(InternalError::InternalInvariantFailed)?;

        let initiators: Vec<ParticipantId> = self.cycles.keys().copied().collect();
        for initiator in initiators {
            // A record that already holds our X contribution is waiting on
            // the X round; everything else is still in the Z round.
            let awaiting_x = match self.cycles.get(&initiator) {
                Some(cycle) => cycle
                    .position_of(my_id)
                    .and_then(|position| cycle.x(position))
                    .is_some(),
                None => continue,
            };
            if awaiting_x {
                self.try_advance_x(initiator)?;
            } else {
                self.try_advance_z(initiator)?;
            }
        }
        Ok(())
    }

    /// Advance one cycle out of the Z round if it is ripe: the declared
    /// members are all locally visible and every Z slot is filled. Computes
    /// and broadcasts this participant's X value, then immediately attempts
    /// the X round, which may already be complete under out-of-order
    /// delivery.
    fn try_advance_z(&mut self, initiator: ParticipantId) -> Result<()> {
        let my_id = self.my_id.ok_or(InternalError::InternalInvariantFailed)?;

        let (x, position, header) = {
            let Some(cycle) = self.cycles.get(&initiator) else {
                return Ok(());
            };
            let Some(position) = cycle.position_of(my_id) else {
                return Ok(());
            };
            if !self.roster_covers(cycle.members()) {
                debug!(cycle = ?cycle, "Not ripe: declared members are not all locally visible");
                return Ok(());
            }
            if !cycle.z_complete() {
                debug!(cycle = ?cycle, "Not ripe: Z values outstanding");
                return Ok(());
            }

            let z_right = cycle
                .z(cycle.right_of(position))
                .ok_or(InternalError::InternalInvariantFailed)?;
            let z_left = cycle
                .z(cycle.left_of(position))
                .ok_or(InternalError::InternalInvariantFailed)?;
            let x = C::compute_xi(cycle.r(), z_right, z_left)?;
            (x, position, cycle.header())
        };

        let cycle = self
            .cycles
            .get_mut(&initiator)
            .ok_or(InternalError::InternalInvariantFailed)?;
        // Write-once: a second X contribution for the same cycle is a bug.
        cycle.store_x(my_id, position, x.clone())?;
        info!(
            "Cycle ({}, {}): Z round complete, broadcasting X",
            header.id, header.counter
        );

        self.sink.broadcast(Message::x(header, x));
        self.set_step(Step::WaitingX);
        self.try_advance_x(initiator)
    }

    /// Finish one cycle if it is ripe: the declared members are all locally
    /// visible and every X slot is filled. Derives the session key, rolls
    /// the key slots forward, and deletes the record, after which the cycle
    /// cannot be re-entered.
    fn try_advance_x(&mut self, initiator: ParticipantId) -> Result<()> {
        let my_id = self.my_id.ok_or(InternalError::InternalInvariantFailed)?;

        let (key, counter) = {
            let Some(cycle) = self.cycles.get(&initiator) else {
                return Ok(());
            };
            let Some(position) = cycle.position_of(my_id) else {
                return Ok(());
            };
            if !self.roster_covers(cycle.members()) {
                debug!(cycle = ?cycle, "Not ripe: declared members are not all locally visible");
                return Ok(());
            }
            if !cycle.x_complete() {
                debug!(cycle = ?cycle, "Not ripe: X values outstanding");
                return Ok(());
            }

            let z_left = cycle
                .z(cycle.left_of(position))
                .ok_or(InternalError::InternalInvariantFailed)?;
            let x_self = cycle
                .x(position)
                .ok_or(InternalError::InternalInvariantFailed)?;
            let x_array = cycle.x_values()?;
            let shared = C::compute_shared_secret(cycle.r(), x_self, z_left, &x_array)?;
            (C::derive_key(shared)?, cycle.counter())
        };

        if let Some(superseded) = self.key.take() {
            self.previous_key = Some(superseded);
        }
        self.key = Some(SessionKey::new(initiator, counter, key));
        // The record is deleted only once the key is installed; from here on
        // the cycle cannot be re-entered.
        let _ = self
            .cycles
            .remove(&initiator)
            .ok_or(InternalError::InternalInvariantFailed)?;
        info!("Cycle ({initiator}, {counter}) complete; session key installed");
        self.set_step(Step::Ready);
        Ok(())
    }

    /// Publish a step transition, notifying the listener only when the
    /// value actually changes.
    fn set_step(&mut self, step: Step) {
        if self.step == step {
            return;
        }
        debug!(previous = ?self.step, next = ?step, "Step transition");
        self.step = step;
        if let Some(listener) = self.step_listener.as_mut() {
            listener.on_step_change(step);
        }
    }
}

impl<C: CycleCrypto> fmt::Debug for Participant<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("my_id", &self.my_id)
            .field("roster", &self.roster)
            .field("step", &self.step)
            .field("cycles", &self.cycles)
            .field("my_counter", &self.my_counter)
            .finish_non_exhaustive()
    }
}
