//! Per-initiator cycle records.
//!
//! Each record is an independent mini state machine: a snapshot of the
//! membership the initiator declared, this participant's private scalar for
//! the cycle, and two arrays of write-once slots collecting the public Z and
//! X values as they arrive. Records live in the engine's cycle table from
//! creation until the derived key is installed.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    errors::{InternalError, Result},
    messages::CycleHeader,
    protocol::ParticipantId,
};
use std::fmt;
use tracing::error;

/// State of one key-agreement cycle, keyed in the engine by its initiator.
///
/// The slot arrays are indexed by position in `members`; their lengths are
/// fixed at creation and always agree with the membership snapshot. Each
/// slot moves from empty to filled at most once.
pub(crate) struct CycleRecord<S> {
    initiator: ParticipantId,
    counter: u64,
    members: Vec<ParticipantId>,
    r: S,
    z_slots: Vec<Option<Vec<u8>>>,
    x_slots: Vec<Option<Vec<u8>>>,
}

impl<S> CycleRecord<S> {
    pub(crate) fn new(
        initiator: ParticipantId,
        counter: u64,
        members: Vec<ParticipantId>,
        r: S,
    ) -> Self {
        let size = members.len();
        Self {
            initiator,
            counter,
            members,
            r,
            z_slots: vec![None; size],
            x_slots: vec![None; size],
        }
    }

    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    pub(crate) fn members(&self) -> &[ParticipantId] {
        &self.members
    }

    pub(crate) fn r(&self) -> &S {
        &self.r
    }

    /// The initiator envelope for outbound messages about this cycle.
    pub(crate) fn header(&self) -> CycleHeader {
        CycleHeader {
            id: self.initiator,
            counter: self.counter,
            members: self.members.clone(),
        }
    }

    /// Position of `id` in the declared membership, if it is part of it.
    pub(crate) fn position_of(&self, id: ParticipantId) -> Option<usize> {
        self.members.iter().position(|&member| member == id)
    }

    /// Index of the left neighbor of position `i` in the cycle.
    pub(crate) fn left_of(&self, i: usize) -> usize {
        let size = self.members.len();
        (size + i - 1) % size
    }

    /// Index of the right neighbor of position `i` in the cycle.
    pub(crate) fn right_of(&self, i: usize) -> usize {
        (i + 1) % self.members.len()
    }

    /// Store the Z value contributed by `sender` at `position`.
    ///
    /// Slots are write-once; a second write for the same position is a
    /// protocol violation by the sender.
    pub(crate) fn store_z(
        &mut self,
        sender: ParticipantId,
        position: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        Self::store(&mut self.z_slots, sender, position, bytes)
    }

    /// Store the X value contributed by `sender` at `position`. Write-once,
    /// like [`store_z`](Self::store_z).
    pub(crate) fn store_x(
        &mut self,
        sender: ParticipantId,
        position: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        Self::store(&mut self.x_slots, sender, position, bytes)
    }

    fn store(
        slots: &mut [Option<Vec<u8>>],
        sender: ParticipantId,
        position: usize,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let slot = slots.get_mut(position).ok_or_else(|| {
            error!("Slot index {position} out of range for cycle arrays");
            InternalError::InternalInvariantFailed
        })?;
        if slot.is_some() {
            error!("Received a second value from participant {sender} for the same cycle slot");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        *slot = Some(bytes);
        Ok(())
    }

    pub(crate) fn z(&self, position: usize) -> Option<&[u8]> {
        self.z_slots.get(position)?.as_deref()
    }

    pub(crate) fn x(&self, position: usize) -> Option<&[u8]> {
        self.x_slots.get(position)?.as_deref()
    }

    pub(crate) fn z_complete(&self) -> bool {
        self.z_slots.iter().all(Option::is_some)
    }

    pub(crate) fn x_complete(&self) -> bool {
        self.x_slots.iter().all(Option::is_some)
    }

    /// All X values in cycle order. Fails if any slot is still empty.
    pub(crate) fn x_values(&self) -> Result<Vec<Vec<u8>>> {
        self.x_slots
            .iter()
            .map(|slot| slot.clone().ok_or(InternalError::InternalInvariantFailed))
            .collect()
    }

    fn filled(slots: &[Option<Vec<u8>>]) -> usize {
        slots.iter().filter(|slot| slot.is_some()).count()
    }
}

// The private scalar stays out of the cycle snapshots that reach the logs.
impl<S> fmt::Debug for CycleRecord<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleRecord")
            .field("initiator", &self.initiator)
            .field("counter", &self.counter)
            .field("members", &self.members)
            .field(
                "z",
                &format_args!("{}/{}", Self::filled(&self.z_slots), self.z_slots.len()),
            )
            .field(
                "x",
                &format_args!("{}/{}", Self::filled(&self.x_slots), self.x_slots.len()),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ParticipantId {
        ParticipantId::new(n)
    }

    fn record() -> CycleRecord<u64> {
        CycleRecord::new(id(1), 3, vec![id(1), id(2), id(5)], 0u64)
    }

    #[test]
    fn arrays_match_membership_size() {
        let record = record();
        assert_eq!(record.members().len(), 3);
        assert!(!record.z_complete());
        assert!(!record.x_complete());
        assert_eq!(record.position_of(id(5)), Some(2));
        assert_eq!(record.position_of(id(4)), None);
    }

    #[test]
    fn slots_are_write_once() {
        let mut record = record();
        record.store_z(id(2), 1, vec![1]).unwrap();
        let second = record.store_z(id(2), 1, vec![2]);
        assert_eq!(second, Err(InternalError::ProtocolError(Some(id(2)))));
        // The original value survives the rejected overwrite.
        assert_eq!(record.z(1), Some(&[1u8][..]));
    }

    #[test]
    fn completeness_tracks_every_slot() {
        let mut record = record();
        for (position, member) in [(0, 1u64), (1, 2), (2, 5)] {
            assert!(!record.z_complete());
            record.store_z(id(member), position, vec![member as u8]).unwrap();
        }
        assert!(record.z_complete());
        assert!(record.x_values().is_err());
        for (position, member) in [(0, 1u64), (1, 2), (2, 5)] {
            record.store_x(id(member), position, vec![member as u8]).unwrap();
        }
        assert_eq!(record.x_values().unwrap().len(), 3);
    }

    #[test]
    fn neighbor_indices_wrap_around() {
        let record = record();
        assert_eq!(record.left_of(0), 2);
        assert_eq!(record.right_of(0), 1);
        assert_eq!(record.left_of(2), 1);
        assert_eq!(record.right_of(2), 0);
    }
}
